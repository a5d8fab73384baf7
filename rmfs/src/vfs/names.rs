//! Visible filenames.
//!
//! Extensions are synthesized from the active mode and are never stored
//! remotely, so resolving a name means projecting every sibling and comparing.

use super::mode::{CONTROL_NAME, FsMode, Projection};
use super::node::Node;
use crate::error::{FsError, FsResult};
use crate::store::ItemStore;

/// Filename of `node` under `mode`.
pub fn projected_name(node: &Node, mode: FsMode) -> String {
    let Some(file_type) = node.document_type() else {
        return node.name().to_string();
    };
    let base = node.name();
    match mode.projection(file_type) {
        Projection::Metadata => base.to_string(),
        Projection::Raw => format!("{base}.zip"),
        Projection::Annotated => format!("{base}.pdf"),
        Projection::Original => format!("{base}.{file_type}"),
    }
}

/// Strip the last extension: `doc.pdf` -> `doc`, `a.b.c` -> `a.b`.
/// Names without a dot, or with only a leading dot, are returned as-is.
pub fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

/// Resolve `name` inside directory `parent`.
///
/// `.` and `..` resolve to the directory and its parent (`NotFound` at the
/// root). Otherwise children are scanned in store order and the first one
/// whose projected name matches wins; `Ok(None)` means no match.
pub async fn resolve<S: ItemStore + ?Sized>(
    store: &S,
    parent: &Node,
    name: &str,
    mode: FsMode,
) -> FsResult<Option<Node>> {
    match name {
        "." => return Ok(Some(parent.clone())),
        ".." => {
            let Some(grand) = parent.parent() else {
                return Err(FsError::NotFound(format!("{:?} has no parent", parent.id())));
            };
            return Ok(Some(Node::Item(store.get_by_id(grand).await?)));
        }
        _ => {}
    }

    if parent.is_root() && name == CONTROL_NAME {
        return Ok(Some(Node::Control));
    }
    if !parent.is_dir() {
        return Ok(None);
    }

    let children = store.children(parent.id()).await?;
    Ok(children
        .into_iter()
        .map(Node::Item)
        .find(|child| projected_name(child, mode) == name))
}

//! POSIX-style attributes synthesized from store items.

use std::time::SystemTime;

use super::mode::{FsMode, ModeController, Projection};
use super::node::Node;
use crate::error::FsResult;
use crate::store::ItemStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attr {
    pub ino: u64,
    pub kind: NodeKind,
    pub perm: u16,
    pub size: u64,
    /// Reported as atime, mtime and ctime alike.
    pub mtime: SystemTime,
}

impl Attr {
    /// A file being written: size is always 0 until the upload lands.
    pub fn staged(ino: u64) -> Self {
        Self {
            ino,
            kind: NodeKind::File,
            perm: 0o644,
            size: 0,
            mtime: SystemTime::now(),
        }
    }
}

/// Attributes for `node` under `mode`. Document sizes come from the store.
pub async fn project<S: ItemStore + ?Sized>(
    store: &S,
    control: &ModeController,
    ino: u64,
    node: &Node,
    mode: FsMode,
) -> FsResult<Attr> {
    let mtime = node.mtime();
    match node {
        Node::Control => Ok(Attr {
            ino,
            kind: NodeKind::File,
            perm: 0o644,
            size: control.size().await,
            mtime,
        }),
        Node::Item(item) => match item.file_type() {
            None => Ok(Attr {
                ino,
                kind: NodeKind::Dir,
                perm: 0o755,
                size: 0,
                mtime,
            }),
            Some(file_type) => {
                let size = match mode.projection(file_type) {
                    Projection::Metadata => 0,
                    Projection::Raw => store.raw_size(item).await?,
                    Projection::Annotated => store.annotated_size(item).await?,
                    Projection::Original => store.size(item).await?,
                };
                Ok(Attr {
                    ino,
                    kind: NodeKind::File,
                    perm: 0o444,
                    size,
                    mtime,
                })
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::{FileType, ROOT_ID};
    use crate::vfs::mode::ModeCell;

    #[tokio::test]
    async fn document_size_follows_mode() {
        let store = MemoryStore::new();
        let id = store
            .add_document("n", ROOT_ID, FileType::Notes, &b"orig-bytes"[..])
            .await;
        store.set_raw(&id, &b"raw"[..]).await;
        store.set_annotated(&id, &b"%PDF-rendered"[..]).await;
        let node = Node::Item(store.get_by_id(&id).await.unwrap());
        let ctl = ModeController::new(ModeCell::new(FsMode::Annot));

        let size = |mode| {
            let (store, ctl, node) = (&store, &ctl, &node);
            async move { project(store, ctl, 7, node, mode).await.unwrap().size }
        };
        assert_eq!(size(FsMode::Meta).await, 0);
        assert_eq!(size(FsMode::Raw).await, 3);
        assert_eq!(size(FsMode::Annot).await, 13);
        // notebooks have no original, so orig serves the render
        assert_eq!(size(FsMode::Orig).await, 13);

        let attr = project(&store, &ctl, 7, &node, FsMode::Raw).await.unwrap();
        assert_eq!(attr.kind, NodeKind::File);
        assert_eq!(attr.perm, 0o444);
        assert_eq!(attr.ino, 7);
    }

    #[tokio::test]
    async fn pdf_orig_uses_original_size() {
        let store = MemoryStore::new();
        let id = store
            .add_document("p", ROOT_ID, FileType::Pdf, &b"%PDF-1.7 body"[..])
            .await;
        let node = Node::Item(store.get_by_id(&id).await.unwrap());
        let ctl = ModeController::new(ModeCell::default());
        let attr = project(&store, &ctl, 3, &node, FsMode::Orig).await.unwrap();
        assert_eq!(attr.size, 13);
    }

    #[tokio::test]
    async fn folders_and_control_file() {
        let store = MemoryStore::new();
        let ctl = ModeController::new(ModeCell::new(FsMode::Orig));
        let root = Node::Item(store.get_by_id(ROOT_ID).await.unwrap());

        let dir = project(&store, &ctl, 1, &root, FsMode::Orig).await.unwrap();
        assert_eq!((dir.kind, dir.size, dir.perm), (NodeKind::Dir, 0, 0o755));

        let mode = project(&store, &ctl, 2, &Node::Control, FsMode::Orig)
            .await
            .unwrap();
        assert_eq!(mode.size, "orig\n".len() as u64);
        assert_eq!(mode.perm, 0o644);
    }

    #[test]
    fn staged_files_report_zero() {
        let a = Attr::staged(9);
        assert_eq!((a.size, a.kind), (0, NodeKind::File));
    }
}

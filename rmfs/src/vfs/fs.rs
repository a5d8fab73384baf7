//! Runtime-independent filesystem operations over an [`ItemStore`].
//!
//! Every method maps to one filesystem call and reports failures as
//! [`FsError`]; the FUSE binding only converts arguments and errno values.
//! Locks guard synchronous bookkeeping and are never held across a store call.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::attr::{self, Attr};
use super::handles::{Closed, HandleTable};
use super::inode::{CONTROL_ID, InodeRegistry};
use super::mode::{CONTROL_NAME, ControlCommand, FsMode, ModeCell, ModeController, Projection};
use super::names::{self, projected_name, strip_extension};
use super::node::Node;
use super::read::ReadSession;
use super::write::WriteSession;
use crate::error::{FsError, FsResult, StoreError};
use crate::render::RenderConfig;
use crate::store::{Item, ItemStore};

pub const BLOCK_SIZE: u32 = 4096;
const TOTAL_BYTES: u64 = 1 << 32;
const TOTAL_FILES: u64 = 1_000_000;
const NAME_MAX: u32 = 255;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub name: String,
    /// Offset of the next entry; pass it back to resume the listing.
    pub offset: u64,
    pub attr: Attr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatFs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub frsize: u32,
    pub namelen: u32,
}

/// Attribute changes a client asked for. Only logged; nothing is applied.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttrChanges {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: bool,
    pub mtime: bool,
}

pub struct RemoteFs<S: ItemStore> {
    store: Arc<S>,
    control: ModeController,
    render: RenderConfig,
    inodes: Mutex<InodeRegistry>,
    handles: Mutex<HandleTable>,
    /// Documents between last close and upload completion, keyed by inode.
    uploading: Mutex<HashMap<u64, Item>>,
}

impl<S: ItemStore> RemoteFs<S> {
    pub fn new(store: Arc<S>, mode: ModeCell, render: RenderConfig) -> Self {
        Self {
            store,
            control: ModeController::new(mode),
            render,
            inodes: Mutex::new(InodeRegistry::new()),
            handles: Mutex::new(HandleTable::new()),
            uploading: Mutex::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> &ModeCell {
        self.control.cell()
    }

    async fn id_of(&self, ino: u64) -> FsResult<String> {
        self.inodes.lock().await.id_of(ino)
    }

    async fn inode_of(&self, id: &str) -> u64 {
        self.inodes.lock().await.inode_of(id)
    }

    /// Resolve an id, falling back to documents that are still local.
    async fn node_by_id(&self, id: &str) -> FsResult<Node> {
        if id == CONTROL_ID {
            return Ok(Node::Control);
        }
        match self.store.get_by_id(id).await {
            Ok(item) => Ok(Node::Item(item)),
            Err(StoreError::NotFound(_)) => {
                if let Some(doc) = self.handles.lock().await.pending(id) {
                    return Ok(Node::Item(doc.clone()));
                }
                let uploading = self
                    .uploading
                    .lock()
                    .await
                    .values()
                    .find(|doc| doc.id == id)
                    .cloned();
                if let Some(doc) = uploading {
                    warn!(id, "item resolved while its upload is in flight");
                    return Ok(Node::Item(doc));
                }
                error!(id, "attempt to get non-existent item");
                Err(FsError::NotFound(id.to_string()))
            }
            Err(e) => {
                error!(id, error = %e, "store lookup failed");
                Err(e.into())
            }
        }
    }

    async fn node(&self, ino: u64) -> FsResult<Node> {
        let id = self.id_of(ino).await?;
        self.node_by_id(&id).await
    }

    async fn dir_node(&self, ino: u64) -> FsResult<Node> {
        let node = self.node(ino).await?;
        if !node.is_dir() {
            return Err(FsError::NotADirectory(projected_name(&node, FsMode::Meta)));
        }
        Ok(node)
    }

    /// Written or uploading: the store has no content for it yet.
    async fn is_staged(&self, ino: u64) -> bool {
        self.handles.lock().await.is_writing(ino) || self.uploading.lock().await.contains_key(&ino)
    }

    async fn attr_with(&self, ino: u64, node: &Node, mode: FsMode) -> FsResult<Attr> {
        if self.is_staged(ino).await {
            return Ok(Attr::staged(ino));
        }
        attr::project(self.store.as_ref(), &self.control, ino, node, mode).await
    }

    async fn attr_of(&self, ino: u64, mode: FsMode) -> FsResult<Attr> {
        if self.is_staged(ino).await {
            return Ok(Attr::staged(ino));
        }
        let node = self.node(ino).await?;
        attr::project(self.store.as_ref(), &self.control, ino, &node, mode).await
    }

    async fn child(&self, parent: u64, name: &str, mode: FsMode) -> FsResult<Option<Node>> {
        let parent = self.node(parent).await?;
        names::resolve(self.store.as_ref(), &parent, name, mode).await
    }

    async fn materialize(&self, node: &Node, mode: FsMode) -> FsResult<Bytes> {
        let item = match node {
            Node::Control => return Ok(self.control.contents().await),
            Node::Item(item) => item,
        };
        let Some(file_type) = item.file_type() else {
            return Err(FsError::IsADirectory(item.name.clone()));
        };
        let data = match mode.projection(file_type) {
            Projection::Metadata => {
                let mut dump =
                    serde_json::to_vec(item).map_err(|e| FsError::Io(e.to_string()))?;
                dump.push(b'\n');
                Bytes::from(dump)
            }
            Projection::Raw => self.store.raw(item).await?,
            Projection::Annotated => self.store.annotated(item, &self.render).await?,
            Projection::Original => self.store.contents(item).await?,
        };
        Ok(data)
    }

    fn commit_error(op: &str, target: &str, e: StoreError) -> FsError {
        error!(op, target, error = %e, "store rejected change");
        e.into()
    }

    pub async fn lookup(&self, parent: u64, name: &str) -> FsResult<Attr> {
        let mode = self.mode().get().await;
        let Some(node) = self.child(parent, name, mode).await? else {
            return Err(FsError::NotFound(name.to_string()));
        };
        let ino = self.inode_of(node.id()).await;
        self.attr_with(ino, &node, mode).await
    }

    pub async fn getattr(&self, ino: u64) -> FsResult<Attr> {
        let mode = self.mode().get().await;
        self.attr_of(ino, mode).await
    }

    /// Accepted and ignored: some clients truncate before writing a new file.
    pub async fn setattr(&self, ino: u64, changes: &AttrChanges) -> FsResult<Attr> {
        debug!(ino, ?changes, "setattr requested, no changes made");
        self.getattr(ino).await
    }

    pub async fn readlink(&self, ino: u64) -> FsResult<Bytes> {
        debug!(ino, "readlink is not supported");
        Err(FsError::Unsupported)
    }

    pub async fn opendir(&self, ino: u64) -> FsResult<u64> {
        self.dir_node(ino).await?;
        Ok(ino)
    }

    /// List `ino` starting after `offset`: `.`, `..` (not at the root),
    /// `.mode` (root only), then children in store order.
    pub async fn readdir(&self, ino: u64, offset: u64) -> FsResult<Vec<DirEntry>> {
        let mode = self.mode().get().await;
        let dir = self.dir_node(ino).await?;

        let mut listing: Vec<(Node, String)> = vec![(dir.clone(), ".".to_string())];
        if let Some(parent) = dir.parent() {
            let parent = self.node_by_id(parent).await?;
            listing.push((parent, "..".to_string()));
        }
        if dir.is_root() {
            listing.push((Node::Control, CONTROL_NAME.to_string()));
        }
        for child in self.store.children(dir.id()).await? {
            let node = Node::Item(child);
            let name = projected_name(&node, mode);
            listing.push((node, name));
        }

        let mut entries = Vec::new();
        for (idx, (node, name)) in listing.into_iter().enumerate().skip(offset as usize) {
            let ino = self.inode_of(node.id()).await;
            let attr = self.attr_with(ino, &node, mode).await?;
            entries.push(DirEntry {
                ino,
                name,
                offset: idx as u64 + 1,
                attr,
            });
        }
        Ok(entries)
    }

    /// Open for reading (or the control file for writing). Content is fetched
    /// once per inode and shared by all descriptors until the last release.
    pub async fn open(&self, ino: u64, flags: u32) -> FsResult<u64> {
        debug!(ino, flags, "opening inode");
        let id = self.id_of(ino).await?;
        let accmode = flags & libc::O_ACCMODE as u32;
        if accmode != libc::O_RDONLY as u32 && id != CONTROL_ID {
            return Err(FsError::PermissionDenied(
                "existing documents cannot be written".into(),
            ));
        }

        if !self.handles.lock().await.has_read(ino) {
            let node = self.node_by_id(&id).await?;
            let mode = self.mode().get().await;
            let data = self.materialize(&node, mode).await?;
            let mut handles = self.handles.lock().await;
            if !handles.has_read(ino) {
                handles.insert_read(ino, ReadSession::new(data));
            }
        }
        Ok(self.handles.lock().await.open(ino))
    }

    pub async fn read(&self, fh: u64, offset: u64, size: u32) -> FsResult<Bytes> {
        debug!(fh, offset, size, "reading");
        let mut handles = self.handles.lock().await;
        let Some(session) = handles.read_mut(fh) else {
            error!(fh, "read on a handle without a buffer");
            return Err(FsError::NoData);
        };
        let data = session.read(offset, size)?;
        if data.is_empty() {
            debug!(fh, offset, "no data available");
        }
        Ok(data)
    }

    pub async fn write(&self, fh: u64, offset: u64, data: &[u8]) -> FsResult<u32> {
        debug!(fh, offset, len = data.len(), "writing");
        let id = self.id_of(fh).await?;
        if id == CONTROL_ID {
            match self.control.apply(data).await? {
                ControlCommand::Refresh => {
                    info!("refreshing remote cache");
                    self.store.invalidate_cache().await;
                }
                ControlCommand::SetMode(mode) => info!(%mode, "mode switched"),
            }
            return Ok(data.len() as u32);
        }

        let mut handles = self.handles.lock().await;
        match handles.write_mut(fh) {
            Some(session) => Ok(session.write(offset, data)? as u32),
            None => Err(FsError::PermissionDenied(format!(
                "inode {fh} is not open for writing"
            ))),
        }
    }

    /// Drop one descriptor. The last release of a staged file uploads it.
    ///
    /// The document moves from the handle table to the uploading table while
    /// the handle table is locked (lock order: handles, then uploading), so
    /// lookups by id find it at every point until the store has it.
    pub async fn release(&self, fh: u64) -> FsResult<()> {
        let (doc, data, file_type) = {
            let mut handles = self.handles.lock().await;
            let session = match handles.release(fh) {
                None => {
                    debug!(fh, "decremented handle count");
                    return Ok(());
                }
                Some(Closed::Write(session)) => session,
                Some(_) => {
                    debug!(fh, "released inode");
                    return Ok(());
                }
            };
            let file_type = session
                .sniff()
                .inspect_err(|e| error!(fh, error = %e, "refusing upload"))?;
            let (doc, data) = session.into_parts();
            self.uploading.lock().await.insert(fh, doc.clone());
            (doc, data, file_type)
        };
        debug!(fh, id = %doc.id, %file_type, len = data.len(), "uploading");

        let result = self.store.upload_document(&doc, data, file_type).await;
        self.uploading.lock().await.remove(&fh);
        result.map_err(|e| Self::commit_error("upload", &doc.name, e))
    }

    /// Start a new document. It exists only locally until its last release.
    pub async fn create(&self, parent: u64, name: &str) -> FsResult<(u64, Attr)> {
        let mode = self.mode().get().await;
        let dir = self.dir_node(parent).await?;
        if names::resolve(self.store.as_ref(), &dir, name, mode)
            .await?
            .is_some()
        {
            return Err(FsError::AlreadyExists(name.to_string()));
        }

        let base = strip_extension(name);
        let ext = name[base.len()..].trim_start_matches('.');
        if !matches!(ext, "pdf" | "epub") {
            warn!(name, "created file is not a PDF or EPUB, its upload will fail");
        }

        let doc = Item::new_document(base, dir.id());
        let ino = self.inode_of(&doc.id).await;
        debug!(name, base, ino, id = %doc.id, "created document");
        let mut handles = self.handles.lock().await;
        handles.insert_write(ino, WriteSession::new(doc));
        let fh = handles.open(ino);
        Ok((fh, Attr::staged(ino)))
    }

    pub async fn mkdir(&self, parent: u64, name: &str) -> FsResult<Attr> {
        debug!(parent, name, "making directory");
        let mode = self.mode().get().await;
        let dir = self.dir_node(parent).await?;
        if names::resolve(self.store.as_ref(), &dir, name, mode)
            .await?
            .is_some()
        {
            return Err(FsError::AlreadyExists(name.to_string()));
        }

        let folder = Item::new_folder(name, dir.id());
        self.store
            .upload_folder(&folder)
            .await
            .map_err(|e| Self::commit_error("mkdir", name, e))?;
        let ino = self.inode_of(&folder.id).await;
        self.attr_with(ino, &Node::Item(folder), mode).await
    }

    pub async fn unlink(&self, parent: u64, name: &str) -> FsResult<()> {
        debug!(parent, name, "unlinking");
        let mode = self.mode().get().await;
        let Some(node) = self.child(parent, name, mode).await? else {
            return Err(FsError::NotFound(name.to_string()));
        };
        if node.is_dir() {
            return Err(FsError::IsADirectory(name.to_string()));
        }
        if node.is_virtual() {
            return Err(FsError::PermissionDenied(format!("cannot delete {name}")));
        }
        let Some(item) = node.into_item() else {
            return Err(FsError::NotFound(name.to_string()));
        };
        self.store
            .delete(&item)
            .await
            .map_err(|e| Self::commit_error("unlink", name, e))
    }

    pub async fn rmdir(&self, parent: u64, name: &str) -> FsResult<()> {
        debug!(parent, name, "removing directory");
        let mode = self.mode().get().await;
        let Some(node) = self.child(parent, name, mode).await? else {
            return Err(FsError::NotFound(name.to_string()));
        };
        if !node.is_dir() {
            return Err(FsError::NotADirectory(name.to_string()));
        }
        let Some(item) = node.into_item() else {
            return Err(FsError::NotADirectory(name.to_string()));
        };
        if !self.store.children(&item.id).await?.is_empty() {
            return Err(FsError::NotEmpty(name.to_string()));
        }
        self.store
            .delete(&item)
            .await
            .map_err(|e| Self::commit_error("rmdir", name, e))
    }

    /// Move and/or rename. The new name loses its last extension, which is
    /// synthesized from the mode and never stored.
    pub async fn rename(
        &self,
        parent: u64,
        name: &str,
        new_parent: u64,
        new_name: &str,
    ) -> FsResult<()> {
        debug!(parent, name, new_parent, new_name, "renaming");
        let mode = self.mode().get().await;
        let Some(node) = self.child(parent, name, mode).await? else {
            return Err(FsError::NotFound(name.to_string()));
        };
        if parent != new_parent && self.child(new_parent, new_name, mode).await?.is_some() {
            return Err(FsError::AlreadyExists(new_name.to_string()));
        }
        if node.is_virtual() {
            return Err(FsError::PermissionDenied(format!("cannot rename {name}")));
        }
        let Some(mut item) = node.into_item() else {
            return Err(FsError::NotFound(name.to_string()));
        };

        let target = self.dir_node(new_parent).await?;
        item.parent = Some(target.id().to_string());
        item.name = strip_extension(new_name).to_string();
        self.store
            .update_metadata(&item)
            .await
            .map_err(|e| Self::commit_error("rename", name, e))
    }

    /// The store has no block accounting; report a large, empty volume.
    pub fn statfs(&self) -> StatFs {
        let blocks = TOTAL_BYTES / BLOCK_SIZE as u64;
        StatFs {
            blocks,
            bfree: blocks,
            bavail: blocks,
            files: TOTAL_FILES,
            ffree: TOTAL_FILES,
            bsize: BLOCK_SIZE,
            frsize: BLOCK_SIZE,
            namelen: NAME_MAX,
        }
    }
}

//! Remote item store seam.
//!
//! The cloud service is reached through [`ItemStore`]; the adapter keeps only
//! transient [`Item`] copies and never caches content past an open handle.
//!
//! Submodules:
//! - `memory`: in-process store used by tests and the local mount

pub mod memory;

use std::fmt;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::render::RenderConfig;

pub type ItemId = String;

/// Id of the root folder.
pub const ROOT_ID: &str = "";

/// Native type of a document as the service stores it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Notes,
    Pdf,
    Epub,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Notes => "notes",
            FileType::Pdf => "pdf",
            FileType::Epub => "epub",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "type", rename_all = "lowercase")]
pub enum ItemKind {
    Folder,
    Document(FileType),
}

/// A remote document or folder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub parent: Option<ItemId>,
    pub mtime: SystemTime,
    pub kind: ItemKind,
}

impl Item {
    pub fn root() -> Self {
        Self {
            id: ROOT_ID.to_string(),
            name: String::new(),
            parent: None,
            mtime: SystemTime::UNIX_EPOCH,
            kind: ItemKind::Folder,
        }
    }

    /// A document that exists only locally until it is uploaded.
    /// The file type is provisional; the upload call carries the real one.
    pub fn new_document(name: impl Into<String>, parent: impl Into<ItemId>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            parent: Some(parent.into()),
            mtime: SystemTime::now(),
            kind: ItemKind::Document(FileType::Pdf),
        }
    }

    pub fn new_folder(name: impl Into<String>, parent: impl Into<ItemId>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            parent: Some(parent.into()),
            mtime: SystemTime::now(),
            kind: ItemKind::Folder,
        }
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_ID
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, ItemKind::Folder)
    }

    pub fn file_type(&self) -> Option<FileType> {
        match self.kind {
            ItemKind::Document(t) => Some(t),
            ItemKind::Folder => None,
        }
    }
}

/// Async interface of the remote document service.
///
/// Content accessors take a document item; calling them on a folder is a
/// caller bug and implementations may answer with `NotFound`.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> StoreResult<Item>;

    /// Children of a folder in the order the service returns them.
    async fn children(&self, id: &str) -> StoreResult<Vec<Item>>;

    /// Raw archive of the document (zip of the service's native files).
    async fn raw(&self, doc: &Item) -> StoreResult<Bytes>;
    async fn raw_size(&self, doc: &Item) -> StoreResult<u64>;

    /// The originally uploaded file (PDF/EPUB), or the notebook payload.
    async fn contents(&self, doc: &Item) -> StoreResult<Bytes>;
    async fn size(&self, doc: &Item) -> StoreResult<u64>;

    /// PDF with annotations rendered on top.
    async fn annotated(&self, doc: &Item, config: &RenderConfig) -> StoreResult<Bytes>;
    async fn annotated_size(&self, doc: &Item) -> StoreResult<u64>;

    /// Persist `item.name` and `item.parent`.
    async fn update_metadata(&self, item: &Item) -> StoreResult<()>;
    async fn delete(&self, item: &Item) -> StoreResult<()>;
    async fn upload_document(&self, doc: &Item, data: Bytes, file_type: FileType)
    -> StoreResult<()>;
    async fn upload_folder(&self, folder: &Item) -> StoreResult<()>;

    /// Drop any cached listing so the next call goes back to the service.
    async fn invalidate_cache(&self);
}

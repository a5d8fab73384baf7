//! In-process item store: keeps the whole document tree in memory.
//!
//! Used by the tests and by `rmfs --source <dir>` to mount a local tree
//! without a service account. Children are returned in insertion order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{FileType, Item, ItemId, ItemKind, ItemStore, ROOT_ID};
use crate::error::{StoreError, StoreResult};
use crate::render::{PassthroughRenderer, RenderConfig, RenderSource, Renderer};

struct Entry {
    item: Item,
    raw: Bytes,
    original: Bytes,
    annotated: Option<Bytes>,
}

impl Entry {
    fn folder(item: Item) -> Self {
        Self {
            item,
            raw: Bytes::new(),
            original: Bytes::new(),
            annotated: None,
        }
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<ItemId, Entry>,
    order: Vec<ItemId>,
}

impl State {
    fn insert(&mut self, entry: Entry) {
        let id = entry.item.id.clone();
        if self.entries.insert(id.clone(), entry).is_none() {
            self.order.push(id);
        }
    }

    fn remove(&mut self, id: &str) {
        self.entries.remove(id);
        self.order.retain(|o| o != id);
    }

    fn entry(&self, id: &str) -> StoreResult<&Entry> {
        self.entries
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn has_children(&self, id: &str) -> bool {
        self.entries
            .values()
            .any(|e| e.item.parent.as_deref() == Some(id))
    }

    fn check_parent(&self, parent: Option<&str>) -> StoreResult<()> {
        let Some(parent) = parent else {
            return Err(StoreError::Api("item has no parent".into()));
        };
        match self.entries.get(parent) {
            Some(e) if e.item.is_folder() => Ok(()),
            Some(_) => Err(StoreError::Api(format!("parent {parent:?} is not a folder"))),
            None => Err(StoreError::Api(format!("parent {parent:?} does not exist"))),
        }
    }
}

pub struct MemoryStore {
    state: RwLock<State>,
    renderer: Arc<dyn Renderer>,
    offline: AtomicBool,
    uploads: AtomicUsize,
    invalidations: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_renderer(Arc::new(PassthroughRenderer))
    }

    pub fn with_renderer(renderer: Arc<dyn Renderer>) -> Self {
        let mut state = State::default();
        state.insert(Entry::folder(Item::root()));
        Self {
            state: RwLock::new(state),
            renderer,
            offline: AtomicBool::new(false),
            uploads: AtomicUsize::new(0),
            invalidations: AtomicUsize::new(0),
        }
    }

    /// While offline, every committing call fails with an API error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn invalidation_count(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }

    fn ensure_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Api("service unreachable".into()));
        }
        Ok(())
    }

    pub async fn add_folder(&self, name: &str, parent: &str) -> ItemId {
        let item = Item::new_folder(name, parent);
        let id = item.id.clone();
        self.state.write().await.insert(Entry::folder(item));
        id
    }

    /// Add a document whose raw archive equals its original bytes.
    pub async fn add_document(
        &self,
        name: &str,
        parent: &str,
        file_type: FileType,
        original: impl Into<Bytes>,
    ) -> ItemId {
        let original = original.into();
        let mut item = Item::new_document(name, parent);
        item.kind = ItemKind::Document(file_type);
        let id = item.id.clone();
        self.state.write().await.insert(Entry {
            item,
            raw: original.clone(),
            original,
            annotated: None,
        });
        id
    }

    pub async fn set_raw(&self, id: &str, raw: impl Into<Bytes>) {
        if let Some(e) = self.state.write().await.entries.get_mut(id) {
            e.raw = raw.into();
        }
    }

    /// Pre-rendered annotated form; bypasses the renderer.
    pub async fn set_annotated(&self, id: &str, annotated: impl Into<Bytes>) {
        if let Some(e) = self.state.write().await.entries.get_mut(id) {
            e.annotated = Some(annotated.into());
        }
    }

    /// Mirror a local directory: sub-directories become folders, `.pdf` and
    /// `.epub` files become documents. Other files are skipped.
    pub async fn import_dir(&self, root: &Path) -> std::io::Result<usize> {
        let mut folders: HashMap<PathBuf, ItemId> = HashMap::new();
        folders.insert(root.to_path_buf(), ROOT_ID.to_string());
        let mut imported = 0usize;

        let walker = WalkDir::new(root)
            .min_depth(1)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()));
        for entry in walker {
            let entry = entry.map_err(std::io::Error::other)?;
            let path = entry.path();
            let Some(parent) = path.parent().and_then(|p| folders.get(p)).cloned() else {
                debug!(path = %path.display(), "skip entry below skipped directory");
                continue;
            };
            let name = entry.file_name().to_string_lossy().into_owned();

            if entry.file_type().is_dir() {
                let id = self.add_folder(&name, &parent).await;
                folders.insert(path.to_path_buf(), id);
                imported += 1;
                continue;
            }

            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase());
            let file_type = match ext.as_deref() {
                Some("pdf") => FileType::Pdf,
                Some("epub") => FileType::Epub,
                _ => {
                    debug!(path = %path.display(), "skip non-document file");
                    continue;
                }
            };
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or(name);
            let data = tokio::fs::read(path).await?;
            self.add_document(&stem, &parent, file_type, data).await;
            imported += 1;
        }

        info!(root = %root.display(), imported, "imported local tree");
        Ok(imported)
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn get_by_id(&self, id: &str) -> StoreResult<Item> {
        Ok(self.state.read().await.entry(id)?.item.clone())
    }

    async fn children(&self, id: &str) -> StoreResult<Vec<Item>> {
        let state = self.state.read().await;
        let folder = state.entry(id)?;
        if !folder.item.is_folder() {
            return Ok(Vec::new());
        }
        Ok(state
            .order
            .iter()
            .filter_map(|o| state.entries.get(o))
            .filter(|e| e.item.parent.as_deref() == Some(id))
            .map(|e| e.item.clone())
            .collect())
    }

    async fn raw(&self, doc: &Item) -> StoreResult<Bytes> {
        Ok(self.state.read().await.entry(&doc.id)?.raw.clone())
    }

    async fn raw_size(&self, doc: &Item) -> StoreResult<u64> {
        Ok(self.state.read().await.entry(&doc.id)?.raw.len() as u64)
    }

    async fn contents(&self, doc: &Item) -> StoreResult<Bytes> {
        Ok(self.state.read().await.entry(&doc.id)?.original.clone())
    }

    async fn size(&self, doc: &Item) -> StoreResult<u64> {
        Ok(self.state.read().await.entry(&doc.id)?.original.len() as u64)
    }

    async fn annotated(&self, doc: &Item, config: &RenderConfig) -> StoreResult<Bytes> {
        let (raw, original, file_type) = {
            let state = self.state.read().await;
            let entry = state.entry(&doc.id)?;
            if let Some(pdf) = &entry.annotated {
                return Ok(pdf.clone());
            }
            let file_type = entry
                .item
                .file_type()
                .ok_or_else(|| StoreError::NotFound(doc.id.clone()))?;
            (entry.raw.clone(), entry.original.clone(), file_type)
        };

        let source = RenderSource {
            name: &doc.name,
            file_type,
            raw: &raw,
            original: &original,
        };
        let progress = |done: f32| debug!(doc = %doc.id, done, "render progress");
        Ok(self.renderer.render(&source, config, &progress)?)
    }

    async fn annotated_size(&self, doc: &Item) -> StoreResult<u64> {
        let state = self.state.read().await;
        let entry = state.entry(&doc.id)?;
        // Without a cached render the original size is the best estimate.
        Ok(entry
            .annotated
            .as_ref()
            .map_or(entry.original.len(), |a| a.len()) as u64)
    }

    async fn update_metadata(&self, item: &Item) -> StoreResult<()> {
        self.ensure_online()?;
        if item.is_root() {
            return Err(StoreError::VirtualItem("cannot update the root folder".into()));
        }
        let mut state = self.state.write().await;
        state.entry(&item.id)?;
        state.check_parent(item.parent.as_deref())?;
        if let Some(e) = state.entries.get_mut(&item.id) {
            e.item.name = item.name.clone();
            e.item.parent = item.parent.clone();
            e.item.mtime = SystemTime::now();
        }
        Ok(())
    }

    async fn delete(&self, item: &Item) -> StoreResult<()> {
        self.ensure_online()?;
        if item.is_root() {
            return Err(StoreError::VirtualItem("cannot delete the root folder".into()));
        }
        let mut state = self.state.write().await;
        state.entry(&item.id)?;
        if state.has_children(&item.id) {
            return Err(StoreError::Api(format!("folder {:?} is not empty", item.id)));
        }
        state.remove(&item.id);
        Ok(())
    }

    async fn upload_document(
        &self,
        doc: &Item,
        data: Bytes,
        file_type: FileType,
    ) -> StoreResult<()> {
        self.ensure_online()?;
        let mut state = self.state.write().await;
        state.check_parent(doc.parent.as_deref())?;
        let mut item = doc.clone();
        item.kind = ItemKind::Document(file_type);
        item.mtime = SystemTime::now();
        state.insert(Entry {
            item,
            raw: data.clone(),
            original: data,
            annotated: None,
        });
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upload_folder(&self, folder: &Item) -> StoreResult<()> {
        self.ensure_online()?;
        let mut state = self.state.write().await;
        state.check_parent(folder.parent.as_deref())?;
        let mut item = folder.clone();
        item.kind = ItemKind::Folder;
        state.insert(Entry::folder(item));
        Ok(())
    }

    async fn invalidate_cache(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        debug!("memory store cache invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn children_follow_insertion_order() {
        let store = MemoryStore::new();
        let b = store.add_folder("b", ROOT_ID).await;
        let a = store
            .add_document("a", ROOT_ID, FileType::Pdf, &b"%PDF"[..])
            .await;
        let kids = store.children(ROOT_ID).await.unwrap();
        let ids: Vec<_> = kids.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, vec![b, a]);
    }

    #[tokio::test]
    async fn offline_store_rejects_commits() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let folder = Item::new_folder("x", ROOT_ID);
        let err = store.upload_folder(&folder).await.unwrap_err();
        assert!(matches!(err, StoreError::Api(_)));
        assert!(store.get_by_id(&folder.id).await.is_err());
    }

    #[tokio::test]
    async fn delete_refuses_non_empty_folder() {
        let store = MemoryStore::new();
        let dir = store.add_folder("dir", ROOT_ID).await;
        store
            .add_document("inner", &dir, FileType::Epub, &b"epub"[..])
            .await;
        let item = store.get_by_id(&dir).await.unwrap();
        assert!(store.delete(&item).await.is_err());
    }

    #[tokio::test]
    async fn annotated_prefers_prerendered() {
        let store = MemoryStore::new();
        let id = store
            .add_document("n", ROOT_ID, FileType::Notes, &b"lines"[..])
            .await;
        store.set_annotated(&id, &b"%PDF-annot"[..]).await;
        let doc = store.get_by_id(&id).await.unwrap();
        let out = store.annotated(&doc, &RenderConfig::default()).await.unwrap();
        assert_eq!(&out[..], b"%PDF-annot");
        assert_eq!(store.annotated_size(&doc).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn import_dir_mirrors_tree() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("books")).unwrap();
        std::fs::write(tmp.path().join("books/novel.epub"), b"epub-bytes").unwrap();
        std::fs::write(tmp.path().join("paper.PDF"), b"%PDF-1.7").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"skip me").unwrap();

        let store = MemoryStore::new();
        let n = store.import_dir(tmp.path()).await.unwrap();
        assert_eq!(n, 3);

        let root = store.children(ROOT_ID).await.unwrap();
        let names: Vec<_> = root.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["books", "paper"]);
        let books = store.children(&root[0].id).await.unwrap();
        assert_eq!(books[0].name, "novel");
        assert_eq!(books[0].file_type(), Some(FileType::Epub));
    }
}

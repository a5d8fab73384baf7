//! FUSE adapter
//!
//! Binds [`RemoteFs`] to the kernel through the rfuse3 raw `Filesystem` trait.
//! Requests are translated into dispatcher calls and [`FsError`]s into errno
//! replies; no filesystem logic lives here.
//!
//! - `mount`: session setup and unprivileged mounting.
pub mod mount;

use std::ffi::{OsStr, OsString};
use std::num::NonZeroU32;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use rfuse3::Result as FuseResult;
use rfuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, FileAttr, ReplyAttr, ReplyCreated, ReplyData,
    ReplyDirectory, ReplyDirectoryPlus, ReplyEntry, ReplyInit, ReplyOpen, ReplyStatFs, ReplyWrite,
};
use rfuse3::raw::{Filesystem, Request};
use rfuse3::{Errno, FileType as FuseFileType, SetAttr, Timestamp};
use tracing::{debug, info};

use crate::error::FsError;
use crate::store::ItemStore;
use crate::vfs::attr::{Attr, NodeKind};
use crate::vfs::fs::{AttrChanges, BLOCK_SIZE, RemoteFs};

const TTL: Duration = Duration::from_secs(1);
const MAX_WRITE: u32 = 1024 * 1024;
/// Sizes are estimates until content is fetched, so bypass the page cache.
const FOPEN_DIRECT_IO: u32 = 1;

fn errno(e: FsError) -> Errno {
    e.errno().into()
}

fn name_of(name: &OsStr) -> FuseResult<&str> {
    name.to_str().ok_or_else(|| libc::EINVAL.into())
}

fn kind_to_fuse(kind: NodeKind) -> FuseFileType {
    match kind {
        NodeKind::Dir => FuseFileType::Directory,
        NodeKind::File => FuseFileType::RegularFile,
    }
}

fn to_fuse_attr(a: &Attr, req: &Request) -> FileAttr {
    let time = Timestamp::from(a.mtime);
    FileAttr {
        ino: a.ino,
        size: a.size,
        blocks: a.size.div_ceil(512),
        atime: time,
        mtime: time,
        ctime: time,
        #[cfg(target_os = "macos")]
        crtime: time,
        kind: kind_to_fuse(a.kind),
        perm: a.perm,
        nlink: 1,
        uid: req.uid,
        gid: req.gid,
        rdev: 0,
        #[cfg(target_os = "macos")]
        flags: 0,
        blksize: BLOCK_SIZE,
    }
}

fn entry(a: &Attr, req: &Request) -> ReplyEntry {
    ReplyEntry {
        ttl: TTL,
        attr: to_fuse_attr(a, req),
        generation: 0,
    }
}

/// Kernel-facing wrapper around the dispatcher.
pub struct FuseFs<S: ItemStore> {
    inner: RemoteFs<S>,
}

impl<S: ItemStore> FuseFs<S> {
    pub fn new(inner: RemoteFs<S>) -> Self {
        Self { inner }
    }
}

impl<S> Filesystem for FuseFs<S>
where
    S: ItemStore + 'static,
{
    type DirEntryStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntry>> + Send + 'a>>
    where
        Self: 'a;

    type DirEntryPlusStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntryPlus>> + Send + 'a>>
    where
        Self: 'a;

    async fn init(&self, _req: Request) -> FuseResult<ReplyInit> {
        let max_write = NonZeroU32::new(MAX_WRITE).ok_or_else(|| Errno::from(libc::EINVAL))?;
        let mode = self.inner.mode().get().await;
        info!(mode = %mode, "filesystem initialized");
        Ok(ReplyInit { max_write })
    }

    async fn destroy(&self, _req: Request) {
        info!("filesystem destroyed");
    }

    async fn lookup(&self, req: Request, parent: u64, name: &OsStr) -> FuseResult<ReplyEntry> {
        let name = name_of(name)?;
        let attr = self.inner.lookup(parent, name).await.map_err(errno)?;
        Ok(entry(&attr, &req))
    }

    async fn forget(&self, _req: Request, _inode: u64, _nlookup: u64) {}

    async fn batch_forget(&self, _req: Request, _inodes: &[(u64, u64)]) {}

    async fn getattr(
        &self,
        req: Request,
        ino: u64,
        _fh: Option<u64>,
        _flags: u32,
    ) -> FuseResult<ReplyAttr> {
        let attr = self.inner.getattr(ino).await.map_err(errno)?;
        Ok(ReplyAttr {
            ttl: TTL,
            attr: to_fuse_attr(&attr, &req),
        })
    }

    async fn setattr(
        &self,
        req: Request,
        ino: u64,
        _fh: Option<u64>,
        set_attr: SetAttr,
    ) -> FuseResult<ReplyAttr> {
        let changes = AttrChanges {
            mode: set_attr.mode,
            uid: set_attr.uid,
            gid: set_attr.gid,
            size: set_attr.size,
            atime: set_attr.atime.is_some(),
            mtime: set_attr.mtime.is_some(),
        };
        let attr = self.inner.setattr(ino, &changes).await.map_err(errno)?;
        Ok(ReplyAttr {
            ttl: TTL,
            attr: to_fuse_attr(&attr, &req),
        })
    }

    async fn readlink(&self, _req: Request, ino: u64) -> FuseResult<ReplyData> {
        let data = self.inner.readlink(ino).await.map_err(errno)?;
        Ok(ReplyData { data })
    }

    async fn mkdir(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
    ) -> FuseResult<ReplyEntry> {
        let name = name_of(name)?;
        let attr = self.inner.mkdir(parent, name).await.map_err(errno)?;
        Ok(entry(&attr, &req))
    }

    async fn unlink(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        let name = name_of(name)?;
        self.inner.unlink(parent, name).await.map_err(errno)
    }

    async fn rmdir(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        let name = name_of(name)?;
        self.inner.rmdir(parent, name).await.map_err(errno)
    }

    async fn rename(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        new_parent: u64,
        new_name: &OsStr,
    ) -> FuseResult<()> {
        let name = name_of(name)?;
        let new_name = name_of(new_name)?;
        self.inner
            .rename(parent, name, new_parent, new_name)
            .await
            .map_err(errno)
    }

    async fn open(&self, _req: Request, ino: u64, flags: u32) -> FuseResult<ReplyOpen> {
        let fh = self.inner.open(ino, flags).await.map_err(errno)?;
        Ok(ReplyOpen {
            fh,
            flags: FOPEN_DIRECT_IO,
        })
    }

    async fn read(
        &self,
        _req: Request,
        _ino: u64,
        fh: u64,
        offset: u64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        let data: Bytes = self.inner.read(fh, offset, size).await.map_err(errno)?;
        Ok(ReplyData { data })
    }

    async fn write(
        &self,
        _req: Request,
        _ino: u64,
        fh: u64,
        offset: u64,
        data: &[u8],
        _write_flags: u32,
        _flags: u32,
    ) -> FuseResult<ReplyWrite> {
        let written = self.inner.write(fh, offset, data).await.map_err(errno)?;
        Ok(ReplyWrite { written })
    }

    async fn statfs(&self, _req: Request, _ino: u64) -> FuseResult<ReplyStatFs> {
        let st = self.inner.statfs();
        Ok(ReplyStatFs {
            blocks: st.blocks,
            bfree: st.bfree,
            bavail: st.bavail,
            files: st.files,
            ffree: st.ffree,
            bsize: st.bsize,
            namelen: st.namelen,
            frsize: st.frsize,
        })
    }

    async fn release(
        &self,
        _req: Request,
        _inode: u64,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> FuseResult<()> {
        self.inner.release(fh).await.map_err(errno)
    }

    async fn fsync(&self, _req: Request, _inode: u64, _fh: u64, _datasync: bool) -> FuseResult<()> {
        Ok(())
    }

    async fn flush(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _lock_owner: u64,
    ) -> FuseResult<()> {
        Ok(())
    }

    async fn opendir(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        let fh = self.inner.opendir(ino).await.map_err(errno)?;
        Ok(ReplyOpen { fh, flags: 0 })
    }

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory<Self::DirEntryStream<'a>>> {
        let entries = self
            .inner
            .readdir(ino, offset.max(0) as u64)
            .await
            .map_err(errno)?;
        let entries: Vec<_> = entries
            .into_iter()
            .map(|e| DirectoryEntry {
                inode: e.ino,
                kind: kind_to_fuse(e.attr.kind),
                name: OsString::from(e.name),
                offset: e.offset as i64,
            })
            .collect();
        let boxed: Self::DirEntryStream<'a> = Box::pin(stream::iter(entries.into_iter().map(Ok)));
        Ok(ReplyDirectory { entries: boxed })
    }

    async fn releasedir(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _flags: u32,
    ) -> FuseResult<()> {
        Ok(())
    }

    async fn fsyncdir(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _datasync: bool,
    ) -> FuseResult<()> {
        Ok(())
    }

    async fn interrupt(&self, _req: Request, unique: u64) -> FuseResult<()> {
        debug!(unique, "interrupt ignored");
        Ok(())
    }

    async fn create(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _flags: u32,
    ) -> FuseResult<ReplyCreated> {
        let name = name_of(name)?;
        let (fh, attr) = self.inner.create(parent, name).await.map_err(errno)?;
        Ok(ReplyCreated {
            ttl: TTL,
            attr: to_fuse_attr(&attr, &req),
            generation: 0,
            fh,
            flags: FOPEN_DIRECT_IO,
        })
    }

    async fn readdirplus<'a>(
        &'a self,
        req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> FuseResult<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
        let entries = self.inner.readdir(ino, offset).await.map_err(errno)?;
        let entries: Vec<_> = entries
            .into_iter()
            .map(|e| DirectoryEntryPlus {
                inode: e.ino,
                generation: 0,
                kind: kind_to_fuse(e.attr.kind),
                name: OsString::from(e.name),
                offset: e.offset as i64,
                attr: to_fuse_attr(&e.attr, &req),
                entry_ttl: TTL,
                attr_ttl: TTL,
            })
            .collect();
        let boxed: Self::DirEntryPlusStream<'a> =
            Box::pin(stream::iter(entries.into_iter().map(Ok)));
        Ok(ReplyDirectoryPlus { entries: boxed })
    }
}


#[cfg(all(test, target_os = "linux"))]
mod mount_tests {
    use super::*;
    use crate::fuse::mount::mount_unprivileged;
    use crate::render::RenderConfig;
    use crate::store::memory::MemoryStore;
    use crate::store::{FileType, ROOT_ID};
    use crate::vfs::mode::ModeCell;
    use std::fs;
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    // Needs fusermount3; enabled with RMFS_FUSE_TEST=1.
    #[tokio::test]
    async fn smoke_mount_and_basic_ops() {
        if std::env::var("RMFS_FUSE_TEST").ok().as_deref() != Some("1") {
            eprintln!("skip fuse mount test: set RMFS_FUSE_TEST=1 to enable");
            return;
        }

        let store = Arc::new(MemoryStore::new());
        store
            .add_document("Paper", ROOT_ID, FileType::Pdf, &b"%PDF-1.7 paper"[..])
            .await;
        let fs = FuseFs::new(RemoteFs::new(
            store.clone(),
            ModeCell::default(),
            RenderConfig::default(),
        ));

        let mnt = tempfile::tempdir().expect("tmp mount");
        let mnt_path = mnt.path().to_path_buf();
        let handle = match mount_unprivileged(fs, &mnt_path).await {
            Ok(h) => h,
            Err(e) => {
                eprintln!("skip fuse test: mount failed: {}", e);
                return;
            }
        };
        tokio::time::sleep(StdDuration::from_millis(2000)).await;

        let mut names = fs::read_dir(&mnt_path)
            .expect("readdir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, vec![".mode", "Paper.pdf"]);
        assert_eq!(
            fs::read(mnt_path.join("Paper.pdf")).expect("read"),
            b"%PDF-1.7 paper"
        );

        fs::write(mnt_path.join(".mode"), b"meta").expect("switch mode");
        assert!(mnt_path.join("Paper").exists());
        fs::write(mnt_path.join(".mode"), b"annot").expect("switch mode");

        {
            let mut f = fs::File::create(mnt_path.join("new.pdf")).expect("create");
            f.write_all(b"%PDF-1.4 new").expect("write");
        }
        tokio::time::sleep(StdDuration::from_millis(200)).await;
        assert_eq!(store.upload_count(), 1);

        fs::create_dir(mnt_path.join("Folder")).expect("mkdir");
        fs::rename(mnt_path.join("new.pdf"), mnt_path.join("Folder/moved.pdf")).expect("rename");
        assert!(fs::remove_dir(mnt_path.join("Folder")).is_err());
        fs::remove_file(mnt_path.join("Folder/moved.pdf")).expect("unlink");
        fs::remove_dir(mnt_path.join("Folder")).expect("rmdir");

        if let Err(e) = handle.unmount().await {
            eprintln!("unmount error: {}", e);
        }
    }
}

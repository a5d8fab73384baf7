//! Mount helpers for starting/stopping FUSE
//!
//! Only Linux is supported, through unprivileged mounting via fusermount3.

use std::path::Path;

use rfuse3::MountOptions;

use super::FuseFs;
use crate::store::ItemStore;

/// Mount options for rmfs. Listings always carry attributes; ownership is
/// taken from each request, so no uid/gid override is needed.
fn default_mount_options() -> MountOptions {
    let mut mo = MountOptions::default();
    mo.fs_name("rmfs").force_readdir_plus(true);
    mo
}

/// Mount `fs` on an existing directory. The returned handle resolves when
/// the filesystem is unmounted.
#[cfg(target_os = "linux")]
pub async fn mount_unprivileged<S>(
    fs: FuseFs<S>,
    mount_point: impl AsRef<Path>,
) -> std::io::Result<rfuse3::raw::MountHandle>
where
    S: ItemStore + 'static,
{
    let session = rfuse3::raw::Session::new(default_mount_options());
    session.mount_with_unprivileged(fs, mount_point).await
}

#[cfg(not(target_os = "linux"))]
pub async fn mount_unprivileged<S>(
    _fs: FuseFs<S>,
    _mount_point: impl AsRef<Path>,
) -> std::io::Result<rfuse3::raw::MountHandle>
where
    S: ItemStore + 'static,
{
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "FUSE mount is only supported on Linux in this build",
    ))
}

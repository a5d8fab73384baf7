//! Error types shared by the store, render and VFS layers.
//!
//! Store and render failures never reach the kernel as-is: the VFS layer
//! converts them into [`FsError`], and the FUSE binding turns that into an
//! errno via [`FsError::errno`].

use thiserror::Error;

pub type FsResult<T> = Result<T, FsError>;
pub type StoreResult<T> = Result<T, StoreError>;

/// Filesystem-level failure, one variant per POSIX error the adapter reports.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("operation not permitted: {0}")]
    PermissionDenied(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("remote I/O error: {0}")]
    RemoteIo(String),

    #[error("no data available")]
    NoData,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("file too large: {0}")]
    FileTooLarge(String),

    #[error("operation not supported")]
    Unsupported,
}

impl FsError {
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::IsADirectory(_) => libc::EISDIR,
            FsError::NotEmpty(_) => libc::ENOTEMPTY,
            FsError::PermissionDenied(_) => libc::EPERM,
            FsError::InvalidArgument(_) => libc::EINVAL,
            FsError::RemoteIo(_) => libc::EREMOTEIO,
            FsError::NoData => libc::ENODATA,
            FsError::Io(_) => libc::EIO,
            FsError::FileTooLarge(_) => libc::EFBIG,
            FsError::Unsupported => libc::ENOSYS,
        }
    }
}

/// Failure reported by an [`ItemStore`](crate::store::ItemStore).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("item {0:?} not found")]
    NotFound(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("virtual item: {0}")]
    VirtualItem(String),
}

impl From<StoreError> for FsError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => FsError::NotFound(id),
            StoreError::Api(msg) => FsError::RemoteIo(msg),
            StoreError::VirtualItem(msg) => FsError::PermissionDenied(msg),
        }
    }
}

/// Failure reported by a [`Renderer`](crate::render::Renderer).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("unsupported source: {0}")]
    Unsupported(String),

    #[error("render failed: {0}")]
    Failed(String),
}

impl From<RenderError> for StoreError {
    fn from(e: RenderError) -> Self {
        StoreError::Api(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_posix_codes() {
        let nf: FsError = StoreError::NotFound("abc".into()).into();
        assert_eq!(nf.errno(), libc::ENOENT);
        let api: FsError = StoreError::Api("boom".into()).into();
        assert_eq!(api.errno(), libc::EREMOTEIO);
        let virt: FsError = StoreError::VirtualItem(".mode".into()).into();
        assert_eq!(virt.errno(), libc::EPERM);
    }

    #[test]
    fn render_failure_is_remote() {
        let e: StoreError = RenderError::Failed("page 3".into()).into();
        assert!(matches!(e, StoreError::Api(_)));
    }
}

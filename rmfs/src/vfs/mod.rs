//! VFS layer (virtual filesystem)
//!
//! Responsibilities:
//! - Map stable inode numbers onto store item ids.
//! - Project items into names, attributes and content according to the
//!   active [`mode::FsMode`], switched at runtime through the `/.mode` file.
//! - Stage writes of new documents locally and upload them on last close.
//!
//! Submodules:
//! - `fs`: the dispatcher, one method per filesystem call
//! - `inode`: inode number registry
//! - `mode`: projection modes and the control file
//! - `names`, `attr`: name and attribute projection
//! - `handles`, `read`, `write`: per-inode open sessions
//! - `node`: items plus the virtual control file
pub mod attr;
pub mod fs;
pub mod handles;
pub mod inode;
pub mod mode;
pub mod names;
pub mod node;
pub mod read;
pub mod write;

// Library crate for rmfs: the dispatcher, stores and FUSE binding, re-exported
// for the binary and for embedding with another `ItemStore`.

pub mod config;
pub mod error;
pub mod fuse;
pub mod render;
pub mod store;
pub mod vfs;

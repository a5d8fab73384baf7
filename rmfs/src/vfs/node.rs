//! Addressable filesystem entities: store items plus the control file.

use std::time::SystemTime;

use super::inode::CONTROL_ID;
use super::mode::CONTROL_NAME;
use crate::store::{FileType, Item, ROOT_ID};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Item(Item),
    Control,
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Item(item) => &item.id,
            Node::Control => CONTROL_ID,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Node::Item(item) => &item.name,
            Node::Control => CONTROL_NAME,
        }
    }

    pub fn parent(&self) -> Option<&str> {
        match self {
            Node::Item(item) => item.parent.as_deref(),
            Node::Control => Some(ROOT_ID),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Item(item) if item.is_folder())
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Node::Item(item) if item.is_root())
    }

    /// Virtual entities are never persisted and refuse structural changes.
    pub fn is_virtual(&self) -> bool {
        matches!(self, Node::Control)
    }

    /// Documents carry content projections; folders and the control file don't.
    pub fn document_type(&self) -> Option<FileType> {
        match self {
            Node::Item(item) => item.file_type(),
            Node::Control => None,
        }
    }

    pub fn mtime(&self) -> SystemTime {
        match self {
            Node::Item(item) => item.mtime,
            Node::Control => SystemTime::now(),
        }
    }

    pub fn into_item(self) -> Option<Item> {
        match self {
            Node::Item(item) => Some(item),
            Node::Control => None,
        }
    }
}

//! Inode <-> item id bijection.
//!
//! Inodes are handed out on first reference and never reused or removed while
//! the filesystem is mounted, so lookups stay stable across readdir/lookup
//! round trips.

use std::collections::HashMap;

use crate::error::{FsError, FsResult};
use crate::store::{ItemId, ROOT_ID};

pub const ROOT_INODE: u64 = 1;
pub const CONTROL_INODE: u64 = 2;

/// Synthetic id of the `.mode` control file. Never a valid store id.
pub const CONTROL_ID: &str = "::rmfs-mode";

pub struct InodeRegistry {
    next: u64,
    by_inode: HashMap<u64, ItemId>,
    by_id: HashMap<ItemId, u64>,
}

impl Default for InodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeRegistry {
    pub fn new() -> Self {
        let mut reg = Self {
            next: ROOT_INODE,
            by_inode: HashMap::new(),
            by_id: HashMap::new(),
        };
        let root = reg.allocate();
        reg.bind(root, ROOT_ID.to_string());
        let control = reg.allocate();
        reg.bind(control, CONTROL_ID.to_string());
        debug_assert_eq!((root, control), (ROOT_INODE, CONTROL_INODE));
        reg
    }

    pub fn allocate(&mut self) -> u64 {
        let ino = self.next;
        self.next += 1;
        ino
    }

    fn bind(&mut self, ino: u64, id: ItemId) {
        self.by_id.insert(id.clone(), ino);
        self.by_inode.insert(ino, id);
    }

    pub fn id_of(&self, ino: u64) -> FsResult<ItemId> {
        self.by_inode
            .get(&ino)
            .cloned()
            .ok_or_else(|| FsError::NotFound(format!("inode {ino}")))
    }

    pub fn inode_of(&mut self, id: &str) -> u64 {
        if let Some(&ino) = self.by_id.get(id) {
            return ino;
        }
        let ino = self.allocate();
        self.bind(ino, id.to_string());
        ino
    }

    pub fn contains(&self, ino: u64) -> bool {
        self.by_inode.contains_key(&ino)
    }

    pub fn len(&self) -> usize {
        self.by_inode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_inode.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_inodes() {
        let reg = InodeRegistry::new();
        assert_eq!(reg.id_of(ROOT_INODE).unwrap(), ROOT_ID);
        assert_eq!(reg.id_of(CONTROL_INODE).unwrap(), CONTROL_ID);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn inode_of_is_idempotent_and_bijective() {
        let mut reg = InodeRegistry::new();
        let ids = ["a", "b", "c", "a", "b"];
        let inos: Vec<u64> = ids.iter().map(|id| reg.inode_of(id)).collect();
        assert_eq!(inos[0], inos[3]);
        assert_eq!(inos[1], inos[4]);
        assert_ne!(inos[0], inos[1]);
        for (id, ino) in ids.iter().zip(&inos) {
            assert_eq!(reg.id_of(*ino).unwrap(), *id);
            assert_eq!(reg.inode_of(id), *ino);
        }
        assert_eq!(reg.len(), 5);
    }

    #[test]
    fn fresh_inodes_are_monotonic() {
        let mut reg = InodeRegistry::new();
        let a = reg.inode_of("x");
        let b = reg.allocate();
        let c = reg.inode_of("y");
        assert!(a > CONTROL_INODE && b > a && c > b);
    }

    #[test]
    fn unknown_inode_is_not_found() {
        let reg = InodeRegistry::new();
        assert!(!reg.contains(99));
        assert!(matches!(reg.id_of(99), Err(FsError::NotFound(_))));
    }
}

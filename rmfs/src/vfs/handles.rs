//! Open handle bookkeeping.
//!
//! File handles are the inode numbers themselves; several descriptors on the
//! same inode share one session, which lives until the last one is released.

use std::collections::HashMap;

use super::read::ReadSession;
use super::write::WriteSession;
use crate::store::Item;

/// Session torn down by the last release of an inode.
#[derive(Debug)]
pub enum Closed {
    Nothing,
    Read,
    Write(WriteSession),
}

#[derive(Debug, Default)]
pub struct HandleTable {
    counts: HashMap<u64, u32>,
    reads: HashMap<u64, ReadSession>,
    writes: HashMap<u64, WriteSession>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a new descriptor and return the file handle.
    pub fn open(&mut self, ino: u64) -> u64 {
        *self.counts.entry(ino).or_insert(0) += 1;
        ino
    }

    pub fn count(&self, ino: u64) -> u32 {
        self.counts.get(&ino).copied().unwrap_or(0)
    }

    /// Drop one descriptor. Sessions are handed back only when it was the last.
    pub fn release(&mut self, ino: u64) -> Option<Closed> {
        if let Some(count) = self.counts.get_mut(&ino) {
            *count = count.saturating_sub(1);
            if *count > 0 {
                return None;
            }
            self.counts.remove(&ino);
        }
        let had_read = self.reads.remove(&ino).is_some();
        Some(match self.writes.remove(&ino) {
            Some(session) => Closed::Write(session),
            None if had_read => Closed::Read,
            None => Closed::Nothing,
        })
    }

    pub fn has_read(&self, ino: u64) -> bool {
        self.reads.contains_key(&ino)
    }

    pub fn insert_read(&mut self, ino: u64, session: ReadSession) {
        self.reads.insert(ino, session);
    }

    pub fn read_mut(&mut self, ino: u64) -> Option<&mut ReadSession> {
        self.reads.get_mut(&ino)
    }

    pub fn is_writing(&self, ino: u64) -> bool {
        self.writes.contains_key(&ino)
    }

    pub fn insert_write(&mut self, ino: u64, session: WriteSession) {
        self.writes.insert(ino, session);
    }

    pub fn write_mut(&mut self, ino: u64) -> Option<&mut WriteSession> {
        self.writes.get_mut(&ino)
    }

    /// Pending document with the given id, if one is being written.
    pub fn pending(&self, id: &str) -> Option<&Item> {
        self.writes
            .values()
            .map(WriteSession::document)
            .find(|doc| doc.id == id)
    }
}

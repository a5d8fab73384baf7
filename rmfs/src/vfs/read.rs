//! Cached content of a handle opened for reading.

use bytes::Bytes;

use crate::error::{FsError, FsResult};

/// Content materialized once per open handle and sliced by every read.
///
/// Sizes reported by getattr are estimates, so some clients keep reading past
/// the end. One empty read is a normal EOF; a second one in a row at the same
/// or a later offset is answered with `ENODATA` to break the loop.
#[derive(Debug)]
pub struct ReadSession {
    data: Bytes,
    empty_reads: u32,
    last_empty_offset: u64,
}

impl ReadSession {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            empty_reads: 0,
            last_empty_offset: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn read(&mut self, offset: u64, size: u32) -> FsResult<Bytes> {
        let len = self.data.len() as u64;
        let start = offset.min(len);
        let end = offset.saturating_add(size as u64).min(len);
        let chunk = self.data.slice(start as usize..end as usize);

        if !chunk.is_empty() {
            self.empty_reads = 0;
            return Ok(chunk);
        }

        if self.empty_reads > 0 && offset < self.last_empty_offset {
            self.empty_reads = 0;
        }
        self.empty_reads += 1;
        self.last_empty_offset = offset;
        if self.empty_reads > 1 {
            return Err(FsError::NoData);
        }
        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windowed_reads() {
        let mut s = ReadSession::new(Bytes::from_static(b"0123456789"));
        assert_eq!(&s.read(0, 4).unwrap()[..], b"0123");
        assert_eq!(&s.read(4, 4).unwrap()[..], b"4567");
        assert_eq!(&s.read(8, 4).unwrap()[..], b"89");
        assert_eq!(&s.read(2, 3).unwrap()[..], b"234");
        assert_eq!(s.len(), 10);
    }

    #[test]
    fn single_eof_then_nodata() {
        let mut s = ReadSession::new(Bytes::from_static(b"abc"));
        assert_eq!(&s.read(0, 10).unwrap()[..], b"abc");
        assert!(s.read(3, 10).unwrap().is_empty());
        assert_eq!(s.read(3, 10).unwrap_err(), FsError::NoData);
        assert_eq!(s.read(100, 10).unwrap_err(), FsError::NoData);
    }

    #[test]
    fn data_resets_eof_counter() {
        let mut s = ReadSession::new(Bytes::from_static(b"abc"));
        assert!(s.read(3, 1).unwrap().is_empty());
        assert_eq!(&s.read(0, 1).unwrap()[..], b"a");
        assert!(s.read(3, 1).unwrap().is_empty());
    }

    #[test]
    fn seeking_back_restarts_eof_counter() {
        let mut s = ReadSession::new(Bytes::new());
        assert!(s.is_empty());
        assert!(s.read(50, 1).unwrap().is_empty());
        assert!(s.read(10, 1).unwrap().is_empty());
        assert!(s.read(10, 1).is_err());
    }
}

//! Staged writes for newly created documents.

use bytes::Bytes;

use crate::error::{FsError, FsResult};
use crate::store::{FileType, Item};

const PDF_MAGIC: &[u8] = b"%PDF";
const EPUB_MAGIC: &[u8] = b"mimetypeapplication/epub+zip";
const EPUB_WINDOW: usize = 100;

/// Upper bound on a staged document. Writes past it fail with `EFBIG`.
pub const MAX_STAGED_SIZE: u64 = 1 << 30;

/// Buffer for a document that only exists locally until its last close.
#[derive(Debug)]
pub struct WriteSession {
    document: Item,
    buf: Vec<u8>,
}

impl WriteSession {
    pub fn new(document: Item) -> Self {
        Self {
            document,
            buf: Vec::new(),
        }
    }

    pub fn document(&self) -> &Item {
        &self.document
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Overwrite `data` at `offset`, growing the buffer as needed.
    /// A gap past the current end is zero-filled; the buffer never grows
    /// beyond [`MAX_STAGED_SIZE`].
    pub fn write(&mut self, offset: u64, data: &[u8]) -> FsResult<usize> {
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= MAX_STAGED_SIZE)
            .ok_or_else(|| {
                FsError::FileTooLarge(format!(
                    "{:?}: write of {} bytes at offset {offset}",
                    self.document.name,
                    data.len()
                ))
            })?;
        let (start, end) = (offset as usize, end as usize);
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[start..end].copy_from_slice(data);
        Ok(data.len())
    }

    /// Detect the upload type from the leading bytes.
    pub fn sniff(&self) -> FsResult<FileType> {
        sniff(&self.buf).ok_or_else(|| {
            FsError::Io(format!(
                "{:?} is neither a PDF nor an EPUB file",
                self.document.name
            ))
        })
    }

    pub fn into_parts(self) -> (Item, Bytes) {
        (self.document, Bytes::from(self.buf))
    }
}

pub fn sniff(data: &[u8]) -> Option<FileType> {
    if data.starts_with(PDF_MAGIC) {
        return Some(FileType::Pdf);
    }
    let head = &data[..data.len().min(EPUB_WINDOW)];
    if head.windows(EPUB_MAGIC.len()).any(|w| w == EPUB_MAGIC) {
        return Some(FileType::Epub);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ROOT_ID;

    fn session() -> WriteSession {
        WriteSession::new(Item::new_document("doc", ROOT_ID))
    }

    #[test]
    fn sequential_and_overlapping_writes() {
        let mut s = session();
        assert_eq!(s.write(0, b"hello").unwrap(), 5);
        s.write(5, b" world").unwrap();
        s.write(0, b"J").unwrap();
        let (_, data) = s.into_parts();
        assert_eq!(&data[..], b"Jello world");
    }

    #[test]
    fn overwrite_inside_keeps_tail() {
        let mut s = session();
        s.write(0, b"abcdef").unwrap();
        s.write(2, b"XY").unwrap();
        assert_eq!(s.len(), 6);
        assert_eq!(&s.into_parts().1[..], b"abXYef");
    }

    #[test]
    fn gap_is_zero_filled() {
        let mut s = session();
        s.write(4, b"zz").unwrap();
        assert_eq!(&s.into_parts().1[..], b"\0\0\0\0zz");
    }

    #[test]
    fn oversized_writes_are_refused() {
        let mut s = session();
        s.write(0, b"%PDF").unwrap();
        let err = s.write((i64::MAX - 10) as u64, b"tail!").unwrap_err();
        assert_eq!(err.errno(), libc::EFBIG);
        assert!(matches!(
            s.write(u64::MAX - 1, b"xy"),
            Err(FsError::FileTooLarge(_))
        ));
        assert!(s.write(MAX_STAGED_SIZE, b"x").is_err());
        assert_eq!(s.len(), 4);
    }

    #[test]
    fn sniff_types() {
        assert_eq!(sniff(b"%PDF-1.7\n..."), Some(FileType::Pdf));

        let mut epub = b"PK\x03\x04".to_vec();
        epub.extend_from_slice(&[0u8; 26]);
        epub.extend_from_slice(EPUB_MAGIC);
        assert_eq!(sniff(&epub), Some(FileType::Epub));

        let mut late = vec![0u8; 90];
        late.extend_from_slice(EPUB_MAGIC);
        assert_eq!(sniff(&late), None);

        assert_eq!(sniff(b"plain text"), None);
        assert_eq!(sniff(b""), None);
    }

    #[test]
    fn unknown_content_is_io_error() {
        let mut s = session();
        assert!(s.is_empty());
        s.write(0, b"GIF89a").unwrap();
        assert!(matches!(s.sniff(), Err(FsError::Io(_))));
    }
}

//! Page I/O layer: turns a byte container
//! (an in-memory buffer, a memory map, or an open file) plus an optional
//! reversible transform (decryption) into `read(page_number) -> &[u8]`.
//! Everything above this layer — b-tree traversal, record decoding, the
//! writer — goes through a `PageSource`; nothing above ever opens a file
//! itself.

mod cache;
mod source;
mod transform;

pub use cache::{CachedSource, DEFAULT_CACHE_CAPACITY};
pub use source::{FileSource, MemorySource, MmapSource, PageSource};
pub use transform::PageTransform;

use crate::error::Result;
use crate::header::DatabaseHeader;

/// Owns a page source, an optional transform, and the parsed file header.
/// This is the thing every other layer borrows pages through.
pub struct Pager<S: PageSource> {
    source: S,
    transform: PageTransform,
    header: DatabaseHeader,
}

impl<S: PageSource> Pager<S> {
    /// Reads page 1 raw (transform never touches bytes 0..16, the magic
    /// string), parses the header from it, and wraps `source`.
    pub fn open(mut source: S, transform: PageTransform) -> Result<Self> {
        let raw_page_one = source.read(1)?.to_vec();
        let page_one = transform.apply(1, &raw_page_one)?;
        let header = DatabaseHeader::parse(&page_one)?;
        Ok(Pager { source, transform, header })
    }

    pub fn header(&self) -> &DatabaseHeader {
        &self.header
    }

    pub fn page_count(&self) -> u32 {
        self.source.page_count()
    }

    /// Returns `page_number`'s bytes as the caller logically sees them
    /// (post-transform). Page 1's leading 16 bytes are always the raw magic
    /// string; `transform::apply` preserves that itself.
    pub fn read(&mut self, page_number: u32) -> Result<Vec<u8>> {
        let raw = self.source.read(page_number)?;
        self.transform.apply(page_number, raw)
    }

    /// Writes `page_bytes` (as the caller sees them, i.e. post-transform)
    /// back to `page_number`, encoding it to its on-disk form first.
    pub fn write(&mut self, page_number: u32, page_bytes: &[u8]) -> Result<()> {
        let raw = self.transform.unapply(page_number, page_bytes)?;
        self.source.write(page_number, &raw)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.source.sync()
    }

    /// Re-parses page 1 and replaces the cached header. Called after a
    /// commit writes a page 1 whose `page_count` (or any other header
    /// field) moved.
    pub fn refresh_header(&mut self) -> Result<()> {
        let page_one = self.read(1)?;
        self.header = DatabaseHeader::parse(&page_one)?;
        Ok(())
    }

    pub fn close(self) {
        self.source.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_size_header(page_size: u16) -> Vec<u8> {
        let mut bytes = vec![0u8; 4096];
        bytes[0..16].copy_from_slice(b"SQLite format 3\0");
        bytes[16..18].copy_from_slice(&page_size.to_be_bytes());
        bytes[18] = 1;
        bytes[19] = 1;
        bytes[21] = 64;
        bytes[22] = 32;
        bytes[23] = 32;
        bytes[28..32].copy_from_slice(&1u32.to_be_bytes()); // page_count
        bytes[44..48].copy_from_slice(&4u32.to_be_bytes()); // schema_format
        bytes[56..60].copy_from_slice(&1u32.to_be_bytes()); // text encoding
        bytes
    }

    #[test]
    fn open_reads_header_from_page_one() {
        let data = page_size_header(4096);
        let source = MemorySource::new(data, 4096);
        let pager = Pager::open(source, PageTransform::Identity).unwrap();
        assert_eq!(pager.header().page_size, 4096);
        assert_eq!(pager.page_count(), 1);
    }
}

//! Concrete `PageSource` implementations. A closed set dispatched by the
//! enum the caller picks at construction time rather than a trait object —
//! the same "generics for devirtualization" choice the b-tree cursor makes.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{Error, ErrorContext, Result};

/// Source of raw, untransformed page bytes. `read` returns a borrow valid
/// until the next call to `read` on the same source (the `File` variant
/// reuses one buffer; `Memory`/`Mmap` borrow straight out of their backing
/// storage for the lifetime of the source).
pub trait PageSource {
    fn read(&mut self, page_number: u32) -> Result<&[u8]>;
    /// Writes `bytes` (one full page, already page-size-aligned) as
    /// `page_number`, extending the source if `page_number` is one past the
    /// current end. Durability (fsync) is the caller's responsibility --
    /// this only makes the write visible to subsequent `read`s.
    fn write(&mut self, page_number: u32, bytes: &[u8]) -> Result<()>;
    /// Flushes any OS-level buffering to stable storage. A no-op for
    /// sources with nothing to flush (memory, a read-only mapping).
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
    fn page_count(&self) -> u32;
    fn close(self);
}

fn validate_page_number(page_number: u32, page_count: u32, op: &'static str) -> Result<()> {
    if page_number == 0 || page_number > page_count {
        return Err(Error::invalid_database(
            format!("page {page_number} out of range (file has {page_count} pages)"),
            ErrorContext::new(op).at_page(page_number),
        ));
    }
    Ok(())
}

/// Wraps a fully-loaded in-memory buffer (an opened `:memory:` database, or
/// a small file read whole). `read` is a zero-allocation sub-slice.
pub struct MemorySource {
    data: Vec<u8>,
    page_size: u32,
}

impl MemorySource {
    pub fn new(data: Vec<u8>, page_size: u32) -> Self {
        MemorySource { data, page_size }
    }
}

impl PageSource for MemorySource {
    fn read(&mut self, page_number: u32) -> Result<&[u8]> {
        validate_page_number(page_number, self.page_count(), "read page (memory)")?;
        let start = (page_number as u64 - 1) * self.page_size as u64;
        let end = start + self.page_size as u64;
        self.data
            .get(start as usize..end as usize)
            .ok_or_else(|| {
                Error::invalid_database(
                    "page extends past end of buffer",
                    ErrorContext::new("read page (memory)").at_page(page_number),
                )
            })
    }

    fn write(&mut self, page_number: u32, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.page_size as usize {
            return Err(Error::argument_error(format!(
                "write page (memory): expected {} bytes, got {}",
                self.page_size,
                bytes.len()
            )));
        }
        let start = (page_number as u64 - 1) * self.page_size as u64;
        let end = start + self.page_size as u64;
        if end > self.data.len() as u64 {
            self.data.resize(end as usize, 0);
        }
        self.data[start as usize..end as usize].copy_from_slice(bytes);
        Ok(())
    }

    fn page_count(&self) -> u32 {
        (self.data.len() as u64 / self.page_size as u64) as u32
    }

    fn close(self) {}
}

/// Maps the file and borrows pages directly out of the mapping.
pub struct MmapSource {
    mmap: memmap2::Mmap,
    page_size: u32,
}

impl MmapSource {
    /// # Safety
    /// Carries the same caveat as `memmap2::Mmap::map`: the file must not be
    /// truncated or otherwise modified out from under the mapping by another
    /// process for the duration of this source's lifetime.
    pub fn open(file: &File, page_size: u32) -> Result<Self> {
        let mmap = unsafe { memmap2::Mmap::map(file) }.map_err(|e| Error::io("mmap database file", e))?;
        Ok(MmapSource { mmap, page_size })
    }
}

impl PageSource for MmapSource {
    fn read(&mut self, page_number: u32) -> Result<&[u8]> {
        validate_page_number(page_number, self.page_count(), "read page (mmap)")?;
        let start = (page_number as u64 - 1) * self.page_size as u64;
        let end = start + self.page_size as u64;
        self.mmap
            .get(start as usize..end as usize)
            .ok_or_else(|| {
                Error::invalid_database(
                    "page extends past end of mapping",
                    ErrorContext::new("read page (mmap)").at_page(page_number),
                )
            })
    }

    fn write(&mut self, _page_number: u32, _bytes: &[u8]) -> Result<()> {
        Err(Error::unsupported_feature("write through a read-only memory-mapped source"))
    }

    fn page_count(&self) -> u32 {
        (self.mmap.len() as u64 / self.page_size as u64) as u32
    }

    fn close(self) {}
}

/// Keeps one reusable page-sized buffer and issues a positioned read into it
/// on every call; the returned borrow is only valid until the next `read`.
pub struct FileSource {
    file: File,
    page_size: u32,
    file_len: u64,
    buf: Vec<u8>,
}

impl FileSource {
    pub fn open(file: File, page_size: u32) -> Result<Self> {
        let file_len = file
            .metadata()
            .map_err(|e| Error::io("stat database file", e))?
            .len();
        Ok(FileSource {
            file,
            page_size,
            file_len,
            buf: vec![0u8; page_size as usize],
        })
    }
}

impl PageSource for FileSource {
    fn read(&mut self, page_number: u32) -> Result<&[u8]> {
        validate_page_number(page_number, self.page_count(), "read page (file)")?;
        let offset = (page_number as u64 - 1) * self.page_size as u64;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::io("read page (file)", e))?;
        self.file
            .read_exact(&mut self.buf)
            .map_err(|e| Error::io("read page (file)", e))?;
        Ok(&self.buf)
    }

    fn write(&mut self, page_number: u32, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.page_size as usize {
            return Err(Error::argument_error(format!(
                "write page (file): expected {} bytes, got {}",
                self.page_size,
                bytes.len()
            )));
        }
        let offset = (page_number as u64 - 1) * self.page_size as u64;
        self.file.seek(SeekFrom::Start(offset)).map_err(|e| Error::io("write page (file)", e))?;
        self.file.write_all(bytes).map_err(|e| Error::io("write page (file)", e))?;
        self.file_len = self.file_len.max(offset + bytes.len() as u64);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all().map_err(|e| Error::io("fsync database file", e))
    }

    fn page_count(&self) -> u32 {
        (self.file_len / self.page_size as u64) as u32
    }

    fn close(self) {
        drop(self.file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_slices_pages() {
        let mut data = vec![0u8; 4096 * 3];
        data[4096] = 0xAB;
        let mut source = MemorySource::new(data, 4096);
        assert_eq!(source.page_count(), 3);
        let page2 = source.read(2).unwrap();
        assert_eq!(page2[0], 0xAB);
    }

    #[test]
    fn memory_source_rejects_page_zero_and_out_of_range() {
        let mut source = MemorySource::new(vec![0u8; 4096], 4096);
        assert!(source.read(0).is_err());
        assert!(source.read(2).is_err());
    }
}

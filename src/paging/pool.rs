use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::debug;

use crate::error::Result;
use crate::paging::{Page, PageStorage};

/// LRU-bounded cache of live pages in front of a [`PageStorage`].
///
/// A hit touches the LRU order only; a miss takes a buffer from the
/// freelist (or allocates one), loads it from storage and inserts it,
/// evicting the least-recently-used page first if the pool is full.
/// Dirty pages are written back before their buffer is recycled.
pub struct PagePool<Id, S> {
    cache: LruCache<Id, Page>,
    free: Vec<Page>,
    storage: S,
    page_size: usize,
    capacity: usize,
}

impl<Id, S> PagePool<Id, S>
where
    Id: Copy + Eq + Hash,
    S: PageStorage<Id>,
{
    pub fn new(storage: S, capacity: usize, page_size: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).expect("pool capacity must be non-zero");
        PagePool {
            cache: LruCache::new(cap),
            free: Vec::new(),
            storage,
            page_size,
            capacity,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Fetch the page for `id`, loading it from storage on a miss.
    /// The returned page is the most-recently-used entry.
    pub fn get(&mut self, id: Id) -> Result<&mut Page> {
        if !self.cache.contains(&id) {
            self.evict_if_full()?;
            let mut page = self
                .free
                .pop()
                .unwrap_or_else(|| Page::new(self.page_size));
            if let Err(e) = self.storage.load(id, &mut page) {
                self.free.push(page);
                return Err(e);
            }
            self.cache.put(id, page);
        }
        Ok(self.cache.get_mut(&id).expect("page was just inserted"))
    }

    /// Write back the LRU victim (if dirty) and recycle its buffer.
    fn evict_if_full(&mut self) -> Result<()> {
        if self.cache.len() < self.capacity {
            return Ok(());
        }
        let (victim, mut page) = self.cache.pop_lru().expect("pool is full");
        if page.is_dirty() {
            if let Err(e) = self.storage.store(victim, &mut page) {
                // Reinstate the victim so no modified page is silently lost.
                self.cache.put(victim, page);
                return Err(e);
            }
            debug!("evicted dirty page after write-back");
        }
        self.free.push(page);
        Ok(())
    }

    /// Drop the page from the cache and free its id in storage.
    pub fn remove(&mut self, id: Id) -> Result<()> {
        if let Some(page) = self.cache.pop(&id) {
            self.free.push(page);
        }
        self.storage.remove(id)
    }

    /// Write out every dirty cached page and the storage metadata.
    pub fn flush(&mut self) -> Result<()> {
        let mut written = 0;
        for (id, page) in self.cache.iter_mut() {
            if page.is_dirty() {
                self.storage.store(*id, page)?;
                written += 1;
            }
        }
        debug!(pages = written, "flushed page pool");
        self.storage.flush()
    }

    pub fn close(&mut self) -> Result<()> {
        let flushed = self.flush();
        let closed = self.storage.close();
        self.cache.clear();
        self.free.clear();
        flushed.and(closed)
    }

    /// Number of pages currently cached.
    pub fn cached_pages(&self) -> usize {
        self.cache.len()
    }

    /// Approximate resident bytes: cached pages plus freelist buffers.
    pub fn memory_footprint(&self) -> usize {
        (self.cache.len() + self.free.len()) * self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paging::FilePageStore;

    fn pool_with_capacity(
        dir: &std::path::Path,
        capacity: usize,
    ) -> PagePool<u32, FilePageStore> {
        let store = FilePageStore::open(dir.join("pages.dat"), 64).unwrap();
        PagePool::new(store, capacity, 64)
    }

    #[test]
    fn test_cache_never_exceeds_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = pool_with_capacity(dir.path(), 3);

        for id in 0..10u32 {
            pool.get(id).unwrap();
            assert!(pool.cached_pages() <= 3);
        }
    }

    #[test]
    fn test_dirty_page_survives_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = pool_with_capacity(dir.path(), 2);

        {
            let page = pool.get(0).unwrap();
            page.bytes_mut()[0] = 0x5A;
            page.set_dirty(true);
        }
        // Force page 0 out of the pool.
        pool.get(1).unwrap();
        pool.get(2).unwrap();
        assert!(pool.cached_pages() <= 2);

        let page = pool.get(0).unwrap();
        assert_eq!(page.bytes()[0], 0x5A);
    }

    #[test]
    fn test_get_marks_page_most_recently_used() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = pool_with_capacity(dir.path(), 2);

        {
            let page = pool.get(0).unwrap();
            page.bytes_mut()[0] = 1;
            page.set_dirty(true);
        }
        pool.get(1).unwrap();
        // Touch 0 so that 1 becomes the eviction victim.
        pool.get(0).unwrap();
        pool.get(2).unwrap();

        assert!(pool.cache.contains(&0));
        assert!(!pool.cache.contains(&1));
    }

    #[test]
    fn test_removed_page_reads_back_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = pool_with_capacity(dir.path(), 2);

        {
            let page = pool.get(4).unwrap();
            page.bytes_mut()[0] = 9;
            page.set_dirty(true);
        }
        pool.flush().unwrap();
        pool.remove(4).unwrap();

        let page = pool.get(4).unwrap();
        assert!(page.bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_flush_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut pool = pool_with_capacity(dir.path(), 4);
            let page = pool.get(2).unwrap();
            page.bytes_mut()[0] = 0x77;
            page.set_dirty(true);
            pool.close().unwrap();
        }

        let mut pool = pool_with_capacity(dir.path(), 4);
        let page = pool.get(2).unwrap();
        assert_eq!(page.bytes()[0], 0x77);
    }
}

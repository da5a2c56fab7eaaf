use crate::codec::{Comparator, Serializer};
use crate::error::Result;
use crate::index::page::EntriesView;
use crate::paging::{PageId, PagePool, TwoFileStore};

/// Walker over the page chain of a single bucket.
///
/// Every operation starts at the primary page `(bucket, 0)` and follows
/// the overflow links. Pages are fetched from the pool one at a time and
/// re-fetched after any other pool access, since fetching a different
/// page may evict the one a previous step looked at.
pub struct PageList<'p, K, I> {
    bucket: u32,
    pool: &'p mut PagePool<PageId, TwoFileStore>,
    key_ser: &'p dyn Serializer<K>,
    id_ser: &'p dyn Serializer<I>,
    cmp: &'p dyn Comparator<K>,
}

impl<'p, K, I> PageList<'p, K, I> {
    pub fn new(
        bucket: u32,
        pool: &'p mut PagePool<PageId, TwoFileStore>,
        key_ser: &'p dyn Serializer<K>,
        id_ser: &'p dyn Serializer<I>,
        cmp: &'p dyn Comparator<K>,
    ) -> Self {
        PageList {
            bucket,
            pool,
            key_ser,
            id_ser,
            cmp,
        }
    }

    fn head(&self) -> PageId {
        PageId::primary(self.bucket)
    }

    fn view(&mut self, id: PageId) -> Result<EntriesView<'_, K, I>> {
        let page = self.pool.get(id)?;
        Ok(EntriesView::new(page, self.key_ser, self.id_ser, self.cmp))
    }

    /// Linear scan of the chain for `key`.
    pub fn get(&mut self, key: &K) -> Result<Option<I>> {
        let mut id = self.head();
        loop {
            let view = self.view(id)?;
            let (pos, found) = view.find(key);
            if found {
                return Ok(Some(view.value_at(pos)));
            }
            let next = view.next_overflow();
            if next == 0 {
                return Ok(None);
            }
            id = PageId::overflow(self.bucket, next);
        }
    }

    /// Insert or overwrite. Returns `true` when a new entry was added.
    pub fn put(&mut self, key: &K, value: &I) -> Result<bool> {
        self.upsert(key, value, true).map(|(_, added)| added)
    }

    /// Insert `candidate` unless the key is already present, in which case
    /// the stored value is returned untouched. The flag reports whether an
    /// entry was added.
    pub fn get_or_add(&mut self, key: &K, candidate: &I) -> Result<(I, bool)> {
        self.upsert(key, candidate, false)
    }

    fn upsert(&mut self, key: &K, value: &I, overwrite: bool) -> Result<(I, bool)> {
        let mut id = self.head();
        loop {
            let (pos, next, full) = {
                let mut view = self.view(id)?;
                let (pos, found) = view.find(key);
                if found {
                    if overwrite {
                        view.update_at(pos, value);
                    }
                    return Ok((view.value_at(pos), false));
                }
                (pos, view.next_overflow(), view.is_full())
            };

            if next != 0 {
                id = PageId::overflow(self.bucket, next);
                continue;
            }

            // At the tail without a match.
            if !full {
                let mut view = self.view(id)?;
                view.insert_at(pos, key, value);
                return Ok((view.value_at(pos), true));
            }

            let overflow = self.pool.storage_mut().generate_overflow_id();
            self.view(id)?.set_next(overflow);
            let new_id = PageId::overflow(self.bucket, overflow);
            let mut view = self.view(new_id)?;
            view.insert_at(0, key, value);
            return Ok((view.value_at(0), true));
        }
    }

    /// Remove `key` from the chain.
    ///
    /// To keep pages compact, a hole left on a non-tail page is refilled
    /// with one entry migrated from the tail, and an emptied overflow tail
    /// is unlinked and released.
    pub fn remove(&mut self, key: &K) -> Result<bool> {
        // First pass: locate the key and the end of the chain.
        let mut id = self.head();
        let mut prev: Option<PageId> = None;
        let mut holder: Option<PageId> = None;
        let (tail, tail_prev) = loop {
            let view = self.view(id)?;
            let (_, found) = view.find(key);
            if found {
                holder = Some(id);
            }
            let next = view.next_overflow();
            if next == 0 {
                break (id, prev);
            }
            prev = Some(id);
            id = PageId::overflow(self.bucket, next);
        };

        let Some(holder) = holder else {
            return Ok(false);
        };

        // Re-fetch after the walk; the scans above may have evicted pages.
        {
            let mut view = self.view(holder)?;
            let removed = view.remove(key);
            debug_assert!(removed);
        }

        if holder != tail {
            // Migrate the last tail entry into the vacated page.
            let migrated = {
                let mut view = self.view(tail)?;
                let count = view.count();
                debug_assert!(count > 0);
                let entry = view.entry_at(count - 1);
                view.remove_at(count - 1);
                entry
            };
            let added = self.view(holder)?.put(&migrated.0, &migrated.1);
            debug_assert!(added);
        }

        // Unlink and release the tail if it is now an empty overflow page.
        if tail.is_overflow() && self.view(tail)?.count() == 0 {
            self.pool.remove(tail)?;
            if let Some(prev) = tail_prev {
                self.view(prev)?.clear_next();
            }
        }
        Ok(true)
    }

    /// Decode every entry of the chain, in chain order.
    pub fn entries(&mut self) -> Result<Vec<(K, I)>> {
        let mut all = Vec::new();
        let mut id = self.head();
        loop {
            let view = self.view(id)?;
            all.extend(view.entries());
            let next = view.next_overflow();
            if next == 0 {
                return Ok(all);
            }
            id = PageId::overflow(self.bucket, next);
        }
    }

    /// Append `key` at the tail without scanning for an existing entry.
    ///
    /// Bulk-restore path: the caller guarantees the key is not present
    /// anywhere in the chain.
    pub fn append(&mut self, key: &K, value: &I) -> Result<()> {
        let mut id = self.head();
        loop {
            let (next, full) = {
                let view = self.view(id)?;
                (view.next_overflow(), view.is_full())
            };
            if next != 0 {
                id = PageId::overflow(self.bucket, next);
                continue;
            }
            if !full {
                let mut view = self.view(id)?;
                let (pos, found) = view.find(key);
                debug_assert!(!found);
                view.insert_at(pos, key, value);
                return Ok(());
            }
            let overflow = self.pool.storage_mut().generate_overflow_id();
            self.view(id)?.set_next(overflow);
            id = PageId::overflow(self.bucket, overflow);
            let mut view = self.view(id)?;
            view.insert_at(0, key, value);
            return Ok(());
        }
    }

    /// Release the whole chain: zero the primary page and free every
    /// overflow page back to the pool and storage.
    pub fn clear(&mut self) -> Result<()> {
        let mut overflow_ids = Vec::new();
        let mut id = self.head();
        loop {
            let view = self.view(id)?;
            let next = view.next_overflow();
            if next == 0 {
                break;
            }
            id = PageId::overflow(self.bucket, next);
            overflow_ids.push(id);
        }

        for ovf in overflow_ids {
            self.pool.remove(ovf)?;
        }
        let head = self.head();
        self.pool.get(head)?.clear();
        Ok(())
    }

    /// Rebuild the chain from a sorted run, filling pages back to back.
    ///
    /// The bucket must have been cleared first; entries must already be
    /// sorted by the comparator since pages are filled by plain append.
    pub fn bulk_fill(&mut self, entries: &[(K, I)]) -> Result<()> {
        let capacity = {
            let view = self.view(self.head())?;
            debug_assert_eq!(view.count(), 0);
            view.capacity()
        };

        let mut id = self.head();
        for (i, chunk) in entries.chunks(capacity).enumerate() {
            if i > 0 {
                let overflow = self.pool.storage_mut().generate_overflow_id();
                self.view(id)?.set_next(overflow);
                id = PageId::overflow(self.bucket, overflow);
                self.pool.get(id)?.clear();
            }
            let mut view = self.view(id)?;
            view.bulk_append(chunk);
        }
        Ok(())
    }
}

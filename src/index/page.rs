use crate::codec::{Comparator, Serializer};
use crate::paging::Page;

/// Typed view over a raw [`Page`] holding a sorted run of `(K, I)` entries.
///
/// Layout inside the fixed-size buffer, big-endian:
///
/// ```text
/// entry[0] .. entry[count-1] | padding | count: u16 | next_overflow: u32
/// ```
///
/// Entries are `key_bytes ‖ value_bytes` back to back, strictly sorted by
/// the comparator. `next_overflow` links the bucket chain (0 = none).
pub struct EntriesView<'a, K, I> {
    page: &'a mut Page,
    key_ser: &'a dyn Serializer<K>,
    id_ser: &'a dyn Serializer<I>,
    cmp: &'a dyn Comparator<K>,
}

/// Per-page entry capacity for the given page and entry sizes.
pub fn page_capacity(page_size: usize, entry_size: usize) -> usize {
    (page_size - 6) / entry_size
}

impl<'a, K, I> EntriesView<'a, K, I> {
    pub fn new(
        page: &'a mut Page,
        key_ser: &'a dyn Serializer<K>,
        id_ser: &'a dyn Serializer<I>,
        cmp: &'a dyn Comparator<K>,
    ) -> Self {
        EntriesView {
            page,
            key_ser,
            id_ser,
            cmp,
        }
    }

    fn entry_size(&self) -> usize {
        self.key_ser.size() + self.id_ser.size()
    }

    pub fn capacity(&self) -> usize {
        page_capacity(self.page.size(), self.entry_size())
    }

    pub fn count(&self) -> usize {
        let ps = self.page.size();
        let bytes = &self.page.bytes()[ps - 6..ps - 4];
        u16::from_be_bytes([bytes[0], bytes[1]]) as usize
    }

    fn set_count(&mut self, count: usize) {
        let ps = self.page.size();
        self.page.bytes_mut()[ps - 6..ps - 4].copy_from_slice(&(count as u16).to_be_bytes());
    }

    pub fn is_full(&self) -> bool {
        self.count() == self.capacity()
    }

    /// Overflow id of the next page in the bucket chain (0 = tail).
    pub fn next_overflow(&self) -> u32 {
        let ps = self.page.size();
        let bytes = &self.page.bytes()[ps - 4..ps];
        u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    pub fn set_next(&mut self, next_overflow: u32) {
        let ps = self.page.size();
        self.page.bytes_mut()[ps - 4..ps].copy_from_slice(&next_overflow.to_be_bytes());
        self.page.set_dirty(true);
    }

    pub fn clear_next(&mut self) {
        self.set_next(0);
    }

    pub fn key_at(&self, idx: usize) -> K {
        debug_assert!(idx < self.count());
        let offset = idx * self.entry_size();
        self.key_ser
            .from_bytes(&self.page.bytes()[offset..offset + self.key_ser.size()])
    }

    pub fn value_at(&self, idx: usize) -> I {
        debug_assert!(idx < self.count());
        let offset = idx * self.entry_size() + self.key_ser.size();
        self.id_ser
            .from_bytes(&self.page.bytes()[offset..offset + self.id_ser.size()])
    }

    pub fn entry_at(&self, idx: usize) -> (K, I) {
        (self.key_at(idx), self.value_at(idx))
    }

    /// Binary search. On a hit returns `(index, true)`; on a miss returns
    /// the insertion position and `false`.
    pub fn find(&self, key: &K) -> (usize, bool) {
        let mut lo = 0;
        let mut hi = self.count();
        while lo < hi {
            let mid = (lo + hi) / 2;
            match self.cmp.compare(&self.key_at(mid), key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return (mid, true),
            }
        }
        (lo, false)
    }

    pub fn update_at(&mut self, idx: usize, value: &I) {
        debug_assert!(idx < self.count());
        let offset = idx * self.entry_size() + self.key_ser.size();
        let id_size = self.id_ser.size();
        self.id_ser
            .copy_bytes(value, &mut self.page.bytes_mut()[offset..offset + id_size]);
        self.page.set_dirty(true);
    }

    /// Insert at position, shifting the tail right. The caller must have
    /// checked capacity.
    pub fn insert_at(&mut self, idx: usize, key: &K, value: &I) {
        let count = self.count();
        debug_assert!(idx <= count);
        debug_assert!(count < self.capacity());

        let esize = self.entry_size();
        let key_size = self.key_ser.size();
        let start = idx * esize;
        let end = count * esize;
        let data = self.page.bytes_mut();
        data.copy_within(start..end, start + esize);

        self.key_ser
            .copy_bytes(key, &mut self.page.bytes_mut()[start..start + key_size]);
        self.id_ser.copy_bytes(
            value,
            &mut self.page.bytes_mut()[start + key_size..start + esize],
        );
        self.set_count(count + 1);
        self.page.set_dirty(true);
    }

    /// Remove the entry at position, shifting the tail left.
    pub fn remove_at(&mut self, idx: usize) {
        let count = self.count();
        debug_assert!(idx < count);

        let esize = self.entry_size();
        let start = (idx + 1) * esize;
        let end = count * esize;
        self.page.bytes_mut().copy_within(start..end, idx * esize);
        self.set_count(count - 1);
        self.page.set_dirty(true);
    }

    /// Overwrite on a hit, insert at the search position otherwise.
    /// Returns `true` when a new entry was added.
    pub fn put(&mut self, key: &K, value: &I) -> bool {
        let (idx, found) = self.find(key);
        if found {
            self.update_at(idx, value);
            false
        } else {
            self.insert_at(idx, key, value);
            true
        }
    }

    pub fn remove(&mut self, key: &K) -> bool {
        let (idx, found) = self.find(key);
        if found {
            self.remove_at(idx);
        }
        found
    }

    /// Append already-sorted entries after the current content.
    ///
    /// Fast path for rebuilding buckets from sorted runs; does not re-sort
    /// or check for duplicates.
    pub fn bulk_append(&mut self, entries: &[(K, I)]) {
        let count = self.count();
        debug_assert!(count + entries.len() <= self.capacity());

        let esize = self.entry_size();
        let key_size = self.key_ser.size();
        for (i, (key, value)) in entries.iter().enumerate() {
            let start = (count + i) * esize;
            self.key_ser
                .copy_bytes(key, &mut self.page.bytes_mut()[start..start + key_size]);
            self.id_ser.copy_bytes(
                value,
                &mut self.page.bytes_mut()[start + key_size..start + esize],
            );
        }
        self.set_count(count + entries.len());
        self.page.set_dirty(true);
    }

    /// Decode all entries in slot order.
    pub fn entries(&self) -> Vec<(K, I)> {
        (0..self.count()).map(|i| self.entry_at(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AddressCodec, U32Codec};
    use crate::types::Address;

    fn addr(tag: u8) -> Address {
        let mut raw = [0u8; 20];
        raw[0] = tag;
        Address::new(raw)
    }

    fn view(page: &mut Page) -> EntriesView<'_, Address, u32> {
        EntriesView::new(page, &AddressCodec, &U32Codec, &AddressCodec)
    }

    #[test]
    fn test_capacity_arithmetic() {
        // (4096 - 6) / 24 = 170 entries per 4K page for 20-byte keys.
        let mut page = Page::new(4096);
        assert_eq!(view(&mut page).capacity(), 170);
    }

    #[test]
    fn test_put_keeps_entries_sorted() {
        let mut page = Page::new(256);
        let mut v = view(&mut page);

        for tag in [5u8, 1, 9, 3, 7] {
            assert!(v.put(&addr(tag), &(tag as u32)));
        }
        assert_eq!(v.count(), 5);
        let keys: Vec<u8> = v.entries().iter().map(|(k, _)| k.0[0]).collect();
        assert_eq!(keys, vec![1, 3, 5, 7, 9]);
        assert!(page.is_dirty());
    }

    #[test]
    fn test_put_overwrites_existing_value() {
        let mut page = Page::new(256);
        let mut v = view(&mut page);

        assert!(v.put(&addr(4), &10));
        assert!(!v.put(&addr(4), &20));
        assert_eq!(v.count(), 1);
        assert_eq!(v.value_at(0), 20);
    }

    #[test]
    fn test_find_reports_insertion_position() {
        let mut page = Page::new(256);
        let mut v = view(&mut page);
        v.put(&addr(2), &0);
        v.put(&addr(6), &1);

        assert_eq!(v.find(&addr(1)), (0, false));
        assert_eq!(v.find(&addr(2)), (0, true));
        assert_eq!(v.find(&addr(4)), (1, false));
        assert_eq!(v.find(&addr(9)), (2, false));
    }

    #[test]
    fn test_remove_shifts_tail() {
        let mut page = Page::new(256);
        let mut v = view(&mut page);
        for tag in [1u8, 2, 3] {
            v.put(&addr(tag), &(tag as u32));
        }

        assert!(v.remove(&addr(2)));
        assert!(!v.remove(&addr(2)));
        assert_eq!(v.count(), 2);
        assert_eq!(v.key_at(0).0[0], 1);
        assert_eq!(v.key_at(1).0[0], 3);
        assert_eq!(v.value_at(1), 3);
    }

    #[test]
    fn test_bulk_append_and_chain_link() {
        let mut page = Page::new(256);
        let mut v = view(&mut page);

        let entries: Vec<(Address, u32)> = (0..4).map(|i| (addr(i), i as u32)).collect();
        v.bulk_append(&entries);
        assert_eq!(v.count(), 4);
        assert_eq!(v.find(&addr(2)), (2, true));

        v.set_next(17);
        assert_eq!(v.next_overflow(), 17);
        v.clear_next();
        assert_eq!(v.next_overflow(), 0);
        // Chain link lives outside the entry area.
        assert_eq!(v.count(), 4);
    }
}

use std::cmp::Ordering;
use std::sync::Arc;

use crate::btree::BTree;
use crate::codec::Comparator;

/// Composite key of the multimap's backing tree.
///
/// `Min(k)` and `Max(k)` are sentinel forms used only to bound range
/// scans: `Min(k)` orders strictly before every `Pair(k, _)` and `Max(k)`
/// strictly after, while both stay inside key `k`'s neighborhood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Composite<K, V> {
    Min(K),
    Pair(K, V),
    Max(K),
}

impl<K, V> Composite<K, V> {
    fn key(&self) -> &K {
        match self {
            Composite::Min(key) | Composite::Max(key) => key,
            Composite::Pair(key, _) => key,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Composite::Min(_) => 0,
            Composite::Pair(_, _) => 1,
            Composite::Max(_) => 2,
        }
    }
}

/// Orders composites by key, then sentinel rank, then value.
struct CompositeComparator<K, V> {
    key_cmp: Arc<dyn Comparator<K>>,
    value_cmp: Arc<dyn Comparator<V>>,
}

impl<K, V> Comparator<Composite<K, V>> for CompositeComparator<K, V> {
    fn compare(&self, a: &Composite<K, V>, b: &Composite<K, V>) -> Ordering {
        let by_key = self.key_cmp.compare(a.key(), b.key());
        if by_key != Ordering::Equal {
            return by_key;
        }
        match (a, b) {
            (Composite::Pair(_, va), Composite::Pair(_, vb)) => self.value_cmp.compare(va, vb),
            _ => a.rank().cmp(&b.rank()),
        }
    }
}

/// Sorted multimap: many values per key, backed by a B-tree over the
/// composite `(key, value)` ordering.
pub struct SortedMultiMap<K, V> {
    tree: BTree<Composite<K, V>, CompositeComparator<K, V>>,
}

impl<K: Clone, V: Clone> SortedMultiMap<K, V> {
    pub fn new(
        capacity: usize,
        key_cmp: Arc<dyn Comparator<K>>,
        value_cmp: Arc<dyn Comparator<V>>,
    ) -> Self {
        SortedMultiMap {
            tree: BTree::new(capacity, CompositeComparator { key_cmp, value_cmp }),
        }
    }

    /// Associate `value` with `key`. Duplicate pairs are a no-op.
    pub fn add(&mut self, key: K, value: V) -> bool {
        self.tree.insert(Composite::Pair(key, value))
    }

    /// Remove one `(key, value)` association.
    pub fn remove(&mut self, key: &K, value: &V) -> bool {
        self.tree
            .remove(&Composite::Pair(key.clone(), value.clone()))
    }

    /// Remove every value associated with `key`.
    pub fn remove_all(&mut self, key: &K) {
        let doomed: Vec<Composite<K, V>> = self
            .tree
            .iterator(Composite::Min(key.clone()), Composite::Max(key.clone()))
            .cloned()
            .collect();
        for entry in &doomed {
            self.tree.remove(entry);
        }
    }

    /// All values associated with `key`, in value order.
    pub fn get_all(&self, key: &K) -> Vec<V> {
        self.tree
            .iterator(Composite::Min(key.clone()), Composite::Max(key.clone()))
            .filter_map(|entry| match entry {
                Composite::Pair(_, value) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of stored associations.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

use crate::btree::BTree;
use crate::btree::node::Node;
use crate::codec::Comparator;

/// Traversal context for one node on the iterator stack.
struct Frame {
    node: usize,
    current: usize,
    end: usize,
    /// On inner nodes the walk alternates between descending into the
    /// child at `current` and yielding the key at `current`.
    visit_child: bool,
}

/// Ascending iterator over the keys in `[start, end)`.
///
/// The traversal keeps an explicit stack of per-node frames instead of
/// parent links, so it holds no references into the tree besides the
/// shared borrow it was created with.
pub struct RangeIter<'a, K, C> {
    tree: &'a BTree<K, C>,
    start: K,
    end: K,
    stack: Vec<Frame>,
    peeked: Option<&'a K>,
}

impl<'a, K: Clone, C: Comparator<K>> RangeIter<'a, K, C> {
    pub(crate) fn new(tree: &'a BTree<K, C>, start: K, end: K) -> Self {
        let mut iter = RangeIter {
            tree,
            start,
            end,
            stack: Vec::new(),
            peeked: None,
        };
        let root_frame = iter.frame_for(tree.root);
        iter.stack.push(root_frame);
        iter
    }

    fn frame_for(&self, node: usize) -> Frame {
        let (current, _) = self.tree.search_keys(node, &self.start);
        let (end, _) = self.tree.search_keys(node, &self.end);
        Frame {
            node,
            current,
            end,
            visit_child: !self.tree.nodes[node].is_leaf(),
        }
    }

    /// Whether another key remains. Peeks without consuming; repeated
    /// calls observe the same element.
    pub fn has_next(&mut self) -> bool {
        if self.peeked.is_none() {
            self.peeked = self.advance();
        }
        self.peeked.is_some()
    }

    fn advance(&mut self) -> Option<&'a K> {
        let tree = self.tree;
        loop {
            let top = self.stack.last_mut()?;
            match &tree.nodes[top.node] {
                Node::Leaf { keys } => {
                    if top.current < top.end {
                        let key = &keys[top.current];
                        top.current += 1;
                        return Some(key);
                    }
                    self.stack.pop();
                }
                Node::Inner { keys, children } => {
                    if top.visit_child {
                        top.visit_child = false;
                        let child = children[top.current];
                        let frame = self.frame_for(child);
                        self.stack.push(frame);
                    } else if top.current < top.end {
                        let key = &keys[top.current];
                        top.current += 1;
                        top.visit_child = true;
                        return Some(key);
                    } else {
                        self.stack.pop();
                    }
                }
            }
        }
    }
}

impl<'a, K: Clone, C: Comparator<K>> Iterator for RangeIter<'a, K, C> {
    type Item = &'a K;

    fn next(&mut self) -> Option<&'a K> {
        if let Some(key) = self.peeked.take() {
            return Some(key);
        }
        self.advance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::OrdComparator;

    fn tree_with(keys: &[u32]) -> BTree<u32, OrdComparator<u32>> {
        let mut t = BTree::new(3, OrdComparator::new());
        for &key in keys {
            t.insert(key);
        }
        t
    }

    fn range(t: &BTree<u32, OrdComparator<u32>>, start: u32, end: u32) -> Vec<u32> {
        t.iterator(start, end).copied().collect()
    }

    #[test]
    fn test_range_bounds_are_half_open() {
        let t = tree_with(&[7, 3, 6, 8, 2]);
        assert_eq!(range(&t, 1, 5), vec![2, 3]);
        assert_eq!(range(&t, 2, 7), vec![2, 3, 6]);
        assert_eq!(range(&t, 10, 100), Vec::<u32>::new());
    }

    #[test]
    fn test_full_range_visits_every_key_in_order() {
        let keys: Vec<u32> = (0..100).map(|i| (i * 17) % 101).collect();
        let t = tree_with(&keys);
        let visited = range(&t, 0, 101);

        let mut expected = keys.clone();
        expected.sort();
        assert_eq!(visited, expected);
    }

    #[test]
    fn test_has_next_is_idempotent() {
        let t = tree_with(&[1, 2, 3]);
        let mut iter = t.iterator(2, 10);

        for _ in 0..5 {
            assert!(iter.has_next());
        }
        assert_eq!(iter.next(), Some(&2));
        assert_eq!(iter.next(), Some(&3));
        for _ in 0..5 {
            assert!(!iter.has_next());
        }
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn test_empty_tree_yields_nothing() {
        let t = tree_with(&[]);
        let mut iter = t.iterator(0, 100);
        assert!(!iter.has_next());
        assert_eq!(iter.next(), None);
    }
}

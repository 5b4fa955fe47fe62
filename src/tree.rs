//! The tree proper: owns the root page and drives descend/insert/lookup/
//! remove/scan over [`Node`]s. Grounded in the teacher's `b_tree.rs`
//! (descend-with-filter, split-then-retry, merge-while-under-full loop).

use std::ptr;

use tracing::{instrument, trace};

use crate::node::Node;

/// An in-memory, single-threaded ordered key-value index backed by a B+
/// tree of 4096-byte slotted pages.
///
/// Keys and values are arbitrary byte slices, including empty ones (a
/// zero-length key or value is a perfectly ordinary entry — there is no
/// "null" distinct from "empty" for a Rust slice). The one fatal case is a
/// single entry too large to ever fit in an empty page, which `insert`
/// reports with a `panic!`, matching the precondition check the teacher's
/// own `BTree::insert` makes before doing any work.
pub struct BTree {
    root: *mut Node,
}

impl BTree {
    pub fn new() -> Self {
        let mut root = Node::new(true);
        root.set_fences(&[], &[]);
        BTree { root: Box::into_raw(Box::new(root)) }
    }

    /// Descends from `root` toward `key`, stopping early at the first node
    /// for which `filter` returns true (used to relocate a specific node
    /// and its immediate parent after some other mutation moved it, rather
    /// than trusting a pointer captured before that mutation). Returns
    /// `(node, parent, index_in_parent)`; `parent` is null if `node` is the
    /// root.
    fn descend(root: *mut Node, key: &[u8], mut filter: impl FnMut(*mut Node) -> bool) -> (*mut Node, *mut Node, usize) {
        let mut node = root;
        let mut parent: *mut Node = ptr::null_mut();
        let mut index = 0usize;
        loop {
            if filter(node) {
                break;
            }
            let n = unsafe { &*node };
            if n.is_leaf() {
                break;
            }
            index = n.find_child_index(key);
            parent = node;
            node = n.child_at(index);
        }
        (node, parent, index)
    }

    #[instrument(skip(self, key, value))]
    pub fn insert(&mut self, key: &[u8], value: &[u8]) {
        assert!(
            Node::fits_in_empty_page(key.len(), value.len()),
            "entry of {} key byte(s) and {} value byte(s) can never fit in a single page",
            key.len(),
            value.len()
        );
        // Replace-if-present: the external contract is upsert, but a leaf
        // never holds two slots for the same key.
        self.remove(key);
        loop {
            let (leaf_ptr, parent_ptr, _) = Self::descend(self.root, key, |_| false);
            let leaf = unsafe { &mut *leaf_ptr };
            if leaf.insert_leaf(key, value).is_ok() {
                self.validate_tree();
                return;
            }
            trace!("leaf full, splitting");
            self.split_node(leaf_ptr, parent_ptr, key);
        }
    }

    /// Splits `node` (known to be full), creating a new root above it first
    /// if it has no parent. Recurses into [`Self::ensure_space`] if the
    /// parent itself has no room for the new separator.
    fn split_node(&mut self, node: *mut Node, parent: *mut Node, key: &[u8]) {
        let parent = if parent.is_null() {
            let new_root = Node::new_inner_boxed(node);
            self.root = new_root;
            new_root
        } else {
            parent
        };
        let n = unsafe { &mut *node };
        let p = unsafe { &mut *parent };
        if n.split(p).is_err() {
            self.ensure_space(parent, key);
            let n = unsafe { &mut *node };
            let p = unsafe { &mut *parent };
            n.split(p).expect("parent was just given room for one more separator");
        }
    }

    /// Relocates `to_split` (whose parent didn't have room for a new
    /// separator) from the current root and splits it, growing the tree
    /// upward as many levels as needed.
    fn ensure_space(&mut self, to_split: *mut Node, key: &[u8]) {
        let (node, parent, _) = Self::descend(self.root, key, |n| n == to_split);
        debug_assert_eq!(node, to_split);
        self.split_node(to_split, parent, key);
    }

    #[instrument(skip(self, key))]
    pub fn lookup(&self, key: &[u8]) -> Option<Vec<u8>> {
        let (leaf_ptr, _, _) = Self::descend(self.root, key, |_| false);
        let leaf = unsafe { &*leaf_ptr };
        let (pos, found) = leaf.lower_bound(key);
        found.then(|| leaf.value_at(pos).to_vec())
    }

    #[instrument(skip(self, key))]
    pub fn remove(&mut self, key: &[u8]) -> bool {
        let mut merge_target: *mut Node = ptr::null_mut();
        let result;
        loop {
            let (node_ptr, parent_ptr, _) = Self::descend(self.root, key, |n| n == merge_target);
            if merge_target.is_null() {
                let node = unsafe { &mut *node_ptr };
                if !node.remove_key(key) {
                    result = false;
                    break;
                }
                if !node.is_underfull() {
                    result = true;
                    break;
                }
                merge_target = node_ptr;
            }
            debug_assert_eq!(merge_target, node_ptr);
            if parent_ptr.is_null() {
                result = true;
                break;
            }
            let parent = unsafe { &mut *parent_ptr };
            if parent.try_merge_child(key).is_ok() && parent.is_underfull() {
                trace!("cascading merge upward");
                merge_target = parent_ptr;
            } else {
                result = true;
                break;
            }
        }
        self.validate_tree();
        result
    }

    /// Invokes `callback(key, value)` for every entry with key `>= start`,
    /// in ascending order, stopping as soon as `callback` returns `false`.
    #[instrument(skip(self, start, callback))]
    pub fn scan(&self, start: &[u8], mut callback: impl FnMut(&[u8], &[u8]) -> bool) {
        Self::scan_node(self.root, start, &mut callback);
    }

    /// Recurses into `node`'s subtree; returns `false` once the callback
    /// has asked to stop (propagated so every enclosing call also stops
    /// without further callback invocations).
    fn scan_node(node: *mut Node, start: &[u8], callback: &mut dyn FnMut(&[u8], &[u8]) -> bool) -> bool {
        let n = unsafe { &mut *node };
        if n.is_leaf() {
            let (pos, _) = n.lower_bound(start);
            for i in pos..n.count() {
                let key = n.full_key(i);
                if key.as_slice() < start {
                    continue;
                }
                if !callback(&key, n.value_at(i)) {
                    return false;
                }
            }
            true
        } else {
            // Inner nodes route children in key order; an Eytzinger-ordered
            // node must be re-sorted first so this walk visits them in
            // ascending order.
            n.to_sorted();
            let (pos, _) = n.lower_bound(start);
            for i in pos..=n.count() {
                if !Self::scan_node(n.child_at(i), start, callback) {
                    return false;
                }
            }
            true
        }
    }

    #[cfg(debug_assertions)]
    fn validate_tree(&self) {
        fn go(node: *mut Node) {
            let n = unsafe { &*node };
            n.validate();
            if !n.is_leaf() {
                for i in 0..n.count() {
                    go(n.child_at(i));
                }
                go(n.child_at(n.count()));
            }
        }
        go(self.root);
    }

    #[cfg(not(debug_assertions))]
    fn validate_tree(&self) {}
}

impl Default for BTree {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BTree {
    fn drop(&mut self) {
        unsafe { Node::destroy(self.root) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_scan(tree: &BTree, start: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        tree.scan(start, |k, v| {
            out.push((k.to_vec(), v.to_vec()));
            true
        });
        out
    }

    #[test]
    fn empty_tree_misses_everything() {
        let tree = BTree::new();
        assert_eq!(tree.lookup(b"x"), None);
        assert!(collect_scan(&tree, b"").is_empty());
    }

    #[test]
    fn single_entry_roundtrips() {
        let mut tree = BTree::new();
        tree.insert(b"k", b"v");
        assert_eq!(tree.lookup(b"k"), Some(b"v".to_vec()));
        assert!(tree.remove(b"k"));
        assert_eq!(tree.lookup(b"k"), None);
        assert!(!tree.remove(b"k"));
    }

    #[test]
    fn integer_keys_scan_and_remove_in_order() {
        let mut tree = BTree::new();
        for i in 0u32..10 {
            tree.insert(&i.to_be_bytes(), &i.to_be_bytes());
        }
        for i in 0u32..10 {
            assert_eq!(tree.lookup(&i.to_be_bytes()), Some(i.to_be_bytes().to_vec()));
        }
        let scanned = collect_scan(&tree, &3u32.to_be_bytes());
        let expected: Vec<u32> = (3..10).collect();
        assert_eq!(scanned.len(), expected.len());
        for ((k, _), e) in scanned.iter().zip(expected.iter()) {
            assert_eq!(u32::from_be_bytes(k.as_slice().try_into().unwrap()), *e);
        }
        for i in 0u32..10 {
            assert!(tree.remove(&i.to_be_bytes()));
            assert_eq!(tree.lookup(&i.to_be_bytes()), None);
            assert!(!tree.remove(&i.to_be_bytes()));
        }
    }

    #[test]
    fn insert_replaces_existing_value() {
        let mut tree = BTree::new();
        tree.insert(b"k", b"v1");
        tree.insert(b"k", b"v2");
        assert_eq!(tree.lookup(b"k"), Some(b"v2".to_vec()));
    }

    #[test]
    fn scan_stops_after_callback_returns_false() {
        let mut tree = BTree::new();
        for i in 0u32..100 {
            tree.insert(&i.to_be_bytes(), &i.to_be_bytes());
        }
        let mut seen = Vec::new();
        tree.scan(&0u32.to_be_bytes(), |k, _| {
            seen.push(u32::from_be_bytes(k.try_into().unwrap()));
            seen.len() < 5
        });
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn repeated_key_growth_forces_leaf_split_into_two_level_tree() {
        let mut tree = BTree::new();
        for len in 1..=500 {
            tree.insert(&vec![b'A'; len], &[len as u8]);
        }
        for len in 1..=500 {
            assert_eq!(tree.lookup(&vec![b'A'; len]), Some(vec![len as u8]));
        }
        let root = unsafe { &*tree.root };
        assert!(!root.is_leaf(), "root should have split into an inner node");
        for i in 0..=root.count() {
            assert!(unsafe { &*root.child_at(i) }.is_leaf());
        }
    }

    #[test]
    fn shared_prefix_keys_compress_into_a_leafs_prefix() {
        let mut tree = BTree::new();
        for i in 0u32..256 {
            let key = format!("http://example.com/{i}").into_bytes();
            tree.insert(&key, &key);
        }
        for i in 0u32..256 {
            let key = format!("http://example.com/{i}").into_bytes();
            assert_eq!(tree.lookup(&key), Some(key));
        }
        fn find_leaf_with_long_prefix(node: *mut Node) -> Option<usize> {
            let n = unsafe { &*node };
            if n.is_leaf() {
                return (n.prefix_len() >= 19).then(|| n.prefix_len());
            }
            for i in 0..=n.count() {
                if let Some(p) = find_leaf_with_long_prefix(n.child_at(i)) {
                    return Some(p);
                }
            }
            None
        }
        assert!(
            find_leaf_with_long_prefix(tree.root).is_some(),
            "expected at least one leaf to compress the shared \"http://example.com/\" prefix"
        );
    }

    #[test]
    fn many_inserts_force_splits_and_survive_removal() {
        let mut tree = BTree::new();
        let n = 5000u32;
        for i in 0..n {
            let k = i.to_be_bytes();
            tree.insert(&k, &[b'v'; 40]);
        }
        for i in 0..n {
            assert_eq!(tree.lookup(&i.to_be_bytes()), Some(vec![b'v'; 40]));
        }
        for i in (0..n).step_by(2) {
            assert!(tree.remove(&i.to_be_bytes()));
        }
        for i in 0..n {
            let expect = if i % 2 == 0 { None } else { Some(vec![b'v'; 40]) };
            assert_eq!(tree.lookup(&i.to_be_bytes()), expect);
        }
    }

    #[test]
    fn zero_length_key_and_value_are_valid_entries() {
        let mut tree = BTree::new();
        tree.insert(b"", b"");
        assert_eq!(tree.lookup(b""), Some(Vec::new()));
        tree.insert(b"a", b"1");
        let scanned = collect_scan(&tree, b"");
        assert_eq!(scanned, vec![(Vec::new(), Vec::new()), (b"a".to_vec(), b"1".to_vec())]);
    }
}

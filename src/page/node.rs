use eyre::{bail, ensure, Result};

use crate::config::{MAX_KEYS_PER_PAGE, MIN_KEYS_PER_PAGE, NO_PAGE};
use crate::error::EngineError;

/// One B+tree node. See the module documentation for the anatomy and the
/// invariants the operations maintain.
#[derive(Debug, Clone)]
pub struct Page {
    pub(crate) id: u32,
    pub(crate) parent: u32,
    pub(crate) is_leaf: bool,
    pub(crate) is_root: bool,
    pub(crate) prev: u32,
    pub(crate) next: u32,
    pub(crate) keys: Vec<Vec<u8>>,
    pub(crate) values: Vec<Vec<u8>>,
    pub(crate) children: Vec<u32>,
}

impl Page {
    pub fn new_leaf(id: u32) -> Self {
        Self {
            id,
            parent: NO_PAGE,
            is_leaf: true,
            is_root: false,
            prev: NO_PAGE,
            next: NO_PAGE,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn new_internal(id: u32) -> Self {
        Self {
            is_leaf: false,
            ..Self::new_leaf(id)
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn parent(&self) -> u32 {
        self.parent
    }

    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn prev(&self) -> u32 {
        self.prev
    }

    pub fn next(&self) -> u32 {
        self.next
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        &self.keys[index]
    }

    pub fn value_at(&self, index: usize) -> &[u8] {
        &self.values[index]
    }

    pub fn child_at(&self, index: usize) -> u32 {
        self.children[index]
    }

    pub fn is_full(&self) -> bool {
        self.keys.len() >= MAX_KEYS_PER_PAGE
    }

    /// A non-root page below the occupancy floor must be rebalanced.
    pub fn is_underflow(&self) -> bool {
        !self.is_root && self.keys.len() < MIN_KEYS_PER_PAGE
    }

    /// Whether this page can give up one key and stay at or above the floor.
    pub fn can_lend(&self) -> bool {
        self.keys.len() > MIN_KEYS_PER_PAGE
    }

    /// Binary search for an exact key match.
    pub fn search(&self, key: &[u8]) -> Option<usize> {
        self.keys
            .binary_search_by(|probe| probe.as_slice().cmp(key))
            .ok()
    }

    /// Smallest index whose key is strictly greater than `key`, or
    /// `key_count` when no such key exists. Equal keys route right, which is
    /// what keeps "children[i+1] holds keys >= keys[i]" true during descent.
    pub fn find_insert_position(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|probe| probe.as_slice() <= key)
    }

    /// Inserts a key-value pair, replacing the value in place when the key
    /// already exists. Child pointers are never shifted here; that is
    /// exclusive to the split fix-up path (`insert_separator`).
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if let Some(idx) = self.search(key) {
            self.values[idx] = value.to_vec();
            return Ok(());
        }
        if self.is_full() {
            return Err(EngineError::PageFull { page: self.id }.into());
        }
        let pos = self.find_insert_position(key);
        self.keys.insert(pos, key.to_vec());
        self.values.insert(pos, value.to_vec());
        Ok(())
    }

    /// Installs a promoted separator and the child to its right. Internal
    /// nodes only; this is the split fix-up that does shift children.
    pub fn insert_separator(&mut self, key: Vec<u8>, right_child: u32) -> Result<()> {
        ensure!(!self.is_leaf, "separator insert on leaf page {}", self.id);
        if self.is_full() {
            return Err(EngineError::PageFull { page: self.id }.into());
        }
        let pos = self.find_insert_position(&key);
        self.keys.insert(pos, key);
        self.values.insert(pos, Vec::new());
        self.children.insert(pos + 1, right_child);
        Ok(())
    }

    /// Removes a key if present, dropping its buffers. For internal nodes
    /// the child to the right of the key shifts down with it. Removing an
    /// absent key is a no-op; callers that must observe the deletion check
    /// presence first.
    pub fn remove(&mut self, key: &[u8]) {
        if let Some(idx) = self.search(key) {
            self.keys.remove(idx);
            self.values.remove(idx);
            if !self.is_leaf {
                self.children.remove(idx + 1);
            }
        }
    }

    /// Splits this page around its midpoint, returning the new right-hand
    /// page (to live under `new_id`) and the separator the caller must
    /// promote into the parent.
    ///
    /// For a leaf the separator is a copy of the right half's first key and
    /// both halves keep their entries; the leaf chain is relinked so that
    /// `self -> right -> old self.next` (the caller patches the old
    /// successor's back pointer). For an internal node the median key moves
    /// up: it is removed from this node and returned, and the right half
    /// takes the keys and children above it.
    pub fn split(&mut self, new_id: u32) -> Result<(Page, Vec<u8>)> {
        ensure!(self.keys.len() >= 2, "split of page {} with {} keys", self.id, self.keys.len());
        let mid = self.keys.len() / 2;

        if self.is_leaf {
            let mut right = Page::new_leaf(new_id);
            right.keys = self.keys.split_off(mid);
            right.values = self.values.split_off(mid);
            right.parent = self.parent;
            right.prev = self.id;
            right.next = self.next;
            self.next = new_id;
            let separator = right.keys[0].clone();
            Ok((right, separator))
        } else {
            let mut right = Page::new_internal(new_id);
            right.keys = self.keys.split_off(mid + 1);
            right.values = self.values.split_off(mid + 1);
            right.children = self.children.split_off(mid + 1);
            right.parent = self.parent;
            let Some(separator) = self.keys.pop() else {
                bail!("internal split of page {} lost its median", self.id);
            };
            self.values.pop();
            Ok((right, separator))
        }
    }

    /// Appends `sibling`'s content onto this page. Internal merges splice
    /// the parent separator between the key runs; leaf merges drop it and
    /// inherit the sibling's forward link (the caller patches the back
    /// pointer of the new successor).
    pub fn merge(&mut self, mut sibling: Page, separator: Vec<u8>) {
        if self.is_leaf {
            self.keys.append(&mut sibling.keys);
            self.values.append(&mut sibling.values);
            self.next = sibling.next;
        } else {
            self.keys.push(separator);
            self.values.push(Vec::new());
            self.keys.append(&mut sibling.keys);
            self.values.append(&mut sibling.values);
            self.children.append(&mut sibling.children);
        }
    }

    /// Moves exactly one entry from the left sibling into this page and
    /// returns the separator the caller must install in the parent. For
    /// internal nodes the parent separator rotates through: it is demoted
    /// into this node and the sibling's last key is promoted.
    pub fn redistribute_from_left(
        &mut self,
        left: &mut Page,
        separator: Vec<u8>,
    ) -> Result<Vec<u8>> {
        ensure!(
            left.can_lend(),
            "page {} cannot lend (holds {} keys)",
            left.id,
            left.keys.len()
        );
        let (Some(lent_key), Some(lent_value)) = (left.keys.pop(), left.values.pop()) else {
            bail!("left sibling {} unexpectedly empty", left.id);
        };
        if self.is_leaf {
            self.keys.insert(0, lent_key);
            self.values.insert(0, lent_value);
            Ok(self.keys[0].clone())
        } else {
            self.keys.insert(0, separator);
            self.values.insert(0, Vec::new());
            let Some(child) = left.children.pop() else {
                bail!("internal sibling {} has no child to lend", left.id);
            };
            self.children.insert(0, child);
            Ok(lent_key)
        }
    }

    /// Mirror image of [`Page::redistribute_from_left`].
    pub fn redistribute_from_right(
        &mut self,
        right: &mut Page,
        separator: Vec<u8>,
    ) -> Result<Vec<u8>> {
        ensure!(
            right.can_lend(),
            "page {} cannot lend (holds {} keys)",
            right.id,
            right.keys.len()
        );
        if self.is_leaf {
            let lent_key = right.keys.remove(0);
            let lent_value = right.values.remove(0);
            self.keys.push(lent_key);
            self.values.push(lent_value);
            Ok(right.keys[0].clone())
        } else {
            self.keys.push(separator);
            self.values.push(Vec::new());
            self.children.push(right.children.remove(0));
            let promoted = right.keys.remove(0);
            right.values.remove(0);
            Ok(promoted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_with(id: u32, entries: &[(&[u8], &[u8])]) -> Page {
        let mut page = Page::new_leaf(id);
        for (k, v) in entries {
            page.insert(k, v).unwrap();
        }
        page
    }

    #[test]
    fn insert_keeps_keys_sorted() {
        let page = leaf_with(1, &[(b"charlie", b"3"), (b"alpha", b"1"), (b"bravo", b"2")]);
        assert_eq!(page.key_at(0), b"alpha");
        assert_eq!(page.key_at(1), b"bravo");
        assert_eq!(page.key_at(2), b"charlie");
    }

    #[test]
    fn insert_replaces_value_in_place() {
        let mut page = leaf_with(1, &[(b"k", b"old")]);
        page.insert(b"k", b"new").unwrap();
        assert_eq!(page.key_count(), 1);
        assert_eq!(page.value_at(0), b"new");
    }

    #[test]
    fn search_finds_exact_match_only() {
        let page = leaf_with(1, &[(b"b", b"1"), (b"d", b"2")]);
        assert_eq!(page.search(b"b"), Some(0));
        assert_eq!(page.search(b"d"), Some(1));
        assert_eq!(page.search(b"c"), None);
    }

    #[test]
    fn find_insert_position_routes_equal_keys_right() {
        let page = leaf_with(1, &[(b"b", b"1"), (b"d", b"2")]);
        assert_eq!(page.find_insert_position(b"a"), 0);
        assert_eq!(page.find_insert_position(b"b"), 1);
        assert_eq!(page.find_insert_position(b"c"), 1);
        assert_eq!(page.find_insert_position(b"z"), 2);
    }

    #[test]
    fn insert_into_full_page_fails() {
        let mut page = Page::new_leaf(1);
        for i in 0..MAX_KEYS_PER_PAGE {
            let key = format!("key{i:05}");
            page.insert(key.as_bytes(), b"v").unwrap();
        }
        assert!(page.is_full());
        let err = page.insert(b"zzz", b"v").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::PageFull { page: 1 })
        ));
        // Replacement is still allowed at capacity.
        page.insert(b"key00000", b"v2").unwrap();
    }

    #[test]
    fn remove_absent_key_is_noop() {
        let mut page = leaf_with(1, &[(b"a", b"1")]);
        page.remove(b"missing");
        assert_eq!(page.key_count(), 1);
    }

    #[test]
    fn remove_shifts_internal_children_down() {
        let mut page = Page::new_internal(5);
        page.children.push(10);
        page.insert_separator(b"b".to_vec(), 11).unwrap();
        page.insert_separator(b"d".to_vec(), 12).unwrap();
        assert_eq!(page.children, vec![10, 11, 12]);

        page.remove(b"b");
        assert_eq!(page.keys, vec![b"d".to_vec()]);
        assert_eq!(page.children, vec![10, 12]);
    }

    #[test]
    fn leaf_split_relinks_chain_and_promotes_first_right_key() {
        let mut page = leaf_with(3, &[(b"a", b"1"), (b"b", b"2"), (b"c", b"3"), (b"d", b"4")]);
        page.next = 8;

        let (right, separator) = page.split(9).unwrap();
        assert_eq!(separator, b"c".to_vec());
        assert_eq!(page.keys, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(right.keys, vec![b"c".to_vec(), b"d".to_vec()]);
        assert_eq!(page.next, 9);
        assert_eq!(right.prev, 3);
        assert_eq!(right.next, 8);
        // The separator stays present in the right leaf.
        assert_eq!(right.search(b"c"), Some(0));
    }

    #[test]
    fn internal_split_removes_median_from_both_halves() {
        let mut page = Page::new_internal(2);
        page.children.push(10);
        for (i, key) in [b"b", b"d", b"f", b"h", b"j"].iter().enumerate() {
            page.insert_separator(key.to_vec(), 11 + i as u32).unwrap();
        }

        let (right, median) = page.split(20).unwrap();
        assert_eq!(median, b"f".to_vec());
        assert_eq!(page.keys, vec![b"b".to_vec(), b"d".to_vec()]);
        assert_eq!(page.children, vec![10, 11, 12]);
        assert_eq!(right.keys, vec![b"h".to_vec(), b"j".to_vec()]);
        assert_eq!(right.children, vec![13, 14, 15]);
        assert_eq!(page.search(b"f"), None);
        assert_eq!(right.search(b"f"), None);
    }

    #[test]
    fn leaf_merge_concatenates_and_inherits_next() {
        let mut left = leaf_with(1, &[(b"a", b"1"), (b"b", b"2")]);
        let mut right = leaf_with(2, &[(b"c", b"3")]);
        right.next = 7;

        left.merge(right, b"c".to_vec());
        assert_eq!(left.keys.len(), 3);
        assert_eq!(left.next, 7);
        assert_eq!(left.search(b"c"), Some(2));
    }

    #[test]
    fn internal_merge_splices_separator_and_children() {
        let mut left = Page::new_internal(1);
        left.children.push(10);
        left.insert_separator(b"b".to_vec(), 11).unwrap();

        let mut right = Page::new_internal(2);
        right.children.push(12);
        right.insert_separator(b"f".to_vec(), 13).unwrap();

        left.merge(right, b"d".to_vec());
        assert_eq!(
            left.keys,
            vec![b"b".to_vec(), b"d".to_vec(), b"f".to_vec()]
        );
        assert_eq!(left.children, vec![10, 11, 12, 13]);
    }

    #[test]
    fn leaf_redistribute_from_left_moves_one_entry() {
        let mut left = Page::new_leaf(1);
        for i in 0..MIN_KEYS_PER_PAGE + 1 {
            left.insert(format!("a{i:05}").as_bytes(), b"v").unwrap();
        }
        let mut page = leaf_with(2, &[(b"zzz", b"v")]);

        let lent = left.keys.last().unwrap().clone();
        let separator = page
            .redistribute_from_left(&mut left, b"unused".to_vec())
            .unwrap();
        assert_eq!(separator, lent);
        assert_eq!(page.keys[0], lent);
        assert_eq!(left.key_count(), MIN_KEYS_PER_PAGE);
    }

    #[test]
    fn leaf_redistribute_from_right_moves_one_entry() {
        let mut right = Page::new_leaf(2);
        for i in 0..MIN_KEYS_PER_PAGE + 1 {
            right.insert(format!("m{i:05}").as_bytes(), b"v").unwrap();
        }
        let mut page = leaf_with(1, &[(b"a", b"v")]);

        let moved = right.keys[0].clone();
        let separator = page
            .redistribute_from_right(&mut right, b"unused".to_vec())
            .unwrap();
        assert_eq!(page.keys.last().unwrap(), &moved);
        assert_eq!(separator, right.keys[0]);
        assert_eq!(right.key_count(), MIN_KEYS_PER_PAGE);
    }

    #[test]
    fn internal_redistribute_rotates_separator_through_parent() {
        let mut left = Page::new_internal(1);
        left.children.push(10);
        for i in 0..MIN_KEYS_PER_PAGE + 1 {
            left.insert_separator(format!("a{i:05}").into_bytes(), 11 + i as u32)
                .unwrap();
        }
        let mut page = Page::new_internal(2);
        page.children.push(90);
        page.insert_separator(b"x".to_vec(), 91).unwrap();

        let promoted_expect = left.keys.last().unwrap().clone();
        let lent_child = *left.children.last().unwrap();
        let new_separator = page
            .redistribute_from_left(&mut left, b"sep".to_vec())
            .unwrap();

        assert_eq!(new_separator, promoted_expect);
        assert_eq!(page.keys[0], b"sep".to_vec());
        assert_eq!(page.children[0], lent_child);
        assert_eq!(left.children.len(), left.keys.len() + 1);
        assert_eq!(page.children.len(), page.keys.len() + 1);
    }

    #[test]
    fn occupancy_thresholds() {
        let mut page = Page::new_leaf(1);
        assert!(page.is_underflow());
        page.is_root = true;
        assert!(!page.is_underflow());
        page.is_root = false;

        for i in 0..MIN_KEYS_PER_PAGE {
            page.insert(format!("k{i:05}").as_bytes(), b"v").unwrap();
        }
        assert!(!page.is_underflow());
        assert!(!page.can_lend());

        page.insert(b"k99999", b"v").unwrap();
        assert!(page.can_lend());
    }

    #[test]
    fn redistribute_refuses_sibling_at_floor() {
        let mut left = Page::new_leaf(1);
        for i in 0..MIN_KEYS_PER_PAGE {
            left.insert(format!("a{i:05}").as_bytes(), b"v").unwrap();
        }
        let mut page = Page::new_leaf(2);
        assert!(page
            .redistribute_from_left(&mut left, b"s".to_vec())
            .is_err());
    }
}

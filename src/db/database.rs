use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

use super::snapshot::{self, DiskTarget};
use crate::codec::{decode, encode, Shape, Value};
use crate::config::{FIRST_PAGE_ID, NO_PAGE};
use crate::error::EngineError;
use crate::lock::{LockManager, LockMode};
use crate::page::Page;
use crate::stats;
use crate::txn::{Transaction, TxnMode, UndoEntry, UndoOp};

/// Structural state of the B+tree: the page map, the root id, and the page
/// id allocator. Pages reference each other by id through the map only.
pub(crate) struct Tree {
    pub(crate) root: u32,
    pub(crate) pages: HashMap<u32, Page>,
    pub(crate) next_page_id: u32,
}

impl Tree {
    fn new() -> Self {
        let mut root = Page::new_leaf(FIRST_PAGE_ID);
        root.is_root = true;
        let mut pages = HashMap::new();
        pages.insert(FIRST_PAGE_ID, root);
        Self {
            root: FIRST_PAGE_ID,
            pages,
            next_page_id: FIRST_PAGE_ID + 1,
        }
    }

    pub(crate) fn allocate_id(&mut self) -> u32 {
        let id = self.next_page_id;
        self.next_page_id += 1;
        id
    }

    pub(crate) fn page(&self, id: u32) -> Result<&Page> {
        match self.pages.get(&id) {
            Some(page) => Ok(page),
            None => bail!("page {id} missing from page map"),
        }
    }

    pub(crate) fn page_mut(&mut self, id: u32) -> Result<&mut Page> {
        match self.pages.get_mut(&id) {
            Some(page) => Ok(page),
            None => bail!("page {id} missing from page map"),
        }
    }
}

enum InsertOutcome {
    Inserted,
    Replaced(Vec<u8>),
    Rejected,
}

/// Point-in-time structural summary, mostly for tests and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    pub pages: usize,
    pub keys: usize,
    pub depth: usize,
    pub next_page_id: u32,
}

/// One named keyed store. Owns its pages and its lock manager; created and
/// registered by the environment.
pub struct Database {
    id: u32,
    name: String,
    tree: RwLock<Tree>,
    immutable: AtomicBool,
    disk: Mutex<Option<DiskTarget>>,
    locks: LockManager,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Database {
    pub(crate) fn open(id: u32, name: &str) -> Self {
        Self {
            id,
            name: name.to_owned(),
            tree: RwLock::new(Tree::new()),
            immutable: AtomicBool::new(true),
            disk: Mutex::new(None),
            locks: LockManager::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable.load(Ordering::Relaxed)
    }

    /// Toggles the overwrite policy: an immutable database rejects `put` on
    /// an existing key with `KeyExists`.
    pub fn set_immutable(&self, flag: bool) {
        self.immutable.store(flag, Ordering::Relaxed);
    }

    fn check_readable(&self, txn: &Transaction) -> Result<()> {
        if !txn.is_active() {
            return Err(
                EngineError::invalid_transaction(txn.id(), "transaction is not active").into(),
            );
        }
        if txn.mode() == TxnMode::WriteOnly {
            return Err(EngineError::invalid_transaction(
                txn.id(),
                "get on a WriteOnly transaction",
            )
            .into());
        }
        Ok(())
    }

    fn check_writable(&self, txn: &Transaction) -> Result<()> {
        if !txn.is_active() {
            return Err(
                EngineError::invalid_transaction(txn.id(), "transaction is not active").into(),
            );
        }
        if txn.mode() == TxnMode::ReadOnly {
            return Err(EngineError::invalid_transaction(
                txn.id(),
                "mutation on a ReadOnly transaction",
            )
            .into());
        }
        Ok(())
    }

    /// Looks up the current value of `key`, returning an owned copy.
    pub fn get(&self, txn: &mut Transaction, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_readable(txn)?;
        self.locks
            .lock_database(txn.id(), self.id, LockMode::IntentShared)?;

        let tree = self.tree.read();
        let path = Self::path_to_leaf(&tree, key)?;
        for &page_id in &path {
            self.locks.lock_page(txn.id(), page_id, LockMode::Shared)?;
        }
        let Some(&leaf_id) = path.last() else {
            bail!("descent produced an empty path");
        };
        self.locks
            .lock_record(txn.id(), leaf_id, key, LockMode::Shared)?;

        let leaf = tree.page(leaf_id)?;
        stats::bump(&stats::GET_COUNT);
        Ok(leaf.search(key).map(|idx| leaf.value_at(idx).to_vec()))
    }

    /// `get` followed by a decode under `shape`.
    pub fn get_typed(
        &self,
        txn: &mut Transaction,
        key: &[u8],
        shape: &Shape,
    ) -> Result<Option<Value>> {
        match self.get(txn, key)? {
            Some(bytes) => Ok(Some(decode(shape, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Installs `value` under `key`. A pre-existing key fails with
    /// `KeyExists` on an immutable database and is replaced in place (with
    /// an `Update` undo entry carrying the pre-image) on a mutable one.
    pub fn put(&self, txn: &mut Transaction, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_writable(txn)?;
        if key.is_empty() || value.is_empty() {
            return Err(
                EngineError::invalid_data_type("keys and values must be non-empty").into(),
            );
        }
        self.locks
            .lock_database(txn.id(), self.id, LockMode::IntentExclusive)?;

        let mut tree = self.tree.write();
        let path = Self::path_to_leaf(&tree, key)?;
        for &page_id in &path {
            self.locks
                .lock_page(txn.id(), page_id, LockMode::Exclusive)?;
        }
        let Some(&leaf_id) = path.last() else {
            bail!("descent produced an empty path");
        };
        self.locks
            .lock_record(txn.id(), leaf_id, key, LockMode::Exclusive)?;

        let mut touched = Vec::new();
        match Self::insert_raw(&mut tree, key, value, !self.is_immutable(), &mut touched)? {
            InsertOutcome::Rejected => return Err(EngineError::KeyExists.into()),
            InsertOutcome::Replaced(prior) => {
                txn.record_undo(UndoEntry::update(self.id, key.to_vec(), prior));
            }
            InsertOutcome::Inserted => {
                txn.record_undo(UndoEntry::insert(self.id, key.to_vec()));
            }
        }
        for page_id in touched {
            txn.mark_dirty(page_id);
            self.locks
                .lock_page(txn.id(), page_id, LockMode::Exclusive)?;
        }
        stats::bump(&stats::PUT_COUNT);
        Ok(())
    }

    /// Encodes `value` under `shape` and stores the bytes.
    pub fn put_typed(
        &self,
        txn: &mut Transaction,
        key: &[u8],
        shape: &Shape,
        value: &Value,
    ) -> Result<()> {
        let bytes = encode(shape, value)?;
        self.put(txn, key, &bytes)
    }

    /// Removes `key`, rebalancing the tree afterwards. Fails with `NotFound`
    /// when the key is absent.
    pub fn delete(&self, txn: &mut Transaction, key: &[u8]) -> Result<()> {
        self.check_writable(txn)?;
        self.locks
            .lock_database(txn.id(), self.id, LockMode::IntentExclusive)?;

        let mut tree = self.tree.write();
        let path = Self::path_to_leaf(&tree, key)?;
        for &page_id in &path {
            self.locks
                .lock_page(txn.id(), page_id, LockMode::Exclusive)?;
        }
        let Some(&leaf_id) = path.last() else {
            bail!("descent produced an empty path");
        };
        self.locks
            .lock_record(txn.id(), leaf_id, key, LockMode::Exclusive)?;

        let mut touched = Vec::new();
        let Some(prior) = Self::remove_raw(&mut tree, key, &mut touched)? else {
            return Err(EngineError::NotFound.into());
        };
        txn.record_undo(UndoEntry::delete(self.id, key.to_vec(), prior));
        for page_id in touched {
            txn.mark_dirty(page_id);
        }
        stats::bump(&stats::DELETE_COUNT);
        Ok(())
    }

    /// Reverts one undo entry. Called by the environment during abort
    /// replay, newest entry first; no locks are taken and no undo is logged.
    pub(crate) fn undo_entry(&self, entry: &UndoEntry) -> Result<()> {
        let mut tree = self.tree.write();
        let mut touched = Vec::new();
        match entry.op {
            UndoOp::Insert => {
                Self::remove_raw(&mut tree, &entry.key, &mut touched)?;
            }
            UndoOp::Update | UndoOp::Delete => {
                let Some(prior) = entry.prior.as_deref() else {
                    bail!("undo entry for {:?} lacks a pre-image", entry.op);
                };
                Self::insert_raw(&mut tree, &entry.key, prior, true, &mut touched)?;
            }
        }
        Ok(())
    }

    /// Records a snapshot target. If a snapshot file already exists at
    /// `path`, its contents are merged into the current state first: absent
    /// keys are inserted, present keys are left alone, and the page id
    /// allocator advances past anything the snapshot used.
    pub fn enable_disk_storage(&self, path: impl AsRef<Path>, sync_on_commit: bool) -> Result<()> {
        let mut disk = self.disk.lock();
        if disk.is_some() {
            return Err(EngineError::invalid_database(format!(
                "disk storage already enabled for database {}",
                self.id
            ))
            .into());
        }
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            let bytes = std::fs::read(&path).map_err(EngineError::DiskWriteError)?;
            let snap = snapshot::decode_snapshot(&bytes)?;
            let mut tree = self.tree.write();
            for page in snap.pages.iter().filter(|page| page.is_leaf) {
                for (key, value) in page.keys.iter().zip(&page.values) {
                    let mut touched = Vec::new();
                    Self::insert_raw(&mut tree, key, value, false, &mut touched)?;
                }
            }
            if snap.next_page_id > tree.next_page_id {
                tree.next_page_id = snap.next_page_id;
            }
        }
        *disk = Some(DiskTarget {
            path,
            sync_on_commit,
        });
        Ok(())
    }

    pub fn disk_enabled(&self) -> bool {
        self.disk.lock().is_some()
    }

    /// Serializes the whole database to its snapshot target. No-op when
    /// disk storage is not enabled.
    pub(crate) fn write_snapshot(&self) -> Result<()> {
        let disk = self.disk.lock();
        let Some(target) = disk.as_ref() else {
            return Ok(());
        };
        let bytes = {
            let tree = self.tree.read();
            snapshot::encode_snapshot(self.id, &self.name, &tree)?
        };
        snapshot::write_file(&target.path, &bytes, target.sync_on_commit)?;
        stats::bump(&stats::SNAPSHOT_WRITES);
        stats::SNAPSHOT_BYTES.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    pub fn stats(&self) -> DatabaseStats {
        let tree = self.tree.read();
        let mut keys = 0;
        let mut leaf = Self::leftmost_leaf(&tree);
        while let Some(page) = leaf.and_then(|id| tree.pages.get(&id)) {
            keys += page.key_count();
            leaf = (page.next() != NO_PAGE).then(|| page.next());
        }
        let mut depth = 1;
        let mut current = tree.pages.get(&tree.root);
        while let Some(page) = current {
            if page.is_leaf() {
                break;
            }
            depth += 1;
            current = tree.pages.get(&page.child_at(0));
        }
        DatabaseStats {
            pages: tree.pages.len(),
            keys,
            depth,
            next_page_id: tree.next_page_id,
        }
    }

    /// Walks every leaf in chain order and returns the keys encountered.
    /// Test and snapshot-verification helper; not part of the public keyed
    /// API (range scans are not surfaced).
    pub fn leaf_keys_in_order(&self) -> Vec<Vec<u8>> {
        let tree = self.tree.read();
        let mut keys = Vec::new();
        let mut leaf = Self::leftmost_leaf(&tree);
        while let Some(page) = leaf.and_then(|id| tree.pages.get(&id)) {
            keys.extend(page.keys.iter().cloned());
            leaf = (page.next() != NO_PAGE).then(|| page.next());
        }
        keys
    }

    fn leftmost_leaf(tree: &Tree) -> Option<u32> {
        let mut current = tree.pages.get(&tree.root)?;
        while !current.is_leaf() {
            current = tree.pages.get(&current.child_at(0))?;
        }
        Some(current.id())
    }

    fn path_to_leaf(tree: &Tree, key: &[u8]) -> Result<Vec<u32>> {
        let mut path = Vec::new();
        let mut current = tree.root;
        loop {
            let page = tree.page(current)?;
            path.push(current);
            if page.is_leaf() {
                return Ok(path);
            }
            current = page.child_at(page.find_insert_position(key));
        }
    }

    fn insert_raw(
        tree: &mut Tree,
        key: &[u8],
        value: &[u8],
        overwrite: bool,
        touched: &mut Vec<u32>,
    ) -> Result<InsertOutcome> {
        let path = Self::path_to_leaf(tree, key)?;
        let Some(&leaf_id) = path.last() else {
            bail!("descent produced an empty path");
        };
        let leaf = tree.page_mut(leaf_id)?;

        if let Some(idx) = leaf.search(key) {
            if !overwrite {
                return Ok(InsertOutcome::Rejected);
            }
            let prior = leaf.value_at(idx).to_vec();
            leaf.insert(key, value)?;
            touched.push(leaf_id);
            return Ok(InsertOutcome::Replaced(prior));
        }

        if !leaf.is_full() {
            leaf.insert(key, value)?;
            touched.push(leaf_id);
            return Ok(InsertOutcome::Inserted);
        }

        Self::split_insert(tree, leaf_id, key, value, touched)?;
        Ok(InsertOutcome::Inserted)
    }

    /// Splits the full leaf, installs the new entry in the correct half, and
    /// propagates the separator upward, splitting full ancestors and growing
    /// a new root when the split reaches it.
    fn split_insert(
        tree: &mut Tree,
        leaf_id: u32,
        key: &[u8],
        value: &[u8],
        touched: &mut Vec<u32>,
    ) -> Result<()> {
        stats::bump(&stats::SPLIT_COUNT);
        let new_id = tree.allocate_id();
        let (mut right, separator) = tree.page_mut(leaf_id)?.split(new_id)?;
        let old_next = right.next();

        if key < separator.as_slice() {
            tree.page_mut(leaf_id)?.insert(key, value)?;
        } else {
            right.insert(key, value)?;
        }
        tree.pages.insert(new_id, right);
        if old_next != NO_PAGE {
            tree.page_mut(old_next)?.prev = new_id;
        }
        touched.push(leaf_id);
        touched.push(new_id);

        let mut separator = separator;
        let mut left_id = leaf_id;
        let mut right_id = new_id;
        loop {
            let parent_id = tree.page(left_id)?.parent();

            if parent_id == NO_PAGE {
                // The split page was the root: grow the tree by one level.
                let root_id = tree.allocate_id();
                let mut new_root = Page::new_internal(root_id);
                new_root.is_root = true;
                new_root.keys.push(separator);
                new_root.values.push(Vec::new());
                new_root.children.push(left_id);
                new_root.children.push(right_id);
                tree.pages.insert(root_id, new_root);
                {
                    let left = tree.page_mut(left_id)?;
                    left.is_root = false;
                    left.parent = root_id;
                }
                tree.page_mut(right_id)?.parent = root_id;
                tree.root = root_id;
                touched.push(root_id);
                return Ok(());
            }

            if !tree.page(parent_id)?.is_full() {
                tree.page_mut(parent_id)?
                    .insert_separator(separator, right_id)?;
                tree.page_mut(right_id)?.parent = parent_id;
                touched.push(parent_id);
                return Ok(());
            }

            // Full parent: split it, then place the pending separator in
            // whichever half it belongs to.
            stats::bump(&stats::SPLIT_COUNT);
            let split_id = tree.allocate_id();
            let (mut parent_right, promoted) = tree.page_mut(parent_id)?.split(split_id)?;
            if separator.as_slice() < promoted.as_slice() {
                tree.page_mut(parent_id)?
                    .insert_separator(separator, right_id)?;
                tree.page_mut(right_id)?.parent = parent_id;
            } else {
                parent_right.insert_separator(separator, right_id)?;
            }
            let moved_children: Vec<u32> = parent_right.children.clone();
            tree.pages.insert(split_id, parent_right);
            for child in moved_children {
                tree.page_mut(child)?.parent = split_id;
            }
            touched.push(parent_id);
            touched.push(split_id);

            separator = promoted;
            left_id = parent_id;
            right_id = split_id;
        }
    }

    fn remove_raw(
        tree: &mut Tree,
        key: &[u8],
        touched: &mut Vec<u32>,
    ) -> Result<Option<Vec<u8>>> {
        let path = Self::path_to_leaf(tree, key)?;
        let Some(&leaf_id) = path.last() else {
            bail!("descent produced an empty path");
        };
        let leaf = tree.page_mut(leaf_id)?;
        let Some(idx) = leaf.search(key) else {
            return Ok(None);
        };
        let prior = leaf.value_at(idx).to_vec();
        leaf.remove(key);
        touched.push(leaf_id);
        Self::rebalance(tree, leaf_id, touched)?;
        Ok(Some(prior))
    }

    /// Restores occupancy from `start_id` upward: redistribution when a
    /// sibling can lend, merge otherwise, recursing when the merge leaves
    /// the parent underflowing and demoting the root when it empties.
    fn rebalance(tree: &mut Tree, start_id: u32, touched: &mut Vec<u32>) -> Result<()> {
        let mut page_id = start_id;
        loop {
            let (is_root, is_leaf, key_count, parent_id) = {
                let page = tree.page(page_id)?;
                (
                    page.is_root(),
                    page.is_leaf(),
                    page.key_count(),
                    page.parent(),
                )
            };

            if is_root {
                if !is_leaf && key_count == 0 {
                    // An empty internal root routes nothing: its only child
                    // becomes the new root and the tree loses a level.
                    let child_id = tree.page(page_id)?.child_at(0);
                    tree.pages.remove(&page_id);
                    let child = tree.page_mut(child_id)?;
                    child.is_root = true;
                    child.parent = NO_PAGE;
                    tree.root = child_id;
                    touched.push(child_id);
                }
                return Ok(());
            }

            if !tree.page(page_id)?.is_underflow() {
                return Ok(());
            }

            let (sibling_id, sep_idx, sibling_on_left) = {
                let parent = tree.page(parent_id)?;
                let Some(pos) = parent.children.iter().position(|&c| c == page_id) else {
                    bail!("page {page_id} not registered under parent {parent_id}");
                };
                if pos > 0 {
                    (parent.children[pos - 1], pos - 1, true)
                } else {
                    ensure!(
                        parent.children.len() > 1,
                        "underflowing page {page_id} has no sibling"
                    );
                    (parent.children[pos + 1], pos, false)
                }
            };
            let separator = tree.page(parent_id)?.keys[sep_idx].clone();

            if tree.page(sibling_id)?.can_lend() {
                stats::bump(&stats::REDISTRIBUTE_COUNT);
                let Some(mut sibling) = tree.pages.remove(&sibling_id) else {
                    bail!("sibling page {sibling_id} missing from page map");
                };
                let page = tree.page_mut(page_id)?;
                let new_separator = if sibling_on_left {
                    page.redistribute_from_left(&mut sibling, separator)?
                } else {
                    page.redistribute_from_right(&mut sibling, separator)?
                };
                let moved_child = (!page.is_leaf()).then(|| {
                    if sibling_on_left {
                        page.child_at(0)
                    } else {
                        page.child_at(page.key_count())
                    }
                });
                tree.pages.insert(sibling_id, sibling);
                if let Some(child) = moved_child {
                    tree.page_mut(child)?.parent = page_id;
                }
                tree.page_mut(parent_id)?.keys[sep_idx] = new_separator;
                touched.push(page_id);
                touched.push(sibling_id);
                touched.push(parent_id);
                return Ok(());
            }

            // Neither neighbor can lend: merge right into left and drop the
            // separator from the parent.
            stats::bump(&stats::MERGE_COUNT);
            let (left_id, right_id) = if sibling_on_left {
                (sibling_id, page_id)
            } else {
                (page_id, sibling_id)
            };
            let Some(right) = tree.pages.remove(&right_id) else {
                bail!("merge target {right_id} missing from page map");
            };
            let right_children = right.children.clone();
            let right_next = right.next();
            let right_is_leaf = right.is_leaf();
            tree.page_mut(left_id)?.merge(right, separator);
            for child in right_children {
                tree.page_mut(child)?.parent = left_id;
            }
            if right_is_leaf && right_next != NO_PAGE {
                tree.page_mut(right_next)?.prev = left_id;
            }
            {
                let parent = tree.page_mut(parent_id)?;
                parent.keys.remove(sep_idx);
                parent.values.remove(sep_idx);
                parent.children.remove(sep_idx + 1);
            }
            touched.push(left_id);
            touched.push(parent_id);

            page_id = parent_id;
        }
    }

    /// Validates every structural invariant the tree promises: strict key
    /// order inside pages, separator bounds between levels, child/parent
    /// agreement, uniform leaf depth, occupancy floors, the leaf chain, and
    /// the page id allocator. Intended for tests.
    pub fn check_tree(&self) -> Result<()> {
        let tree = self.tree.read();
        let root = tree.page(tree.root)?;
        ensure!(root.is_root(), "root page {} not flagged as root", tree.root);
        ensure!(
            root.parent() == NO_PAGE,
            "root page {} has parent {}",
            tree.root,
            root.parent()
        );
        for page in tree.pages.values() {
            ensure!(
                page.id() < tree.next_page_id,
                "page {} at or above next_page_id {}",
                page.id(),
                tree.next_page_id
            );
            ensure!(
                !(page.is_root() && page.id() != tree.root),
                "page {} flagged root but root is {}",
                page.id(),
                tree.root
            );
        }

        let mut reachable = 0usize;
        let mut leaf_depth = None;
        Self::check_subtree(&tree, tree.root, None, None, 1, &mut leaf_depth, &mut reachable)?;
        ensure!(
            reachable == tree.pages.len(),
            "{} pages reachable from root but {} in page map",
            reachable,
            tree.pages.len()
        );

        // Leaf chain yields every key exactly once, in strictly ascending
        // order.
        let mut chained = 0usize;
        let mut previous: Option<Vec<u8>> = None;
        let mut leaf = Self::leftmost_leaf(&tree);
        while let Some(page) = leaf.and_then(|id| tree.pages.get(&id)) {
            for key in &page.keys {
                if let Some(prev) = &previous {
                    ensure!(
                        prev.as_slice() < key.as_slice(),
                        "leaf chain out of order at page {}",
                        page.id()
                    );
                }
                previous = Some(key.clone());
                chained += 1;
            }
            leaf = (page.next() != NO_PAGE).then(|| page.next());
        }
        let total: usize = tree
            .pages
            .values()
            .filter(|page| page.is_leaf())
            .map(|page| page.key_count())
            .sum();
        ensure!(
            chained == total,
            "leaf chain visited {chained} keys but leaves hold {total}"
        );
        Ok(())
    }

    fn check_subtree(
        tree: &Tree,
        page_id: u32,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        reachable: &mut usize,
    ) -> Result<()> {
        let page = tree.page(page_id)?;
        *reachable += 1;

        for window in page.keys.windows(2) {
            ensure!(
                window[0] < window[1],
                "keys out of order in page {page_id}"
            );
        }
        for key in &page.keys {
            if let Some(lo) = lower {
                ensure!(
                    key.as_slice() >= lo,
                    "key below subtree lower bound in page {page_id}"
                );
            }
            if let Some(hi) = upper {
                ensure!(
                    key.as_slice() < hi,
                    "key at or above subtree upper bound in page {page_id}"
                );
            }
        }
        // Splitting a full internal node promotes its median, so one half
        // holds MIN - 1 keys until a later insert or rebalance touches it.
        let floor = if page.is_leaf() {
            crate::config::MIN_KEYS_PER_PAGE
        } else {
            crate::config::MIN_KEYS_PER_PAGE - 1
        };
        if !page.is_root() && page.key_count() < floor {
            bail!(
                "page {page_id} underflows with {} keys",
                page.key_count()
            );
        }

        if page.is_leaf() {
            match leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(expected) => ensure!(
                    *expected == depth,
                    "leaf {page_id} at depth {depth}, expected {expected}"
                ),
            }
            return Ok(());
        }

        ensure!(
            page.children.len() == page.key_count() + 1,
            "internal page {page_id} has {} children for {} keys",
            page.children.len(),
            page.key_count()
        );
        for (idx, &child_id) in page.children.iter().enumerate() {
            let child = tree.page(child_id)?;
            ensure!(
                child.parent() == page_id,
                "child {child_id} points at parent {} instead of {page_id}",
                child.parent()
            );
            let lo = if idx == 0 {
                lower
            } else {
                Some(page.keys[idx - 1].as_slice())
            };
            let hi = if idx == page.key_count() {
                upper
            } else {
                Some(page.keys[idx].as_slice())
            };
            Self::check_subtree(tree, child_id, lo, hi, depth + 1, leaf_depth, reachable)?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn with_tree<R>(&self, f: impl FnOnce(&Tree) -> R) -> R {
        f(&self.tree.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MAX_KEYS_PER_PAGE, MIN_KEYS_PER_PAGE};
    use crate::txn::Transaction;

    fn rw_txn(id: u64) -> Transaction {
        Transaction::new(id, TxnMode::ReadWrite)
    }

    fn key(i: usize) -> Vec<u8> {
        format!("key{i:06}").into_bytes()
    }

    fn value(i: usize) -> Vec<u8> {
        format!("value{i:06}").into_bytes()
    }

    #[test]
    fn fresh_database_has_root_leaf_one() {
        let db = Database::open(1, "fresh");
        let stats = db.stats();
        assert_eq!(stats.pages, 1);
        assert_eq!(stats.keys, 0);
        assert_eq!(stats.depth, 1);
        assert_eq!(stats.next_page_id, FIRST_PAGE_ID + 1);
        assert!(db.is_immutable());
        db.check_tree().unwrap();
    }

    #[test]
    fn put_then_get_roundtrip() {
        let db = Database::open(1, "kv");
        let mut txn = rw_txn(1);
        db.put(&mut txn, b"k", b"v").unwrap();
        assert_eq!(db.get(&mut txn, b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(db.get(&mut txn, b"missing").unwrap(), None);
        assert_eq!(txn.undo_len(), 1);
        assert!(txn.has_dirty_pages());
    }

    #[test]
    fn immutable_database_rejects_overwrite() {
        let db = Database::open(1, "frozen");
        let mut txn = rw_txn(1);
        db.put(&mut txn, b"k", b"v1").unwrap();
        let err = db.put(&mut txn, b"k", b"v2").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::KeyExists)
        ));
        assert_eq!(db.get(&mut txn, b"k").unwrap(), Some(b"v1".to_vec()));
    }

    #[test]
    fn mutable_database_replaces_and_logs_pre_image() {
        let db = Database::open(1, "mutable");
        db.set_immutable(false);
        let mut txn = rw_txn(1);
        db.put(&mut txn, b"k", b"v1").unwrap();
        db.put(&mut txn, b"k", b"v2").unwrap();
        assert_eq!(db.get(&mut txn, b"k").unwrap(), Some(b"v2".to_vec()));

        let undo = txn.take_undo();
        assert_eq!(undo.len(), 2);
        assert_eq!(undo[1].op, UndoOp::Update);
        assert_eq!(undo[1].prior.as_deref(), Some(&b"v1"[..]));
    }

    #[test]
    fn read_only_transaction_cannot_write() {
        let db = Database::open(1, "ro");
        let mut txn = Transaction::new(1, TxnMode::ReadOnly);
        let err = db.put(&mut txn, b"k", b"v").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidTransaction { id: 1, .. })
        ));
    }

    #[test]
    fn write_only_transaction_cannot_read() {
        let db = Database::open(1, "wo");
        let mut txn = Transaction::new(1, TxnMode::WriteOnly);
        db.put(&mut txn, b"k", b"v").unwrap();
        let err = db.get(&mut txn, b"k").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidTransaction { id: 1, .. })
        ));
    }

    #[test]
    fn empty_key_or_value_rejected() {
        let db = Database::open(1, "strict");
        let mut txn = rw_txn(1);
        assert!(db.put(&mut txn, b"", b"v").is_err());
        assert!(db.put(&mut txn, b"k", b"").is_err());
    }

    #[test]
    fn delete_absent_key_is_not_found() {
        let db = Database::open(1, "del");
        let mut txn = rw_txn(1);
        let err = db.delete(&mut txn, b"ghost").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::NotFound)
        ));
        assert_eq!(txn.undo_len(), 0);
    }

    #[test]
    fn delete_logs_pre_image() {
        let db = Database::open(1, "del");
        let mut txn = rw_txn(1);
        db.put(&mut txn, b"k", b"v").unwrap();
        db.delete(&mut txn, b"k").unwrap();
        assert_eq!(db.get(&mut txn, b"k").unwrap(), None);

        let undo = txn.take_undo();
        assert_eq!(undo[1].op, UndoOp::Delete);
        assert_eq!(undo[1].prior.as_deref(), Some(&b"v"[..]));
    }

    #[test]
    fn overflow_insert_splits_root_leaf() {
        let db = Database::open(1, "split");
        let mut txn = rw_txn(1);
        for i in 0..=MAX_KEYS_PER_PAGE {
            db.put(&mut txn, &key(i), &value(i)).unwrap();
        }

        let stats = db.stats();
        assert_eq!(stats.depth, 2);
        assert_eq!(stats.pages, 3);
        assert_eq!(stats.keys, MAX_KEYS_PER_PAGE + 1);
        db.check_tree().unwrap();

        db.with_tree(|tree| {
            let root = tree.pages.get(&tree.root).unwrap();
            assert!(!root.is_leaf());
            assert_eq!(root.key_count(), 1);
        });

        for i in 0..=MAX_KEYS_PER_PAGE {
            assert_eq!(db.get(&mut txn, &key(i)).unwrap(), Some(value(i)));
        }
    }

    #[test]
    fn descending_inserts_stay_ordered() {
        let db = Database::open(1, "desc");
        let mut txn = rw_txn(1);
        for i in (0..MAX_KEYS_PER_PAGE * 2).rev() {
            db.put(&mut txn, &key(i), &value(i)).unwrap();
        }
        db.check_tree().unwrap();

        let keys = db.leaf_keys_in_order();
        assert_eq!(keys.len(), MAX_KEYS_PER_PAGE * 2);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn deep_tree_survives_interleaved_inserts() {
        let db = Database::open(1, "deep");
        let mut txn = rw_txn(1);
        let count = MAX_KEYS_PER_PAGE * 3 + 17;
        // Interleave two ranges so internal splits see both halves.
        for i in 0..count / 2 {
            db.put(&mut txn, &key(i), &value(i)).unwrap();
            let j = count - 1 - i;
            db.put(&mut txn, &key(j), &value(j)).unwrap();
        }
        if count % 2 == 1 {
            let mid = count / 2;
            db.put(&mut txn, &key(mid), &value(mid)).unwrap();
        }
        db.check_tree().unwrap();
        assert_eq!(db.stats().keys, count);
        for i in (0..count).step_by(97) {
            assert_eq!(db.get(&mut txn, &key(i)).unwrap(), Some(value(i)));
        }
    }

    #[test]
    fn deletions_rebalance_and_demote_root() {
        let db = Database::open(1, "shrink");
        let mut txn = rw_txn(1);
        let count = MAX_KEYS_PER_PAGE + MIN_KEYS_PER_PAGE;
        for i in 0..count {
            db.put(&mut txn, &key(i), &value(i)).unwrap();
        }
        assert_eq!(db.stats().depth, 2);

        for i in 0..count - 3 {
            db.delete(&mut txn, &key(i)).unwrap();
            db.check_tree().unwrap();
        }

        let stats = db.stats();
        assert_eq!(stats.keys, 3);
        assert_eq!(stats.depth, 1);
        for i in count - 3..count {
            assert_eq!(db.get(&mut txn, &key(i)).unwrap(), Some(value(i)));
        }
    }

    #[test]
    fn delete_everything_leaves_empty_root_leaf() {
        let db = Database::open(1, "drain");
        let mut txn = rw_txn(1);
        for i in 0..MAX_KEYS_PER_PAGE + 1 {
            db.put(&mut txn, &key(i), &value(i)).unwrap();
        }
        for i in 0..MAX_KEYS_PER_PAGE + 1 {
            db.delete(&mut txn, &key(i)).unwrap();
        }
        let stats = db.stats();
        assert_eq!(stats.keys, 0);
        assert_eq!(stats.depth, 1);
        db.check_tree().unwrap();
    }

    #[test]
    fn undo_replay_reverts_operations() {
        let db = Database::open(1, "undo");
        db.set_immutable(false);
        let mut txn = rw_txn(1);
        db.put(&mut txn, b"a", b"1").unwrap();
        db.put(&mut txn, b"b", b"2").unwrap();
        db.put(&mut txn, b"a", b"overwritten").unwrap();
        db.delete(&mut txn, b"b").unwrap();

        let entries = txn.take_undo();
        for entry in entries.iter().rev() {
            db.undo_entry(entry).unwrap();
        }

        let mut probe = rw_txn(2);
        assert_eq!(db.get(&mut probe, b"a").unwrap(), None);
        assert_eq!(db.get(&mut probe, b"b").unwrap(), None);
        db.check_tree().unwrap();
    }

    #[test]
    fn typed_roundtrip_through_codec() {
        let db = Database::open(1, "typed");
        let mut txn = rw_txn(1);
        let shape = Shape::i32();
        db.put_typed(&mut txn, b"answer", &shape, &Value::I32(42))
            .unwrap();
        let decoded = db.get_typed(&mut txn, b"answer", &shape).unwrap();
        assert_eq!(decoded, Some(Value::I32(42)));
        assert_eq!(db.get_typed(&mut txn, b"missing", &shape).unwrap(), None);
    }

    #[test]
    fn enable_disk_storage_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.shimmer");
        let db = Database::open(1, "disk");
        db.enable_disk_storage(&path, false).unwrap();
        let err = db.enable_disk_storage(&path, false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidDatabase { .. })
        ));
    }
}

//! # Transaction Lifecycle and Undo Log
//!
//! A [`Transaction`] is the unit of atomicity: an id, a declared mode, a
//! three-state lifecycle, an append-only undo log, and the set of pages the
//! transaction dirtied.
//!
//! ```text
//! ┌────────┐    commit()    ┌───────────┐
//! │ Active │ ─────────────> │ Committed │
//! └────────┘                └───────────┘
//!      │
//!      │ abort replay (reverse order)
//!      v
//! ┌─────────┐
//! │ Aborted │
//! └─────────┘
//! ```
//!
//! Commit discards the undo log; the in-memory tree already reflects every
//! change, so there is nothing to redo. Abort replays the log in strict
//! reverse order: an `Insert` entry removes its key, an `Update` restores
//! the pre-image, a `Delete` re-inserts it. Each entry is bound to the
//! database it came from, so a transaction spanning several databases
//! unwinds all of them.
//!
//! The dirty page set is a `RoaringBitmap` of page ids; commit uses it only
//! as a "did anything change" trigger for snapshot persistence.

use roaring::RoaringBitmap;
use smallvec::SmallVec;

use crate::config::DEFAULT_TABLE;
use crate::error::EngineError;

pub type TxnId = u64;

/// Declared access mode. ReadOnly forbids `put`/`delete`, WriteOnly forbids
/// `get`, ReadWrite permits both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxnState {
    #[default]
    Active,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoOp {
    Insert,
    Update,
    Delete,
}

/// One reversible step. `prior` carries the pre-image for updates and
/// deletes; inserts need none.
#[derive(Debug, Clone)]
pub struct UndoEntry {
    pub db: u32,
    pub table: &'static str,
    pub op: UndoOp,
    pub key: Vec<u8>,
    pub prior: Option<Vec<u8>>,
}

impl UndoEntry {
    pub fn insert(db: u32, key: Vec<u8>) -> Self {
        Self {
            db,
            table: DEFAULT_TABLE,
            op: UndoOp::Insert,
            key,
            prior: None,
        }
    }

    pub fn update(db: u32, key: Vec<u8>, prior: Vec<u8>) -> Self {
        Self {
            db,
            table: DEFAULT_TABLE,
            op: UndoOp::Update,
            key,
            prior: Some(prior),
        }
    }

    pub fn delete(db: u32, key: Vec<u8>, prior: Vec<u8>) -> Self {
        Self {
            db,
            table: DEFAULT_TABLE,
            op: UndoOp::Delete,
            key,
            prior: Some(prior),
        }
    }
}

/// Per-transaction state. Handed to the caller by `Environment::begin_txn`;
/// the environment keeps only the id registered. Most transactions touch a
/// handful of keys, so the undo log is a `SmallVec` that stays on the stack
/// until it spills.
#[derive(Debug)]
pub struct Transaction {
    id: TxnId,
    mode: TxnMode,
    state: TxnState,
    undo: SmallVec<[UndoEntry; 16]>,
    dirty_pages: RoaringBitmap,
}

impl Transaction {
    pub(crate) fn new(id: TxnId, mode: TxnMode) -> Self {
        Self {
            id,
            mode,
            state: TxnState::Active,
            undo: SmallVec::new(),
            dirty_pages: RoaringBitmap::new(),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn dirty_page_count(&self) -> u64 {
        self.dirty_pages.len()
    }

    pub fn has_dirty_pages(&self) -> bool {
        !self.dirty_pages.is_empty()
    }

    pub(crate) fn ensure_active(&self) -> Result<(), EngineError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(EngineError::TransactionNotActive { id: self.id })
        }
    }

    pub(crate) fn record_undo(&mut self, entry: UndoEntry) {
        self.undo.push(entry);
    }

    pub(crate) fn mark_dirty(&mut self, page_id: u32) {
        self.dirty_pages.insert(page_id);
    }

    /// Takes the undo log for reverse replay, leaving it empty.
    pub(crate) fn take_undo(&mut self) -> SmallVec<[UndoEntry; 16]> {
        std::mem::take(&mut self.undo)
    }

    /// Active -> Committed. The undo log is dropped: the tree already holds
    /// the committed state.
    pub(crate) fn commit(&mut self) -> Result<(), EngineError> {
        self.ensure_active()?;
        self.state = TxnState::Committed;
        self.undo.clear();
        Ok(())
    }

    /// Active -> Aborted. The caller has already replayed the undo log.
    pub(crate) fn mark_aborted(&mut self) -> Result<(), EngineError> {
        self.ensure_active()?;
        self.state = TxnState::Aborted;
        Ok(())
    }
}

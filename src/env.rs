//! # Environment
//!
//! The environment is the engine's front door: it owns the database
//! registry, the set of active transaction ids, and the monotonic id
//! counters for both. Databases are handed out as `Arc` so concurrent
//! threads can operate on them directly; transactions are handed to the
//! caller by value while the environment keeps their ids registered for
//! validity checks.
//!
//! ## Commit
//!
//! ```text
//! commit_txn(txn)
//!     │ 1. txn must be Active and registered
//!     │ 2. a wounded deadlock victim cannot commit
//!     │ 3. dirty pages? snapshot every disk-enabled database
//!     │    (before the undo log is discarded, so a failed snapshot
//!     │     leaves the transaction abortable)
//!     │ 4. mark Committed, drop the undo log
//!     │ 5. release the transaction's locks on every database
//!     └ 6. deregister the id
//! ```
//!
//! Abort replays the undo log in reverse before releasing locks; entries
//! are bound to their originating database, so a transaction that touched
//! several databases unwinds all of them.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use eyre::Result;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

use crate::db::Database;
use crate::error::EngineError;
use crate::txn::{Transaction, TxnId, TxnMode};

/// Registry of databases and active transactions.
pub struct Environment {
    databases: RwLock<HashMap<u32, Arc<Database>>>,
    active: Mutex<HashMap<TxnId, TxnMode>>,
    next_db_id: AtomicU32,
    next_txn_id: AtomicU64,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self {
            databases: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            next_db_id: AtomicU32::new(1),
            next_txn_id: AtomicU64::new(1),
        }
    }

    /// Creates and registers a fresh database under the next id.
    pub fn open_database(&self, name: &str) -> Result<Arc<Database>> {
        let id = self.next_db_id.fetch_add(1, Ordering::SeqCst);
        let db = Arc::new(Database::open(id, name));
        self.databases.write().insert(id, Arc::clone(&db));
        Ok(db)
    }

    /// Looks up a database by id.
    pub fn database(&self, id: u32) -> Result<Arc<Database>> {
        match self.databases.read().get(&id) {
            Some(db) => Ok(Arc::clone(db)),
            None => Err(EngineError::invalid_database(format!("no database with id {id}")).into()),
        }
    }

    pub fn database_count(&self) -> usize {
        self.databases.read().len()
    }

    /// Allocates a transaction of the declared mode and registers its id.
    pub fn begin_txn(&self, mode: TxnMode) -> Transaction {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        self.active.lock().insert(id, mode);
        Transaction::new(id, mode)
    }

    /// Whether `id` names a live (neither committed nor aborted) transaction.
    pub fn is_active(&self, id: TxnId) -> bool {
        self.active.lock().contains_key(&id)
    }

    pub fn active_transactions(&self) -> usize {
        self.active.lock().len()
    }

    fn all_databases(&self) -> Vec<Arc<Database>> {
        self.databases.read().values().cloned().collect()
    }

    fn ensure_registered(&self, txn: &Transaction) -> Result<()> {
        if self.active.lock().contains_key(&txn.id()) {
            Ok(())
        } else {
            Err(EngineError::invalid_transaction(
                txn.id(),
                "unknown or terminated transaction",
            )
            .into())
        }
    }

    /// Commits `txn`: persists snapshots for opted-in databases when the
    /// transaction dirtied pages, discards the undo log, and releases every
    /// lock the transaction holds.
    pub fn commit_txn(&self, txn: &mut Transaction) -> Result<()> {
        txn.ensure_active()?;
        self.ensure_registered(txn)?;
        let databases = self.all_databases();

        if databases.iter().any(|db| db.locks().is_wounded(txn.id())) {
            // Force-aborted deadlock victim: its locks are already gone and
            // its changes cannot be committed. Clean up and report.
            let _ = txn.mark_aborted();
            for db in &databases {
                db.locks().release_all(txn.id());
                db.locks().forget(txn.id());
            }
            self.active.lock().remove(&txn.id());
            return Err(EngineError::invalid_transaction(
                txn.id(),
                "transaction was aborted as a deadlock victim",
            )
            .into());
        }

        // Snapshot while the undo log is still intact: a failed disk write
        // leaves the transaction Active and abortable.
        if txn.has_dirty_pages() {
            for db in &databases {
                if db.disk_enabled() {
                    db.write_snapshot()?;
                }
            }
        }

        txn.commit()?;
        for db in &databases {
            db.locks().release_all(txn.id());
        }
        self.active.lock().remove(&txn.id());
        Ok(())
    }

    /// Aborts `txn`: replays its undo log in reverse (each entry against
    /// the database it came from), then releases locks and deregisters.
    pub fn abort_txn(&self, txn: &mut Transaction) -> Result<()> {
        txn.ensure_active()?;
        self.ensure_registered(txn)?;

        let entries = txn.take_undo();
        for entry in entries.iter().rev() {
            let db = self.database(entry.db)?;
            db.undo_entry(entry)?;
        }

        txn.mark_aborted()?;
        for db in self.all_databases() {
            db.locks().release_all(txn.id());
            db.locks().forget(txn.id());
        }
        self.active.lock().remove(&txn.id());
        Ok(())
    }
}

//! # Database Orchestration Layer
//!
//! This module binds the engine's pieces into one keyed store: a page map
//! (page id -> [`crate::page::Page`]) behind a structural `RwLock`, a root
//! page id, a monotonic page-id allocator, an immutability flag, an
//! optional on-disk snapshot target, and the database's own lock manager.
//!
//! ## Operation Pipeline
//!
//! ```text
//! put(txn, key, value)
//!     │
//!     ▼
//! ┌──────────────────────────────────────────────┐
//! │ 1. CHECK: txn active, mode permits writes    │
//! ├──────────────────────────────────────────────┤
//! │ 2. LOCK: IX on database, X on every page on  │
//! │    the root-to-leaf path, X on the record    │
//! ├──────────────────────────────────────────────┤
//! │ 3. MUTATE: leaf insert, splitting upward as  │
//! │    needed (new root when the root splits)    │
//! ├──────────────────────────────────────────────┤
//! │ 4. LOG: undo entry + dirty page ids on txn   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Reads take IS/S instead of IX/X and log nothing. Deletion mirrors
//! insertion, then rebalances: borrow from a sibling that can lend,
//! otherwise merge and recurse into the parent, demoting the root when it
//! collapses to a single child.
//!
//! Locks are acquired before the mutation they protect and held until the
//! environment releases them at commit or abort.
//!
//! ## Snapshot Persistence
//!
//! A database that opted in via `enable_disk_storage` is re-serialized
//! wholesale on every commit that dirtied pages: one codec-encoded record
//! holding the database header and every page. Reloading merges the
//! snapshot's leaf entries through the normal insert path, which rebuilds
//! routing nodes consistently instead of trusting serialized structure.
//! Whole-file snapshotting is O(database size) by design; a write-ahead log
//! is out of scope.

mod database;
mod snapshot;

pub use database::{Database, DatabaseStats};

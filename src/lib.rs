//! # Shimmer - Embedded Transactional Key-Value Engine
//!
//! Shimmer is an embedded, single-process key-value store built on four
//! tightly coupled subsystems:
//!
//! - **B+tree pages**: fixed-capacity nodes with ordered search, splits,
//!   merges, sibling borrowing, and a doubly linked leaf chain
//! - **Pessimistic locking**: multi-granularity locks (database / page /
//!   record) with intention modes, upgrade, deadlock detection, and
//!   deterministic victim selection
//! - **Undo transactions**: per-transaction undo logs replayed in reverse
//!   on abort; commit needs no redo because the tree is the state
//! - **Typed codec**: schema-directed little-endian serialization used for
//!   both typed values and whole-database snapshots
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────┐
//! │        Environment (registries)       │
//! ├───────────────────────────────────────┤
//! │   Database (B+tree orchestration)     │
//! ├──────────────────┬────────────────────┤
//! │   Lock manager   │  Transaction/undo  │
//! ├──────────────────┴────────────────────┤
//! │        Page layer (tree nodes)        │
//! ├───────────────────────────────────────┤
//! │   Typed codec + snapshot persistence  │
//! └───────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use shimmer::{Environment, Shape, TxnMode, Value};
//!
//! let env = Environment::new();
//! let db = env.open_database("users")?;
//!
//! let mut txn = env.begin_txn(TxnMode::ReadWrite);
//! db.put_typed(&mut txn, b"answer", &Shape::i32(), &Value::I32(42))?;
//! env.commit_txn(&mut txn)?;
//!
//! let mut reader = env.begin_txn(TxnMode::ReadOnly);
//! let value = db.get_typed(&mut reader, b"answer", &Shape::i32())?;
//! ```
//!
//! ## Module Overview
//!
//! - [`env`]: database and transaction registries
//! - [`db`]: transactional get/put/delete over the tree, snapshots
//! - [`page`]: single-node B+tree operations
//! - [`lock`]: multi-granularity lock manager
//! - [`txn`]: transaction lifecycle and undo log
//! - [`codec`]: shape-directed value serialization
//! - [`config`], [`error`], [`stats`]: constants, error surface, counters
//!
//! ## What Shimmer Is Not
//!
//! No MVCC, no write-ahead log or crash recovery (persistence is a whole
//! -file snapshot on commit), no distributed operation, no secondary
//! indices, no public range scans, no query layer.

pub mod codec;
pub mod config;
pub mod db;
pub mod env;
pub mod error;
pub mod lock;
pub mod page;
pub mod stats;
pub mod txn;

pub use codec::{Field, Shape, Value};
pub use db::{Database, DatabaseStats};
pub use env::Environment;
pub use error::EngineError;
pub use lock::{LockManager, LockMode, LockStats, ResourceId, ResourceKind};
pub use page::Page;
pub use stats::{engine_stats, reset_engine_stats, EngineStats};
pub use txn::{Transaction, TxnId, TxnMode, TxnState, UndoEntry, UndoOp};

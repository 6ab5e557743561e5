//! # Engine Error Surface
//!
//! Typed errors raised by the engine. Callers that need to react to a
//! specific condition (a duplicate key, a lock timeout, a deadlock victim
//! notification) match on `EngineError`; everything is propagated through
//! `eyre::Result`, so a recoverable engine error can be recovered with
//! `report.downcast_ref::<EngineError>()`.
//!
//! Internal invariant violations (conditions that indicate a bug rather than
//! a caller mistake) are raised with `bail!`/`ensure!` and plain messages
//! instead of a typed variant. The one exception is `PageFull`, which is kept
//! typed because a defective split path surfacing it is worth recognizing in
//! a crash report.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Insertion into an immutable database where the key is already present.
    #[error("key already exists")]
    KeyExists,

    /// Deletion of an absent key, or a lookup against a database whose root
    /// page is unset.
    #[error("key not found")]
    NotFound,

    /// Reference to a database that does not exist, or re-enabling disk
    /// storage on a database that already has it.
    #[error("invalid database: {reason}")]
    InvalidDatabase { reason: String },

    /// Reference to an unknown or terminated transaction, or a mode
    /// violation such as `put` on a ReadOnly transaction.
    #[error("invalid transaction {id}: {reason}")]
    InvalidTransaction { id: u64, reason: String },

    /// Commit or abort invoked on a transaction that is not Active.
    #[error("transaction {id} is not active")]
    TransactionNotActive { id: u64 },

    /// Serializer input does not match the requested shape.
    #[error("invalid data type: {detail}")]
    InvalidDataType { detail: String },

    /// Serialized input is truncated, carries trailing bytes, or declares a
    /// length that does not match the data.
    #[error("invalid size: expected {expected} bytes, got {actual}")]
    InvalidSize { expected: usize, actual: usize },

    /// Snapshot file open or write failure.
    #[error("disk write error: {0}")]
    DiskWriteError(#[from] std::io::Error),

    /// Lock acquisition exceeded the per-resource timeout.
    #[error("lock acquisition timed out on resource {resource:#018x}")]
    LockTimeout { resource: u64 },

    /// The requesting transaction was chosen as the deadlock victim.
    #[error("deadlock detected; transaction {txn} chosen as victim")]
    DeadlockDetected { txn: u64 },

    /// Insert into a page that is already at capacity. Reachable only
    /// through a defective split path; seeing this is a bug.
    #[error("page {page} is full")]
    PageFull { page: u32 },
}

impl EngineError {
    pub fn invalid_database(reason: impl Into<String>) -> Self {
        EngineError::InvalidDatabase {
            reason: reason.into(),
        }
    }

    pub fn invalid_transaction(id: u64, reason: impl Into<String>) -> Self {
        EngineError::InvalidTransaction {
            id,
            reason: reason.into(),
        }
    }

    pub fn invalid_data_type(detail: impl Into<String>) -> Self {
        EngineError::InvalidDataType {
            detail: detail.into(),
        }
    }
}

//! # Engine Operation Counters
//!
//! Global atomic counters for the engine's hot paths. The counters are cheap
//! enough to stay enabled in release builds (a single relaxed atomic add per
//! event) and give benchmarks and tests a way to observe structural activity
//! (splits, merges, snapshot writes) without instrumenting the tree itself.
//!
//! Relaxed ordering means cross-thread visibility is approximate; that is
//! acceptable for cumulative counts.

use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) static GET_COUNT: AtomicU64 = AtomicU64::new(0);
pub(crate) static PUT_COUNT: AtomicU64 = AtomicU64::new(0);
pub(crate) static DELETE_COUNT: AtomicU64 = AtomicU64::new(0);
pub(crate) static SPLIT_COUNT: AtomicU64 = AtomicU64::new(0);
pub(crate) static MERGE_COUNT: AtomicU64 = AtomicU64::new(0);
pub(crate) static REDISTRIBUTE_COUNT: AtomicU64 = AtomicU64::new(0);
pub(crate) static SNAPSHOT_WRITES: AtomicU64 = AtomicU64::new(0);
pub(crate) static SNAPSHOT_BYTES: AtomicU64 = AtomicU64::new(0);

#[inline]
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time snapshot of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub gets: u64,
    pub puts: u64,
    pub deletes: u64,
    pub splits: u64,
    pub merges: u64,
    pub redistributions: u64,
    pub snapshot_writes: u64,
    pub snapshot_bytes: u64,
}

/// Reads all engine counters.
pub fn engine_stats() -> EngineStats {
    EngineStats {
        gets: GET_COUNT.load(Ordering::Relaxed),
        puts: PUT_COUNT.load(Ordering::Relaxed),
        deletes: DELETE_COUNT.load(Ordering::Relaxed),
        splits: SPLIT_COUNT.load(Ordering::Relaxed),
        merges: MERGE_COUNT.load(Ordering::Relaxed),
        redistributions: REDISTRIBUTE_COUNT.load(Ordering::Relaxed),
        snapshot_writes: SNAPSHOT_WRITES.load(Ordering::Relaxed),
        snapshot_bytes: SNAPSHOT_BYTES.load(Ordering::Relaxed),
    }
}

/// Resets all engine counters to zero.
pub fn reset_engine_stats() {
    GET_COUNT.store(0, Ordering::Relaxed);
    PUT_COUNT.store(0, Ordering::Relaxed);
    DELETE_COUNT.store(0, Ordering::Relaxed);
    SPLIT_COUNT.store(0, Ordering::Relaxed);
    MERGE_COUNT.store(0, Ordering::Relaxed);
    REDISTRIBUTE_COUNT.store(0, Ordering::Relaxed);
    SNAPSHOT_WRITES.store(0, Ordering::Relaxed);
    SNAPSHOT_BYTES.store(0, Ordering::Relaxed);
}

//! # Engine Configuration Constants
//!
//! This module centralizes the engine's tuning constants. Values that depend
//! on each other are co-located and the relationships documented, so a change
//! to one can be checked against the others.
//!
//! ```text
//! MAX_KEYS_PER_PAGE (1024)
//!       │
//!       ├─> MIN_KEYS_PER_PAGE (derived: MAX / 2)
//!       │     A non-root page holding fewer keys is underflowing and must
//!       │     borrow from a sibling or be merged.
//!       │
//!       └─> can_lend threshold (a sibling may lend only while it holds
//!           MORE than MIN_KEYS_PER_PAGE keys)
//!
//! FIRST_PAGE_ID (1)
//!       │
//!       └─> NO_PAGE (0) doubles as "no parent" / "no sibling"; page ids
//!           are therefore never zero.
//! ```
//!
//! ## Lock timeouts
//!
//! Page and record locks share one timeout; database locks get a longer one
//! because a database-level X lock may have to outwait many fine-grained
//! holders. Both are per-acquisition, not per-transaction.

use std::time::Duration;

/// Maximum number of keys a page may hold.
pub const MAX_KEYS_PER_PAGE: usize = 1024;

/// Occupancy floor for non-root pages.
pub const MIN_KEYS_PER_PAGE: usize = MAX_KEYS_PER_PAGE / 2;

/// Page id assigned to the initial root leaf of a fresh database.
pub const FIRST_PAGE_ID: u32 = 1;

/// Sentinel page id: no parent, no sibling, no child.
pub const NO_PAGE: u32 = 0;

/// Default timeout for page-level lock acquisition.
pub const PAGE_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for record-level lock acquisition.
pub const RECORD_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for database-level lock acquisition.
pub const DATABASE_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Logical table tag carried by undo entries. The engine has no multi-table
/// model; every entry is tagged with this name.
pub const DEFAULT_TABLE: &str = "default";

const _: () = assert!(MIN_KEYS_PER_PAGE * 2 == MAX_KEYS_PER_PAGE);
const _: () = assert!(FIRST_PAGE_ID != NO_PAGE);

//! # B+Tree Page Layer
//!
//! This module implements the single-node operations of shimmer's B+tree.
//! A [`Page`] is one tree node: leaves hold the key-value data, internal
//! nodes hold routing keys and child page ids. Pages refer to one another by
//! numeric id through the database's page map, never by pointer; the id
//! indirection is what makes the in-memory tree mirror an on-disk layout.
//!
//! ```text
//!                  [ internal 7 ]            keys: [k3]
//!                  /            \            children: [2, 9]
//!          [ leaf 2 ]  <----->  [ leaf 9 ]   prev/next leaf chain
//!          k1,k2                k3,k4
//! ```
//!
//! ## Node Anatomy
//!
//! - `keys` are strictly ordered by byte comparison; `values` is parallel
//!   and meaningful only for leaves (internal nodes carry an empty slot per
//!   key so the arrays stay aligned).
//! - An internal node with k keys has exactly k+1 children; every key
//!   reachable through `children[i]` is strictly below `keys[i]`, and
//!   everything through `children[i+1]` is at or above it.
//! - Leaves are doubly linked through `prev`/`next`, so a walk from the
//!   leftmost leaf yields all keys in ascending order.
//!
//! ## Capacity Policy
//!
//! A page holds at most `MAX_KEYS_PER_PAGE` keys. A non-root page below
//! `MIN_KEYS_PER_PAGE` is underflowing; whether it borrows from a sibling or
//! merges with it depends on `can_lend` (the sibling must stay at or above
//! the floor after lending). Root demotion, collapsing an empty internal
//! root onto its only child, is the orchestrator's job, not the node's.
//!
//! ## Ownership
//!
//! Every key and value buffer is owned by the page holding it. Removal and
//! replacement drop the old buffer; `split` and `merge` move buffers between
//! nodes without copying.
//!
//! This module only mutates single nodes (plus the sibling involved in a
//! split, merge, or redistribution). Descending the tree, promoting
//! separators, and rebalancing after deletion live in `db`.

mod node;

pub use node::Page;

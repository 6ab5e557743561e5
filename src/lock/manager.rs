use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use eyre::Result;
use hashbrown::{HashMap, HashSet};
use parking_lot::{Condvar, Mutex};

use super::graph::WaitForGraph;
use super::{LockMode, ResourceId, ResourceKind};
use crate::config::{DATABASE_LOCK_TIMEOUT, PAGE_LOCK_TIMEOUT, RECORD_LOCK_TIMEOUT};
use crate::error::EngineError;

/// Counters for lock manager activity. Relaxed atomics; approximate under
/// concurrency, which is fine for monitoring.
#[derive(Debug, Default)]
pub struct LockStats {
    pub acquired: AtomicU64,
    pub contended: AtomicU64,
    pub upgrades: AtomicU64,
    pub timeouts: AtomicU64,
    pub deadlocks: AtomicU64,
}

impl LockStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone)]
struct LockRequest {
    txn: u64,
    mode: LockMode,
    granted: bool,
    kind: ResourceKind,
    #[allow(dead_code)]
    since: Instant,
}

#[derive(Default)]
struct LockTables {
    /// Per-resource request list: granted requests plus the wait queue, in
    /// arrival order.
    requests: HashMap<ResourceId, Vec<LockRequest>>,
    /// Per-transaction set of resources with a granted request.
    held: HashMap<u64, HashSet<ResourceId>>,
    waits_for: WaitForGraph,
    /// Deadlock victims whose locks were force-released and whose owner has
    /// not yet aborted them.
    wounded: HashSet<u64>,
}

impl LockTables {
    fn granted_mode(&self, txn: u64, resource: ResourceId) -> Option<LockMode> {
        self.requests.get(&resource)?.iter().find_map(|req| {
            (req.granted && req.txn == txn).then_some(req.mode)
        })
    }

    /// Granted holders (other than `txn`) whose mode conflicts with `mode`.
    fn conflicting_holders(&self, resource: ResourceId, txn: u64, mode: LockMode) -> Vec<u64> {
        match self.requests.get(&resource) {
            Some(queue) => queue
                .iter()
                .filter(|req| req.granted && req.txn != txn && !req.mode.compatible_with(mode))
                .map(|req| req.txn)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Installs a granted request, folding in any prior request by the same
    /// transaction on this resource (the upgrade path).
    fn grant(&mut self, txn: u64, resource: ResourceId, kind: ResourceKind, mode: LockMode) {
        let queue = self.requests.entry(resource).or_default();
        let mut final_mode = mode;
        queue.retain(|req| {
            if req.txn == txn {
                if req.granted {
                    final_mode = final_mode.combine(req.mode);
                }
                false
            } else {
                true
            }
        });
        queue.push(LockRequest {
            txn,
            mode: final_mode,
            granted: true,
            kind,
            since: Instant::now(),
        });
        self.held.entry(txn).or_default().insert(resource);
    }

    fn enqueue_waiting(&mut self, txn: u64, resource: ResourceId, kind: ResourceKind, mode: LockMode) -> bool {
        let queue = self.requests.entry(resource).or_default();
        if queue.iter().any(|req| req.txn == txn && !req.granted) {
            return false;
        }
        queue.push(LockRequest {
            txn,
            mode,
            granted: false,
            kind,
            since: Instant::now(),
        });
        true
    }

    fn remove_waiting(&mut self, txn: u64, resource: ResourceId) {
        if let Some(queue) = self.requests.get_mut(&resource) {
            queue.retain(|req| req.granted || req.txn != txn);
            if queue.is_empty() {
                self.requests.remove(&resource);
            }
        }
    }

    fn release_one(&mut self, txn: u64, resource: ResourceId) {
        if let Some(queue) = self.requests.get_mut(&resource) {
            queue.retain(|req| !(req.txn == txn && req.granted));
            if queue.is_empty() {
                self.requests.remove(&resource);
            }
        }
        if let Some(set) = self.held.get_mut(&txn) {
            set.remove(&resource);
            if set.is_empty() {
                self.held.remove(&txn);
            }
        }
    }

    /// Promotes waiters on `resource` whose mode is compatible with every
    /// remaining granted request by other transactions. Repeats until a full
    /// pass promotes nothing, so grants cascade.
    fn promote_waiters(&mut self, resource: ResourceId) -> bool {
        let mut promoted_any = false;
        loop {
            let candidate = match self.requests.get(&resource) {
                Some(queue) => queue
                    .iter()
                    .position(|req| {
                        !req.granted
                            && queue.iter().all(|other| {
                                !other.granted
                                    || other.txn == req.txn
                                    || other.mode.compatible_with(req.mode)
                            })
                    })
                    .map(|idx| {
                        let req = &queue[idx];
                        (req.txn, req.mode, req.kind)
                    }),
                None => None,
            };
            let Some((txn, mode, kind)) = candidate else {
                return promoted_any;
            };
            self.grant(txn, resource, kind, mode);
            self.waits_for.clear_waiter(txn);
            promoted_any = true;
        }
    }

    /// Force-releases everything a deadlock victim holds or waits for and
    /// remembers the id. Returns the resources whose queues may now admit
    /// waiters.
    fn wound(&mut self, victim: u64) -> Vec<ResourceId> {
        let mut touched: Vec<ResourceId> = Vec::new();
        for (resource, queue) in self.requests.iter_mut() {
            let before = queue.len();
            queue.retain(|req| req.txn != victim);
            if queue.len() != before {
                touched.push(*resource);
            }
        }
        self.requests.retain(|_, queue| !queue.is_empty());
        self.held.remove(&victim);
        self.waits_for.remove_node(victim);
        self.wounded.insert(victim);
        touched
    }
}

/// Pessimistic lock manager for one database. See the module documentation
/// for the mode lattice, resource id layout, and deadlock policy.
pub struct LockManager {
    tables: Mutex<LockTables>,
    wakeup: Condvar,
    pub stats: LockStats,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(LockTables::default()),
            wakeup: Condvar::new(),
            stats: LockStats::default(),
        }
    }

    /// Acquires `mode` on `resource` for `txn`, blocking up to `timeout`.
    ///
    /// Errors: `DeadlockDetected` when the requester is chosen as (or has
    /// already been made) a deadlock victim, `LockTimeout` when the deadline
    /// passes first, `InvalidTransaction` when a wounded transaction keeps
    /// issuing requests.
    pub fn acquire(
        &self,
        txn: u64,
        resource: ResourceId,
        kind: ResourceKind,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut tables = self.tables.lock();
        let mut enqueued = false;

        loop {
            if tables.wounded.contains(&txn) {
                tables.remove_waiting(txn, resource);
                tables.waits_for.clear_waiter(txn);
                return Err(EngineError::invalid_transaction(
                    txn,
                    "transaction was aborted as a deadlock victim",
                )
                .into());
            }

            if let Some(held) = tables.granted_mode(txn, resource) {
                if held.covers(mode) {
                    tables.remove_waiting(txn, resource);
                    tables.waits_for.clear_waiter(txn);
                    return Ok(());
                }
                if held.upgradable_to(mode)
                    && tables.conflicting_holders(resource, txn, mode).is_empty()
                {
                    tables.grant(txn, resource, kind, mode);
                    tables.remove_waiting(txn, resource);
                    tables.waits_for.clear_waiter(txn);
                    LockStats::bump(&self.stats.upgrades);
                    return Ok(());
                }
                // Upgrade blocked by another holder: fall through to the
                // standard path and wait like any other request.
            }

            let holders = tables.conflicting_holders(resource, txn, mode);
            if holders.is_empty() {
                tables.grant(txn, resource, kind, mode);
                tables.waits_for.clear_waiter(txn);
                LockStats::bump(&self.stats.acquired);
                return Ok(());
            }

            tables.waits_for.clear_waiter(txn);
            for holder in &holders {
                tables.waits_for.add_edge(txn, *holder);
            }

            if let Some(cycle) = tables.waits_for.find_cycle(txn) {
                let victim = cycle.iter().copied().max().unwrap_or(txn);
                LockStats::bump(&self.stats.deadlocks);
                if victim == txn {
                    tables.remove_waiting(txn, resource);
                    tables.waits_for.clear_waiter(txn);
                    return Err(EngineError::DeadlockDetected { txn }.into());
                }
                let freed = tables.wound(victim);
                for freed_resource in freed {
                    tables.promote_waiters(freed_resource);
                }
                self.wakeup.notify_all();
                continue;
            }

            if tables.enqueue_waiting(txn, resource, kind, mode) && !enqueued {
                enqueued = true;
                LockStats::bump(&self.stats.contended);
            }

            let timed_out = self.wakeup.wait_until(&mut tables, deadline).timed_out();

            if tables
                .granted_mode(txn, resource)
                .is_some_and(|held| held.covers(mode))
            {
                tables.remove_waiting(txn, resource);
                tables.waits_for.clear_waiter(txn);
                return Ok(());
            }
            if timed_out {
                tables.remove_waiting(txn, resource);
                tables.waits_for.clear_waiter(txn);
                LockStats::bump(&self.stats.timeouts);
                return Err(EngineError::LockTimeout {
                    resource: resource.0,
                }
                .into());
            }
        }
    }

    /// Page lock with the default page timeout.
    pub fn lock_page(&self, txn: u64, page_id: u32, mode: LockMode) -> Result<()> {
        self.acquire(
            txn,
            ResourceId::page(page_id),
            ResourceKind::Page,
            mode,
            PAGE_LOCK_TIMEOUT,
        )
    }

    /// Record lock with the default record timeout. The resource id mixes
    /// the owning page id with a hash of the key.
    pub fn lock_record(&self, txn: u64, page_id: u32, key: &[u8], mode: LockMode) -> Result<()> {
        self.acquire(
            txn,
            ResourceId::record(page_id, key),
            ResourceKind::Record,
            mode,
            RECORD_LOCK_TIMEOUT,
        )
    }

    /// Database lock with the longer database timeout.
    pub fn lock_database(&self, txn: u64, db_id: u32, mode: LockMode) -> Result<()> {
        self.acquire(
            txn,
            ResourceId::database(db_id),
            ResourceKind::Database,
            mode,
            DATABASE_LOCK_TIMEOUT,
        )
    }

    /// Releases one granted resource and promotes newly compatible waiters.
    pub fn release(&self, txn: u64, resource: ResourceId) {
        let mut tables = self.tables.lock();
        tables.release_one(txn, resource);
        tables.promote_waiters(resource);
        drop(tables);
        self.wakeup.notify_all();
    }

    /// Releases everything `txn` holds. Iterates a snapshot of the held set
    /// so promotion-driven mutation cannot invalidate the walk.
    pub fn release_all(&self, txn: u64) {
        let mut tables = self.tables.lock();
        let resources: Vec<ResourceId> = tables
            .held
            .get(&txn)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for resource in resources {
            tables.release_one(txn, resource);
            tables.promote_waiters(resource);
        }
        tables.held.remove(&txn);
        tables.waits_for.remove_node(txn);
        drop(tables);
        self.wakeup.notify_all();
    }

    /// Whether `txn` was force-aborted as a deadlock victim and not yet
    /// cleaned up by its owner.
    pub fn is_wounded(&self, txn: u64) -> bool {
        self.tables.lock().wounded.contains(&txn)
    }

    /// Final cleanup after the owner has aborted a wounded transaction.
    pub fn forget(&self, txn: u64) {
        let mut tables = self.tables.lock();
        tables.wounded.remove(&txn);
        tables.held.remove(&txn);
        tables.waits_for.remove_node(txn);
    }

    /// Granted mode `txn` currently holds on `resource`, if any.
    pub fn held_mode(&self, txn: u64, resource: ResourceId) -> Option<LockMode> {
        self.tables.lock().granted_mode(txn, resource)
    }

    /// Number of granted requests on `resource`.
    pub fn granted_count(&self, resource: ResourceId) -> usize {
        self.tables
            .lock()
            .requests
            .get(&resource)
            .map(|queue| queue.iter().filter(|req| req.granted).count())
            .unwrap_or(0)
    }
}

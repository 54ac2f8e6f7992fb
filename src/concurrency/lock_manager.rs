use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::common::{AbortReason, PetraError, RecordId, Result, TxnId, CYCLE_DETECTION_INTERVAL};

use super::transaction::{IsolationLevel, Transaction, TransactionState};

/// Modes a row can be locked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// A transaction's position in a lock queue.
struct LockRequest {
    txn: Arc<Transaction>,
    mode: LockMode,
    granted: bool,
}

#[derive(Default)]
struct QueueInner {
    /// FIFO of granted and waiting requests
    requests: VecDeque<LockRequest>,
    /// The one transaction currently upgrading S -> X on this rid
    upgrading: Option<TxnId>,
}

/// Per-rid request queue. Waiters block on the condition variable and
/// re-check grantability and their own abort flag on every wake.
struct LockRequestQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            cv: Condvar::new(),
        }
    }
}

struct LockManagerState {
    /// Coarse latch: guards only the map itself, never held across a wait
    lock_table: Mutex<HashMap<RecordId, Arc<LockRequestQueue>>>,
    enable_cycle_detection: AtomicBool,
    cycle_detection_interval: Duration,
}

/// Point-in-time wait-for graph plus the side maps needed to act on it.
#[derive(Default)]
struct WaitsForSnapshot {
    /// waiter -> holders; ordered maps give the DFS its ascending-id order
    edges: BTreeMap<TxnId, BTreeSet<TxnId>>,
    txns: HashMap<TxnId, Arc<Transaction>>,
    /// Queues each waiter is blocked on, for victim wakeup
    wait_queues: HashMap<TxnId, Vec<Arc<LockRequestQueue>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    InStack,
    Done,
}

/// Row-level two-phase lock manager with S/X locks, upgrade, and deadlock
/// detection over a periodically rebuilt wait-for graph.
pub struct LockManager {
    state: Arc<LockManagerState>,
    detector_handle: Option<JoinHandle<()>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_interval(CYCLE_DETECTION_INTERVAL)
    }

    /// Creates a lock manager whose deadlock detector wakes on the given
    /// interval.
    pub fn with_interval(interval: Duration) -> Self {
        let state = Arc::new(LockManagerState {
            lock_table: Mutex::new(HashMap::new()),
            enable_cycle_detection: AtomicBool::new(true),
            cycle_detection_interval: interval,
        });

        let thread_state = Arc::clone(&state);
        let detector_handle = thread::spawn(move || {
            Self::run_cycle_detection(thread_state);
        });

        Self {
            state,
            detector_handle: Some(detector_handle),
        }
    }

    /// Acquires a shared lock on `rid`, blocking until granted.
    /// Returns Err with the abort reason if the transaction is aborted,
    /// either up front by the isolation rules or while waiting.
    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: RecordId) -> Result<bool> {
        // READ_UNCOMMITTED reads the newest version without S locks
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            return Err(Self::abort_implicitly(
                txn,
                AbortReason::LockSharedOnReadUncommitted,
            ));
        }
        if txn.isolation_level() == IsolationLevel::RepeatableRead
            && txn.state() == TransactionState::Shrinking
        {
            return Err(Self::abort_implicitly(txn, AbortReason::LockOnShrinking));
        }
        if txn.is_shared_locked(rid) || txn.is_exclusive_locked(rid) {
            return Ok(true);
        }

        let queue = self.queue_for(rid);
        let mut inner = queue.inner.lock();
        inner.requests.push_back(LockRequest {
            txn: Arc::clone(txn),
            mode: LockMode::Shared,
            granted: false,
        });

        Self::wait_until_grantable(&queue, &mut inner, txn)?;

        Self::grant(&mut inner, txn.id());
        txn.add_shared_lock(rid);
        Ok(true)
    }

    /// Acquires an exclusive lock on `rid`, blocking until granted.
    /// Writes are locked under every isolation level.
    pub fn lock_exclusive(&self, txn: &Arc<Transaction>, rid: RecordId) -> Result<bool> {
        if txn.state() == TransactionState::Shrinking {
            return Err(Self::abort_implicitly(txn, AbortReason::LockOnShrinking));
        }
        if txn.is_exclusive_locked(rid) {
            return Ok(true);
        }

        let queue = self.queue_for(rid);
        let mut inner = queue.inner.lock();
        inner.requests.push_back(LockRequest {
            txn: Arc::clone(txn),
            mode: LockMode::Exclusive,
            granted: false,
        });

        Self::wait_until_grantable(&queue, &mut inner, txn)?;

        Self::grant(&mut inner, txn.id());
        txn.add_exclusive_lock(rid);
        Ok(true)
    }

    /// Upgrades a held shared lock to exclusive. At most one transaction may
    /// be upgrading per rid; a second upgrader aborts with UPGRADE_CONFLICT
    /// to break the symmetric-upgrade deadlock.
    pub fn lock_upgrade(&self, txn: &Arc<Transaction>, rid: RecordId) -> Result<bool> {
        if txn.state() == TransactionState::Shrinking {
            return Err(Self::abort_implicitly(txn, AbortReason::LockOnShrinking));
        }
        if txn.is_exclusive_locked(rid) {
            return Ok(true);
        }

        let queue = self.queue_for(rid);
        let mut inner = queue.inner.lock();

        if inner.upgrading.is_some() {
            return Err(Self::abort_implicitly(txn, AbortReason::UpgradeConflict));
        }
        inner.upgrading = Some(txn.id());

        // Convert the granted S request in place into a waiting X request
        let txn_id = txn.id();
        match inner.requests.iter_mut().find(|r| r.txn.id() == txn_id) {
            Some(request) => {
                request.mode = LockMode::Exclusive;
                request.granted = false;
            }
            None => {
                inner.upgrading = None;
                return Ok(false);
            }
        }

        if let Err(e) = Self::wait_until_grantable(&queue, &mut inner, txn) {
            inner.upgrading = None;
            queue.cv.notify_all();
            return Err(e);
        }

        Self::grant(&mut inner, txn_id);
        inner.upgrading = None;
        txn.promote_lock(rid);
        Ok(true)
    }

    /// Releases the transaction's lock on `rid`. Under two-phase locking
    /// this moves the transaction to SHRINKING, except that READ_COMMITTED
    /// releases its S locks early and stays in GROWING.
    pub fn unlock(&self, txn: &Transaction, rid: RecordId) -> bool {
        let queue = self.queue_for(rid);
        let mut inner = queue.inner.lock();

        if txn.isolation_level() != IsolationLevel::ReadCommitted
            && txn.state() == TransactionState::Growing
        {
            txn.set_state(TransactionState::Shrinking);
        }

        let txn_id = txn.id();
        let Some(position) = inner.requests.iter().position(|r| r.txn.id() == txn_id) else {
            txn.remove_locks(rid);
            return false;
        };
        inner.requests.remove(position);
        txn.remove_locks(rid);

        // Wake the queue if the earliest waiter can now be granted; all
        // waiters re-check. This also reaches an upgrader parked at the
        // head of the queue.
        let waiter_id = inner
            .requests
            .iter()
            .find(|r| !r.granted)
            .map(|r| r.txn.id());
        if let Some(waiter_id) = waiter_id {
            if Self::is_lock_compatible(&inner, waiter_id) {
                queue.cv.notify_all();
            }
        }

        true
    }

    /// Current wait-for edges, point in time. Exposed for inspection and
    /// tests; the detector rebuilds its own copy each cycle.
    pub fn wait_for_edges(&self) -> Vec<(TxnId, TxnId)> {
        let table = self.state.lock_table.lock();
        let snapshot = Self::build_waits_for(&table);
        snapshot
            .edges
            .iter()
            .flat_map(|(&from, tos)| tos.iter().map(move |&to| (from, to)))
            .collect()
    }

    /*
     * Queue mechanics
     */

    fn queue_for(&self, rid: RecordId) -> Arc<LockRequestQueue> {
        let mut table = self.state.lock_table.lock();
        Arc::clone(
            table
                .entry(rid)
                .or_insert_with(|| Arc::new(LockRequestQueue::new())),
        )
    }

    /// Blocks on the queue's condition variable until the transaction's
    /// request is grantable. If the transaction is aborted while waiting
    /// (by the deadlock detector), its request is removed, the queue woken,
    /// and the abort surfaced to the caller.
    fn wait_until_grantable(
        queue: &LockRequestQueue,
        inner: &mut MutexGuard<'_, QueueInner>,
        txn: &Arc<Transaction>,
    ) -> Result<()> {
        loop {
            if txn.state() == TransactionState::Aborted {
                let txn_id = txn.id();
                inner.requests.retain(|r| r.txn.id() != txn_id);
                queue.cv.notify_all();
                return Err(PetraError::TransactionAborted {
                    txn_id,
                    reason: AbortReason::Deadlock,
                });
            }
            if Self::is_lock_compatible(inner, txn.id()) {
                return Ok(());
            }
            queue.cv.wait(inner);
        }
    }

    /// FIFO compatibility: an X request is grantable only at the queue head
    /// with no other grant outstanding (an upgrader sits at the head while
    /// later S grants drain); an S request is grantable if every earlier
    /// request is a granted S.
    fn is_lock_compatible(inner: &QueueInner, txn_id: TxnId) -> bool {
        let Some(request) = inner.requests.iter().find(|r| r.txn.id() == txn_id) else {
            return false;
        };

        match request.mode {
            LockMode::Exclusive => {
                inner
                    .requests
                    .front()
                    .map(|r| r.txn.id() == txn_id)
                    .unwrap_or(false)
                    && inner
                        .requests
                        .iter()
                        .all(|r| r.txn.id() == txn_id || !r.granted)
            }
            LockMode::Shared => {
                for earlier in &inner.requests {
                    if earlier.txn.id() == txn_id {
                        return true;
                    }
                    if !(earlier.granted && earlier.mode == LockMode::Shared) {
                        return false;
                    }
                }
                true
            }
        }
    }

    fn grant(inner: &mut QueueInner, txn_id: TxnId) {
        if let Some(request) = inner.requests.iter_mut().find(|r| r.txn.id() == txn_id) {
            request.granted = true;
        }
    }

    fn abort_implicitly(txn: &Transaction, reason: AbortReason) -> PetraError {
        txn.set_state(TransactionState::Aborted);
        PetraError::TransactionAborted {
            txn_id: txn.id(),
            reason,
        }
    }

    /*
     * Deadlock detection
     */

    fn run_cycle_detection(state: Arc<LockManagerState>) {
        while state.enable_cycle_detection.load(Ordering::Relaxed) {
            Self::sleep_one_interval(&state);
            if !state.enable_cycle_detection.load(Ordering::Relaxed) {
                break;
            }

            let table = state.lock_table.lock();
            // Abort one victim per cycle, rebuilding after each, until the
            // snapshot is acyclic.
            loop {
                let snapshot = Self::build_waits_for(&table);
                let Some(victim_id) = Self::find_victim(&snapshot.edges) else {
                    break;
                };

                if let Some(victim) = snapshot.txns.get(&victim_id) {
                    victim.set_state(TransactionState::Aborted);
                    log::warn!("deadlock detected, aborting youngest txn {}", victim_id);
                }
                // Wake every queue the victim was waiting on so it observes
                // the abort and withdraws.
                if let Some(queues) = snapshot.wait_queues.get(&victim_id) {
                    for queue in queues {
                        queue.cv.notify_all();
                    }
                }
            }
        }
    }

    /// Sleeps one detection interval, in short slices so shutdown does not
    /// have to wait the interval out.
    fn sleep_one_interval(state: &LockManagerState) {
        let slice = Duration::from_millis(10);
        let mut remaining = state.cycle_detection_interval;
        while remaining > Duration::ZERO && state.enable_cycle_detection.load(Ordering::Relaxed) {
            let chunk = remaining.min(slice);
            thread::sleep(chunk);
            remaining = remaining.saturating_sub(chunk);
        }
    }

    /// Rebuilds the wait-for graph from scratch: one edge per (ungranted,
    /// granted) pair in each queue, aborted transactions skipped.
    fn build_waits_for(table: &HashMap<RecordId, Arc<LockRequestQueue>>) -> WaitsForSnapshot {
        let mut snapshot = WaitsForSnapshot::default();

        for queue in table.values() {
            let inner = queue.inner.lock();
            let mut holders: Vec<TxnId> = Vec::new();
            let mut waiters: Vec<TxnId> = Vec::new();

            for request in &inner.requests {
                if request.txn.state() == TransactionState::Aborted {
                    continue;
                }
                let id = request.txn.id();
                snapshot
                    .txns
                    .entry(id)
                    .or_insert_with(|| Arc::clone(&request.txn));
                if request.granted {
                    holders.push(id);
                } else {
                    waiters.push(id);
                    snapshot
                        .wait_queues
                        .entry(id)
                        .or_default()
                        .push(Arc::clone(queue));
                }
            }

            for &waiter in &waiters {
                for &holder in &holders {
                    if waiter != holder {
                        snapshot.edges.entry(waiter).or_default().insert(holder);
                    }
                }
            }
        }

        snapshot
    }

    /// DFS over vertices in ascending txn id order. On a back-edge to an
    /// in-stack vertex, returns the youngest (largest id) transaction in
    /// the cycle.
    fn find_victim(edges: &BTreeMap<TxnId, BTreeSet<TxnId>>) -> Option<TxnId> {
        let mut visited: HashMap<TxnId, Visit> = HashMap::new();

        for &vertex in edges.keys() {
            if visited.contains_key(&vertex) {
                continue;
            }
            let mut stack = vec![vertex];
            visited.insert(vertex, Visit::InStack);
            if let Some(victim) = Self::dfs(vertex, edges, &mut visited, &mut stack) {
                return Some(victim);
            }
        }

        None
    }

    fn dfs(
        vertex: TxnId,
        edges: &BTreeMap<TxnId, BTreeSet<TxnId>>,
        visited: &mut HashMap<TxnId, Visit>,
        stack: &mut Vec<TxnId>,
    ) -> Option<TxnId> {
        if let Some(nexts) = edges.get(&vertex) {
            for &next in nexts {
                match visited.get(&next) {
                    Some(Visit::InStack) => {
                        let position = stack
                            .iter()
                            .position(|&v| v == next)
                            .expect("in-stack vertex is on the stack");
                        return stack[position..].iter().copied().max();
                    }
                    Some(Visit::Done) => {}
                    None => {
                        visited.insert(next, Visit::InStack);
                        stack.push(next);
                        if let Some(victim) = Self::dfs(next, edges, visited, stack) {
                            return Some(victim);
                        }
                    }
                }
            }
        }

        visited.insert(vertex, Visit::Done);
        stack.pop();
        None
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.state
            .enable_cycle_detection
            .store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector_handle.take() {
            let _ = handle.join();
        }
    }
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::ArcRwLockWriteGuard;
use parking_lot::{Mutex, RawRwLock, RwLock};

use crate::common::{Result, TxnId};

use super::lock_manager::LockManager;
use super::transaction::{IsolationLevel, Transaction, TransactionState, WriteType};

type QuiesceGuard = ArcRwLockWriteGuard<RawRwLock, ()>;

/// Owns transaction lifetimes: id allocation, the active-transaction map,
/// commit/abort processing of the write logs, lock release, and the global
/// latch used to quiesce all transactions for DDL-style maintenance.
pub struct TransactionManager {
    /// Next transaction id to assign; larger ids are younger transactions
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    /// Active transactions; the reader-writer lock admits concurrent lookups
    txn_map: RwLock<HashMap<TxnId, Arc<Transaction>>>,
    /// Every active transaction holds this in read mode from begin to end
    global_txn_latch: Arc<RwLock<()>>,
    /// Held write guard while transactions are blocked
    quiesce_guard: Mutex<Option<QuiesceGuard>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            txn_map: RwLock::new(HashMap::new()),
            global_txn_latch: Arc::new(RwLock::new(())),
            quiesce_guard: Mutex::new(None),
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Starts a transaction. Blocks while a quiesce is in progress.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let latch_guard = self.global_txn_latch.read_arc();

        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        txn.set_global_latch_guard(latch_guard);

        self.txn_map.write().insert(txn_id, Arc::clone(&txn));
        txn
    }

    /// Commits: applies deferred physical deletes, discards the rest of the
    /// write logs, and releases every lock held.
    pub fn commit(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Committed);

        for record in txn.take_table_writes() {
            // Deletes were only marked during execution; reclaim now
            if record.wtype == WriteType::Delete {
                record.table.apply_delete(record.rid);
            }
        }
        txn.take_index_writes();

        self.release_locks(txn);
        self.txn_map.write().remove(&txn.id());
        txn.release_global_latch();
    }

    /// Aborts: walks both write logs newest-first inverting each operation,
    /// then releases every lock held.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<()> {
        txn.set_state(TransactionState::Aborted);

        let mut table_writes = txn.take_table_writes();
        while let Some(record) = table_writes.pop() {
            match record.wtype {
                WriteType::Insert => record.table.apply_delete(record.rid),
                WriteType::Delete => record.table.rollback_delete(record.rid),
                WriteType::Update => record.table.update_tuple(record.rid, &record.old_tuple),
            }
        }

        let mut index_writes = txn.take_index_writes();
        while let Some(record) = index_writes.pop() {
            match record.wtype {
                WriteType::Insert => {
                    record.index.remove(&record.key)?;
                }
                WriteType::Delete => {
                    record.index.insert(&record.key, record.rid)?;
                }
                WriteType::Update => {
                    // Drop the new key, restore the old one
                    record.index.remove(&record.key)?;
                    if let Some(old_key) = record.old_key {
                        record.index.insert(&old_key, record.rid)?;
                    }
                }
            }
        }

        self.release_locks(txn);
        self.txn_map.write().remove(&txn.id());
        txn.release_global_latch();
        Ok(())
    }

    /// Quiesces the system: blocks until every in-flight transaction has
    /// finished and prevents new ones from starting.
    pub fn block_all_transactions(&self) {
        let guard = self.global_txn_latch.write_arc();
        *self.quiesce_guard.lock() = Some(guard);
    }

    /// Ends a quiesce started by block_all_transactions.
    pub fn resume_transactions(&self) {
        self.quiesce_guard.lock().take();
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.txn_map.read().get(&txn_id).cloned()
    }

    pub fn num_active_transactions(&self) -> usize {
        self.txn_map.read().len()
    }

    fn release_locks(&self, txn: &Arc<Transaction>) {
        for rid in txn.take_locked_rids() {
            self.lock_manager.unlock(txn, rid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{PageId, RecordId, SlotId};

    fn rid(v: u32) -> RecordId {
        RecordId::new(PageId::new(v), SlotId::new(0))
    }

    fn manager() -> TransactionManager {
        TransactionManager::new(Arc::new(LockManager::new()))
    }

    #[test]
    fn test_begin_assigns_monotonic_ids() {
        let tm = manager();

        let t1 = tm.begin(IsolationLevel::ReadCommitted);
        let t2 = tm.begin(IsolationLevel::RepeatableRead);
        assert_eq!(t1.id(), 1);
        assert_eq!(t2.id(), 2);
        assert_eq!(tm.num_active_transactions(), 2);
        assert!(tm.get_transaction(1).is_some());

        tm.commit(&t1);
        tm.abort(&t2).unwrap();
        assert_eq!(tm.num_active_transactions(), 0);
    }

    #[test]
    fn test_commit_releases_locks() {
        let tm = manager();
        let lm = Arc::clone(tm.lock_manager());

        let t1 = tm.begin(IsolationLevel::RepeatableRead);
        lm.lock_shared(&t1, rid(1)).unwrap();
        lm.lock_exclusive(&t1, rid(2)).unwrap();

        tm.commit(&t1);
        assert_eq!(t1.state(), TransactionState::Committed);
        assert_eq!(t1.shared_lock_count(), 0);
        assert_eq!(t1.exclusive_lock_count(), 0);

        // Another transaction can lock the same rids immediately
        let t2 = tm.begin(IsolationLevel::RepeatableRead);
        assert!(lm.lock_exclusive(&t2, rid(1)).unwrap());
        assert!(lm.lock_exclusive(&t2, rid(2)).unwrap());
        tm.commit(&t2);
    }

    #[test]
    fn test_quiesce_blocks_begin() {
        use std::sync::mpsc;
        use std::time::Duration;

        let tm = Arc::new(manager());
        tm.block_all_transactions();

        let (tx, rx) = mpsc::channel();
        let tm_clone = Arc::clone(&tm);
        let handle = std::thread::spawn(move || {
            let txn = tm_clone.begin(IsolationLevel::ReadCommitted);
            tx.send(txn.id()).unwrap();
        });

        // begin must not complete while the quiesce is held
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        tm.resume_transactions();
        let started = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(started, 1);
        handle.join().unwrap();
    }
}

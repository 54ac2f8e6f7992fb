use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::lock_api::ArcRwLockReadGuard;
use parking_lot::{Mutex, RawRwLock};

use crate::common::{RecordId, TxnId};
use crate::index::{BPlusTree, IndexKey};

/// Owned read guard on the transaction manager's global latch, held from
/// begin until commit/abort.
pub(crate) type GlobalLatchGuard = ArcRwLockReadGuard<RawRwLock, ()>;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Kind of write recorded in a write log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    Insert,
    Delete,
    Update,
}

/// Interface to the heap storage that owns the tuples named by the table
/// write log. The heap itself lives outside this crate; commit and abort
/// drive it through this seam.
pub trait TableHeap: Send + Sync {
    /// Physically reclaims a slot whose delete is being committed.
    fn apply_delete(&self, rid: RecordId);
    /// Clears the delete mark of a tuple whose delete is being rolled back.
    fn rollback_delete(&self, rid: RecordId);
    /// Restores a tuple's bytes when an update is rolled back.
    fn update_tuple(&self, rid: RecordId, tuple: &[u8]);
}

/// One entry of the table write log.
pub struct TableWriteRecord {
    pub rid: RecordId,
    pub wtype: WriteType,
    /// Before image, used to roll back updates
    pub old_tuple: Vec<u8>,
    pub table: Arc<dyn TableHeap>,
}

/// One entry of the index write log.
pub struct IndexWriteRecord {
    pub rid: RecordId,
    pub wtype: WriteType,
    pub key: IndexKey,
    /// The previous key of an update, used to re-key on rollback
    pub old_key: Option<IndexKey>,
    pub index: Arc<BPlusTree>,
}

/// An active transaction: state, isolation level, the rids it holds locks
/// on, and the write logs the transaction manager drains at commit/abort.
pub struct Transaction {
    txn_id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    shared_lock_set: Mutex<HashSet<RecordId>>,
    exclusive_lock_set: Mutex<HashSet<RecordId>>,
    table_write_set: Mutex<Vec<TableWriteRecord>>,
    index_write_set: Mutex<Vec<IndexWriteRecord>>,
    global_latch_guard: Mutex<Option<GlobalLatchGuard>>,
}

impl Transaction {
    pub(crate) fn new(txn_id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            txn_id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
            table_write_set: Mutex::new(Vec::new()),
            index_write_set: Mutex::new(Vec::new()),
            global_latch_guard: Mutex::new(None),
        }
    }

    pub fn id(&self) -> TxnId {
        self.txn_id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn is_shared_locked(&self, rid: RecordId) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn is_exclusive_locked(&self, rid: RecordId) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    pub fn shared_lock_count(&self) -> usize {
        self.shared_lock_set.lock().len()
    }

    pub fn exclusive_lock_count(&self) -> usize {
        self.exclusive_lock_set.lock().len()
    }

    pub(crate) fn add_shared_lock(&self, rid: RecordId) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub(crate) fn add_exclusive_lock(&self, rid: RecordId) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub(crate) fn remove_locks(&self, rid: RecordId) {
        self.shared_lock_set.lock().remove(&rid);
        self.exclusive_lock_set.lock().remove(&rid);
    }

    /// S -> X bookkeeping once an upgrade is granted.
    pub(crate) fn promote_lock(&self, rid: RecordId) {
        self.shared_lock_set.lock().remove(&rid);
        self.exclusive_lock_set.lock().insert(rid);
    }

    /// Drains both lock sets, returning every rid the transaction holds.
    pub(crate) fn take_locked_rids(&self) -> Vec<RecordId> {
        let mut rids: Vec<RecordId> = self.shared_lock_set.lock().drain().collect();
        rids.extend(self.exclusive_lock_set.lock().drain());
        rids
    }

    /// Records a table write for commit/abort processing.
    pub fn append_table_write(&self, record: TableWriteRecord) {
        self.table_write_set.lock().push(record);
    }

    /// Records an index write for abort rollback.
    pub fn append_index_write(&self, record: IndexWriteRecord) {
        self.index_write_set.lock().push(record);
    }

    pub(crate) fn take_table_writes(&self) -> Vec<TableWriteRecord> {
        std::mem::take(&mut *self.table_write_set.lock())
    }

    pub(crate) fn take_index_writes(&self) -> Vec<IndexWriteRecord> {
        std::mem::take(&mut *self.index_write_set.lock())
    }

    pub(crate) fn set_global_latch_guard(&self, guard: GlobalLatchGuard) {
        *self.global_latch_guard.lock() = Some(guard);
    }

    pub(crate) fn release_global_latch(&self) {
        self.global_latch_guard.lock().take();
    }
}

use std::fmt;

use thiserror::Error;

use super::types::{PageId, TxnId};

/// Why the lock manager aborted a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// A lock was requested after the transaction entered its shrinking phase.
    LockOnShrinking,
    /// A shared lock was requested under READ_UNCOMMITTED.
    LockSharedOnReadUncommitted,
    /// Another transaction is already upgrading on the same rid.
    UpgradeConflict,
    /// The transaction was chosen as a deadlock victim.
    Deadlock,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AbortReason::LockOnShrinking => "LOCK_ON_SHRINKING",
            AbortReason::LockSharedOnReadUncommitted => "LOCKSHARED_ON_READ_UNCOMMITTED",
            AbortReason::UpgradeConflict => "UPGRADE_CONFLICT",
            AbortReason::Deadlock => "DEADLOCK",
        };
        f.write_str(s)
    }
}

/// Database error types
#[derive(Error, Debug)]
pub enum PetraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Buffer pool is full, no evictable frames available")]
    BufferPoolFull,

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Header page is full")]
    HeaderPageFull,

    #[error("Transaction {txn_id} aborted: {reason}")]
    TransactionAborted { txn_id: TxnId, reason: AbortReason },
}

pub type Result<T> = std::result::Result<T, PetraError>;

//! Petra - the storage and concurrency kernel of a disk-backed relational
//! engine.
//!
//! Every access to persistent data goes through three tightly coupled
//! subsystems:
//!
//! - **Buffer pool** (`buffer`): caches fixed-size pages from a flat
//!   page-addressable store, evicts via an LRU replacer, and hands out RAII
//!   page guards that tie a frame pin to the page latch.
//!   - `BufferPoolManager`: fetches pages from disk and caches them
//!   - `LruReplacer`: least-recently-unpinned eviction
//!   - `ReadPageGuard`/`WritePageGuard`: pin + latch for one access
//!   - `ParallelBufferPool`: modulo-routed sharding over several pools
//!
//! - **B+tree index** (`index`): clustered ordered index implemented
//!   directly over pinned, latched pages with latch crabbing.
//!   - `BPlusTree`: lookup, insert with splits, delete with
//!     coalesce/redistribute, ordered iteration
//!   - `BTreeNode`/`BTreeNodeRef`: byte-level node views
//!   - `KeyComparator`: ordering seam for fixed-width keys
//!
//! - **Transactions** (`concurrency`): row-level two-phase locking with
//!   shared/exclusive modes, lock upgrade, three isolation levels, and
//!   deadlock detection over a periodically rebuilt wait-for graph.
//!   - `LockManager`: per-rid FIFO lock queues plus the detector thread
//!   - `TransactionManager`: begin/commit/abort and global quiesce
//!
//! The storage layer (`storage`) supplies the flat-file disk manager and
//! the header-page directory mapping index names to their root pages.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use petra::buffer::BufferPoolManager;
//! use petra::common::{PageId, RecordId, SlotId};
//! use petra::index::{BPlusTree, IntegerComparator};
//! use petra::storage::disk::DiskManager;
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, disk_manager));
//!
//! let tree = BPlusTree::new("pk_users", bpm, Arc::new(IntegerComparator)).unwrap();
//! let rid = RecordId::new(PageId::new(7), SlotId::new(0));
//! tree.insert(&42u64.to_le_bytes(), rid).unwrap();
//! assert_eq!(tree.get(&42u64.to_le_bytes()).unwrap(), Some(rid));
//! ```

pub mod buffer;
pub mod common;
pub mod concurrency;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{AbortReason, PageId, PetraError, RecordId, Result, SlotId, TxnId};

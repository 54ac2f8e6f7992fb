use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use crate::common::{PageId, PAGE_SIZE};

use super::{Frame, LruReplacer};

type PageLatchRead = ArcRwLockReadGuard<RawRwLock, Box<[u8; PAGE_SIZE]>>;
type PageLatchWrite = ArcRwLockWriteGuard<RawRwLock, Box<[u8; PAGE_SIZE]>>;

/// The pin half of a page guard. Dropping it gives the pin back to the
/// frame, folding in the dirty flag accumulated while the guard was alive.
///
/// Both guard types declare their latch field before this one, so the latch
/// is always released before the final unpin of the acquisition.
struct PinHandle {
    page_id: PageId,
    dirty: bool,
    frame: Arc<Frame>,
    replacer: Arc<LruReplacer>,
}

impl Drop for PinHandle {
    fn drop(&mut self) {
        self.frame.release(self.dirty, &self.replacer);
    }
}

/// Shared access to one page: one pin plus the page read latch, held
/// together for the guard's lifetime.
pub struct ReadPageGuard {
    /// Dropped first: the read latch
    latch: PageLatchRead,
    /// Dropped second: the pin
    pin: PinHandle,
}

impl ReadPageGuard {
    /// Takes the page read latch over an already pinned frame. The pin is
    /// handed to the guard and returned when the guard drops.
    pub(crate) fn new(page_id: PageId, frame: Arc<Frame>, replacer: Arc<LruReplacer>) -> Self {
        let latch = frame.page_latch().read_arc();
        Self {
            latch,
            pin: PinHandle {
                page_id,
                dirty: false,
                frame,
                replacer,
            },
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.pin.page_id
    }

    /// Returns a reference to the page data.
    pub fn data(&self) -> &[u8] {
        &self.latch[..]
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

/// Exclusive access to one page: one pin plus the page write latch.
/// Any mutable access marks the page dirty; the flag travels with the pin
/// when the guard drops.
pub struct WritePageGuard {
    /// Dropped first: the write latch
    latch: PageLatchWrite,
    /// Dropped second: the pin
    pin: PinHandle,
}

impl WritePageGuard {
    /// Takes the page write latch over an already pinned frame. The pin is
    /// handed to the guard and returned when the guard drops.
    pub(crate) fn new(page_id: PageId, frame: Arc<Frame>, replacer: Arc<LruReplacer>) -> Self {
        let latch = frame.page_latch().write_arc();
        Self {
            latch,
            pin: PinHandle {
                page_id,
                dirty: false,
                frame,
                replacer,
            },
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.pin.page_id
    }

    /// Returns a reference to the page data.
    pub fn data(&self) -> &[u8] {
        &self.latch[..]
    }

    /// Returns a mutable reference to the page data.
    /// Automatically marks the page as dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.pin.dirty = true;
        &mut self.latch[..]
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

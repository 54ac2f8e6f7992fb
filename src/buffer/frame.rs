use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::common::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};

use super::LruReplacer;

/// Bookkeeping for one buffer frame. All three fields change together on
/// pin/unpin/install transitions, so they live in one record under one lock
/// instead of being synchronized field by field.
struct FrameMeta {
    /// The page resident in this frame (INVALID_PAGE_ID if empty)
    page_id: PageId,
    /// Number of callers currently holding this frame
    pin_count: u32,
    /// Whether the page bytes were modified since they were read from disk
    is_dirty: bool,
}

/// A slot in the buffer pool.
///
/// The metadata mutex is the synchronization point for pin transitions:
/// `pin` and `release` arm or disarm the replacer while holding it, which
/// keeps "tracked by the replacer" equivalent to "pin count is zero". The
/// RwLock around the bytes is the per-frame page latch; it sits in an Arc so
/// page guards can hold it as an owned lock.
pub struct Frame {
    /// The frame ID (index in the buffer pool)
    frame_id: FrameId,
    meta: Mutex<FrameMeta>,
    /// Page latch over the resident bytes
    page_latch: Arc<RwLock<Box<[u8; PAGE_SIZE]>>>,
}

impl Frame {
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            meta: Mutex::new(FrameMeta {
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            }),
            page_latch: Arc::new(RwLock::new(Box::new([0u8; PAGE_SIZE]))),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn page_id(&self) -> PageId {
        self.meta.lock().page_id
    }

    pub fn pin_count(&self) -> u32 {
        self.meta.lock().pin_count
    }

    pub fn is_dirty(&self) -> bool {
        self.meta.lock().is_dirty
    }

    /// Clears the dirty flag after a successful flush.
    pub fn mark_clean(&self) {
        self.meta.lock().is_dirty = false;
    }

    /// Prepares the frame for a new resident page: empty bytes, clean,
    /// unpinned, named by `page_id`.
    pub fn install(&self, page_id: PageId) {
        let mut meta = self.meta.lock();
        meta.page_id = page_id;
        meta.pin_count = 0;
        meta.is_dirty = false;
        self.page_latch.write().fill(0);
    }

    /// Returns the frame to its empty state.
    pub fn clear(&self) {
        self.install(INVALID_PAGE_ID);
    }

    /// Takes one pin and removes the frame from eviction candidates.
    pub fn pin(&self, replacer: &LruReplacer) {
        let mut meta = self.meta.lock();
        meta.pin_count += 1;
        replacer.pin(self.frame_id);
    }

    /// Drops one pin, folding in the caller's dirty flag. The frame becomes
    /// an eviction candidate when the last pin goes.
    pub fn release(&self, dirty: bool, replacer: &LruReplacer) {
        let mut meta = self.meta.lock();
        if dirty {
            meta.is_dirty = true;
        }
        if meta.pin_count == 0 {
            log::error!("release of {} with zero pin count", meta.page_id);
            return;
        }
        meta.pin_count -= 1;
        if meta.pin_count == 0 {
            replacer.unpin(self.frame_id);
        }
    }

    /// The page latch. Guards take owned read/write locks on it.
    pub(crate) fn page_latch(&self) -> &Arc<RwLock<Box<[u8; PAGE_SIZE]>>> {
        &self.page_latch
    }

    /// Copies page bytes into the frame (loading from disk).
    pub fn load(&self, src: &[u8]) {
        assert_eq!(src.len(), PAGE_SIZE);
        self.page_latch.write().copy_from_slice(src);
    }

    /// Copies a consistent snapshot of the frame out (flush, write-back).
    pub fn snapshot(&self, dst: &mut [u8]) {
        assert_eq!(dst.len(), PAGE_SIZE);
        dst.copy_from_slice(&**self.page_latch.read());
    }
}

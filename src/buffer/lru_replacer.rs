use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

use crate::common::FrameId;

/// LRU replacement policy over the unpinned frames of the buffer pool.
///
/// Frames are kept in unpin order: the front of the map is the least
/// recently unpinned frame and is the next eviction victim. A frame is
/// tracked here iff the pin count of its resident page is zero.
pub struct LruReplacer {
    /// Recency-ordered set of evictable frames (front = LRU, back = MRU).
    /// The hash side gives O(1) removal when a frame is re-pinned.
    lru: Mutex<LinkedHashMap<FrameId, ()>>,
}

impl LruReplacer {
    /// Creates a replacer able to track up to `num_frames` frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            lru: Mutex::new(LinkedHashMap::with_capacity(num_frames)),
        }
    }

    /// Removes and returns the least recently unpinned frame.
    /// Returns None if no frame is evictable.
    pub fn victim(&self) -> Option<FrameId> {
        let mut lru = self.lru.lock();
        lru.pop_front().map(|(frame_id, ())| frame_id)
    }

    /// Removes a frame from eviction tracking because it is in use again.
    pub fn pin(&self, frame_id: FrameId) {
        let mut lru = self.lru.lock();
        lru.remove(&frame_id);
    }

    /// Makes a frame evictable, inserting it at the most-recently-used end.
    /// A no-op if the frame is already tracked.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut lru = self.lru.lock();
        if !lru.contains_key(&frame_id) {
            lru.insert(frame_id, ());
        }
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.lru.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_replacer_empty() {
        let replacer = LruReplacer::new(10);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_lru_replacer_victim_order() {
        let replacer = LruReplacer::new(10);

        replacer.unpin(FrameId::new(1));
        replacer.unpin(FrameId::new(2));
        replacer.unpin(FrameId::new(3));
        assert_eq!(replacer.size(), 3);

        // Victims come out oldest-unpin first
        assert_eq!(replacer.victim(), Some(FrameId::new(1)));
        assert_eq!(replacer.victim(), Some(FrameId::new(2)));
        assert_eq!(replacer.victim(), Some(FrameId::new(3)));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_lru_replacer_unpin_idempotent() {
        let replacer = LruReplacer::new(10);

        replacer.unpin(FrameId::new(1));
        replacer.unpin(FrameId::new(2));
        // Re-unpinning frame 1 must not move it to the MRU end
        replacer.unpin(FrameId::new(1));

        assert_eq!(replacer.size(), 2);
        assert_eq!(replacer.victim(), Some(FrameId::new(1)));
        assert_eq!(replacer.victim(), Some(FrameId::new(2)));
    }

    #[test]
    fn test_lru_replacer_pin_removes() {
        let replacer = LruReplacer::new(10);

        replacer.unpin(FrameId::new(1));
        replacer.unpin(FrameId::new(2));
        replacer.pin(FrameId::new(1));

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.victim(), Some(FrameId::new(2)));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_lru_replacer_pin_untracked_is_noop() {
        let replacer = LruReplacer::new(10);
        replacer.pin(FrameId::new(5));
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_replacer_reinsert_after_victim() {
        let replacer = LruReplacer::new(10);

        replacer.unpin(FrameId::new(1));
        assert_eq!(replacer.victim(), Some(FrameId::new(1)));

        replacer.unpin(FrameId::new(1));
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.victim(), Some(FrameId::new(1)));
    }
}

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{FrameId, PageId, PetraError, Result, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::disk::DiskManager;

use super::{Frame, LruReplacer, ReadPageGuard, WritePageGuard};

/// BufferPoolManager is responsible for fetching database pages from disk
/// and caching them in memory. It manages a fixed number of frames and uses
/// LRU replacement to decide which resident page to evict.
///
/// The page table lock serializes residency changes: a page moves between
/// disk and a frame only under it, so concurrent fetches of the same page
/// always land on one frame. Access to page bytes goes through
/// [`ReadPageGuard`] / [`WritePageGuard`], which tie the pin and the page
/// latch together for their lifetime.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    /// Number of pool instances in a sharded deployment (1 if standalone)
    num_instances: u32,
    /// This pool's index among the instances
    instance_index: u32,
    /// Next page id handed out when allocating with a stride
    next_page_id: AtomicU32,
    /// The buffer pool frames
    frames: Vec<Arc<Frame>>,
    /// Page table: maps page IDs to frame IDs
    page_table: Mutex<HashMap<PageId, FrameId>>,
    /// Free list: frames that are not currently in use
    free_list: Mutex<VecDeque<FrameId>>,
    /// LRU replacer for eviction decisions; shared with the page guards,
    /// which re-arm it when the last pin on a frame goes
    replacer: Arc<LruReplacer>,
    /// Synchronous page I/O
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    /// Creates a standalone BufferPoolManager with the given pool size.
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::new_instance(pool_size, 1, 0, disk_manager)
    }

    /// Creates one instance of a sharded pool. Page ids allocated by this
    /// instance satisfy `page_id % num_instances == instance_index`, so
    /// modulo routing always lands a page on the instance that allocated it.
    pub fn new_instance(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        assert!(num_instances > 0);
        assert!(instance_index < num_instances);

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(Frame::new(frame_id)));
            free_list.push_back(frame_id);
        }

        // Instance 0 skips page 0, which is reserved for the header page.
        let first_page_id = if instance_index == 0 {
            num_instances
        } else {
            instance_index
        };

        Self {
            pool_size,
            num_instances,
            instance_index,
            next_page_id: AtomicU32::new(first_page_id),
            frames,
            page_table: Mutex::new(HashMap::new()),
            free_list: Mutex::new(free_list),
            replacer: Arc::new(LruReplacer::new(pool_size)),
            disk_manager,
        }
    }

    /// Allocates a fresh page and returns it pinned and write-latched.
    /// Fails with BufferPoolFull iff every frame is pinned.
    pub fn new_page(&self) -> Result<(PageId, WritePageGuard)> {
        let mut page_table = self.page_table.lock();
        let frame_id = self.get_free_frame(&mut page_table)?;
        let frame = &self.frames[frame_id.as_usize()];

        let page_id = self.allocate_page()?;

        frame.install(page_id);
        frame.pin(&self.replacer);
        page_table.insert(page_id, frame_id);
        drop(page_table);

        let guard = WritePageGuard::new(page_id, Arc::clone(frame), Arc::clone(&self.replacer));
        Ok((page_id, guard))
    }

    /// Fetches a page for read access, pinning it and taking its read latch.
    pub fn read_page(&self, page_id: PageId) -> Result<ReadPageGuard> {
        if page_id == INVALID_PAGE_ID {
            return Err(PetraError::InvalidPageId(page_id));
        }

        let frame_id = self.fetch_page(page_id)?;
        let frame = Arc::clone(&self.frames[frame_id.as_usize()]);

        Ok(ReadPageGuard::new(page_id, frame, Arc::clone(&self.replacer)))
    }

    /// Fetches a page for write access, pinning it and taking its write latch.
    pub fn write_page(&self, page_id: PageId) -> Result<WritePageGuard> {
        if page_id == INVALID_PAGE_ID {
            return Err(PetraError::InvalidPageId(page_id));
        }

        let frame_id = self.fetch_page(page_id)?;
        let frame = Arc::clone(&self.frames[frame_id.as_usize()]);

        Ok(WritePageGuard::new(page_id, frame, Arc::clone(&self.replacer)))
    }

    /// Flushes a specific page to disk, clearing its dirty flag.
    /// Does not change pin state. Returns false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(PetraError::InvalidPageId(page_id));
        }

        let page_table = self.page_table.lock();

        if let Some(&frame_id) = page_table.get(&page_id) {
            let frame = &self.frames[frame_id.as_usize()];

            let mut data = [0u8; PAGE_SIZE];
            frame.snapshot(&mut data);

            self.disk_manager.write_page(page_id, &data)?;
            frame.mark_clean();

            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Flushes all dirty resident pages to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let page_table = self.page_table.lock();

        for (&page_id, &frame_id) in page_table.iter() {
            let frame = &self.frames[frame_id.as_usize()];

            if frame.is_dirty() {
                let mut data = [0u8; PAGE_SIZE];
                frame.snapshot(&mut data);

                self.disk_manager.write_page(page_id, &data)?;
                frame.mark_clean();
            }
        }

        Ok(())
    }

    /// Deletes a page from the buffer pool and deallocates it on disk.
    /// Refuses (returns Ok(false)) while the page is pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut page_table = self.page_table.lock();

        if let Some(frame_id) = page_table.remove(&page_id) {
            let frame = &self.frames[frame_id.as_usize()];

            if frame.pin_count() > 0 {
                page_table.insert(page_id, frame_id);
                return Ok(false);
            }

            frame.clear();
            self.replacer.pin(frame_id);
            self.free_list.lock().push_back(frame_id);
        }

        self.disk_manager.deallocate_page(page_id)?;
        Ok(true)
    }

    /// Returns the pin count for a resident page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let page_table = self.page_table.lock();

        page_table
            .get(&page_id)
            .map(|&frame_id| self.frames[frame_id.as_usize()].pin_count())
    }

    /// Returns the pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of free frames.
    pub fn free_frame_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of evictable (unpinned, resident) frames.
    pub fn evictable_frame_count(&self) -> usize {
        self.replacer.size()
    }

    /// Hands out the next page id. Standalone pools allocate densely from
    /// the disk manager; sharded instances allocate with a stride so ids
    /// route back to them.
    fn allocate_page(&self) -> Result<PageId> {
        if self.num_instances == 1 {
            self.disk_manager.allocate_page()
        } else {
            let id = self
                .next_page_id
                .fetch_add(self.num_instances, Ordering::SeqCst);
            debug_assert_eq!(id % self.num_instances, self.instance_index);
            Ok(PageId::new(id))
        }
    }

    /// Fetches a page into the buffer pool and returns its frame ID with one
    /// pin taken. If the page is resident, bumps its pin count; otherwise
    /// obtains a frame and reads the page from disk. The page table lock is
    /// held across the whole miss path so that two concurrent fetches of the
    /// same page cannot load it into two frames.
    fn fetch_page(&self, page_id: PageId) -> Result<FrameId> {
        let mut page_table = self.page_table.lock();

        if let Some(&frame_id) = page_table.get(&page_id) {
            self.frames[frame_id.as_usize()].pin(&self.replacer);
            return Ok(frame_id);
        }

        // Not resident: bring it in from disk
        let frame_id = self.get_free_frame(&mut page_table)?;
        let frame = &self.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        self.disk_manager.read_page(page_id, &mut data)?;

        frame.install(page_id);
        frame.load(&data);
        frame.pin(&self.replacer);

        page_table.insert(page_id, frame_id);

        Ok(frame_id)
    }

    /// Gets a free frame, either from the free list or by evicting a victim.
    /// A dirty victim is written through to disk before the frame is reused.
    /// Runs under the caller's page table lock.
    fn get_free_frame(&self, page_table: &mut HashMap<PageId, FrameId>) -> Result<FrameId> {
        {
            let mut free_list = self.free_list.lock();
            if let Some(frame_id) = free_list.pop_front() {
                return Ok(frame_id);
            }
        }

        if let Some(frame_id) = self.replacer.victim() {
            let frame = &self.frames[frame_id.as_usize()];
            let old_page_id = frame.page_id();

            if frame.is_dirty() {
                log::debug!("evicting dirty page {}, writing back", old_page_id);
                let mut data = [0u8; PAGE_SIZE];
                frame.snapshot(&mut data);
                self.disk_manager.write_page(old_page_id, &data)?;
            }

            page_table.remove(&old_page_id);
            frame.clear();

            Ok(frame_id)
        } else {
            Err(PetraError::BufferPoolFull)
        }
    }
}

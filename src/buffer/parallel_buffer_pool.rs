use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::common::{PageId, PetraError, Result};
use crate::storage::disk::DiskManager;

use super::{BufferPoolManager, ReadPageGuard, WritePageGuard};

/// A sharded buffer pool: `num_instances` independent pools over one disk
/// manager, with pages routed by `page_id % num_instances`. Each instance
/// allocates page ids with a stride, so a page always routes back to the
/// instance that allocated it.
pub struct ParallelBufferPool {
    instances: Vec<BufferPoolManager>,
    /// Round-robin starting point for new_page
    next_instance: AtomicUsize,
}

impl ParallelBufferPool {
    /// Creates `num_instances` pools of `pool_size` frames each.
    pub fn new(num_instances: u32, pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        assert!(num_instances > 0);

        let instances = (0..num_instances)
            .map(|i| {
                BufferPoolManager::new_instance(
                    pool_size,
                    num_instances,
                    i,
                    Arc::clone(&disk_manager),
                )
            })
            .collect();

        Self {
            instances,
            next_instance: AtomicUsize::new(0),
        }
    }

    fn instance_for(&self, page_id: PageId) -> &BufferPoolManager {
        let idx = page_id.as_u32() as usize % self.instances.len();
        &self.instances[idx]
    }

    /// Allocates a new page from the first instance with a free frame,
    /// starting the search round-robin so load spreads across instances.
    pub fn new_page(&self) -> Result<(PageId, WritePageGuard)> {
        let n = self.instances.len();
        let start = self.next_instance.fetch_add(1, Ordering::Relaxed) % n;

        for offset in 0..n {
            let instance = &self.instances[(start + offset) % n];
            match instance.new_page() {
                Ok(result) => return Ok(result),
                Err(PetraError::BufferPoolFull) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(PetraError::BufferPoolFull)
    }

    pub fn read_page(&self, page_id: PageId) -> Result<ReadPageGuard> {
        self.instance_for(page_id).read_page(page_id)
    }

    pub fn write_page(&self, page_id: PageId) -> Result<WritePageGuard> {
        self.instance_for(page_id).write_page(page_id)
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        self.instance_for(page_id).flush_page(page_id)
    }

    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        self.instance_for(page_id).delete_page(page_id)
    }

    pub fn flush_all_pages(&self) -> Result<()> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }

    /// Total frame count across all instances.
    pub fn pool_size(&self) -> usize {
        self.instances.iter().map(|i| i.pool_size()).sum()
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }
}

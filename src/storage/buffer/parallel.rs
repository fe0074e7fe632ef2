use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::{PageId, PagePtr};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::manager::BufferPoolManager;
use crate::storage::disk::DiskManager;

/// A thin router over `n` independent buffer pool instances.
///
/// Every operation on a page id is dispatched to instance
/// `page_id % n`; since each instance allocates only ids congruent to its
/// own index, routing stays invertible. `new_page` rotates a starting
/// index so allocation load spreads across instances.
pub struct ParallelBufferPoolManager {
    instances: Vec<Arc<BufferPoolManager>>,
    start_index: Mutex<usize>,
}

impl ParallelBufferPoolManager {
    pub fn new(num_instances: usize, pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        assert!(num_instances > 0);
        let instances = (0..num_instances)
            .map(|i| {
                Arc::new(BufferPoolManager::new_instance(
                    pool_size,
                    num_instances,
                    i,
                    disk_manager.clone(),
                ))
            })
            .collect();

        Self {
            instances,
            start_index: Mutex::new(0),
        }
    }

    /// Total frames across all instances
    pub fn pool_size(&self) -> usize {
        self.instances.len() * self.instances[0].pool_size()
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    fn instance_for(&self, page_id: PageId) -> &BufferPoolManager {
        &self.instances[page_id as usize % self.instances.len()]
    }

    /// Allocate a page from the first instance that has a frame to spare
    pub fn new_page(&self) -> Result<(PageId, PagePtr), BufferPoolError> {
        let mut start = self.start_index.lock();
        let n = self.instances.len();
        let first = *start;
        *start = (*start + 1) % n;
        drop(start);

        let mut last_err = BufferPoolError::PoolExhausted(self.pool_size());
        for offset in 0..n {
            match self.instances[(first + offset) % n].new_page() {
                Ok(allocated) => return Ok(allocated),
                Err(e @ BufferPoolError::PoolExhausted(_)) => last_err = e,
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        self.instance_for(page_id).fetch_page(page_id)
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        if page_id < 0 {
            return false;
        }
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        if page_id < 0 {
            return Ok(false);
        }
        self.instance_for(page_id).flush_page(page_id)
    }

    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }

    pub fn delete_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        if page_id < 0 {
            return Ok(false);
        }
        self.instance_for(page_id).delete_page(page_id)
    }
}

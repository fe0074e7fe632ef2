use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LRUReplacer;
use crate::storage::disk::DiskManager;

/// Per-frame bookkeeping. Kept inside the instance latch; the page bytes
/// themselves are guarded by each page's own latch.
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn vacant() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LRUReplacer,
    frames: Vec<FrameMeta>,
    next_page_id: PageId,
}

/// A buffer pool instance: a fixed array of frames caching disk pages,
/// with LRU eviction over unpinned frames.
///
/// Page id allocation is striped so that instance `i` of `n` only ever
/// produces ids congruent to `i` modulo `n`; the parallel pool relies on
/// this to route by `page_id % n`. Invariants held under the instance
/// latch: at most one frame per resident page id, and a frame sits in the
/// replacer iff its pin count is zero and it holds a valid page.
pub struct BufferPoolManager {
    pool_size: usize,
    num_instances: usize,
    instance_index: usize,
    pages: Vec<PagePtr>,
    state: Mutex<PoolState>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    /// Create a stand-alone instance owning the whole page id space
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::new_instance(pool_size, 1, 0, disk_manager)
    }

    /// Create one instance of a striped pool
    pub fn new_instance(
        pool_size: usize,
        num_instances: usize,
        instance_index: usize,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        assert!(num_instances > 0);
        assert!(instance_index < num_instances);

        let mut pages = Vec::with_capacity(pool_size);
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            pages.push(Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))));
            frames.push(FrameMeta::vacant());
            free_list.push_back(frame_id);
        }

        // Instance 0 skips page id 0: it is reserved for the header page,
        // which is only ever reached through fetch_page.
        let next_page_id = if instance_index == 0 {
            num_instances as PageId
        } else {
            instance_index as PageId
        };

        Self {
            pool_size,
            num_instances,
            instance_index,
            pages,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                replacer: LRUReplacer::new(pool_size),
                frames,
                next_page_id,
            }),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn instance_index(&self) -> usize {
        self.instance_index
    }

    /// Allocate a fresh page and pin it into a frame.
    ///
    /// Fails with `PoolExhausted` only when every frame is pinned.
    pub fn new_page(&self) -> Result<(PageId, PagePtr), BufferPoolError> {
        let mut state = self.state.lock();
        let frame_id = self.acquire_frame(&mut state)?;

        let page_id = state.next_page_id;
        state.next_page_id += self.num_instances as PageId;
        debug_assert_eq!(
            page_id as usize % self.num_instances,
            self.instance_index
        );

        {
            let mut page = self.pages[frame_id].write();
            page.data.fill(0);
            page.page_id = page_id;
        }
        state.frames[frame_id] = FrameMeta {
            page_id,
            pin_count: 1,
            is_dirty: false,
        };
        state.page_table.insert(page_id, frame_id);

        Ok((page_id, self.pages[frame_id].clone()))
    }

    /// Fetch a page, reading it from disk if it is not resident
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.frames[frame_id].pin_count += 1;
            state.replacer.pin(frame_id);
            return Ok(self.pages[frame_id].clone());
        }

        let frame_id = self.acquire_frame(&mut state)?;
        let read_result = {
            let mut page = self.pages[frame_id].write();
            let result = self.disk_manager.read_page(page_id, &mut page.data);
            if result.is_ok() {
                page.page_id = page_id;
            } else {
                page.reset();
            }
            result
        };
        if let Err(e) = read_result {
            // Frame stays vacant; hand it back rather than leaking it.
            state.free_list.push_back(frame_id);
            return Err(e.into());
        }

        state.frames[frame_id] = FrameMeta {
            page_id,
            pin_count: 1,
            is_dirty: false,
        };
        state.page_table.insert(page_id, frame_id);

        Ok(self.pages[frame_id].clone())
    }

    /// Drop one pin on a page, optionally marking it dirty.
    ///
    /// Returns false if the page is not resident or was not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };

        let frame = &mut state.frames[frame_id];
        if frame.pin_count == 0 {
            return false;
        }
        frame.pin_count -= 1;
        frame.is_dirty |= is_dirty;

        if frame.pin_count == 0 {
            state.replacer.unpin(frame_id);
        }
        true
    }

    /// Write a resident page back to disk regardless of its pin count
    pub fn flush_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(false);
        };
        self.flush_frame(&mut state, frame_id)?;
        Ok(true)
    }

    /// Flush every resident page
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();
        let frame_ids: Vec<FrameId> = state.page_table.values().copied().collect();
        for frame_id in frame_ids {
            self.flush_frame(&mut state, frame_id)?;
        }
        Ok(())
    }

    /// Drop a page from the pool and deallocate it on disk.
    ///
    /// Succeeds trivially for non-resident pages; returns false while the
    /// page is pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            self.disk_manager.deallocate_page(page_id);
            return Ok(true);
        };

        if state.frames[frame_id].pin_count > 0 {
            return Ok(false);
        }
        if state.frames[frame_id].is_dirty {
            self.flush_frame(&mut state, frame_id)?;
        }

        state.replacer.pin(frame_id);
        state.page_table.remove(&page_id);
        state.frames[frame_id] = FrameMeta::vacant();
        self.pages[frame_id].write().reset();
        state.free_list.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id);
        Ok(true)
    }

    /// Take a frame from the free list, or evict the LRU victim
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = state.replacer.victim() else {
            return Err(BufferPoolError::PoolExhausted(self.pool_size));
        };

        let old_page_id = state.frames[frame_id].page_id;
        let is_dirty = state.frames[frame_id].is_dirty;
        debug_assert_eq!(state.frames[frame_id].pin_count, 0);

        if is_dirty {
            debug!("evicting dirty page {} from frame {}", old_page_id, frame_id);
            let page = self.pages[frame_id].read();
            self.disk_manager.write_page(old_page_id, &page.data)?;
        }
        state.page_table.remove(&old_page_id);
        state.frames[frame_id] = FrameMeta::vacant();
        Ok(frame_id)
    }

    fn flush_frame(&self, state: &mut PoolState, frame_id: FrameId) -> Result<(), BufferPoolError> {
        let page_id = state.frames[frame_id].page_id;
        debug_assert_ne!(page_id, INVALID_PAGE_ID);
        {
            let page = self.pages[frame_id].read();
            self.disk_manager.write_page(page_id, &page.data)?;
        }
        state.frames[frame_id].is_dirty = false;
        Ok(())
    }
}

use linked_hash_map::LinkedHashMap;

use crate::common::types::FrameId;

/// LRU page replacement policy over the set of unpinned frames.
///
/// Frames become victim candidates in the exact order they were unpinned;
/// `victim` pops the earliest one. All operations are O(1) on top of the
/// ordered map.
pub struct LRUReplacer {
    entries: LinkedHashMap<FrameId, ()>,
}

impl LRUReplacer {
    pub fn new(pool_size: usize) -> Self {
        Self {
            entries: LinkedHashMap::with_capacity(pool_size),
        }
    }

    /// Remove and return the least recently unpinned frame
    pub fn victim(&mut self) -> Option<FrameId> {
        self.entries.pop_front().map(|(frame_id, _)| frame_id)
    }

    /// A pinned frame is no longer an eviction candidate
    pub fn pin(&mut self, frame_id: FrameId) {
        self.entries.remove(&frame_id);
    }

    /// Register a frame as most recently unpinned; no-op if already present
    pub fn unpin(&mut self, frame_id: FrameId) {
        if !self.entries.contains_key(&frame_id) {
            self.entries.insert(frame_id, ());
        }
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }
}

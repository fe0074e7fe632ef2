use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::common::types::{Page, PageId, Rid};
use crate::index::hash::error::HashTableError;
use crate::storage::page::{read_payload, write_payload};

/// Directory overlay: `2^global_depth` slots, each holding a bucket page
/// id and that bucket's local depth.
///
/// Invariant: two slots share a bucket page iff they agree on their low
/// `local_depth` bits, and every local depth is at most the global depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryPage {
    pub page_id: PageId,
    pub global_depth: u32,
    pub local_depths: Vec<u8>,
    pub bucket_page_ids: Vec<PageId>,
}

impl DirectoryPage {
    pub fn new(page_id: PageId, first_bucket: PageId) -> Self {
        Self {
            page_id,
            global_depth: 0,
            local_depths: vec![0],
            bucket_page_ids: vec![first_bucket],
        }
    }

    pub fn size(&self) -> usize {
        1 << self.global_depth
    }

    pub fn global_mask(&self) -> u32 {
        (1u32 << self.global_depth) - 1
    }

    pub fn slot_of(&self, hash: u32) -> usize {
        (hash & self.global_mask()) as usize
    }

    pub fn local_depth(&self, slot: usize) -> u32 {
        self.local_depths[slot] as u32
    }

    /// The slot that differs from `slot` only in the bit just above its
    /// local depth boundary
    pub fn split_image_of(&self, slot: usize) -> usize {
        let depth = self.local_depth(slot);
        debug_assert!(depth > 0);
        slot ^ (1 << (depth - 1))
    }

    /// Double the directory by duplicating every slot
    pub fn grow(&mut self) {
        let old_size = self.size();
        self.local_depths.extend_from_within(0..old_size);
        self.bucket_page_ids.extend_from_within(0..old_size);
        self.global_depth += 1;
    }

    /// The directory can halve while no bucket uses its full depth
    pub fn can_shrink(&self) -> bool {
        self.global_depth > 0
            && self
                .local_depths
                .iter()
                .all(|&depth| (depth as u32) < self.global_depth)
    }

    pub fn shrink(&mut self) {
        debug_assert!(self.can_shrink());
        self.global_depth -= 1;
        let new_size = self.size();
        self.local_depths.truncate(new_size);
        self.bucket_page_ids.truncate(new_size);
    }

    pub fn load(page: &Page) -> Result<Self, HashTableError> {
        let bytes = read_payload(page).ok_or_else(|| {
            HashTableError::Corrupted(format!("page {} holds no directory", page.page_id))
        })?;
        bincode::deserialize(bytes)
            .map_err(|e| HashTableError::Corrupted(format!("page {}: {}", page.page_id, e)))
    }

    pub fn save(&self, page: &mut Page) -> Result<(), HashTableError> {
        let bytes = bincode::serialize(self)
            .map_err(|e| HashTableError::Corrupted(format!("page {}: {}", self.page_id, e)))?;
        write_payload(page, &bytes)?;
        Ok(())
    }

    /// Assert the directory invariants; fatal on violation
    pub fn verify_integrity(&self) {
        assert_eq!(self.local_depths.len(), self.size());
        assert_eq!(self.bucket_page_ids.len(), self.size());
        for slot in 0..self.size() {
            let depth = self.local_depth(slot);
            assert!(
                depth <= self.global_depth,
                "slot {} local depth {} exceeds global {}",
                slot,
                depth,
                self.global_depth
            );
            // Slots agreeing on the low `depth` bits share the bucket.
            for other in 0..self.size() {
                let same_prefix = (slot ^ other) & ((1usize << depth) - 1) == 0;
                let same_bucket = self.bucket_page_ids[slot] == self.bucket_page_ids[other];
                if same_prefix && self.local_depths[other] as u32 == depth {
                    assert!(
                        same_bucket,
                        "slots {} and {} agree on {} bits but point at different buckets",
                        slot, other, depth
                    );
                }
            }
        }
    }
}

/// Bucket overlay: a fixed number of entry slots with occupancy
/// tracking. `occupied` stays set after a removal, `readable` does not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketPage<K> {
    occupied: Vec<bool>,
    readable: Vec<bool>,
    entries: Vec<Option<(K, Rid)>>,
}

impl<K> BucketPage<K>
where
    K: Clone + Eq + Serialize + DeserializeOwned,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            occupied: vec![false; capacity],
            readable: vec![false; capacity],
            entries: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn num_readable(&self) -> usize {
        self.readable.iter().filter(|&&r| r).count()
    }

    pub fn is_full(&self) -> bool {
        self.num_readable() == self.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.num_readable() == 0
    }

    /// All values stored under `key`
    pub fn get_all(&self, key: &K) -> Vec<Rid> {
        self.iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, rid)| rid)
            .collect()
    }

    pub fn contains(&self, key: &K, value: Rid) -> bool {
        self.iter().any(|(k, rid)| k == key && rid == value)
    }

    /// Insert into the first free slot; false when full
    pub fn insert(&mut self, key: K, value: Rid) -> bool {
        for slot in 0..self.capacity() {
            if !self.readable[slot] {
                self.occupied[slot] = true;
                self.readable[slot] = true;
                self.entries[slot] = Some((key, value));
                return true;
            }
        }
        false
    }

    /// Remove an exact `(key, value)` pair; false if absent
    pub fn remove(&mut self, key: &K, value: Rid) -> bool {
        for slot in 0..self.capacity() {
            if self.readable[slot] {
                if let Some((k, rid)) = &self.entries[slot] {
                    if k == key && *rid == value {
                        self.readable[slot] = false;
                        self.entries[slot] = None;
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Drain every readable entry, leaving the bucket empty
    pub fn drain_entries(&mut self) -> Vec<(K, Rid)> {
        let mut drained = Vec::with_capacity(self.num_readable());
        for slot in 0..self.capacity() {
            if self.readable[slot] {
                self.readable[slot] = false;
                if let Some(entry) = self.entries[slot].take() {
                    drained.push(entry);
                }
            }
        }
        drained
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, Rid)> {
        self.entries
            .iter()
            .zip(self.readable.iter())
            .filter(|(_, &readable)| readable)
            .filter_map(|(entry, _)| entry.as_ref().map(|(k, rid)| (k, *rid)))
    }

    pub fn load(page: &Page) -> Result<Self, HashTableError> {
        let bytes = read_payload(page).ok_or_else(|| {
            HashTableError::Corrupted(format!("page {} holds no bucket", page.page_id))
        })?;
        bincode::deserialize(bytes)
            .map_err(|e| HashTableError::Corrupted(format!("page {}: {}", page.page_id, e)))
    }

    pub fn save(&self, page: &mut Page) -> Result<(), HashTableError> {
        let bytes = bincode::serialize(self)
            .map_err(|e| HashTableError::Corrupted(e.to_string()))?;
        write_payload(page, &bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_grow_and_shrink() {
        let mut dir = DirectoryPage::new(1, 2);
        assert_eq!(dir.size(), 1);
        dir.grow();
        assert_eq!(dir.size(), 2);
        assert_eq!(dir.bucket_page_ids, vec![2, 2]);
        assert!(dir.can_shrink());
        dir.shrink();
        assert_eq!(dir.size(), 1);
        dir.verify_integrity();
    }

    #[test]
    fn test_split_image() {
        let mut dir = DirectoryPage::new(1, 2);
        dir.grow();
        dir.local_depths = vec![1, 1];
        dir.bucket_page_ids = vec![2, 3];
        assert_eq!(dir.split_image_of(0), 1);
        assert_eq!(dir.split_image_of(1), 0);
        dir.verify_integrity();
    }

    #[test]
    fn test_bucket_insert_remove() {
        let mut bucket: BucketPage<u32> = BucketPage::new(2);
        assert!(bucket.insert(1, Rid::new(0, 1)));
        assert!(bucket.insert(2, Rid::new(0, 2)));
        assert!(bucket.is_full());
        assert!(!bucket.insert(3, Rid::new(0, 3)));

        assert!(bucket.remove(&1, Rid::new(0, 1)));
        assert!(!bucket.remove(&1, Rid::new(0, 1)));
        assert_eq!(bucket.num_readable(), 1);
        // The freed slot is reusable even though it stays occupied.
        assert!(bucket.insert(3, Rid::new(0, 3)));
        assert_eq!(bucket.get_all(&3), vec![Rid::new(0, 3)]);
    }

    #[test]
    fn test_bucket_duplicate_pair_detection() {
        let mut bucket: BucketPage<u32> = BucketPage::new(4);
        bucket.insert(7, Rid::new(1, 1));
        assert!(bucket.contains(&7, Rid::new(1, 1)));
        assert!(!bucket.contains(&7, Rid::new(1, 2)));
        assert_eq!(bucket.get_all(&7).len(), 1);
    }

    #[test]
    fn test_bucket_round_trip() {
        let mut bucket: BucketPage<u64> = BucketPage::new(3);
        bucket.insert(10, Rid::new(2, 5));
        let mut page = Page::new(4);
        bucket.save(&mut page).unwrap();
        let reloaded: BucketPage<u64> = BucketPage::load(&page).unwrap();
        assert_eq!(reloaded.get_all(&10), vec![Rid::new(2, 5)]);
        assert_eq!(reloaded.capacity(), 3);
    }
}

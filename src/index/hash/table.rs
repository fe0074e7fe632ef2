use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use log::debug;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use xxhash_rust::xxh3::Xxh3;

use crate::common::types::{PageId, Rid};
use crate::index::hash::error::HashTableError;
use crate::index::hash::page::{BucketPage, DirectoryPage};
use crate::storage::buffer::BufferPoolManager;

/// Hash function injected into the table; tests substitute a
/// deterministic one to steer keys into chosen buckets.
pub trait KeyHasher<K>: Send + Sync {
    fn hash_key(&self, key: &K) -> u32;
}

/// Default hasher over xxh3
#[derive(Debug, Default, Clone, Copy)]
pub struct Xxh3KeyHasher;

impl<K: Hash> KeyHasher<K> for Xxh3KeyHasher {
    fn hash_key(&self, key: &K) -> u32 {
        let mut hasher = Xxh3::new();
        key.hash(&mut hasher);
        hasher.finish() as u32
    }
}

/// Disk-resident extendible hash table mapping keys to rids.
///
/// A directory page addresses `2^global_depth` slots, each pointing at a
/// bucket page with its own local depth. Inserting into a full bucket
/// splits it (doubling the directory when the bucket already uses every
/// directory bit); removing the last entry of a bucket merges it with
/// its split image and shrinks the directory when possible.
///
/// The table latch guards directory structure: lookups and single-bucket
/// updates take it shared, splits and merges take it exclusive. Bucket
/// bytes are additionally protected by their page latches.
pub struct ExtendibleHashTable<K, H = Xxh3KeyHasher> {
    buffer_pool: Arc<BufferPoolManager>,
    directory_page_id: PageId,
    table_latch: RwLock<()>,
    hasher: H,
    bucket_capacity: usize,
    max_depth: u32,
    _phantom: PhantomData<K>,
}

impl<K, H> ExtendibleHashTable<K, H>
where
    K: Clone + Eq + Serialize + DeserializeOwned + Send + Sync + 'static,
    H: KeyHasher<K>,
{
    /// Create a table with a fresh directory and one empty bucket
    pub fn new(
        buffer_pool: Arc<BufferPoolManager>,
        bucket_capacity: usize,
        max_depth: u32,
        hasher: H,
    ) -> Result<Self, HashTableError> {
        assert!(bucket_capacity > 0);
        assert!(max_depth > 0 && max_depth < 30);

        let (directory_page_id, directory_page) = buffer_pool.new_page()?;
        let (bucket_page_id, bucket_page) = buffer_pool.new_page()?;

        {
            let mut guard = bucket_page.write();
            BucketPage::<K>::new(bucket_capacity).save(&mut guard)?;
        }
        {
            let mut guard = directory_page.write();
            DirectoryPage::new(directory_page_id, bucket_page_id).save(&mut guard)?;
        }
        buffer_pool.unpin_page(bucket_page_id, true);
        buffer_pool.unpin_page(directory_page_id, true);

        Ok(Self {
            buffer_pool,
            directory_page_id,
            table_latch: RwLock::new(()),
            hasher,
            bucket_capacity,
            max_depth,
            _phantom: PhantomData,
        })
    }

    pub fn directory_page_id(&self) -> PageId {
        self.directory_page_id
    }

    /// Every value stored under `key`
    pub fn get_value(&self, key: &K) -> Result<Vec<Rid>, HashTableError> {
        let _table = self.table_latch.read();
        let directory = self.load_directory()?;
        let bucket_page_id = directory.bucket_page_ids[directory.slot_of(self.hasher.hash_key(key))];

        let page = self.buffer_pool.fetch_page(bucket_page_id)?;
        let bucket = {
            let guard = page.read();
            BucketPage::<K>::load(&guard)?
        };
        self.buffer_pool.unpin_page(bucket_page_id, false);
        Ok(bucket.get_all(key))
    }

    /// Insert a `(key, value)` pair.
    ///
    /// False if the exact pair is already present, or if the target
    /// bucket is full and cannot split further (its local depth has
    /// reached the directory's maximum depth).
    pub fn insert(&self, key: &K, value: Rid) -> Result<bool, HashTableError> {
        loop {
            {
                let _table = self.table_latch.read();
                let directory = self.load_directory()?;
                let bucket_page_id =
                    directory.bucket_page_ids[directory.slot_of(self.hasher.hash_key(key))];

                let page = self.buffer_pool.fetch_page(bucket_page_id)?;
                let mut guard = page.write();
                let mut bucket = BucketPage::<K>::load(&guard)?;

                if bucket.contains(key, value) {
                    drop(guard);
                    self.buffer_pool.unpin_page(bucket_page_id, false);
                    return Ok(false);
                }
                if !bucket.is_full() {
                    bucket.insert(key.clone(), value);
                    bucket.save(&mut guard)?;
                    drop(guard);
                    self.buffer_pool.unpin_page(bucket_page_id, true);
                    return Ok(true);
                }
                drop(guard);
                self.buffer_pool.unpin_page(bucket_page_id, false);
            }

            // Full bucket: split it under the exclusive table latch,
            // then retry from the top. One split may not be enough when
            // every key lands in the same half.
            let _table = self.table_latch.write();
            if !self.split_bucket(key)? {
                return Ok(false);
            }
        }
    }

    /// Remove an exact `(key, value)` pair, merging the bucket with its
    /// split image if the removal emptied it.
    pub fn remove(&self, key: &K, value: Rid) -> Result<bool, HashTableError> {
        let emptied = {
            let _table = self.table_latch.read();
            let directory = self.load_directory()?;
            let bucket_page_id =
                directory.bucket_page_ids[directory.slot_of(self.hasher.hash_key(key))];

            let page = self.buffer_pool.fetch_page(bucket_page_id)?;
            let mut guard = page.write();
            let mut bucket = BucketPage::<K>::load(&guard)?;

            let removed = bucket.remove(key, value);
            if removed {
                bucket.save(&mut guard)?;
            }
            drop(guard);
            self.buffer_pool.unpin_page(bucket_page_id, removed);

            if !removed {
                return Ok(false);
            }
            bucket.is_empty()
        };

        if emptied {
            let _table = self.table_latch.write();
            self.merge_bucket(key)?;
        }
        Ok(true)
    }

    /// Global depth of the directory (test and debugging aid)
    pub fn global_depth(&self) -> Result<u32, HashTableError> {
        let _table = self.table_latch.read();
        Ok(self.load_directory()?.global_depth)
    }

    /// Assert the directory invariants
    pub fn verify_integrity(&self) -> Result<(), HashTableError> {
        let _table = self.table_latch.read();
        self.load_directory()?.verify_integrity();
        Ok(())
    }

    fn load_directory(&self) -> Result<DirectoryPage, HashTableError> {
        let page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let directory = {
            let guard = page.read();
            DirectoryPage::load(&guard)?
        };
        self.buffer_pool.unpin_page(self.directory_page_id, false);
        Ok(directory)
    }

    fn save_directory(&self, directory: &DirectoryPage) -> Result<(), HashTableError> {
        let page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        {
            let mut guard = page.write();
            directory.save(&mut guard)?;
        }
        self.buffer_pool.unpin_page(self.directory_page_id, true);
        Ok(())
    }

    /// Split the bucket covering `key`. Requires the exclusive table
    /// latch. Returns false if the bucket already uses `max_depth` bits.
    fn split_bucket(&self, key: &K) -> Result<bool, HashTableError> {
        let mut directory = self.load_directory()?;
        let slot = directory.slot_of(self.hasher.hash_key(key));
        let bucket_page_id = directory.bucket_page_ids[slot];

        let page = self.buffer_pool.fetch_page(bucket_page_id)?;
        let mut guard = page.write();
        let mut bucket = BucketPage::<K>::load(&guard)?;

        if !bucket.is_full() {
            // Someone split between our latch drop and reacquire.
            drop(guard);
            self.buffer_pool.unpin_page(bucket_page_id, false);
            return Ok(true);
        }

        let local_depth = directory.local_depth(slot);
        if local_depth == self.max_depth {
            drop(guard);
            self.buffer_pool.unpin_page(bucket_page_id, false);
            debug!("bucket {} cannot split past depth {}", bucket_page_id, local_depth);
            return Ok(false);
        }
        if local_depth == directory.global_depth {
            directory.grow();
        }

        let (image_page_id, image_page) = self.buffer_pool.new_page()?;
        let mut image = BucketPage::<K>::new(self.bucket_capacity);
        let new_depth = local_depth + 1;
        debug!(
            "splitting bucket {} (depth {} -> {}), image bucket {}",
            bucket_page_id, local_depth, new_depth, image_page_id
        );

        // Redirect every slot that shares the old prefix: slots whose
        // next bit is set move to the image bucket, and both halves now
        // use one more bit.
        let old_prefix = slot & ((1usize << local_depth) - 1);
        for other in (old_prefix..directory.size()).step_by(1 << local_depth) {
            if (other >> local_depth) & 1 != (slot >> local_depth) & 1 {
                directory.bucket_page_ids[other] = image_page_id;
            }
            directory.local_depths[other] = new_depth as u8;
        }

        // Rehash the full bucket across the pair.
        let image_bit = 1u32 << local_depth;
        for (entry_key, rid) in bucket.drain_entries() {
            if self.hasher.hash_key(&entry_key) & image_bit != (slot as u32) & image_bit {
                image.insert(entry_key, rid);
            } else {
                bucket.insert(entry_key, rid);
            }
        }

        bucket.save(&mut guard)?;
        {
            let mut image_guard = image_page.write();
            image.save(&mut image_guard)?;
        }
        drop(guard);
        self.buffer_pool.unpin_page(bucket_page_id, true);
        self.buffer_pool.unpin_page(image_page_id, true);
        self.save_directory(&directory)?;
        Ok(true)
    }

    /// Merge the emptied bucket covering `key` into its split image.
    /// Requires the exclusive table latch. No-op unless the bucket is
    /// still empty and both halves use the same local depth.
    fn merge_bucket(&self, key: &K) -> Result<(), HashTableError> {
        let mut directory = self.load_directory()?;
        let slot = directory.slot_of(self.hasher.hash_key(key));
        let local_depth = directory.local_depth(slot);
        if local_depth == 0 {
            return Ok(());
        }

        let image_slot = directory.split_image_of(slot);
        if directory.local_depth(image_slot) != local_depth {
            return Ok(());
        }

        let bucket_page_id = directory.bucket_page_ids[slot];
        let image_page_id = directory.bucket_page_ids[image_slot];
        if bucket_page_id == image_page_id {
            return Ok(());
        }

        // Revalidate emptiness: the shared latch was dropped in between.
        let page = self.buffer_pool.fetch_page(bucket_page_id)?;
        let still_empty = {
            let guard = page.read();
            BucketPage::<K>::load(&guard)?.is_empty()
        };
        self.buffer_pool.unpin_page(bucket_page_id, false);
        if !still_empty {
            return Ok(());
        }

        debug!(
            "merging empty bucket {} into {} (depth {})",
            bucket_page_id, image_page_id, local_depth
        );
        for other in 0..directory.size() {
            if directory.bucket_page_ids[other] == bucket_page_id {
                directory.bucket_page_ids[other] = image_page_id;
            }
        }
        for other in 0..directory.size() {
            if directory.bucket_page_ids[other] == image_page_id {
                directory.local_depths[other] = (local_depth - 1) as u8;
            }
        }

        while directory.can_shrink() {
            directory.shrink();
        }
        self.save_directory(&directory)?;
        self.buffer_pool.delete_page(bucket_page_id)?;
        Ok(())
    }
}

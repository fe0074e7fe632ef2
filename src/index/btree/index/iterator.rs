use std::sync::Arc;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, PageReadGuard, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::index::base::BPlusTree;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::read_node;
use crate::storage::buffer::BufferPoolManager;

/// Forward iterator over the leaf chain.
///
/// Holds a read latch and a pin on the current leaf, trading them for
/// the next leaf's when it runs off the end; both are released when the
/// iterator is dropped or exhausted.
pub struct TreeIterator<K> {
    buffer_pool: Arc<BufferPoolManager>,
    current: Option<(PageReadGuard, BTreeNode<K>)>,
    index: usize,
}

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Iterate from the smallest key
    pub fn iter(&self) -> Result<TreeIterator<K>, BTreeError> {
        let current = self.find_leaf_read(None)?;
        Ok(TreeIterator {
            buffer_pool: self.buffer_pool.clone(),
            current,
            index: 0,
        })
    }

    /// Iterate from the first key greater than or equal to `key`
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<K>, BTreeError> {
        let current = self.find_leaf_read(Some(key))?;
        let index = current
            .as_ref()
            .map(|(_, node)| node.key_index(key))
            .unwrap_or(0);
        Ok(TreeIterator {
            buffer_pool: self.buffer_pool.clone(),
            current,
            index,
        })
    }
}

impl<K> TreeIterator<K> {
    fn release_current(&mut self) -> Option<PageId> {
        let (guard, node) = self.current.take()?;
        let page_id = node.page_id;
        drop(guard);
        self.buffer_pool.unpin_page(page_id, false);
        Some(node.next_leaf)
    }
}

impl<K> Iterator for TreeIterator<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Item = (K, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (_, node) = self.current.as_ref()?;
            if self.index < node.size() {
                let item = (node.keys[self.index].clone(), node.values[self.index]);
                self.index += 1;
                return Some(item);
            }

            let next_page_id = self.release_current()?;
            self.index = 0;
            if next_page_id == INVALID_PAGE_ID {
                return None;
            }
            match self.buffer_pool.fetch_page(next_page_id) {
                Ok(page) => {
                    let guard = page.read_arc();
                    match read_node::<K>(&guard) {
                        Ok(node) => self.current = Some((guard, node)),
                        Err(e) => {
                            debug!("iterator stopping at page {}: {}", next_page_id, e);
                            drop(guard);
                            self.buffer_pool.unpin_page(next_page_id, false);
                            return None;
                        }
                    }
                }
                Err(e) => {
                    debug!("iterator stopping at page {}: {}", next_page_id, e);
                    return None;
                }
            }
        }
    }
}

impl<K> Drop for TreeIterator<K> {
    fn drop(&mut self) {
        self.release_current();
    }
}

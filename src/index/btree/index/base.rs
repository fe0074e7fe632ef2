use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, PageWriteGuard, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::{read_node, write_node};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::HeaderPage;
use crate::transaction::Transaction;

/// A disk-resident B+Tree index mapping keys to rids.
///
/// All pages are reached through the buffer pool; descents follow the
/// latch-crabbing discipline in `operations`. The mutex around the root
/// page id is the root latch: every descent takes it, and it is only
/// released once the first node on the path is proven safe (immediately,
/// for reads). The root id is mirrored into the header page record under
/// the index name whenever it changes.
pub struct BPlusTree<K> {
    pub(crate) index_name: String,
    pub(crate) buffer_pool: Arc<BufferPoolManager>,
    pub(crate) root: Arc<Mutex<PageId>>,
    pub(crate) leaf_max_size: usize,
    pub(crate) internal_max_size: usize,
    pub(crate) _phantom: PhantomData<K>,
}

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Open the index named `index_name`, picking up an existing root
    /// from the header page if one was recorded.
    ///
    /// Leaf and internal fanout must be at least 3 so a split never
    /// produces an under-full sibling.
    pub fn new(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        assert!(leaf_max_size >= 3 && internal_max_size >= 3);
        let index_name = index_name.into();

        let header_page = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let root_page_id = {
            let guard = header_page.read();
            HeaderPage::load(&guard)?
                .get_record(&index_name)
                .unwrap_or(INVALID_PAGE_ID)
        };
        buffer_pool.unpin_page(HEADER_PAGE_ID, false);

        Ok(Self {
            index_name,
            buffer_pool,
            root: Arc::new(Mutex::new(root_page_id)),
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root.lock() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root.lock()
    }

    /// Rewrite this index's root record in the header page.
    /// Must be called with the root latch held.
    pub(crate) fn update_root_record(&self, root_page_id: PageId) -> Result<(), BTreeError> {
        let header_page = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut guard = header_page.write();
            let mut header = HeaderPage::load(&guard)?;
            if !header.update_record(&self.index_name, root_page_id) {
                header.insert_record(&self.index_name, root_page_id);
            }
            header.save(&mut guard)?;
        }
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true);
        Ok(())
    }

    /// Drop a held page write latch and release its pin
    pub(crate) fn release_page(&self, guard: PageWriteGuard, is_dirty: bool) {
        let page_id = guard.page_id;
        drop(guard);
        self.buffer_pool.unpin_page(page_id, is_dirty);
    }

    /// Release every ancestor latch parked on the transaction; pages in
    /// `dirtied` are unpinned dirty.
    pub(crate) fn release_ancestors_with(&self, txn: &Transaction, dirtied: &HashSet<PageId>) {
        for guard in txn.drain_page_latches() {
            let page_id = guard.page_id;
            drop(guard);
            self.buffer_pool.unpin_page(page_id, dirtied.contains(&page_id));
        }
    }

    /// Release untouched ancestor latches
    pub(crate) fn release_ancestors(&self, txn: &Transaction) {
        self.release_ancestors_with(txn, &HashSet::new());
    }

    /// Rewrite a child's parent back-pointer
    pub(crate) fn reparent(&self, child: PageId, new_parent: PageId) -> Result<(), BTreeError> {
        let page = self.buffer_pool.fetch_page(child)?;
        {
            let mut guard = page.write_arc();
            let mut node = read_node::<K>(&guard)?;
            node.parent_page_id = new_parent;
            write_node(&mut guard, &node)?;
        }
        self.buffer_pool.unpin_page(child, true);
        Ok(())
    }

    /// Walk the whole tree checking the structural invariants: strictly
    /// sorted keys, size bounds on non-root nodes, parent back-pointers,
    /// and a leaf chain that matches in-order traversal. Intended for
    /// tests on a quiescent tree.
    pub fn verify_integrity(&self) -> Result<(), BTreeError> {
        let root_page_id = *self.root.lock();
        if root_page_id == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut leaves_in_order = Vec::new();
        self.verify_node(root_page_id, INVALID_PAGE_ID, &mut leaves_in_order)?;

        // The next_leaf chain from the leftmost leaf must visit exactly
        // the leaves found by in-order traversal.
        let mut chained = Vec::new();
        let mut current = *leaves_in_order
            .first()
            .ok_or_else(|| BTreeError::Corrupted("tree has no leaves".into()))?;
        while current != INVALID_PAGE_ID {
            chained.push(current);
            let page = self.buffer_pool.fetch_page(current)?;
            let node = {
                let guard = page.read();
                read_node::<K>(&guard)?
            };
            self.buffer_pool.unpin_page(current, false);
            current = node.next_leaf;
        }
        if chained != leaves_in_order {
            return Err(BTreeError::Corrupted(
                "leaf chain does not match in-order traversal".into(),
            ));
        }
        Ok(())
    }

    fn verify_node(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        leaves: &mut Vec<PageId>,
    ) -> Result<BTreeNode<K>, BTreeError> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let node = {
            let guard = page.read();
            read_node::<K>(&guard)?
        };
        self.buffer_pool.unpin_page(page_id, false);

        if node.parent_page_id != expected_parent {
            return Err(BTreeError::Corrupted(format!(
                "page {} has parent {} but is referenced by {}",
                page_id, node.parent_page_id, expected_parent
            )));
        }
        if !node.is_root() && node.size() < node.min_size() {
            return Err(BTreeError::Corrupted(format!(
                "page {} under-full: {} < {}",
                page_id,
                node.size(),
                node.min_size()
            )));
        }
        if node.size() > node.max_size {
            return Err(BTreeError::Corrupted(format!(
                "page {} over-full: {} > {}",
                page_id,
                node.size(),
                node.max_size
            )));
        }

        // Keys must be strictly increasing; internal nodes skip the
        // placeholder at slot 0.
        let first_checked = if node.is_leaf() { 0 } else { 1 };
        for window in node.keys[first_checked..].windows(2) {
            if window[0] >= window[1] {
                return Err(BTreeError::Corrupted(format!(
                    "page {} keys out of order",
                    page_id
                )));
            }
        }

        if node.is_leaf() {
            leaves.push(page_id);
        } else {
            for &child in &node.children {
                self.verify_node(child, page_id, leaves)?;
            }
        }
        Ok(node)
    }
}

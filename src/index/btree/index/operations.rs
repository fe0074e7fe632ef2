use std::collections::HashSet;
use std::path::Path;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::RawMutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, PageReadGuard, PageWriteGuard, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::index::base::BPlusTree;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::{read_node, write_node};
use crate::transaction::Transaction;

/// Owned root latch, held across a descent until the path proves safe
pub(crate) type RootGuard = ArcMutexGuard<RawMutex, PageId>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOp {
    Insert,
    Delete,
}

/// Outcome of a write descent
pub(crate) enum WriteTarget {
    /// The tree had no root; the caller still holds the root latch.
    EmptyTree(RootGuard),
    /// Write latch on the target leaf, plus the root latch if no safe
    /// node was met on the way down. Unsafe ancestors stay latched on
    /// the transaction.
    Leaf {
        guard: PageWriteGuard,
        root_guard: Option<RootGuard>,
    },
}

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Point lookup
    pub fn get_value(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let Some((guard, node)) = self.find_leaf_read(Some(key))? else {
            return Ok(None);
        };
        let result = node.lookup(key);
        let page_id = guard.page_id;
        drop(guard);
        self.buffer_pool.unpin_page(page_id, false);
        Ok(result)
    }

    /// Insert a key; false if the key already exists (the tree is left
    /// untouched).
    pub fn insert(&self, key: K, value: Rid, txn: &Transaction) -> Result<bool, BTreeError> {
        match self.find_leaf_write(&key, WriteOp::Insert, txn)? {
            WriteTarget::EmptyTree(mut root_guard) => {
                self.start_new_tree(&mut root_guard, key, value)?;
                Ok(true)
            }
            WriteTarget::Leaf { guard, root_guard } => {
                self.insert_into_leaf(guard, root_guard, key, value, txn)
            }
        }
    }

    /// Read whitespace-separated integer keys from a file and insert
    /// them one by one; the rid is derived from the key. Returns how
    /// many keys were newly inserted.
    pub fn insert_from_file(
        &self,
        path: impl AsRef<Path>,
        txn: &Transaction,
    ) -> Result<usize, BTreeError>
    where
        K: std::str::FromStr,
    {
        let contents = std::fs::read_to_string(path)?;
        let mut inserted = 0;
        for token in contents.split_whitespace() {
            let (Ok(key), Ok(packed)) = (token.parse::<K>(), token.parse::<i64>()) else {
                continue;
            };
            if self.insert(key, Rid::from_packed(packed), txn)? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Counterpart of `insert_from_file`
    pub fn remove_from_file(
        &self,
        path: impl AsRef<Path>,
        txn: &Transaction,
    ) -> Result<(), BTreeError>
    where
        K: std::str::FromStr,
    {
        let contents = std::fs::read_to_string(path)?;
        for token in contents.split_whitespace() {
            let Ok(key) = token.parse::<K>() else {
                continue;
            };
            self.remove(&key, txn)?;
        }
        Ok(())
    }

    // ---- descent ----

    /// Read-crab down to a leaf: latch the child, then release the
    /// parent. `None` key descends along the leftmost edge.
    pub(crate) fn find_leaf_read(
        &self,
        key: Option<&K>,
    ) -> Result<Option<(PageReadGuard, BTreeNode<K>)>, BTreeError> {
        let root_latch = self.root.lock();
        let root_page_id = *root_latch;
        if root_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let page = self.buffer_pool.fetch_page(root_page_id)?;
        let mut guard = page.read_arc();
        drop(root_latch);

        let mut node = read_node::<K>(&guard)?;
        while !node.is_leaf() {
            let child_page_id = match key {
                Some(key) => node.child_lookup(key),
                None => node.child_at(0),
            };
            let child_page = self.buffer_pool.fetch_page(child_page_id)?;
            let child_guard = child_page.read_arc();

            let parent_page_id = guard.page_id;
            guard = child_guard;
            self.buffer_pool.unpin_page(parent_page_id, false);
            node = read_node::<K>(&guard)?;
        }
        Ok(Some((guard, node)))
    }

    /// Write-crab down to the leaf covering `key`. Ancestor latches are
    /// parked on the transaction and released wholesale as soon as a
    /// child is safe for the pending operation.
    pub(crate) fn find_leaf_write(
        &self,
        key: &K,
        op: WriteOp,
        txn: &Transaction,
    ) -> Result<WriteTarget, BTreeError> {
        let root_latch = self.root.lock_arc();
        let root_page_id = *root_latch;
        if root_page_id == INVALID_PAGE_ID {
            return Ok(WriteTarget::EmptyTree(root_latch));
        }
        let mut root_guard = Some(root_latch);

        let page = self.buffer_pool.fetch_page(root_page_id)?;
        let mut guard = page.write_arc();
        let mut node = read_node::<K>(&guard)?;
        if Self::is_safe(&node, op) {
            root_guard = None;
        }

        while !node.is_leaf() {
            let child_page_id = node.child_lookup(key);
            let child_page = self.buffer_pool.fetch_page(child_page_id)?;
            let child_guard = child_page.write_arc();
            txn.add_page_latch(guard);

            let child_node = read_node::<K>(&child_guard)?;
            if Self::is_safe(&child_node, op) {
                root_guard = None;
                self.release_ancestors(txn);
            }
            guard = child_guard;
            node = child_node;
        }
        Ok(WriteTarget::Leaf { guard, root_guard })
    }

    /// A node is safe when the pending operation on a descendant cannot
    /// propagate through it: an insert cannot fill it, a delete cannot
    /// drain it below its minimum.
    pub(crate) fn is_safe(node: &BTreeNode<K>, op: WriteOp) -> bool {
        if node.is_root() {
            return match op {
                WriteOp::Insert => node.size() < node.max_size - 1,
                WriteOp::Delete => node.size() > 2,
            };
        }
        match op {
            WriteOp::Insert => node.size() < node.max_size - 1,
            WriteOp::Delete => node.size() > node.min_size(),
        }
    }

    // ---- insertion ----

    fn start_new_tree(
        &self,
        root_guard: &mut RootGuard,
        key: K,
        value: Rid,
    ) -> Result<(), BTreeError> {
        let (page_id, page) = self.buffer_pool.new_page()?;
        let mut node = BTreeNode::new_leaf(page_id, INVALID_PAGE_ID, self.leaf_max_size);
        node.insert_into_leaf(key, value);
        {
            let mut guard = page.write();
            write_node(&mut guard, &node)?;
        }
        **root_guard = page_id;
        self.update_root_record(page_id)?;
        self.buffer_pool.unpin_page(page_id, true);
        Ok(())
    }

    fn insert_into_leaf(
        &self,
        mut guard: PageWriteGuard,
        root_guard: Option<RootGuard>,
        key: K,
        value: Rid,
        txn: &Transaction,
    ) -> Result<bool, BTreeError> {
        let mut root_guard = root_guard;
        let mut leaf = read_node::<K>(&guard)?;
        let old_size = leaf.size();
        let new_size = leaf.insert_into_leaf(key, value);

        if new_size == old_size {
            drop(root_guard);
            self.release_ancestors(txn);
            self.release_page(guard, false);
            return Ok(false);
        }

        if new_size < leaf.max_size {
            write_node(&mut guard, &leaf)?;
            drop(root_guard);
            self.release_ancestors(txn);
            self.release_page(guard, true);
            return Ok(true);
        }

        // The leaf is full: split it and push the separator upward. All
        // latches are kept until every touched page is written back, so
        // no concurrent descent can observe a half-linked sibling.
        let mut dirtied = HashSet::new();
        let (mut sibling, sibling_page) = self.split_node(&mut leaf)?;
        let separator = sibling.keys[0].clone();
        self.insert_into_parent(&mut leaf, separator, &mut sibling, txn, &mut root_guard, &mut dirtied)?;

        write_node(&mut guard, &leaf)?;
        {
            let mut sibling_guard = sibling_page.write();
            write_node(&mut sibling_guard, &sibling)?;
        }
        self.buffer_pool.unpin_page(sibling.page_id, true);

        drop(root_guard);
        self.release_ancestors_with(txn, &dirtied);
        self.release_page(guard, true);
        Ok(true)
    }

    /// Move the upper half of an overflowing node into a freshly
    /// allocated sibling. A leaf arrives holding `max_size` entries, an
    /// internal node `max_size + 1`; the split point leaves both halves
    /// at or above their minimum. The sibling is returned pinned but
    /// unwritten; the caller persists it once its parent pointer is
    /// final.
    fn split_node(
        &self,
        node: &mut BTreeNode<K>,
    ) -> Result<(BTreeNode<K>, crate::common::types::PagePtr), BTreeError> {
        let (new_page_id, new_page) = self.buffer_pool.new_page()?;
        let split_at = if node.is_leaf() {
            node.max_size / 2
        } else {
            (node.max_size + 1) / 2
        };

        let sibling = if node.is_leaf() {
            let mut sibling =
                BTreeNode::new_leaf(new_page_id, node.parent_page_id, self.leaf_max_size);
            sibling.keys = node.keys.split_off(split_at);
            sibling.values = node.values.split_off(split_at);
            sibling.next_leaf = node.next_leaf;
            node.next_leaf = new_page_id;
            sibling
        } else {
            let mut sibling =
                BTreeNode::new_internal(new_page_id, node.parent_page_id, self.internal_max_size);
            sibling.keys = node.keys.split_off(split_at);
            sibling.children = node.children.split_off(split_at);
            for index in 0..sibling.children.len() {
                self.reparent(sibling.children[index], new_page_id)?;
            }
            sibling
        };
        Ok((sibling, new_page))
    }

    /// Register a freshly split-off sibling with its parent, splitting
    /// recursively if the parent overflows in turn.
    fn insert_into_parent(
        &self,
        old_node: &mut BTreeNode<K>,
        key: K,
        new_node: &mut BTreeNode<K>,
        txn: &Transaction,
        root_guard: &mut Option<RootGuard>,
        dirtied: &mut HashSet<PageId>,
    ) -> Result<(), BTreeError> {
        if old_node.is_root() {
            // The root itself split: grow the tree by one level.
            let (root_page_id, root_page) = self.buffer_pool.new_page()?;
            let mut root_node =
                BTreeNode::new_internal(root_page_id, INVALID_PAGE_ID, self.internal_max_size);
            root_node.populate_new_root(old_node.page_id, key, new_node.page_id);
            old_node.parent_page_id = root_page_id;
            new_node.parent_page_id = root_page_id;
            {
                let mut guard = root_page.write();
                write_node(&mut guard, &root_node)?;
            }
            self.buffer_pool.unpin_page(root_page_id, true);

            let root_latch = root_guard
                .as_mut()
                .expect("root latch must be held across a root change");
            **root_latch = root_page_id;
            self.update_root_record(root_page_id)?;
            return Ok(());
        }

        let mut parent_guard = txn
            .pop_page_latch()
            .expect("parent latch must be held for an unsafe child");
        let mut parent = read_node::<K>(&parent_guard)?;
        parent.insert_node_after(old_node.page_id, key, new_node.page_id);

        if parent.size() <= parent.max_size {
            write_node(&mut parent_guard, &parent)?;
            dirtied.insert(parent.page_id);
            txn.add_page_latch(parent_guard);
            return Ok(());
        }

        let (mut parent_sibling, parent_sibling_page) = self.split_node(&mut parent)?;
        let separator = parent_sibling.keys[0].clone();
        self.insert_into_parent(&mut parent, separator, &mut parent_sibling, txn, root_guard, dirtied)?;

        write_node(&mut parent_guard, &parent)?;
        {
            let mut sibling_guard = parent_sibling_page.write();
            write_node(&mut sibling_guard, &parent_sibling)?;
        }
        self.buffer_pool.unpin_page(parent_sibling.page_id, true);
        dirtied.insert(parent.page_id);
        txn.add_page_latch(parent_guard);
        Ok(())
    }
}

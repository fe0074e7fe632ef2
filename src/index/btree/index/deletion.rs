use std::collections::HashSet;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, PageWriteGuard, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::index::base::BPlusTree;
use crate::index::btree::index::operations::{RootGuard, WriteOp, WriteTarget};
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::{read_node, write_node};
use crate::transaction::Transaction;

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Delete a key if present. Underflow is repaired by borrowing from
    /// or merging with a sibling, propagating up to the root; emptied
    /// pages are handed back to the buffer pool once every latch is
    /// released.
    pub fn remove(&self, key: &K, txn: &Transaction) -> Result<(), BTreeError> {
        match self.find_leaf_write(key, WriteOp::Delete, txn)? {
            WriteTarget::EmptyTree(root_guard) => {
                drop(root_guard);
                Ok(())
            }
            WriteTarget::Leaf { mut guard, root_guard } => {
                let mut root_guard = root_guard;
                let mut leaf = read_node::<K>(&guard)?;
                let old_size = leaf.size();
                if leaf.remove_from_leaf(key) == old_size {
                    drop(root_guard);
                    self.release_ancestors(txn);
                    self.release_page(guard, false);
                    return Ok(());
                }

                let mut dirtied = HashSet::new();
                self.coalesce_or_redistribute(&mut leaf, &mut guard, txn, &mut root_guard, &mut dirtied)?;

                drop(root_guard);
                self.release_ancestors_with(txn, &dirtied);
                self.release_page(guard, true);

                for page_id in txn.take_deleted_pages() {
                    self.buffer_pool.delete_page(page_id)?;
                }
                Ok(())
            }
        }
    }

    /// Repair an underflowing node. On return the node's bytes are
    /// written; the caller still owns (and releases) its latch and pin.
    fn coalesce_or_redistribute(
        &self,
        node: &mut BTreeNode<K>,
        node_guard: &mut PageWriteGuard,
        txn: &Transaction,
        root_guard: &mut Option<RootGuard>,
        dirtied: &mut HashSet<PageId>,
    ) -> Result<(), BTreeError> {
        if node.is_root() {
            return self.adjust_root(node, node_guard, txn, root_guard);
        }
        if node.size() >= node.min_size() {
            write_node(node_guard, node)?;
            return Ok(());
        }

        let mut parent_guard = txn
            .pop_page_latch()
            .expect("parent latch must be held for an unsafe child");
        let mut parent = read_node::<K>(&parent_guard)?;
        let index = parent
            .child_index_of(node.page_id)
            .expect("underflowing node must be registered in its parent");

        // Prefer the left sibling; the leftmost child borrows from or
        // merges with its right neighbor instead.
        let sibling_page_id = parent.child_at(if index == 0 { 1 } else { index - 1 });
        let sibling_page = self.buffer_pool.fetch_page(sibling_page_id)?;
        let mut sibling_guard = sibling_page.write_arc();
        let mut sibling = read_node::<K>(&sibling_guard)?;

        // Merge only when both nodes fit in one: a leaf holds up to
        // max_size - 1 entries, an internal node up to max_size
        // children. Past that, borrowing one entry leaves the donor at
        // or above its minimum.
        let merge_capacity = if node.is_leaf() {
            node.max_size - 1
        } else {
            node.max_size
        };
        if node.size() + sibling.size() > merge_capacity {
            self.redistribute(&mut sibling, node, &mut parent, index)?;
            write_node(node_guard, node)?;
            write_node(&mut sibling_guard, &sibling)?;
            write_node(&mut parent_guard, &parent)?;
            self.release_page(sibling_guard, true);
            dirtied.insert(parent.page_id);
            txn.add_page_latch(parent_guard);
            return Ok(());
        }

        // Merge right into left and drop the separator from the parent.
        if index == 0 {
            let middle_key = parent.key_at(1).clone();
            self.merge_into_left(node, &mut sibling, middle_key)?;
            parent.remove_at(1);
            txn.add_deleted_page(sibling.page_id);
        } else {
            let middle_key = parent.key_at(index).clone();
            self.merge_into_left(&mut sibling, node, middle_key)?;
            parent.remove_at(index);
            txn.add_deleted_page(node.page_id);
        }
        write_node(node_guard, node)?;
        write_node(&mut sibling_guard, &sibling)?;
        self.release_page(sibling_guard, true);

        self.coalesce_or_redistribute(&mut parent, &mut parent_guard, txn, root_guard, dirtied)?;
        dirtied.insert(parent.page_id);
        txn.add_page_latch(parent_guard);
        Ok(())
    }

    /// Move one entry across the boundary between `node` and its
    /// sibling, rewriting the separator in the parent.
    fn redistribute(
        &self,
        sibling: &mut BTreeNode<K>,
        node: &mut BTreeNode<K>,
        parent: &mut BTreeNode<K>,
        index: usize,
    ) -> Result<(), BTreeError> {
        if node.is_leaf() {
            if index == 0 {
                // Borrow the right sibling's first pair.
                let key = sibling.keys.remove(0);
                let value = sibling.values.remove(0);
                node.keys.push(key);
                node.values.push(value);
                parent.set_key_at(1, sibling.keys[0].clone());
            } else {
                // Borrow the left sibling's last pair.
                let key = sibling.keys.pop().expect("sibling above minimum");
                let value = sibling.values.pop().expect("sibling above minimum");
                node.keys.insert(0, key);
                node.values.insert(0, value);
                parent.set_key_at(index, node.keys[0].clone());
            }
        } else if index == 0 {
            // Rotate the right sibling's first child through the parent.
            let moved_child = sibling.children.remove(0);
            let lifted_key = sibling.keys[1].clone();
            sibling.keys.remove(0);
            let separator = parent.key_at(1).clone();
            node.keys.push(separator);
            node.children.push(moved_child);
            parent.set_key_at(1, lifted_key);
            self.reparent(moved_child, node.page_id)?;
        } else {
            // Rotate the left sibling's last child through the parent.
            let moved_child = sibling.children.pop().expect("sibling above minimum");
            let lifted_key = sibling.keys.pop().expect("sibling above minimum");
            let separator = parent.key_at(index).clone();
            node.children.insert(0, moved_child);
            node.keys.insert(0, lifted_key.clone());
            node.set_key_at(1, separator);
            parent.set_key_at(index, lifted_key);
            self.reparent(moved_child, node.page_id)?;
        }
        Ok(())
    }

    /// Fold `right` into `left`. `middle_key` is the parent separator
    /// between the two; for internal nodes it becomes the key of the
    /// right node's first child.
    fn merge_into_left(
        &self,
        left: &mut BTreeNode<K>,
        right: &mut BTreeNode<K>,
        middle_key: K,
    ) -> Result<(), BTreeError> {
        if left.is_leaf() {
            left.keys.append(&mut right.keys);
            left.values.append(&mut right.values);
            left.next_leaf = right.next_leaf;
        } else {
            let mut right_keys = std::mem::take(&mut right.keys);
            let right_children = std::mem::take(&mut right.children);
            right_keys[0] = middle_key;
            left.keys.append(&mut right_keys);
            for &child in &right_children {
                self.reparent(child, left.page_id)?;
            }
            left.children.extend(right_children);
        }
        Ok(())
    }

    /// Shrink at the root: an internal root left with a single child is
    /// replaced by that child, and an emptied leaf root ends the tree.
    fn adjust_root(
        &self,
        root_node: &mut BTreeNode<K>,
        root_page_guard: &mut PageWriteGuard,
        txn: &Transaction,
        root_guard: &mut Option<RootGuard>,
    ) -> Result<(), BTreeError> {
        if !root_node.is_leaf() && root_node.size() == 1 {
            let child_page_id = root_node.child_at(0);
            let root_latch = root_guard
                .as_mut()
                .expect("root latch must be held across a root change");
            **root_latch = child_page_id;
            self.update_root_record(child_page_id)?;
            self.reparent(child_page_id, INVALID_PAGE_ID)?;
            txn.add_deleted_page(root_node.page_id);
            return Ok(());
        }
        if root_node.is_leaf() && root_node.size() == 0 {
            let root_latch = root_guard
                .as_mut()
                .expect("root latch must be held across a root change");
            **root_latch = INVALID_PAGE_ID;
            self.update_root_record(INVALID_PAGE_ID)?;
            txn.add_deleted_page(root_node.page_id);
            return Ok(());
        }
        write_node(root_page_guard, root_node)?;
        Ok(())
    }
}

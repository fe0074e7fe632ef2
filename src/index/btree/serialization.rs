use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::Page;
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::BTreeNode;
use crate::storage::page::{read_payload, write_payload};

/// Decode the node overlay stored in a page
pub fn read_node<K>(page: &Page) -> Result<BTreeNode<K>, BTreeError>
where
    K: DeserializeOwned,
{
    let bytes = read_payload(page).ok_or_else(|| {
        BTreeError::Corrupted(format!("page {} holds no node overlay", page.page_id))
    })?;
    bincode::deserialize(bytes)
        .map_err(|e| BTreeError::Corrupted(format!("page {}: {}", page.page_id, e)))
}

/// Encode a node into its page
pub fn write_node<K>(page: &mut Page, node: &BTreeNode<K>) -> Result<(), BTreeError>
where
    K: Serialize,
{
    debug_assert_eq!(page.page_id, node.page_id);
    let bytes = bincode::serialize(node)
        .map_err(|e| BTreeError::Corrupted(format!("page {}: {}", node.page_id, e)))?;
    write_payload(page, &bytes)?;
    Ok(())
}

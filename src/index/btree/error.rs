use thiserror::Error;

use crate::storage::buffer::BufferPoolError;
use crate::storage::page::PageError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("page error: {0}")]
    Page(#[from] PageError),

    #[error("tree structure corrupted: {0}")]
    Corrupted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

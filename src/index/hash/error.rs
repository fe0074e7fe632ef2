use thiserror::Error;

use crate::storage::buffer::BufferPoolError;
use crate::storage::page::PageError;

#[derive(Error, Debug)]
pub enum HashTableError {
    #[error("buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("page error: {0}")]
    Page(#[from] PageError),

    #[error("hash table corrupted: {0}")]
    Corrupted(String),
}

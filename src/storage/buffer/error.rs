use thiserror::Error;

use crate::common::types::PageId;
use crate::storage::disk::DiskManagerError;
use crate::storage::page::PageError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("all {0} frames are pinned")]
    PoolExhausted(usize),

    #[error("page {0} is not resident")]
    PageNotFound(PageId),

    #[error("invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("disk manager error: {0}")]
    Disk(#[from] DiskManagerError),

    #[error("page error: {0}")]
    Page(#[from] PageError),
}

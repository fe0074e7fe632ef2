use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use tarndb::storage::buffer::{BufferPoolManager, ParallelBufferPoolManager};
use tarndb::storage::disk::DiskManager;

// Initialize logging once per test binary; verbosity is driven by
// RUST_LOG as usual
#[allow(dead_code)]
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .is_test(true)
        .try_init();
}

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<NamedTempFile> {
    Ok(NamedTempFile::new()?)
}

// Create a buffer pool manager backed by a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    init_logging();
    let file = create_temp_db_file()?;
    let disk_manager = Arc::new(DiskManager::new(file.path())?);
    Ok((Arc::new(BufferPoolManager::new(pool_size, disk_manager)), file))
}

// Create a parallel buffer pool backed by a temporary database
#[allow(dead_code)]
pub fn create_test_parallel_pool(
    num_instances: usize,
    pool_size: usize,
) -> Result<(Arc<ParallelBufferPoolManager>, NamedTempFile)> {
    init_logging();
    let file = create_temp_db_file()?;
    let disk_manager = Arc::new(DiskManager::new(file.path())?);
    Ok((
        Arc::new(ParallelBufferPoolManager::new(num_instances, pool_size, disk_manager)),
        file,
    ))
}

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use log::debug;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager is responsible for the actual disk I/O: fixed-size random
/// page reads and writes against a single database file.
pub struct DiskManager {
    db_file: Mutex<File>,
}

impl DiskManager {
    /// Open (or create) the database file at the given path
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        Ok(Self {
            db_file: Mutex::new(file),
        })
    }

    /// Read a page from disk into the given buffer.
    ///
    /// Reading a page that was never written yields a zeroed buffer, so
    /// callers can fetch freshly allocated pages without special casing.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = Self::page_offset(page_id);
        let mut file = self.db_file.lock();
        let file_size = file.metadata()?.len();

        if offset + PAGE_SIZE as u64 > file_size {
            buf.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Write a page to disk, extending the file if needed
    pub fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = Self::page_offset(page_id);
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        file.flush()?;
        Ok(())
    }

    /// Return a page to the allocator.
    ///
    /// The file is never shrunk; the page simply becomes dead space until
    /// the id is handed out again by a buffer pool instance.
    pub fn deallocate_page(&self, page_id: PageId) {
        debug!("deallocate page {}", page_id);
    }

    /// Number of pages the file currently covers
    pub fn num_pages(&self) -> Result<usize, DiskManagerError> {
        let file = self.db_file.lock();
        Ok(file.metadata()?.len() as usize / PAGE_SIZE)
    }

    fn page_offset(page_id: PageId) -> u64 {
        page_id as u64 * PAGE_SIZE as u64
    }
}

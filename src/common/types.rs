use std::sync::Arc;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};
use serde::{Deserialize, Serialize};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type. Negative ids are never allocated.
pub type PageId = i32;

/// Sentinel for "no page".
pub const INVALID_PAGE_ID: PageId = -1;

/// Page id 0 is reserved for the header page.
pub const HEADER_PAGE_ID: PageId = 0;

/// Buffer pool frame ID type, a dense index into the frame array
pub type FrameId = usize;

/// Transaction ID type. Lower value means the transaction is older.
pub type TxnId = u32;

/// Record identifier: the page a row lives on plus its slot within the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    /// Build a Rid from a packed 64-bit value (high half page id, low half slot).
    pub fn from_packed(packed: i64) -> Self {
        Self {
            page_id: (packed >> 32) as PageId,
            slot: packed as u32,
        }
    }
}

/// Page structure: a fixed-size byte buffer plus the id of the resident page.
///
/// The surrounding RwLock is the page latch; pin counts and the dirty bit
/// live in the owning buffer pool instance.
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
        }
    }

    pub fn reset(&mut self) {
        self.data.fill(0);
        self.page_id = INVALID_PAGE_ID;
    }
}

/// Smart pointer to a latched page
pub type PagePtr = Arc<RwLock<Page>>;

/// Owned read latch on a page, independent of the borrow that produced it
pub type PageReadGuard = ArcRwLockReadGuard<RawRwLock, Page>;

/// Owned write latch on a page. Write descents park these on the
/// transaction so ancestor latches can be released in one shot.
pub type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, Page>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rid_packing() {
        let rid = Rid::from_packed((7i64 << 32) | 42);
        assert_eq!(rid.page_id, 7);
        assert_eq!(rid.slot, 42);
        assert_eq!(rid, Rid::new(7, 42));
    }

    #[test]
    fn test_page_reset() {
        let mut page = Page::new(3);
        page.data[100] = 0xAB;
        page.reset();
        assert_eq!(page.page_id, INVALID_PAGE_ID);
        assert!(page.data.iter().all(|&b| b == 0));
    }
}

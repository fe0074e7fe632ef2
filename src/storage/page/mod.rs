pub mod error;
pub mod header;

pub use error::PageError;
pub use header::HeaderPage;

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PAGE_SIZE};

// Every typed overlay is stored as a length-prefixed bincode payload:
// - payload length: u32 (4 bytes, little endian)
// - payload bytes
const PAYLOAD_LEN_SIZE: usize = 4;

/// Write a serialized overlay into a page, zeroing the rest
pub fn write_payload(page: &mut Page, payload: &[u8]) -> Result<(), PageError> {
    if PAYLOAD_LEN_SIZE + payload.len() > PAGE_SIZE {
        return Err(PageError::Overflow(payload.len()));
    }

    page.data.fill(0);
    LittleEndian::write_u32(&mut page.data[0..PAYLOAD_LEN_SIZE], payload.len() as u32);
    page.data[PAYLOAD_LEN_SIZE..PAYLOAD_LEN_SIZE + payload.len()].copy_from_slice(payload);
    Ok(())
}

/// Read the overlay payload back out of a page.
///
/// A zeroed page (length prefix 0) has no payload.
pub fn read_payload(page: &Page) -> Option<&[u8]> {
    let len = LittleEndian::read_u32(&page.data[0..PAYLOAD_LEN_SIZE]) as usize;
    if len == 0 || PAYLOAD_LEN_SIZE + len > PAGE_SIZE {
        return None;
    }
    Some(&page.data[PAYLOAD_LEN_SIZE..PAYLOAD_LEN_SIZE + len])
}

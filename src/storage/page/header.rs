use serde::{Deserialize, Serialize};

use crate::common::types::{Page, PageId};
use crate::storage::page::{read_payload, write_payload, PageError};

/// Overlay for the header page (page id 0): an append-only mapping from
/// index name to root page id. Indexes rewrite their record whenever the
/// root moves so the tree can be reopened from disk.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HeaderPage {
    records: Vec<(String, PageId)>,
}

impl HeaderPage {
    /// Decode the header overlay; a zeroed page decodes as an empty header
    pub fn load(page: &Page) -> Result<Self, PageError> {
        match read_payload(page) {
            None => Ok(Self::default()),
            Some(bytes) => {
                bincode::deserialize(bytes).map_err(|e| PageError::Serialization(e.to_string()))
            }
        }
    }

    /// Encode the header back into its page
    pub fn save(&self, page: &mut Page) -> Result<(), PageError> {
        let bytes =
            bincode::serialize(self).map_err(|e| PageError::Serialization(e.to_string()))?;
        write_payload(page, &bytes)
    }

    /// Add a record; false if the name is already present
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        if self.records.iter().any(|(n, _)| n == name) {
            return false;
        }
        self.records.push((name.to_string(), root_page_id));
        true
    }

    /// Rewrite an existing record; false if the name is absent
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        for (n, pid) in self.records.iter_mut() {
            if n == name {
                *pid = root_page_id;
                return true;
            }
        }
        false
    }

    pub fn get_record(&self, name: &str) -> Option<PageId> {
        self.records
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, pid)| pid)
    }
}

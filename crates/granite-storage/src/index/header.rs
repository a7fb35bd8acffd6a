//! The index header page.
//!
//! Page 0 persists one `(index name, root page id)` record per index so
//! that a tree can find its root again after the process restarts. Every
//! root change goes through this page before the mutating operation
//! releases its latches.
//!
//! # Layout
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!   0       4   record count
//!   4       4   reserved
//!   8      40   record 0: name (32 bytes, zero padded) + root page id (8)
//!  48      40   record 1
//!  ...
//! ```

use granite_common::constants::PAGE_SIZE;
use granite_common::types::PageId;

/// Maximum index name length in bytes.
pub(crate) const MAX_INDEX_NAME_LEN: usize = 32;

const RECORDS_OFFSET: usize = 8;
const RECORD_LEN: usize = MAX_INDEX_NAME_LEN + 8;

/// Maximum number of records the header page can hold.
pub(crate) const MAX_HEADER_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_LEN;

/// Mutable view over the header page image.
pub(crate) struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    /// Creates a view into `data`, which must be a full page.
    pub fn new(data: &'a mut [u8]) -> Self {
        assert!(data.len() >= PAGE_SIZE, "buffer too small for header page");
        Self { data }
    }

    /// Returns the number of records.
    pub fn record_count(&self) -> usize {
        u32::from_le_bytes(self.data[0..4].try_into().unwrap()) as usize
    }

    fn set_record_count(&mut self, count: usize) {
        self.data[0..4].copy_from_slice(&(count as u32).to_le_bytes());
    }

    fn record_slice(&self, index: usize) -> &[u8] {
        let offset = RECORDS_OFFSET + index * RECORD_LEN;
        &self.data[offset..offset + RECORD_LEN]
    }

    fn find_index(&self, name: &[u8; MAX_INDEX_NAME_LEN]) -> Option<usize> {
        (0..self.record_count()).find(|&i| &self.record_slice(i)[..MAX_INDEX_NAME_LEN] == name)
    }

    /// Returns the root page id recorded for `name`, if any.
    pub fn get_record(&self, name: &str) -> Option<PageId> {
        let name = pad_name(name)?;
        self.find_index(&name).map(|i| {
            let record = self.record_slice(i);
            PageId::from_le_bytes(record[MAX_INDEX_NAME_LEN..].try_into().unwrap())
        })
    }

    /// Appends a record for `name`. Returns false if the name already has
    /// one, is too long, or the page is full.
    pub fn insert_record(&mut self, name: &str, root: PageId) -> bool {
        let Some(padded) = pad_name(name) else {
            return false;
        };
        if self.find_index(&padded).is_some() {
            return false;
        }
        let count = self.record_count();
        if count >= MAX_HEADER_RECORDS {
            return false;
        }
        let offset = RECORDS_OFFSET + count * RECORD_LEN;
        self.data[offset..offset + MAX_INDEX_NAME_LEN].copy_from_slice(&padded);
        self.data[offset + MAX_INDEX_NAME_LEN..offset + RECORD_LEN]
            .copy_from_slice(&root.to_le_bytes());
        self.set_record_count(count + 1);
        true
    }

    /// Overwrites the root recorded for `name`. Returns false if no record
    /// exists.
    pub fn update_record(&mut self, name: &str, root: PageId) -> bool {
        let Some(padded) = pad_name(name) else {
            return false;
        };
        match self.find_index(&padded) {
            Some(i) => {
                let offset = RECORDS_OFFSET + i * RECORD_LEN + MAX_INDEX_NAME_LEN;
                self.data[offset..offset + 8].copy_from_slice(&root.to_le_bytes());
                true
            }
            None => false,
        }
    }
}

fn pad_name(name: &str) -> Option<[u8; MAX_INDEX_NAME_LEN]> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_INDEX_NAME_LEN {
        return None;
    }
    let mut padded = [0u8; MAX_INDEX_NAME_LEN];
    padded[..bytes.len()].copy_from_slice(bytes);
    Some(padded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    #[test]
    fn test_empty_page_has_no_records() {
        let mut data = page();
        let header = HeaderPage::new(&mut data);
        assert_eq!(header.record_count(), 0);
        assert_eq!(header.get_record("missing"), None);
    }

    #[test]
    fn test_insert_and_get() {
        let mut data = page();
        let mut header = HeaderPage::new(&mut data);

        assert!(header.insert_record("orders_pk", PageId::new(4)));
        assert!(header.insert_record("users_pk", PageId::new(9)));
        assert_eq!(header.record_count(), 2);
        assert_eq!(header.get_record("orders_pk"), Some(PageId::new(4)));
        assert_eq!(header.get_record("users_pk"), Some(PageId::new(9)));
    }

    #[test]
    fn test_insert_duplicate_rejected() {
        let mut data = page();
        let mut header = HeaderPage::new(&mut data);
        assert!(header.insert_record("idx", PageId::new(1)));
        assert!(!header.insert_record("idx", PageId::new(2)));
        assert_eq!(header.get_record("idx"), Some(PageId::new(1)));
    }

    #[test]
    fn test_update_record() {
        let mut data = page();
        let mut header = HeaderPage::new(&mut data);
        assert!(header.insert_record("idx", PageId::new(1)));
        assert!(header.update_record("idx", PageId::INVALID));
        assert_eq!(header.get_record("idx"), Some(PageId::INVALID));
        assert!(!header.update_record("other", PageId::new(5)));
    }

    #[test]
    fn test_name_length_limits() {
        let mut data = page();
        let mut header = HeaderPage::new(&mut data);
        let long = "x".repeat(MAX_INDEX_NAME_LEN + 1);
        assert!(!header.insert_record(&long, PageId::new(1)));
        assert!(!header.insert_record("", PageId::new(1)));
        let exact = "y".repeat(MAX_INDEX_NAME_LEN);
        assert!(header.insert_record(&exact, PageId::new(2)));
        assert_eq!(header.get_record(&exact), Some(PageId::new(2)));
    }

    #[test]
    fn test_records_survive_reencode() {
        let mut data = page();
        {
            let mut header = HeaderPage::new(&mut data);
            header.insert_record("a", PageId::new(1));
            header.insert_record("b", PageId::new(2));
        }
        let mut copy = data.clone();
        let header = HeaderPage::new(&mut copy);
        assert_eq!(header.get_record("a"), Some(PageId::new(1)));
        assert_eq!(header.get_record("b"), Some(PageId::new(2)));
    }

    #[test]
    fn test_page_full() {
        let mut data = page();
        let mut header = HeaderPage::new(&mut data);
        for i in 0..MAX_HEADER_RECORDS {
            assert!(header.insert_record(&format!("idx_{i}"), PageId::new(i as u64)));
        }
        assert!(!header.insert_record("one_too_many", PageId::new(0)));
    }
}

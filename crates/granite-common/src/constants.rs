//! System-wide constants for GraniteDB.

// =============================================================================
// Page Constants
// =============================================================================

/// Page size in bytes (4 KB).
///
/// Every page image, buffer frame, and disk block is exactly this size.
/// It is a build-time constant: on-disk offsets are derived from it.
pub const PAGE_SIZE: usize = 4 * 1024;

/// Page id of the distinguished header page.
///
/// Page 0 persists the `(index name, root page id)` records for every index
/// in the database. The page allocator never hands it out.
pub const HEADER_PAGE_ID: u64 = 0;

// =============================================================================
// Buffer Pool Constants
// =============================================================================

/// Default number of frames in the buffer pool.
pub const DEFAULT_POOL_SIZE: usize = 128;

/// Default K for the LRU-K replacer.
pub const DEFAULT_REPLACER_K: usize = 2;

/// Default bucket capacity for the page directory's extendible hash table.
pub const DEFAULT_DIRECTORY_BUCKET_SIZE: usize = 4;

/// Upper bound on the page directory's global depth.
///
/// An insert that would require doubling the directory past this depth is
/// rejected instead of growing without bound.
pub const MAX_DIRECTORY_GLOBAL_DEPTH: u32 = 32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_constants() {
        assert!(PAGE_SIZE.is_power_of_two());
        // The header page must be addressable by the smallest valid id.
        assert_eq!(HEADER_PAGE_ID, 0);
    }

    #[test]
    fn test_buffer_pool_constants() {
        assert!(DEFAULT_POOL_SIZE >= 16);
        assert!(DEFAULT_REPLACER_K >= 1);
        assert!(MAX_DIRECTORY_GLOBAL_DEPTH <= 32);
    }
}

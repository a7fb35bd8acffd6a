//! Buffer pool errors.

use granite_common::types::PageId;
use thiserror::Error;

use crate::disk::IoError;

/// Result type for buffer pool operations.
pub type BufferResult<T> = Result<T, BufferError>;

/// Errors that can occur during buffer pool operations.
#[derive(Debug, Error)]
pub enum BufferError {
    /// No frame can be freed: every frame is pinned.
    #[error("no free frames available, all pages are pinned")]
    NoFreeFrames,

    /// Page not found in the buffer pool.
    #[error("page {page_id} not found in buffer pool")]
    PageNotFound {
        /// The page that was requested.
        page_id: PageId,
    },

    /// The requested page id is the `INVALID` sentinel.
    #[error("invalid page ID")]
    InvalidPageId,

    /// I/O error while reading or writing a page.
    #[error("disk error: {0}")]
    Disk(#[from] IoError),

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable description of what is wrong.
        message: String,
    },
}

impl BufferError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a page not found error.
    pub fn page_not_found(page_id: PageId) -> Self {
        Self::PageNotFound { page_id }
    }

    /// Returns true if this is transient resource exhaustion that a caller
    /// may retry after releasing pins.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoFreeFrames)
    }
}

//! B+ tree errors.

use granite_common::types::PageId;
use thiserror::Error;

use crate::buffer::BufferError;

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors that can occur during index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The buffer pool could not satisfy a page request.
    #[error("buffer pool error: {0}")]
    Buffer(#[from] BufferError),

    /// A page decoded as something other than the expected node shape.
    #[error("page {page_id} is corrupt: {reason}")]
    CorruptNode {
        /// The offending page.
        page_id: PageId,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// Invalid tree construction parameters.
    #[error("invalid index configuration: {message}")]
    Config {
        /// Human-readable description of what is wrong.
        message: String,
    },
}

impl IndexError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if this is transient pool exhaustion; the caller may
    /// retry after releasing pins.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Buffer(e) if e.is_retryable())
    }
}

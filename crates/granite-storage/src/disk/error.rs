//! Disk manager errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for disk operations.
pub type IoResult<T> = Result<T, IoError>;

/// Errors that can occur during disk operations.
#[derive(Debug, Error)]
pub enum IoError {
    /// Failed to open or create the database file.
    #[error("failed to open database file {path}: {source}")]
    Open {
        /// Path of the file that could not be opened.
        path: PathBuf,
        /// Underlying OS error.
        source: io::Error,
    },

    /// I/O error during a page read or write.
    #[error("I/O error: {source}")]
    Io {
        /// Underlying OS error.
        #[from]
        source: io::Error,
    },
}

impl IoError {
    /// Creates an open error with path context.
    pub fn open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Open {
            path: path.into(),
            source,
        }
    }
}

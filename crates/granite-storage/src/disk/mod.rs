//! Disk management for GraniteDB.
//!
//! The disk manager owns the database file and exposes page-granular,
//! synchronous I/O plus page id allocation. All reads and writes move whole
//! pages; callers never see byte offsets.

mod error;
mod manager;

pub use error::{IoError, IoResult};
pub use manager::DiskManager;

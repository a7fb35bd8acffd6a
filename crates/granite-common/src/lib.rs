//! # granite-common
//!
//! Common types and constants for GraniteDB.
//!
//! This crate provides the foundational types shared by every GraniteDB
//! component:
//!
//! - **Types**: the `PageId` identifier, the `RecordId` index value, and the
//!   `FixedCodec` trait for fixed-width key/value serialization
//! - **Constants**: system-wide constants (`PAGE_SIZE`, `HEADER_PAGE_ID`,
//!   buffer pool defaults)
//!
//! ## Example
//!
//! ```rust
//! use granite_common::types::{PageId, RecordId};
//!
//! let page_id = PageId::new(42);
//! let rid = RecordId::new(page_id, 7);
//! assert_eq!(rid.page_id(), page_id);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use types::{FixedCodec, PageId, RecordId};

//! Core types for GraniteDB.

mod codec;
mod ids;

pub use codec::{FixedCodec, RecordId};
pub use ids::PageId;

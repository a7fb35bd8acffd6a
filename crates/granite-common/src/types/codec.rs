//! Fixed-width serialization for index keys and values.
//!
//! B+ tree nodes store their entry arrays as packed fixed-width fields so
//! that entry offsets are computable without a slot directory. `FixedCodec`
//! is the contract a key or value type must satisfy to live in a node.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::PageId;

/// A type with a fixed-width little-endian byte encoding.
///
/// Implementations must round-trip exactly: `decode_from(encode_into(x)) == x`.
///
/// # Example
///
/// ```rust
/// use granite_common::types::FixedCodec;
///
/// let mut buf = [0u8; 8];
/// 42u64.encode_into(&mut buf);
/// assert_eq!(u64::decode_from(&buf), 42);
/// ```
pub trait FixedCodec: Copy + Default {
    /// Encoded width in bytes.
    const ENCODED_LEN: usize;

    /// Encodes `self` into `buf`, which must be at least `ENCODED_LEN` long.
    fn encode_into(&self, buf: &mut [u8]);

    /// Decodes a value from `buf`, which must be at least `ENCODED_LEN` long.
    fn decode_from(buf: &[u8]) -> Self;
}

macro_rules! impl_fixed_codec_int {
    ($($ty:ty),*) => {
        $(
            impl FixedCodec for $ty {
                const ENCODED_LEN: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn encode_into(&self, buf: &mut [u8]) {
                    buf[..Self::ENCODED_LEN].copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn decode_from(buf: &[u8]) -> Self {
                    let bytes: [u8; std::mem::size_of::<$ty>()] =
                        buf[..Self::ENCODED_LEN].try_into().unwrap();
                    <$ty>::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_fixed_codec_int!(u32, u64, i64);

/// Record identifier - locates a tuple as `(page, slot)`.
///
/// This is the conventional value type for an index: the leaf maps a key to
/// the record's physical position in a table heap.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct RecordId {
    page_id: PageId,
    slot: u32,
}

impl RecordId {
    /// Creates a record id from a page id and slot number.
    #[inline]
    #[must_use]
    pub const fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    /// Returns the page holding the record.
    #[inline]
    #[must_use]
    pub const fn page_id(self) -> PageId {
        self.page_id
    }

    /// Returns the slot number within the page.
    #[inline]
    #[must_use]
    pub const fn slot(self) -> u32 {
        self.slot
    }
}

impl FixedCodec for RecordId {
    const ENCODED_LEN: usize = 12;

    #[inline]
    fn encode_into(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.page_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.slot.to_le_bytes());
    }

    #[inline]
    fn decode_from(buf: &[u8]) -> Self {
        let page_bytes: [u8; 8] = buf[..8].try_into().unwrap();
        let slot_bytes: [u8; 4] = buf[8..12].try_into().unwrap();
        Self {
            page_id: PageId::from_le_bytes(page_bytes),
            slot: u32::from_le_bytes(slot_bytes),
        }
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({}, {})", self.page_id, self.slot)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}

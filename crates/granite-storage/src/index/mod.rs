//! B+ tree index for GraniteDB.
//!
//! A concurrent, disk-backed B+ tree built entirely on the buffer pool:
//!
//! - **Unique keys** in strict ascending order, fixed-width key and value
//!   encodings
//! - **Latch crabbing** for deadlock-free concurrent reads and writes
//! - **Range iteration** over the leaf sibling chain
//! - **Durable root**: the root page id is persisted on the header page
//!   (page 0) at every root change
//!
//! # Usage
//!
//! ```rust,no_run
//! use granite_storage::buffer::{BufferPoolConfig, BufferPoolManager};
//! use granite_storage::disk::DiskManager;
//! use granite_storage::index::{BPlusTree, Transaction};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let disk = DiskManager::open("example.db")?;
//! let pool = BufferPoolManager::new(BufferPoolConfig::new(64), disk)?;
//! let tree: BPlusTree<u64, u64> = BPlusTree::new("orders_pk", pool, 64, 64)?;
//!
//! tree.insert(1, 100, &mut Transaction::new())?;
//! assert_eq!(tree.get(&1)?, Some(100));
//! for entry in tree.iter()? {
//!     let (key, value) = entry?;
//!     println!("{key} -> {value}");
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod header;
mod iterator;
mod node;
mod transaction;
mod tree;

use std::fmt::Debug;

use granite_common::types::FixedCodec;

pub use error::{IndexError, IndexResult};
pub use iterator::TreeIterator;
pub use transaction::Transaction;
pub use tree::BPlusTree;

/// Requirements on a tree key type.
///
/// The key's `Ord` instance is the tree's comparator. Implemented for
/// every fixed-width codec type that is totally ordered.
pub trait IndexKey: FixedCodec + Ord + Debug + Send + Sync + 'static {}

impl<T: FixedCodec + Ord + Debug + Send + Sync + 'static> IndexKey for T {}

/// Requirements on a tree value type.
pub trait IndexValue: FixedCodec + PartialEq + Debug + Send + Sync + 'static {}

impl<T: FixedCodec + PartialEq + Debug + Send + Sync + 'static> IndexValue for T {}

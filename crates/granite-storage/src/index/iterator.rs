//! Leaf-chain iterator.
//!
//! The iterator walks the leaf sibling chain in key order. It keeps
//! exactly one leaf pinned at a time through a [`PagePin`] and holds no
//! latch between steps: each leaf's entries are snapshotted under a
//! momentary shared latch when the leaf is entered. Concurrent mutators
//! may therefore change what a later step sees; the iterator guarantees
//! forward progress in key order, not a frozen view.

use granite_common::types::PageId;

use super::error::{IndexError, IndexResult};
use super::node::LeafNode;
use super::{IndexKey, IndexValue};
use crate::buffer::{BufferPoolManager, PagePin};

/// The iterator's view of one leaf: a pin keeping it resident plus the
/// entries and sibling pointer read under the entry latch.
pub(crate) struct LeafSnapshot<K, V> {
    /// Held for the residency guarantee; never read.
    _pin: PagePin,
    entries: Vec<(K, V)>,
    next: PageId,
}

impl<K, V> LeafSnapshot<K, V> {
    pub(crate) fn new(pin: PagePin, entries: Vec<(K, V)>, next: PageId) -> Self {
        Self {
            _pin: pin,
            entries,
            next,
        }
    }
}

/// Ascending iterator over a [`BPlusTree`](super::BPlusTree).
///
/// Yields `Result` items because stepping to the next leaf goes through
/// the buffer pool, which can fail transiently. After an error or the end
/// of the chain the iterator is exhausted. Dropping it releases its pin.
pub struct TreeIterator<K, V> {
    pool: BufferPoolManager,
    current: Option<LeafSnapshot<K, V>>,
    index: usize,
}

impl<K: IndexKey, V: IndexValue> TreeIterator<K, V> {
    pub(crate) fn new(pool: BufferPoolManager, snapshot: LeafSnapshot<K, V>, index: usize) -> Self {
        Self {
            pool,
            current: Some(snapshot),
            index,
        }
    }

    /// An iterator that yields nothing, as produced by an empty tree.
    pub(crate) fn exhausted(pool: BufferPoolManager) -> Self {
        Self {
            pool,
            current: None,
            index: 0,
        }
    }

    /// Unpins the current leaf and enters its successor.
    fn advance_leaf(&mut self, next: PageId) -> IndexResult<()> {
        self.current = None;
        self.index = 0;
        if !next.is_valid() {
            return Ok(());
        }
        let guard = self.pool.fetch_page_read(next)?;
        let leaf = LeafNode::<K, V>::decode(guard.data(), next)?;
        self.current = Some(LeafSnapshot::new(guard.into_pin(), leaf.entries, leaf.next));
        Ok(())
    }
}

impl<K: IndexKey, V: IndexValue> Iterator for TreeIterator<K, V> {
    type Item = Result<(K, V), IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let snapshot = self.current.as_ref()?;
            if let Some(&entry) = snapshot.entries.get(self.index) {
                self.index += 1;
                return Some(Ok(entry));
            }
            // Off the end of this leaf: move to its successor. A begin(k)
            // positioned past the last key lands here immediately.
            let next = snapshot.next;
            if let Err(e) = self.advance_leaf(next) {
                return Some(Err(e));
            }
        }
    }
}

impl<K, V> std::fmt::Debug for TreeIterator<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeIterator")
            .field("at_end", &self.current.is_none())
            .field("index", &self.index)
            .finish()
    }
}

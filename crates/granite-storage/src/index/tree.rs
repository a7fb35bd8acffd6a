//! Concurrent B+ tree.
//!
//! The tree lives entirely in buffer pool pages: every node access goes
//! through a page guard, and every structural change happens under a chain
//! of exclusive page latches acquired top-down (latch crabbing).
//!
//! # Latching protocol
//!
//! Every operation takes the tree's `root` latch first - shared for reads,
//! exclusive for writes - to serialize observation of the root page id.
//!
//! Reads crab downward with shared latches: latch the child, release the
//! parent. Mutations descend with exclusive latches, keeping the whole
//! ancestor chain in the [`Transaction`] until a just-latched child proves
//! *safe* (cannot split for inserts, cannot underflow for deletes), at
//! which point every ancestor and the root latch are released. Latches are
//! only ever acquired top-down, so the tree cannot deadlock against
//! itself.
//!
//! # Split atomicity
//!
//! An insert that will split pre-allocates every page its split chain can
//! need before mutating anything. Pool exhaustion therefore aborts the
//! operation while the tree is still untouched; concurrent readers observe
//! either the pre-split or the post-split tree, never a hybrid.

use std::marker::PhantomData;
use std::sync::Arc;

use granite_common::constants::{HEADER_PAGE_ID, PAGE_SIZE};
use granite_common::types::PageId;
use parking_lot::RwLock;
use tracing::debug;

use super::error::{IndexError, IndexResult};
use super::header::{HeaderPage, MAX_INDEX_NAME_LEN};
use super::iterator::{LeafSnapshot, TreeIterator};
use super::node::{self, InternalNode, LeafNode, NodeKind, NODE_HEADER_SIZE};
use super::transaction::Transaction;
use super::{IndexKey, IndexValue};
use crate::buffer::{BufferPoolManager, PageWriteGuard};

/// What a write descent is about to do; drives the safety rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOp {
    Insert,
    Remove,
}

/// A disk-backed B+ tree index with unique keys.
///
/// Keys and values are fixed-width codec types; the key's `Ord` instance
/// is the tree's comparator. `leaf_max` and `internal_max` bound node
/// sizes in entries.
///
/// All methods take `&self`; the tree is internally latched and safe to
/// share across threads.
pub struct BPlusTree<K, V> {
    name: String,
    pool: BufferPoolManager,
    /// Root page id, guarded by the tree's root latch.
    root: Arc<RwLock<PageId>>,
    leaf_max: usize,
    internal_max: usize,
    _marker: PhantomData<(K, V)>,
}

impl<K: IndexKey, V: IndexValue> BPlusTree<K, V> {
    /// Opens the index `name`, creating its header record if absent.
    ///
    /// An index that already has a root recorded on the header page picks
    /// it up, so reopening a database resumes where it left off.
    pub fn new(
        name: impl Into<String>,
        pool: BufferPoolManager,
        leaf_max: usize,
        internal_max: usize,
    ) -> IndexResult<Self> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_INDEX_NAME_LEN {
            return Err(IndexError::config(format!(
                "index name must be 1..={MAX_INDEX_NAME_LEN} bytes"
            )));
        }
        if leaf_max < 2 {
            return Err(IndexError::config("leaf_max_size must be at least 2"));
        }
        if internal_max < 4 {
            return Err(IndexError::config("internal_max_size must be at least 4"));
        }
        let leaf_bytes = NODE_HEADER_SIZE + leaf_max * (K::ENCODED_LEN + V::ENCODED_LEN);
        let internal_bytes = NODE_HEADER_SIZE + internal_max * (K::ENCODED_LEN + 8);
        if leaf_bytes > PAGE_SIZE || internal_bytes > PAGE_SIZE {
            return Err(IndexError::config("node capacity does not fit in a page"));
        }

        let root = {
            let mut guard = pool.fetch_page_write(PageId::new(HEADER_PAGE_ID))?;
            let mut header = HeaderPage::new(guard.data_mut());
            match header.get_record(&name) {
                Some(root) => root,
                None => {
                    header.insert_record(&name, PageId::INVALID);
                    PageId::INVALID
                }
            }
        };

        Ok(Self {
            name,
            pool,
            root: Arc::new(RwLock::new(root)),
            leaf_max,
            internal_max,
            _marker: PhantomData,
        })
    }

    /// Returns the index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if the tree holds no entries.
    pub fn is_empty(&self) -> bool {
        !self.root.read().is_valid()
    }

    /// Returns the current root page id (`INVALID` for an empty tree).
    pub fn root_page_id(&self) -> PageId {
        *self.root.read()
    }

    /// Returns the number of levels, walking the leftmost spine. An empty
    /// tree has height 0, a single root leaf height 1.
    pub fn height(&self) -> IndexResult<usize> {
        let root_id = *self.root.read();
        if !root_id.is_valid() {
            return Ok(0);
        }
        let mut height = 1;
        let mut guard = self.pool.fetch_page_read(root_id)?;
        loop {
            match node::read_kind(guard.data(), guard.page_id())? {
                NodeKind::Leaf => return Ok(height),
                NodeKind::Internal => {
                    let inner = InternalNode::<K>::decode(guard.data(), guard.page_id())?;
                    guard = self.pool.fetch_page_read(inner.entries[0].1)?;
                    height += 1;
                }
            }
        }
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Point lookup.
    pub fn get(&self, key: &K) -> IndexResult<Option<V>> {
        let root_latch = self.root.read();
        let root_id = *root_latch;
        if !root_id.is_valid() {
            return Ok(None);
        }
        let mut guard = self.pool.fetch_page_read(root_id)?;
        drop(root_latch);

        loop {
            match node::read_kind(guard.data(), guard.page_id())? {
                NodeKind::Leaf => {
                    let leaf = LeafNode::<K, V>::decode(guard.data(), guard.page_id())?;
                    return Ok(leaf.lookup(key));
                }
                NodeKind::Internal => {
                    let inner = InternalNode::<K>::decode(guard.data(), guard.page_id())?;
                    let child = inner.child_for(key);
                    // Latch the child before releasing the parent.
                    let child_guard = self.pool.fetch_page_read(child)?;
                    guard = child_guard;
                }
            }
        }
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Inserts `key -> value`. Returns false if the key already exists;
    /// the tree is unchanged in that case.
    pub fn insert(&self, key: K, value: V, txn: &mut Transaction) -> IndexResult<bool> {
        let result = self.insert_inner(key, value, txn);
        txn.finish(&self.pool);
        result
    }

    fn insert_inner(&self, key: K, value: V, txn: &mut Transaction) -> IndexResult<bool> {
        let root_latch = self.root.write_arc();
        if !root_latch.is_valid() {
            return self.start_new_tree(root_latch, key, value);
        }
        txn.hold_root(root_latch);

        let leaf_id = self.descend_write(&key, WriteOp::Insert, txn)?;
        let mut leaf = {
            let guard = txn.find_page(leaf_id).expect("leaf latched by descent");
            LeafNode::<K, V>::decode(guard.data(), leaf_id)?
        };
        if leaf.lookup(&key).is_some() {
            return Ok(false);
        }

        // Allocate the whole split chain up front so a full pool aborts the
        // insert before any page changes.
        let mut fresh = self.preallocate_split_chain(txn)?;

        leaf.insert(key, value);
        if leaf.entries.len() >= self.leaf_max {
            let new_guard = fresh.pop().expect("split chain preallocated");
            let new_id = new_guard.page_id();
            let new_leaf = leaf.split_off(new_id);
            let separator = new_leaf.entries[0].0;
            self.write_node_to(new_guard, |data| new_leaf.encode(data));
            self.encode_leaf_in_txn(txn, leaf_id, &leaf);
            debug!(left = %leaf_id, right = %new_id, "split leaf");
            self.insert_into_parent(leaf_id, separator, new_id, txn, &mut fresh)?;
        } else {
            self.encode_leaf_in_txn(txn, leaf_id, &leaf);
        }
        debug_assert!(fresh.is_empty(), "preallocated more pages than the split chain used");
        Ok(true)
    }

    /// Bootstrap: the first insert creates a root leaf.
    fn start_new_tree(
        &self,
        mut root_latch: super::transaction::RootLatchGuard,
        key: K,
        value: V,
    ) -> IndexResult<bool> {
        let mut guard = self.pool.new_page()?;
        let root_id = guard.page_id();
        let mut leaf = LeafNode::<K, V>::new(PageId::INVALID);
        leaf.insert(key, value);
        leaf.encode(guard.data_mut());
        drop(guard);

        *root_latch = root_id;
        self.persist_root(root_id)?;
        debug!(root = %root_id, "started new tree");
        Ok(true)
    }

    /// Installs `separator`/`right_id` into `left_id`'s parent, splitting
    /// upward as needed. Every page this touches on the path is already in
    /// `txn`; fresh pages come out of `fresh`.
    fn insert_into_parent(
        &self,
        left_id: PageId,
        separator: K,
        right_id: PageId,
        txn: &mut Transaction,
        fresh: &mut Vec<PageWriteGuard>,
    ) -> IndexResult<()> {
        let parent_id = {
            let guard = txn.find_page(left_id).expect("split source latched");
            node::read_parent(guard.data())
        };

        if !parent_id.is_valid() {
            // The root split: grow the tree by one level.
            let root_guard = fresh.pop().expect("new root preallocated");
            let new_root_id = root_guard.page_id();
            let new_root = InternalNode::<K>::new_root(left_id, separator, right_id);
            self.write_node_to(root_guard, |data| new_root.encode(data));

            self.set_parent_pointer(left_id, new_root_id, txn)?;
            self.set_parent_pointer(right_id, new_root_id, txn)?;
            **txn.root_guard_mut() = new_root_id;
            self.persist_root(new_root_id)?;
            debug!(root = %new_root_id, "grew tree by one level");
            return Ok(());
        }

        let mut parent = {
            let guard = txn
                .find_page(parent_id)
                .expect("ancestors stay latched while a split can propagate");
            InternalNode::<K>::decode(guard.data(), parent_id)?
        };
        parent.insert_after(left_id, separator, right_id);

        if parent.entries.len() >= self.internal_max {
            let new_guard = fresh.pop().expect("split chain preallocated");
            let new_id = new_guard.page_id();
            let new_node = parent.split_off();
            // The new node's slot-0 key doubles as the separator to push up.
            let up_key = new_node.entries[0].0;
            self.write_node_to(new_guard, |data| new_node.encode(data));
            self.encode_internal_in_txn(txn, parent_id, &parent);

            for &(_, child) in &new_node.entries {
                self.set_parent_pointer(child, new_id, txn)?;
            }
            debug!(left = %parent_id, right = %new_id, "split internal node");
            self.insert_into_parent(parent_id, up_key, new_id, txn, fresh)
        } else {
            self.encode_internal_in_txn(txn, parent_id, &parent);
            Ok(())
        }
    }

    /// Counts the pages an insert through the current latch chain can
    /// consume and allocates them, deleting them again if the pool runs
    /// out partway.
    fn preallocate_split_chain(&self, txn: &Transaction) -> IndexResult<Vec<PageWriteGuard>> {
        let mut needed = 0;
        for guard in txn.pages() {
            let data = guard.data();
            let kind = node::read_kind(data, guard.page_id())?;
            let size = node::read_size(data);
            let splits = match kind {
                NodeKind::Leaf => size + 1 >= self.leaf_max,
                NodeKind::Internal => size + 1 >= self.internal_max,
            };
            if splits {
                needed += 1;
                // A splitting root additionally needs its replacement.
                if !node::read_parent(data).is_valid() {
                    needed += 1;
                }
            }
        }

        let mut fresh = Vec::with_capacity(needed);
        for _ in 0..needed {
            match self.pool.new_page() {
                Ok(guard) => fresh.push(guard),
                Err(e) => {
                    let ids: Vec<PageId> = fresh.iter().map(|g| g.page_id()).collect();
                    drop(fresh);
                    for page_id in ids {
                        self.pool.delete_page(page_id);
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(fresh)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Removes `key`. Removing an absent key is a no-op.
    pub fn remove(&self, key: &K, txn: &mut Transaction) -> IndexResult<()> {
        let result = self.remove_inner(key, txn);
        txn.finish(&self.pool);
        result
    }

    fn remove_inner(&self, key: &K, txn: &mut Transaction) -> IndexResult<()> {
        let root_latch = self.root.write_arc();
        if !root_latch.is_valid() {
            return Ok(());
        }
        txn.hold_root(root_latch);

        let leaf_id = self.descend_write(key, WriteOp::Remove, txn)?;
        let mut leaf = {
            let guard = txn.find_page(leaf_id).expect("leaf latched by descent");
            LeafNode::<K, V>::decode(guard.data(), leaf_id)?
        };
        if !leaf.remove(key) {
            return Ok(());
        }
        self.encode_leaf_in_txn(txn, leaf_id, &leaf);
        self.coalesce_or_redistribute(leaf_id, txn)
    }

    /// Restores the size invariant for an underfull node, borrowing from or
    /// merging with a sibling and recursing on the parent after a merge.
    fn coalesce_or_redistribute(&self, page_id: PageId, txn: &mut Transaction) -> IndexResult<()> {
        let (kind, size, parent_id) = {
            let guard = txn.find_page(page_id).expect("rebalanced node latched");
            let data = guard.data();
            (
                node::read_kind(data, page_id)?,
                node::read_size(data),
                node::read_parent(data),
            )
        };

        if !parent_id.is_valid() {
            return self.adjust_root(page_id, txn);
        }
        let min_size = match kind {
            NodeKind::Leaf => self.leaf_min(),
            NodeKind::Internal => self.internal_min(),
        };
        if size >= min_size {
            return Ok(());
        }

        let mut parent = {
            let guard = txn
                .find_page(parent_id)
                .expect("ancestors stay latched while a merge can propagate");
            InternalNode::<K>::decode(guard.data(), parent_id)?
        };
        let index = parent
            .child_index(page_id)
            .expect("underfull node is a child of its parent");

        // Prefer the left sibling when one exists.
        if index > 0 {
            self.rebalance_with_left(kind, page_id, parent_id, index, parent, txn)
        } else {
            self.rebalance_with_right(kind, page_id, parent_id, index, parent, txn)
        }
    }

    /// Borrow from or merge into the left sibling of `page_id`.
    fn rebalance_with_left(
        &self,
        kind: NodeKind,
        page_id: PageId,
        parent_id: PageId,
        index: usize,
        mut parent: InternalNode<K>,
        txn: &mut Transaction,
    ) -> IndexResult<()> {
        let left_id = parent.entries[index - 1].1;
        let mut left_guard = self.pool.fetch_page_write(left_id)?;

        match kind {
            NodeKind::Leaf => {
                let mut left = LeafNode::<K, V>::decode(left_guard.data(), left_id)?;
                let mut this = {
                    let guard = txn.find_page(page_id).expect("rebalanced node latched");
                    LeafNode::<K, V>::decode(guard.data(), page_id)?
                };

                if left.entries.len() > self.leaf_min() {
                    // Borrow the donor's last entry; the separator follows.
                    let moved = left.entries.pop().expect("donor above minimum");
                    this.entries.insert(0, moved);
                    parent.entries[index].0 = moved.0;

                    left.encode(left_guard.data_mut());
                    self.encode_leaf_in_txn(txn, page_id, &this);
                    self.encode_internal_in_txn(txn, parent_id, &parent);
                    return Ok(());
                }

                // Merge this node into the left sibling and splice it out
                // of the leaf chain.
                left.entries.append(&mut this.entries);
                left.next = this.next;
                left.encode(left_guard.data_mut());
                drop(left_guard);

                parent.entries.remove(index);
                self.encode_internal_in_txn(txn, parent_id, &parent);
                txn.queue_delete(page_id);
                debug!(merged = %page_id, into = %left_id, "merged leaf left");
                self.coalesce_or_redistribute(parent_id, txn)
            }
            NodeKind::Internal => {
                let mut left = InternalNode::<K>::decode(left_guard.data(), left_id)?;
                let mut this = {
                    let guard = txn.find_page(page_id).expect("rebalanced node latched");
                    InternalNode::<K>::decode(guard.data(), page_id)?
                };
                let middle_key = parent.entries[index].0;

                if left.entries.len() > self.internal_min() {
                    // The separator descends into this node; the donor's
                    // boundary key goes up as the new separator.
                    let (donor_key, donor_child) = left.entries.pop().expect("donor above minimum");
                    this.entries.insert(0, (K::default(), donor_child));
                    this.entries[1].0 = middle_key;
                    parent.entries[index].0 = donor_key;

                    left.encode(left_guard.data_mut());
                    drop(left_guard);
                    self.encode_internal_in_txn(txn, page_id, &this);
                    self.encode_internal_in_txn(txn, parent_id, &parent);
                    self.set_parent_pointer(donor_child, page_id, txn)?;
                    return Ok(());
                }

                // Merge into the left sibling, folding in the separator.
                this.entries[0].0 = middle_key;
                let moved: Vec<(K, PageId)> = this.entries.drain(..).collect();
                left.entries.extend_from_slice(&moved);
                left.encode(left_guard.data_mut());
                drop(left_guard);

                for &(_, child) in &moved {
                    self.set_parent_pointer(child, left_id, txn)?;
                }
                parent.entries.remove(index);
                self.encode_internal_in_txn(txn, parent_id, &parent);
                txn.queue_delete(page_id);
                debug!(merged = %page_id, into = %left_id, "merged internal left");
                self.coalesce_or_redistribute(parent_id, txn)
            }
        }
    }

    /// Borrow from or merge with the right sibling of `page_id`. Only taken
    /// for the leftmost child, which has no left sibling.
    fn rebalance_with_right(
        &self,
        kind: NodeKind,
        page_id: PageId,
        parent_id: PageId,
        index: usize,
        mut parent: InternalNode<K>,
        txn: &mut Transaction,
    ) -> IndexResult<()> {
        let right_id = parent.entries[index + 1].1;
        let mut right_guard = self.pool.fetch_page_write(right_id)?;

        match kind {
            NodeKind::Leaf => {
                let mut right = LeafNode::<K, V>::decode(right_guard.data(), right_id)?;
                let mut this = {
                    let guard = txn.find_page(page_id).expect("rebalanced node latched");
                    LeafNode::<K, V>::decode(guard.data(), page_id)?
                };

                if right.entries.len() > self.leaf_min() {
                    let moved = right.entries.remove(0);
                    this.entries.push(moved);
                    parent.entries[index + 1].0 = right.entries[0].0;

                    right.encode(right_guard.data_mut());
                    self.encode_leaf_in_txn(txn, page_id, &this);
                    self.encode_internal_in_txn(txn, parent_id, &parent);
                    return Ok(());
                }

                // Merge the right sibling into this node. The emptied page
                // is queued for deletion, so it is not re-encoded.
                this.entries.append(&mut right.entries);
                this.next = right.next;
                drop(right_guard);

                parent.entries.remove(index + 1);
                self.encode_leaf_in_txn(txn, page_id, &this);
                self.encode_internal_in_txn(txn, parent_id, &parent);
                txn.queue_delete(right_id);
                debug!(merged = %right_id, into = %page_id, "merged leaf right");
                self.coalesce_or_redistribute(parent_id, txn)
            }
            NodeKind::Internal => {
                let mut right = InternalNode::<K>::decode(right_guard.data(), right_id)?;
                let mut this = {
                    let guard = txn.find_page(page_id).expect("rebalanced node latched");
                    InternalNode::<K>::decode(guard.data(), page_id)?
                };
                let middle_key = parent.entries[index + 1].0;

                if right.entries.len() > self.internal_min() {
                    // The separator descends; the right sibling's next key
                    // replaces it above.
                    let (_, borrowed_child) = right.entries.remove(0);
                    this.entries.push((middle_key, borrowed_child));
                    parent.entries[index + 1].0 = right.entries[0].0;

                    right.encode(right_guard.data_mut());
                    drop(right_guard);
                    self.encode_internal_in_txn(txn, page_id, &this);
                    self.encode_internal_in_txn(txn, parent_id, &parent);
                    self.set_parent_pointer(borrowed_child, page_id, txn)?;
                    return Ok(());
                }

                // Merge the right sibling into this node.
                right.entries[0].0 = middle_key;
                let moved: Vec<(K, PageId)> = right.entries.drain(..).collect();
                this.entries.extend_from_slice(&moved);
                drop(right_guard);

                for &(_, child) in &moved {
                    self.set_parent_pointer(child, page_id, txn)?;
                }
                parent.entries.remove(index + 1);
                self.encode_internal_in_txn(txn, page_id, &this);
                self.encode_internal_in_txn(txn, parent_id, &parent);
                txn.queue_delete(right_id);
                debug!(merged = %right_id, into = %page_id, "merged internal right");
                self.coalesce_or_redistribute(parent_id, txn)
            }
        }
    }

    /// Shrinks or empties the tree when the root underflows.
    fn adjust_root(&self, root_id: PageId, txn: &mut Transaction) -> IndexResult<()> {
        let (kind, size) = {
            let guard = txn.find_page(root_id).expect("root latched");
            (
                node::read_kind(guard.data(), root_id)?,
                node::read_size(guard.data()),
            )
        };

        match kind {
            // The last entry left: the tree becomes empty.
            NodeKind::Leaf if size == 0 => {
                **txn.root_guard_mut() = PageId::INVALID;
                self.persist_root(PageId::INVALID)?;
                txn.queue_delete(root_id);
                debug!(old_root = %root_id, "tree emptied");
                Ok(())
            }
            // A single child left: it becomes the new root.
            NodeKind::Internal if size == 1 => {
                let child = {
                    let guard = txn.find_page(root_id).expect("root latched");
                    InternalNode::<K>::decode(guard.data(), root_id)?.entries[0].1
                };
                self.set_parent_pointer(child, PageId::INVALID, txn)?;
                **txn.root_guard_mut() = child;
                self.persist_root(child)?;
                txn.queue_delete(root_id);
                debug!(old_root = %root_id, new_root = %child, "shrank tree by one level");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Iterates every entry in ascending key order.
    pub fn iter(&self) -> IndexResult<TreeIterator<K, V>> {
        self.make_iter(None)
    }

    /// Iterates entries with key >= `key` in ascending order.
    pub fn iter_from(&self, key: &K) -> IndexResult<TreeIterator<K, V>> {
        self.make_iter(Some(key))
    }

    fn make_iter(&self, key: Option<&K>) -> IndexResult<TreeIterator<K, V>> {
        let root_latch = self.root.read();
        let root_id = *root_latch;
        if !root_id.is_valid() {
            return Ok(TreeIterator::exhausted(self.pool.clone()));
        }
        let mut guard = self.pool.fetch_page_read(root_id)?;
        drop(root_latch);

        loop {
            match node::read_kind(guard.data(), guard.page_id())? {
                NodeKind::Leaf => {
                    let leaf = LeafNode::<K, V>::decode(guard.data(), guard.page_id())?;
                    let start = key.map_or(0, |k| leaf.key_index(k));
                    let snapshot = LeafSnapshot::new(guard.into_pin(), leaf.entries, leaf.next);
                    return Ok(TreeIterator::new(self.pool.clone(), snapshot, start));
                }
                NodeKind::Internal => {
                    let inner = InternalNode::<K>::decode(guard.data(), guard.page_id())?;
                    let child = match key {
                        Some(k) => inner.child_for(k),
                        None => inner.entries[0].1,
                    };
                    let child_guard = self.pool.fetch_page_read(child)?;
                    guard = child_guard;
                }
            }
        }
    }

    // =========================================================================
    // Descent and shared helpers
    // =========================================================================

    /// Write-crabs from the root to the leaf for `key`, pushing every
    /// latched page into `txn`. Ancestors (and the root latch) are
    /// released as soon as a newly latched node is safe for `op`.
    fn descend_write(&self, key: &K, op: WriteOp, txn: &mut Transaction) -> IndexResult<PageId> {
        let mut page_id = **txn.root_guard_mut();
        loop {
            let guard = self.pool.fetch_page_write(page_id)?;
            let data = guard.data();
            let kind = node::read_kind(data, page_id)?;
            let size = node::read_size(data);
            let is_root = !node::read_parent(data).is_valid();

            if self.is_safe(kind, size, is_root, op) {
                txn.release_latches();
            }

            match kind {
                NodeKind::Leaf => {
                    txn.push_page(guard);
                    return Ok(page_id);
                }
                NodeKind::Internal => {
                    let inner = InternalNode::<K>::decode(data, page_id)?;
                    let child = inner.child_for(key);
                    txn.push_page(guard);
                    page_id = child;
                }
            }
        }
    }

    /// A node is safe for an insert if one more entry cannot split it, and
    /// safe for a delete if one fewer entry cannot underflow it (with the
    /// root's relaxed minimums).
    fn is_safe(&self, kind: NodeKind, size: usize, is_root: bool, op: WriteOp) -> bool {
        match op {
            WriteOp::Insert => match kind {
                NodeKind::Leaf => size + 1 < self.leaf_max,
                NodeKind::Internal => size + 1 < self.internal_max,
            },
            WriteOp::Remove => {
                if is_root {
                    match kind {
                        NodeKind::Leaf => size > 1,
                        NodeKind::Internal => size > 2,
                    }
                } else {
                    match kind {
                        NodeKind::Leaf => size > self.leaf_min(),
                        NodeKind::Internal => size > self.internal_min(),
                    }
                }
            }
        }
    }

    /// Minimum leaf occupancy: `ceil((leaf_max - 1) / 2)`.
    fn leaf_min(&self) -> usize {
        self.leaf_max / 2
    }

    /// Minimum internal occupancy (children): `ceil(internal_max / 2)`.
    fn internal_min(&self) -> usize {
        (self.internal_max + 1) / 2
    }

    /// Rewrites a child's parent pointer, going through the transaction's
    /// guard when the child is already latched on the descent path.
    fn set_parent_pointer(
        &self,
        child: PageId,
        parent: PageId,
        txn: &mut Transaction,
    ) -> IndexResult<()> {
        if let Some(guard) = txn.find_page_mut(child) {
            node::write_parent(guard.data_mut(), parent);
            return Ok(());
        }
        let mut guard = self.pool.fetch_page_write(child)?;
        node::write_parent(guard.data_mut(), parent);
        Ok(())
    }

    /// Records the root page id on the header page. Called while the root
    /// latch is exclusively held, so readers see the root move atomically.
    fn persist_root(&self, root_id: PageId) -> IndexResult<()> {
        let mut guard = self.pool.fetch_page_write(PageId::new(HEADER_PAGE_ID))?;
        let mut header = HeaderPage::new(guard.data_mut());
        let updated = header.update_record(&self.name, root_id);
        debug_assert!(updated, "index record missing from header page");
        Ok(())
    }

    fn encode_leaf_in_txn(&self, txn: &mut Transaction, page_id: PageId, leaf: &LeafNode<K, V>) {
        let guard = txn.find_page_mut(page_id).expect("page latched in txn");
        leaf.encode(guard.data_mut());
    }

    fn encode_internal_in_txn(
        &self,
        txn: &mut Transaction,
        page_id: PageId,
        inner: &InternalNode<K>,
    ) {
        let guard = txn.find_page_mut(page_id).expect("page latched in txn");
        inner.encode(guard.data_mut());
    }

    /// Consumes a fresh page guard, initializing its image.
    fn write_node_to(&self, mut guard: PageWriteGuard, encode: impl FnOnce(&mut [u8])) {
        encode(guard.data_mut());
    }
}

impl<K, V> std::fmt::Debug for BPlusTree<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("name", &self.name)
            .field("root", &*self.root.read())
            .field("leaf_max", &self.leaf_max)
            .field("internal_max", &self.internal_max)
            .finish()
    }
}

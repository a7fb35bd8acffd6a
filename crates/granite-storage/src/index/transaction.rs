//! Write-descent state for tree mutations.
//!
//! A mutating tree operation carries a `Transaction`: the set of
//! exclusively latched pages on the descent path (root first), the root
//! latch guard when it is still held, and the page ids queued for physical
//! deletion once every latch is released.

use granite_common::types::PageId;
use parking_lot::lock_api::ArcRwLockWriteGuard;
use parking_lot::RawRwLock;

use crate::buffer::{BufferPoolManager, PageWriteGuard};

/// Owned exclusive guard on the tree's root latch.
pub(crate) type RootLatchGuard = ArcRwLockWriteGuard<RawRwLock, PageId>;

/// Latch set and deferred work for one mutating tree operation.
///
/// Dropping a transaction releases everything it still holds; pages queued
/// for deletion are only freed by [`finish`](Self::finish), which the tree
/// calls at the end of every mutation.
#[derive(Default)]
pub struct Transaction {
    /// Held while the operation may still move the root. `Some` plays the
    /// role of the root marker in the page set.
    root_guard: Option<RootLatchGuard>,
    /// Exclusively latched pages on the descent path, root side first.
    page_set: Vec<PageWriteGuard>,
    /// Pages emptied by this operation, freed after latches drop.
    deleted_pages: Vec<PageId>,
}

impl Transaction {
    /// Creates an empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn hold_root(&mut self, guard: RootLatchGuard) {
        debug_assert!(self.root_guard.is_none(), "root latch already held");
        self.root_guard = Some(guard);
    }

    pub(crate) fn holds_root(&self) -> bool {
        self.root_guard.is_some()
    }

    pub(crate) fn root_guard_mut(&mut self) -> &mut RootLatchGuard {
        self.root_guard
            .as_mut()
            .expect("root latch released before a root mutation")
    }

    pub(crate) fn push_page(&mut self, guard: PageWriteGuard) {
        self.page_set.push(guard);
    }

    pub(crate) fn pages(&self) -> &[PageWriteGuard] {
        &self.page_set
    }

    pub(crate) fn find_page(&self, page_id: PageId) -> Option<&PageWriteGuard> {
        self.page_set.iter().find(|g| g.page_id() == page_id)
    }

    pub(crate) fn find_page_mut(&mut self, page_id: PageId) -> Option<&mut PageWriteGuard> {
        self.page_set.iter_mut().find(|g| g.page_id() == page_id)
    }

    /// Releases every held latch: the page set in order and then the root
    /// guard. Called when the descent proves a child safe, and again at
    /// operation end.
    pub(crate) fn release_latches(&mut self) {
        self.page_set.clear();
        self.root_guard = None;
    }

    pub(crate) fn queue_delete(&mut self, page_id: PageId) {
        self.deleted_pages.push(page_id);
    }

    /// Releases all latches, then physically frees the queued pages.
    pub(crate) fn finish(&mut self, pool: &BufferPoolManager) {
        self.release_latches();
        for page_id in self.deleted_pages.drain(..) {
            // An iterator may still hold a pin on a merged-away leaf; the
            // page is unreachable from the tree either way, so a refused
            // delete only leaks the id.
            let _ = pool.delete_page(page_id);
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("holds_root", &self.holds_root())
            .field("latched_pages", &self.page_set.len())
            .field("deleted_pages", &self.deleted_pages.len())
            .finish()
    }
}

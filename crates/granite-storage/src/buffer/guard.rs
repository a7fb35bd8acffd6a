//! Page guards and pin tokens.
//!
//! Every successful `fetch`/`new` hands the caller exactly one pin, and the
//! guard types here make that pin a move-only value: dropping the guard is
//! the only way to give the pin back, so pins cannot leak. A guard also
//! holds the frame's read or write latch; the latch is released before the
//! pin is returned so that no thread ever waits on the pool while holding a
//! page latch it is about to give up.

use std::sync::Arc;

use granite_common::types::PageId;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use super::frame::{BufferFrame, FrameId, PageData};
use super::pool::PoolCore;

/// Read guard for a page in the buffer pool.
///
/// Holds one pin and the frame's shared latch. Dropping the guard releases
/// the latch and then unpins.
pub struct PageReadGuard {
    pool: Arc<PoolCore>,
    frame: Arc<BufferFrame>,
    page_id: PageId,
    data: Option<ArcRwLockReadGuard<RawRwLock, Box<PageData>>>,
}

impl PageReadGuard {
    pub(crate) fn new(
        pool: Arc<PoolCore>,
        frame: Arc<BufferFrame>,
        page_id: PageId,
        data: ArcRwLockReadGuard<RawRwLock, Box<PageData>>,
    ) -> Self {
        Self {
            pool,
            frame,
            page_id,
            data: Some(data),
        }
    }

    /// Returns the page ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame.frame_id()
    }

    /// Returns the page image.
    #[inline]
    pub fn data(&self) -> &PageData {
        let guard = self.data.as_ref().expect("page latch held");
        &**guard
    }

    /// Releases the latch but keeps the page pinned.
    ///
    /// The returned token guarantees residency without blocking writers;
    /// the tree iterator holds exactly one of these between steps.
    pub fn into_pin(self) -> PagePin {
        // Take a second pin before this guard's pin is returned on drop, so
        // the count never touches zero in between.
        self.frame.pin();
        PagePin {
            pool: Arc::clone(&self.pool),
            page_id: self.page_id,
        }
    }
}

impl Drop for PageReadGuard {
    fn drop(&mut self) {
        // Latch first, pin second: unpinning takes the pool latch, and the
        // pool latch must never be waited on while a page latch is held.
        self.data.take();
        self.pool.unpin_page(self.page_id, false);
    }
}

impl std::fmt::Debug for PageReadGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageReadGuard")
            .field("page_id", &self.page_id)
            .field("frame_id", &self.frame.frame_id())
            .finish()
    }
}

/// Write guard for a page in the buffer pool.
///
/// Holds one pin and the frame's exclusive latch. Borrowing the data
/// mutably marks the page dirty; dropping the guard releases the latch and
/// then unpins, reporting the dirty bit.
pub struct PageWriteGuard {
    pool: Arc<PoolCore>,
    frame: Arc<BufferFrame>,
    page_id: PageId,
    data: Option<ArcRwLockWriteGuard<RawRwLock, Box<PageData>>>,
    modified: bool,
}

impl PageWriteGuard {
    pub(crate) fn new(
        pool: Arc<PoolCore>,
        frame: Arc<BufferFrame>,
        page_id: PageId,
        data: ArcRwLockWriteGuard<RawRwLock, Box<PageData>>,
    ) -> Self {
        Self {
            pool,
            frame,
            page_id,
            data: Some(data),
            modified: false,
        }
    }

    /// Returns the page ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame.frame_id()
    }

    /// Returns the page image.
    #[inline]
    pub fn data(&self) -> &PageData {
        let guard = self.data.as_ref().expect("page latch held");
        &**guard
    }

    /// Returns the page image mutably, marking the page dirty.
    #[inline]
    pub fn data_mut(&mut self) -> &mut PageData {
        self.modified = true;
        self.frame.set_dirty(true);
        let guard = self.data.as_mut().expect("page latch held");
        &mut **guard
    }

    /// Returns true if the page was borrowed mutably through this guard.
    #[inline]
    pub fn is_modified(&self) -> bool {
        self.modified
    }
}

impl Drop for PageWriteGuard {
    fn drop(&mut self) {
        self.data.take();
        self.pool.unpin_page(self.page_id, self.modified);
    }
}

impl std::fmt::Debug for PageWriteGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageWriteGuard")
            .field("page_id", &self.page_id)
            .field("frame_id", &self.frame.frame_id())
            .field("modified", &self.modified)
            .finish()
    }
}

/// A move-only pin on a resident page, holding no latch.
///
/// While a `PagePin` exists the page cannot be evicted or deleted; its
/// contents may change under concurrent writers. Dropping the token unpins.
pub struct PagePin {
    pool: Arc<PoolCore>,
    page_id: PageId,
}

impl PagePin {
    /// Returns the pinned page's ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Drop for PagePin {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, false);
    }
}

impl std::fmt::Debug for PagePin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagePin")
            .field("page_id", &self.page_id)
            .finish()
    }
}

//! Buffer pool manager.
//!
//! The buffer pool owns a fixed array of frames and is the only path to
//! page images: callers get pages through guards, never raw buffers. It
//! coordinates the page directory (extendible hash), the LRU-K replacer,
//! and the disk manager.
//!
//! Invariants maintained at every public return:
//! - a page id is in the directory iff it is resident in exactly one frame
//! - a frame with pin count > 0 is never evicted or chosen as a victim
//! - a displaced dirty frame is written back before the frame is rebound
//! - every frame is on the free list, tracked by the replacer, or pinned
//!
//! One pool latch guards frame metadata, the free list, the directory and
//! the replacer; disk I/O happens under it. Page latches are acquired only
//! after the pool latch is released - except on victim frames, which are
//! provably uncontended (evictable implies pin count zero implies no guard
//! exists) - so a thread never sleeps on a page latch while holding the
//! pool latch. That asymmetry is what makes the lock order deadlock-free.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use granite_common::types::PageId;
use parking_lot::lock_api::ArcRwLockWriteGuard;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::config::BufferPoolConfig;
use super::directory::ExtendibleHashTable;
use super::error::{BufferError, BufferResult};
use super::frame::{BufferFrame, FrameId, PageData};
use super::guard::{PageReadGuard, PageWriteGuard};
use super::replacer::LruKReplacer;
use super::BufferPoolStats;
use crate::disk::DiskManager;

/// Owned exclusive latch on a frame's page image.
type FrameWriteLatch = ArcRwLockWriteGuard<parking_lot::RawRwLock, Box<PageData>>;

/// State that must change together, behind the pool latch.
struct PoolState {
    /// Page directory: page id -> frame id for every resident page.
    page_table: ExtendibleHashTable<PageId, FrameId>,
    /// Eviction bookkeeping for frames that hold unpinned pages.
    replacer: LruKReplacer,
    /// Frames holding no page, handed out FIFO.
    free_list: VecDeque<FrameId>,
}

/// Relaxed counters for monitoring; never used for decisions.
#[derive(Default)]
struct PoolCounters {
    fetches: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    flushes: AtomicU64,
}

/// Shared pool internals. Guards keep this alive so they can unpin after
/// the `BufferPoolManager` handle itself is gone.
pub(crate) struct PoolCore {
    frames: Vec<Arc<BufferFrame>>,
    state: Mutex<PoolState>,
    disk: DiskManager,
    counters: PoolCounters,
}

impl PoolCore {
    /// Picks a frame for a new resident page: free list first, else evict.
    ///
    /// On success the frame is empty, unlatched, unpinned, absent from the
    /// directory and the replacer, and off the free list. Must be called
    /// with the pool latch held.
    fn acquire_frame(&self, state: &mut PoolState) -> BufferResult<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = state.replacer.evict().ok_or(BufferError::NoFreeFrames)?;
        let frame = &self.frames[frame_id.index()];
        let old_page_id = frame.page_id();
        debug_assert!(old_page_id.is_valid(), "victim frame holds no page");

        if frame.is_dirty() {
            let data = frame
                .data()
                .try_read_arc()
                .expect("evictable frame cannot be latched");
            if let Err(e) = self.disk.write_page(old_page_id, &data) {
                // Put the victim back so the frame is not orphaned.
                drop(data);
                state.replacer.record_access(frame_id);
                state.replacer.set_evictable(frame_id, true);
                return Err(e.into());
            }
            frame.set_dirty(false);
            self.counters.flushes.fetch_add(1, Ordering::Relaxed);
        }

        state.page_table.remove(&old_page_id);
        frame.reset();
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        trace!(%old_page_id, ?frame_id, "evicted page");
        Ok(frame_id)
    }

    /// Decrements the pin count of `page_id`'s frame.
    ///
    /// Returns false if the page is not resident or was already unpinned.
    /// When the last pin is returned the frame becomes evictable.
    pub(crate) fn unpin_page(&self, page_id: PageId, dirty: bool) -> bool {
        let state = self.state.lock();
        let Some(frame_id) = state.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.index()];
        if frame.pin_count() == 0 {
            return false;
        }
        if dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            state.replacer.set_evictable(frame_id, true);
        }
        true
    }
}

/// The buffer pool manager.
///
/// Cheap to clone; all clones share one pool. See the module docs for the
/// invariants and latching rules.
///
/// # Example
///
/// ```rust,no_run
/// use granite_storage::buffer::{BufferPoolConfig, BufferPoolManager};
/// use granite_storage::disk::DiskManager;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let disk = DiskManager::open("example.db")?;
/// let pool = BufferPoolManager::new(BufferPoolConfig::new(64), disk)?;
///
/// let mut guard = pool.new_page()?;
/// guard.data_mut()[0] = 7;
/// let page_id = guard.page_id();
/// drop(guard); // unpins
///
/// let guard = pool.fetch_page_read(page_id)?;
/// assert_eq!(guard.data()[0], 7);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BufferPoolManager {
    core: Arc<PoolCore>,
    num_frames: usize,
}

impl BufferPoolManager {
    /// Creates a buffer pool over `disk` with the given configuration.
    pub fn new(config: BufferPoolConfig, disk: DiskManager) -> BufferResult<Self> {
        config.validate().map_err(BufferError::config)?;

        let num_frames = config.num_frames;
        let frames = (0..num_frames)
            .map(|i| Arc::new(BufferFrame::new(FrameId::new(i))))
            .collect();
        let free_list = (0..num_frames).map(FrameId::new).collect();

        debug!(num_frames, "buffer pool created");

        Ok(Self {
            core: Arc::new(PoolCore {
                frames,
                state: Mutex::new(PoolState {
                    page_table: ExtendibleHashTable::new(config.directory_bucket_size),
                    replacer: LruKReplacer::new(num_frames, config.replacer_k),
                    free_list,
                }),
                disk,
                counters: PoolCounters::default(),
            }),
            num_frames,
        })
    }

    /// Allocates a fresh page and returns it pinned, zeroed and clean.
    ///
    /// Fails with [`BufferError::NoFreeFrames`] iff every frame is pinned.
    pub fn new_page(&self) -> BufferResult<PageWriteGuard> {
        let core = &self.core;
        let mut state = core.state.lock();
        let frame_id = core.acquire_frame(&mut state)?;
        let frame = Arc::clone(&core.frames[frame_id.index()]);

        let page_id = core.disk.allocate_page();
        let mut data = frame
            .data()
            .try_write_arc()
            .expect("acquired frame cannot be latched");
        data.fill(0);

        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();
        let inserted = state.page_table.insert(page_id, frame_id);
        debug_assert!(inserted, "page directory rejected insert");
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);
        drop(state);

        trace!(%page_id, ?frame_id, "new page");
        Ok(PageWriteGuard::new(Arc::clone(core), frame, page_id, data))
    }

    /// Fetches `page_id` for reading, pinning it.
    ///
    /// Reads the page from disk if it is not resident. Fails with
    /// [`BufferError::NoFreeFrames`] iff the page is not resident and no
    /// frame can be freed.
    pub fn fetch_page_read(&self, page_id: PageId) -> BufferResult<PageReadGuard> {
        if !page_id.is_valid() {
            return Err(BufferError::InvalidPageId);
        }
        let core = &self.core;
        core.counters.fetches.fetch_add(1, Ordering::Relaxed);

        let mut state = core.state.lock();
        if let Some(frame_id) = state.page_table.find(&page_id) {
            core.counters.hits.fetch_add(1, Ordering::Relaxed);
            let frame = Arc::clone(&core.frames[frame_id.index()]);
            frame.pin();
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);
            drop(state);

            // Latch outside the pool latch; the pin keeps the frame bound.
            let data = frame.data().read_arc();
            return Ok(PageReadGuard::new(Arc::clone(core), frame, page_id, data));
        }

        core.counters.misses.fetch_add(1, Ordering::Relaxed);
        let (frame, data) = self.load_page(&mut state, page_id)?;
        drop(state);
        let data = ArcRwLockWriteGuard::downgrade(data);
        Ok(PageReadGuard::new(Arc::clone(core), frame, page_id, data))
    }

    /// Fetches `page_id` for writing, pinning it.
    ///
    /// Same contract as [`fetch_page_read`](Self::fetch_page_read) but
    /// returns the exclusive guard.
    pub fn fetch_page_write(&self, page_id: PageId) -> BufferResult<PageWriteGuard> {
        if !page_id.is_valid() {
            return Err(BufferError::InvalidPageId);
        }
        let core = &self.core;
        core.counters.fetches.fetch_add(1, Ordering::Relaxed);

        let mut state = core.state.lock();
        if let Some(frame_id) = state.page_table.find(&page_id) {
            core.counters.hits.fetch_add(1, Ordering::Relaxed);
            let frame = Arc::clone(&core.frames[frame_id.index()]);
            frame.pin();
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);
            drop(state);

            let data = frame.data().write_arc();
            return Ok(PageWriteGuard::new(Arc::clone(core), frame, page_id, data));
        }

        core.counters.misses.fetch_add(1, Ordering::Relaxed);
        let (frame, data) = self.load_page(&mut state, page_id)?;
        drop(state);
        Ok(PageWriteGuard::new(Arc::clone(core), frame, page_id, data))
    }

    /// Loads a non-resident page from disk into an acquired frame.
    ///
    /// Returns the frame pinned and exclusively latched, with the directory
    /// and replacer updated. Must be called with the pool latch held.
    fn load_page(
        &self,
        state: &mut PoolState,
        page_id: PageId,
    ) -> BufferResult<(Arc<BufferFrame>, FrameWriteLatch)> {
        let core = &self.core;
        let frame_id = core.acquire_frame(state)?;
        let frame = Arc::clone(&core.frames[frame_id.index()]);

        let mut data = frame
            .data()
            .try_write_arc()
            .expect("acquired frame cannot be latched");
        if let Err(e) = core.disk.read_page(page_id, &mut data) {
            drop(data);
            state.free_list.push_back(frame_id);
            return Err(e.into());
        }

        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();
        let inserted = state.page_table.insert(page_id, frame_id);
        debug_assert!(inserted, "page directory rejected insert");
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);

        trace!(%page_id, ?frame_id, "loaded page from disk");
        Ok((frame, data))
    }

    /// Decrements the pin count of `page_id`, ORing in the dirty bit.
    ///
    /// Returns false if the page is not resident or was already unpinned.
    /// Guards call this automatically on drop; it is public for callers
    /// that manage pins through [`PagePin`](super::PagePin) lifetimes or
    /// tests.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) -> bool {
        self.core.unpin_page(page_id, dirty)
    }

    /// Writes `page_id`'s image to disk and clears its dirty flag.
    ///
    /// Returns `Ok(false)` if the page is not resident. Pin state is
    /// unchanged on return (a transient internal pin protects the frame
    /// while the pool latch is released for the page latch).
    pub fn flush_page(&self, page_id: PageId) -> BufferResult<bool> {
        let core = &self.core;
        let frame = {
            let state = core.state.lock();
            let Some(frame_id) = state.page_table.find(&page_id) else {
                return Ok(false);
            };
            let frame = Arc::clone(&core.frames[frame_id.index()]);
            frame.pin();
            frame
        };

        // The pin keeps the frame bound while we wait for the latch.
        let result = {
            let data = frame.data().read_arc();
            let r = core.disk.write_page(page_id, &data);
            if r.is_ok() {
                frame.set_dirty(false);
            }
            r
        };
        core.unpin_page(page_id, false);
        result?;
        core.counters.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Writes every resident page to disk and clears all dirty flags.
    pub fn flush_all(&self) -> BufferResult<()> {
        for frame in &self.core.frames {
            let page_id = frame.page_id();
            if page_id.is_valid() {
                // flush_page re-checks residency; the page may have been
                // evicted or deleted since we sampled it.
                self.flush_page(page_id)?;
            }
        }
        self.core.disk.sync()?;
        Ok(())
    }

    /// Drops `page_id` from the pool and deallocates it on disk.
    ///
    /// Returns false if the page is resident and pinned. A non-resident
    /// page is deallocated unconditionally.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let core = &self.core;
        let mut state = core.state.lock();
        if let Some(frame_id) = state.page_table.find(&page_id) {
            let frame = &core.frames[frame_id.index()];
            if frame.is_pinned() {
                return false;
            }
            state.page_table.remove(&page_id);
            // The frame was unpinned, so its last unpin marked it evictable.
            state.replacer.remove(frame_id);
            frame.reset();
            state.free_list.push_back(frame_id);
        }
        core.disk.deallocate_page(page_id);
        trace!(%page_id, "deleted page");
        true
    }

    /// Returns true if `page_id` is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.core.state.lock().page_table.find(&page_id).is_some()
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Returns the number of frames currently eligible for eviction.
    pub fn num_evictable(&self) -> usize {
        self.core.state.lock().replacer.size()
    }

    /// Returns the disk manager backing this pool.
    pub fn disk(&self) -> &DiskManager {
        &self.core.disk
    }

    /// Returns a snapshot of the pool's monitoring counters.
    pub fn stats(&self) -> BufferPoolStats {
        let counters = &self.core.counters;
        let mut pinned = 0;
        let mut dirty = 0;
        for frame in &self.core.frames {
            if frame.is_pinned() {
                pinned += 1;
            }
            if frame.is_dirty() {
                dirty += 1;
            }
        }
        BufferPoolStats {
            fetches: counters.fetches.load(Ordering::Relaxed),
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            flushes: counters.flushes.load(Ordering::Relaxed),
            pinned_frames: pinned,
            dirty_frames: dirty,
        }
    }
}

impl std::fmt::Debug for BufferPoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPoolManager")
            .field("num_frames", &self.num_frames)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pool_with(num_frames: usize) -> (tempfile::TempDir, BufferPoolManager) {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.db")).unwrap();
        let pool = BufferPoolManager::new(
            BufferPoolConfig::new(num_frames).with_replacer_k(2),
            disk,
        )
        .unwrap();
        (dir, pool)
    }

    #[test]
    fn test_new_page_is_pinned_and_zeroed() {
        let (_dir, pool) = pool_with(4);
        let guard = pool.new_page().unwrap();
        assert!(guard.page_id().is_valid());
        assert!(guard.data().iter().all(|&b| b == 0));
        assert!(pool.contains(guard.page_id()));
        assert_eq!(pool.stats().pinned_frames, 1);
    }

    #[test]
    fn test_unpin_on_drop() {
        let (_dir, pool) = pool_with(4);
        let page_id = {
            let guard = pool.new_page().unwrap();
            guard.page_id()
        };
        assert_eq!(pool.stats().pinned_frames, 0);
        assert!(pool.contains(page_id));
        assert_eq!(pool.num_evictable(), 1);
    }

    #[test]
    fn test_write_then_fetch_back() {
        let (_dir, pool) = pool_with(4);
        let page_id = {
            let mut guard = pool.new_page().unwrap();
            guard.data_mut()[0..4].copy_from_slice(&[9, 8, 7, 6]);
            guard.page_id()
        };
        let guard = pool.fetch_page_read(page_id).unwrap();
        assert_eq!(&guard.data()[0..4], &[9, 8, 7, 6]);
    }

    #[test]
    fn test_all_frames_pinned_fails() {
        let (_dir, pool) = pool_with(2);
        let _g1 = pool.new_page().unwrap();
        let g2 = pool.new_page().unwrap();

        let err = pool.new_page().unwrap_err();
        assert!(err.is_retryable());

        // Returning one pin makes the next allocation succeed.
        drop(g2);
        assert!(pool.new_page().is_ok());
    }

    #[test]
    fn test_eviction_writes_back_dirty_page() {
        let (_dir, pool) = pool_with(1);
        let first = {
            let mut guard = pool.new_page().unwrap();
            guard.data_mut()[0] = 0xCD;
            guard.page_id()
        };

        // A second page forces the only frame to turn over.
        let second = {
            let mut guard = pool.new_page().unwrap();
            guard.data_mut()[0] = 0xEF;
            guard.page_id()
        };
        assert!(!pool.contains(first));

        // The first page's bytes must have survived the round trip.
        let guard = pool.fetch_page_read(first).unwrap();
        assert_eq!(guard.data()[0], 0xCD);
        drop(guard);
        let guard = pool.fetch_page_read(second).unwrap();
        assert_eq!(guard.data()[0], 0xEF);
    }

    #[test]
    fn test_lru_k_eviction_order() {
        // Pool of 3: create A, B, C, unpin all, then re-access B. The next
        // new page must displace A (oldest first access among the frames
        // still in the single-access cohort).
        let (_dir, pool) = pool_with(3);
        let a = pool.new_page().unwrap().page_id();
        let b = pool.new_page().unwrap().page_id();
        let c = pool.new_page().unwrap().page_id();

        drop(pool.fetch_page_read(b).unwrap()); // hit, second access for B

        let _d = pool.new_page().unwrap();
        assert!(!pool.contains(a));
        assert!(pool.contains(b));
        assert!(pool.contains(c));
    }

    #[test]
    fn test_unpin_semantics() {
        let (_dir, pool) = pool_with(4);
        let page_id = pool.new_page().unwrap().page_id();

        // Already unpinned by the guard drop above.
        assert!(!pool.unpin_page(page_id, false));
        assert!(!pool.unpin_page(PageId::new(999), false));
    }

    #[test]
    fn test_flush_page_clears_dirty() {
        let (_dir, pool) = pool_with(4);
        let page_id = {
            let mut guard = pool.new_page().unwrap();
            guard.data_mut()[0] = 1;
            guard.page_id()
        };
        assert_eq!(pool.stats().dirty_frames, 1);
        assert!(pool.flush_page(page_id).unwrap());
        assert_eq!(pool.stats().dirty_frames, 0);
        assert!(!pool.flush_page(PageId::new(999)).unwrap());
    }

    #[test]
    fn test_flush_all_then_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let pages: Vec<PageId> = {
            let disk = DiskManager::open(&path).unwrap();
            let pool = BufferPoolManager::new(BufferPoolConfig::new(4), disk).unwrap();
            let pages = (0..4u8)
                .map(|i| {
                    let mut guard = pool.new_page().unwrap();
                    guard.data_mut()[0] = i;
                    guard.page_id()
                })
                .collect();
            pool.flush_all().unwrap();
            pages
        };

        // A fresh pool over the same file reads the same images.
        let disk = DiskManager::open(&path).unwrap();
        let pool = BufferPoolManager::new(BufferPoolConfig::new(4), disk).unwrap();
        for (i, page_id) in pages.iter().enumerate() {
            let guard = pool.fetch_page_read(*page_id).unwrap();
            assert_eq!(guard.data()[0], i as u8);
        }
    }

    #[test]
    fn test_delete_page() {
        let (_dir, pool) = pool_with(4);
        let guard = pool.new_page().unwrap();
        let page_id = guard.page_id();

        // Pinned: refuse.
        assert!(!pool.delete_page(page_id));
        drop(guard);

        // Unpinned: evict from the pool and free the id.
        assert!(pool.delete_page(page_id));
        assert!(!pool.contains(page_id));

        // Not resident: still deallocates.
        assert!(pool.delete_page(PageId::new(999)));
    }

    #[test]
    fn test_deleted_page_id_is_reused() {
        let (_dir, pool) = pool_with(4);
        let page_id = pool.new_page().unwrap().page_id();
        assert!(pool.delete_page(page_id));
        assert_eq!(pool.new_page().unwrap().page_id(), page_id);
    }

    #[test]
    fn test_read_guards_are_shared() {
        let (_dir, pool) = pool_with(4);
        let page_id = pool.new_page().unwrap().page_id();
        let g1 = pool.fetch_page_read(page_id).unwrap();
        let g2 = pool.fetch_page_read(page_id).unwrap();
        assert_eq!(g1.frame_id(), g2.frame_id());
        assert_eq!(pool.stats().pinned_frames, 1);
    }

    #[test]
    fn test_pin_token_keeps_page_resident() {
        let (_dir, pool) = pool_with(1);
        let page_id = pool.new_page().unwrap().page_id();
        let pin = pool.fetch_page_read(page_id).unwrap().into_pin();

        // The only frame is pinned, so a new page cannot be placed.
        assert!(pool.new_page().is_err());
        drop(pin);
        assert!(pool.new_page().is_ok());
    }

    #[test]
    fn test_concurrent_pin_churn() {
        use std::thread;

        let (_dir, pool) = pool_with(8);
        let pages: Vec<PageId> = (0..8).map(|_| pool.new_page().unwrap().page_id()).collect();

        thread::scope(|s| {
            for t in 0..4 {
                let pool = pool.clone();
                let pages = pages.clone();
                s.spawn(move || {
                    for i in 0..200 {
                        let page_id = pages[(t + i) % pages.len()];
                        let guard = pool.fetch_page_read(page_id).unwrap();
                        assert_eq!(guard.page_id(), page_id);
                    }
                });
            }
        });

        assert_eq!(pool.stats().pinned_frames, 0);
        assert_eq!(pool.num_evictable(), 8);
    }

    #[test]
    fn test_concurrent_writers_serialize() {
        use std::thread;

        let (_dir, pool) = pool_with(4);
        let page_id = pool.new_page().unwrap().page_id();

        thread::scope(|s| {
            for _ in 0..4 {
                let pool = pool.clone();
                s.spawn(move || {
                    for _ in 0..50 {
                        let mut guard = pool.fetch_page_write(page_id).unwrap();
                        let v = guard.data()[0];
                        guard.data_mut()[0] = v.wrapping_add(1);
                    }
                });
            }
        });

        let guard = pool.fetch_page_read(page_id).unwrap();
        assert_eq!(guard.data()[0], 200);
    }
}

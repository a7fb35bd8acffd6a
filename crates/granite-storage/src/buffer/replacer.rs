//! LRU-K replacer.
//!
//! Tracks per-frame access history and picks eviction victims. LRU-K keys
//! eviction off the K-th most recent access rather than the most recent one,
//! which keeps a burst of touches from shielding a page that is otherwise
//! cold.
//!
//! Frames fall into two cohorts:
//! - **history**: fewer than K recorded accesses. Victims are chosen by
//!   classical LRU on the first-ever access.
//! - **cache**: K or more recorded accesses. Victims are chosen by the
//!   earliest K-th-most-recent timestamp (largest backward K-distance).
//!
//! Any evictable history frame is evicted before any cache frame: a frame
//! without a full history has an effectively infinite backward K-distance.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tracing::trace;

use super::frame::FrameId;

/// Per-frame access record.
struct LruKNode {
    /// Last K access timestamps, most recent first.
    history: VecDeque<u64>,
    /// Whether the frame may be chosen as a victim.
    evictable: bool,
}

impl LruKNode {
    /// The timestamp eviction keys off: the first-ever access while the
    /// history is short of K, the K-th most recent once it is full.
    #[inline]
    fn backward_timestamp(&self) -> u64 {
        *self.history.back().expect("tracked frame has no accesses")
    }
}

struct ReplacerState {
    nodes: HashMap<FrameId, LruKNode>,
    /// Logical clock, ticked on every recorded access.
    clock: u64,
    /// Count of nodes with `evictable == true`.
    evictable_count: usize,
}

/// LRU-K eviction bookkeeping for the buffer pool.
///
/// A frame is *tracked* once an access has been recorded for it and stops
/// being tracked when it is evicted or removed. Only tracked frames marked
/// evictable count toward [`size`](Self::size) and are eviction candidates.
pub struct LruKReplacer {
    state: Mutex<ReplacerState>,
    num_frames: usize,
    k: usize,
}

impl LruKReplacer {
    /// Creates a replacer for `num_frames` frames with the given K.
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "k must be > 0");
        Self {
            state: Mutex::new(ReplacerState {
                nodes: HashMap::with_capacity(num_frames),
                clock: 0,
                evictable_count: 0,
            }),
            num_frames,
            k,
        }
    }

    /// Records an access to `frame_id`, creating its node on first access.
    ///
    /// # Panics
    ///
    /// Panics if `frame_id` is out of range for this replacer.
    pub fn record_access(&self, frame_id: FrameId) {
        self.check_frame(frame_id);
        let mut state = self.state.lock();
        state.clock += 1;
        let timestamp = state.clock;
        let k = self.k;

        let node = state.nodes.entry(frame_id).or_insert_with(|| LruKNode {
            history: VecDeque::with_capacity(k),
            evictable: false,
        });
        node.history.push_front(timestamp);
        node.history.truncate(k);
    }

    /// Marks `frame_id` evictable or pinned-down. Idempotent.
    ///
    /// # Panics
    ///
    /// Panics if `frame_id` is out of range, or if no access has ever been
    /// recorded for it. Callers must record an access before toggling
    /// evictability; a missing node here is a caller bug.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        self.check_frame(frame_id);
        let mut state = self.state.lock();
        let node = state
            .nodes
            .get_mut(&frame_id)
            .unwrap_or_else(|| panic!("set_evictable on untracked frame {frame_id:?}"));

        if node.evictable == evictable {
            return;
        }
        node.evictable = evictable;
        if evictable {
            state.evictable_count += 1;
        } else {
            state.evictable_count -= 1;
        }
    }

    /// Stops tracking `frame_id` entirely, discarding its history.
    ///
    /// Removing an untracked frame is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if `frame_id` is out of range or tracked but not evictable;
    /// the caller contract forbids removing a frame that is still pinned.
    pub fn remove(&self, frame_id: FrameId) {
        self.check_frame(frame_id);
        let mut state = self.state.lock();
        match state.nodes.get(&frame_id) {
            None => {}
            Some(node) => {
                assert!(
                    node.evictable,
                    "remove called on non-evictable frame {frame_id:?}"
                );
                state.nodes.remove(&frame_id);
                state.evictable_count -= 1;
            }
        }
    }

    /// Picks and removes an eviction victim, or returns `None` if no frame
    /// is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        if state.evictable_count == 0 {
            return None;
        }

        // Prefer the history cohort; fall back to the cache cohort. Within
        // each, the smallest backward timestamp wins.
        let mut victim: Option<(FrameId, bool, u64)> = None;
        for (&frame_id, node) in &state.nodes {
            if !node.evictable {
                continue;
            }
            let in_history = node.history.len() < self.k;
            let ts = node.backward_timestamp();
            let better = match victim {
                None => true,
                Some((_, best_in_history, best_ts)) => match (in_history, best_in_history) {
                    (true, false) => true,
                    (false, true) => false,
                    _ => ts < best_ts,
                },
            };
            if better {
                victim = Some((frame_id, in_history, ts));
            }
        }

        let (frame_id, _, _) = victim.expect("evictable_count > 0 but no candidate found");
        state.nodes.remove(&frame_id);
        state.evictable_count -= 1;
        trace!(?frame_id, "evicted frame");
        Some(frame_id)
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().evictable_count
    }

    #[inline]
    fn check_frame(&self, frame_id: FrameId) {
        assert!(
            frame_id.index() < self.num_frames,
            "frame id {frame_id:?} out of range for replacer of {} frames",
            self.num_frames
        );
    }
}

impl std::fmt::Debug for LruKReplacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruKReplacer")
            .field("num_frames", &self.num_frames)
            .field("k", &self.k)
            .field("evictable", &self.size())
            .finish()
    }
}

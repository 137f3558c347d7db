//! Frame accounting counters.
//!
//! Relaxed atomics: readers take a `snapshot()` and never need a consistent
//! cut across fields.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct RenderMetrics {
    /// Frames painted by any path.
    pub frames: AtomicU64,
    pub full_frames: AtomicU64,
    pub incremental_frames: AtomicU64,
    /// Immediate (`immediate = true`) paints.
    pub immediate_renders: AtomicU64,
    pub forced_renders: AtomicU64,
    /// Requests absorbed by an already pending animation frame.
    pub coalesced_requests: AtomicU64,
    /// Debounce timers restarted by a newer request.
    pub debounce_restarts: AtomicU64,
    /// Frame wake-ups pushed back by the fps limit.
    pub deferred_frames: AtomicU64,
    pub cancelled_renders: AtomicU64,
    /// Dirty regions dropped because a full render was pending.
    pub ignored_regions: AtomicU64,
    /// Incremental state promoted to a full render by threshold.
    pub escalations: AtomicU64,
    pub static_layer_repaints: AtomicU64,
    pub paint_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderMetricsSnapshot {
    pub frames: u64,
    pub full_frames: u64,
    pub incremental_frames: u64,
    pub immediate_renders: u64,
    pub forced_renders: u64,
    pub coalesced_requests: u64,
    pub debounce_restarts: u64,
    pub deferred_frames: u64,
    pub cancelled_renders: u64,
    pub ignored_regions: u64,
    pub escalations: u64,
    pub static_layer_repaints: u64,
    pub paint_failures: u64,
}

impl RenderMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RenderMetricsSnapshot {
        RenderMetricsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            full_frames: self.full_frames.load(Ordering::Relaxed),
            incremental_frames: self.incremental_frames.load(Ordering::Relaxed),
            immediate_renders: self.immediate_renders.load(Ordering::Relaxed),
            forced_renders: self.forced_renders.load(Ordering::Relaxed),
            coalesced_requests: self.coalesced_requests.load(Ordering::Relaxed),
            debounce_restarts: self.debounce_restarts.load(Ordering::Relaxed),
            deferred_frames: self.deferred_frames.load(Ordering::Relaxed),
            cancelled_renders: self.cancelled_renders.load(Ordering::Relaxed),
            ignored_regions: self.ignored_regions.load(Ordering::Relaxed),
            escalations: self.escalations.load(Ordering::Relaxed),
            static_layer_repaints: self.static_layer_repaints.load(Ordering::Relaxed),
            paint_failures: self.paint_failures.load(Ordering::Relaxed),
        }
    }
}

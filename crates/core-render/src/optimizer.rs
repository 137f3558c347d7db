//! `RenderOptimizer`: decides what to repaint and when.
//!
//! State machine per request: idle -> request_render -> (frame wait |
//! debounce wait) -> paint -> idle. At most one render is pending at any
//! time; its timer is a task owned by the optimizer and holding only a weak
//! reference back, so dropping the last handle cancels it.
//!
//! Paint callbacks run without any internal lock held. They may call back
//! into the optimizer (e.g. to mark regions for the next frame).

use crate::dirty::{DirtyOutcome, DirtyRegion, DirtyRegionSet};
use crate::layer::{LayerInvalidation, OffscreenLayer};
use crate::metrics::{RenderMetrics, RenderMetricsSnapshot};
use crate::scheduler::{FramePacer, ScheduleMode};
use crate::timing::FrameTiming;
use core_config::{RenderConfig, ViewportConfig};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Everything a paint callback needs for one frame.
pub struct RenderContext<'a> {
    /// Repaint the whole viewport; `dirty_regions` is empty when set.
    pub full_render: bool,
    /// Merged, sorted inclusive line ranges to repaint.
    pub dirty_regions: &'a [DirtyRegion],
    /// Static content must be repainted into `static_layer` this frame.
    pub static_layer_dirty: bool,
    pub static_layer: &'a mut OffscreenLayer,
}

pub type PaintFn = Box<dyn FnOnce(&mut RenderContext<'_>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderStats {
    pub metrics: RenderMetricsSnapshot,
    pub mode: ScheduleMode,
    pub last_render_time: Duration,
    pub average_render_time: Duration,
    pub pending_render: bool,
    pub full_render_pending: bool,
    pub dirty_regions: usize,
    pub dirty_lines: usize,
    pub static_layer_dirty: bool,
    pub destroyed: bool,
}

struct Pending {
    id: u64,
    paint: PaintFn,
    task: Option<JoinHandle<()>>,
}

impl Pending {
    fn abort(self) {
        if let Some(task) = self.task {
            task.abort();
        }
    }
}

struct State {
    pacer: FramePacer,
    viewport_width: f64,
    viewport_height: f64,
    line_height: f64,
    dirty: DirtyRegionSet,
    /// `None` while a paint callback holds the layer.
    layer: Option<OffscreenLayer>,
    /// Invalidations that arrived while the layer was lent out.
    deferred_invalidations: LayerInvalidation,
    pending: Option<Pending>,
    next_id: u64,
    last_frame: Option<Instant>,
    timing: FrameTiming,
    destroyed: bool,
}

impl State {
    fn take_pending(&mut self) -> Option<Pending> {
        self.pending.take()
    }

    fn static_layer_dirty(&self) -> bool {
        self.layer.as_ref().is_none_or(OffscreenLayer::is_dirty)
            || !self.deferred_invalidations.is_empty()
    }
}

struct Inner {
    state: Mutex<State>,
    metrics: RenderMetrics,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|p| p.into_inner());
        if let Some(pending) = state.take_pending() {
            pending.abort();
        }
    }
}

/// Cloneable handle; clones drive the same frame state.
#[derive(Clone)]
pub struct RenderOptimizer {
    inner: Arc<Inner>,
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl RenderOptimizer {
    pub fn new(config: &RenderConfig, viewport: &ViewportConfig) -> Self {
        let line_height = if viewport.line_height > 0.0 {
            viewport.line_height
        } else {
            20.0
        };
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    pacer: FramePacer::from_config(config),
                    viewport_width: viewport.width,
                    viewport_height: viewport.height,
                    line_height,
                    dirty: DirtyRegionSet::new(),
                    layer: Some(OffscreenLayer::new(viewport.width, viewport.height)),
                    deferred_invalidations: LayerInvalidation::empty(),
                    pending: None,
                    next_id: 0,
                    last_frame: None,
                    timing: FrameTiming::default(),
                    destroyed: false,
                }),
                metrics: RenderMetrics::default(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn metrics(&self) -> &RenderMetrics {
        &self.inner.metrics
    }

    /// Ask for a frame. `immediate` paints synchronously before returning;
    /// otherwise the request is coalesced (animation frame) or debounced.
    /// Requests after `destroy` are ignored.
    pub fn request_render<F>(&self, paint: F, immediate: bool)
    where
        F: FnOnce(&mut RenderContext<'_>) + Send + 'static,
    {
        let paint: PaintFn = Box::new(paint);
        if immediate {
            {
                let mut st = self.state();
                if st.destroyed {
                    trace!(target: "render.optimizer", "request_after_destroy");
                    return;
                }
                if let Some(pending) = st.take_pending() {
                    pending.abort();
                }
            }
            RenderMetrics::incr(&self.metrics().immediate_renders);
            self.perform_render(paint);
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            if self.state().destroyed {
                return;
            }
            debug!(target: "render.optimizer", "no_runtime_render_inline");
            self.perform_render(paint);
            return;
        };

        let mut st = self.state();
        if st.destroyed {
            trace!(target: "render.optimizer", "request_after_destroy");
            return;
        }
        let pacer = st.pacer;
        match pacer.mode() {
            ScheduleMode::AnimationFrame => {
                if st.pending.is_some() {
                    RenderMetrics::incr(&self.metrics().coalesced_requests);
                    trace!(target: "render.optimizer", "frame_request_coalesced");
                    return;
                }
                st.next_id += 1;
                let id = st.next_id;
                let task = runtime.spawn(frame_task(Arc::downgrade(&self.inner), id, pacer));
                st.pending = Some(Pending {
                    id,
                    paint,
                    task: Some(task),
                });
            }
            ScheduleMode::Debounce => {
                if let Some(previous) = st.take_pending() {
                    previous.abort();
                    RenderMetrics::incr(&self.metrics().debounce_restarts);
                }
                st.next_id += 1;
                let id = st.next_id;
                let task = runtime.spawn(debounce_task(
                    Arc::downgrade(&self.inner),
                    id,
                    pacer.debounce_delay(),
                ));
                st.pending = Some(Pending {
                    id,
                    paint,
                    task: Some(task),
                });
            }
        }
    }

    /// Paint the pending request if it is still the one `id` was armed for.
    fn run_pending(&self, id: u64) {
        let paint = {
            let mut st = self.state();
            match st.pending.as_ref() {
                Some(p) if p.id == id && !st.destroyed => st.take_pending().map(|p| p.paint),
                _ => None,
            }
        };
        if let Some(paint) = paint {
            self.perform_render(paint);
        }
    }

    fn perform_render(&self, paint: PaintFn) {
        let (full, regions, mut layer) = {
            let mut st = self.state();
            let (full, regions) = st.dirty.take();
            let deferred = std::mem::take(&mut st.deferred_invalidations);
            let mut layer = match st.layer.take() {
                Some(layer) => layer,
                None => OffscreenLayer::new(st.viewport_width, st.viewport_height),
            };
            layer.invalidate(deferred);
            (full, regions, layer)
        };
        let static_layer_dirty = layer.is_dirty();

        let started = std::time::Instant::now();
        let outcome = {
            let mut ctx = RenderContext {
                full_render: full,
                dirty_regions: &regions,
                static_layer_dirty,
                static_layer: &mut layer,
            };
            panic::catch_unwind(AssertUnwindSafe(move || paint(&mut ctx)))
        };
        let elapsed = started.elapsed();

        let metrics = self.metrics();
        match outcome {
            Ok(()) => {
                if static_layer_dirty {
                    layer.mark_painted();
                    RenderMetrics::incr(&metrics.static_layer_repaints);
                }
            }
            Err(payload) => {
                RenderMetrics::incr(&metrics.paint_failures);
                warn!(
                    target: "render.optimizer",
                    panic = panic_message(payload.as_ref()),
                    full,
                    regions = regions.len(),
                    "paint_failed"
                );
            }
        }

        let mut st = self.state();
        layer.resize(st.viewport_width, st.viewport_height);
        if st.layer.is_none() {
            st.layer = Some(layer);
        }
        st.last_frame = Some(Instant::now());
        st.timing.record(elapsed);
        drop(st);

        RenderMetrics::incr(&metrics.frames);
        if full {
            RenderMetrics::incr(&metrics.full_frames);
        } else {
            RenderMetrics::incr(&metrics.incremental_frames);
        }
        debug!(
            target: "render.optimizer",
            full,
            regions = regions.len(),
            static_layer = static_layer_dirty,
            elapsed_us = elapsed.as_micros() as u64,
            "frame_rendered"
        );
    }

    /// Cancel whatever is pending and paint now.
    pub fn force_render<F>(&self, paint: F)
    where
        F: FnOnce(&mut RenderContext<'_>) + Send + 'static,
    {
        {
            let mut st = self.state();
            if st.destroyed {
                return;
            }
            if let Some(pending) = st.take_pending() {
                pending.abort();
            }
        }
        RenderMetrics::incr(&self.metrics().forced_renders);
        self.perform_render(Box::new(paint));
    }

    /// Drop the pending render without painting. Returns whether one existed.
    pub fn cancel_pending_render(&self) -> bool {
        let pending = self.state().take_pending();
        match pending {
            Some(p) => {
                p.abort();
                RenderMetrics::incr(&self.metrics().cancelled_renders);
                debug!(target: "render.optimizer", "pending_render_cancelled");
                true
            }
            None => false,
        }
    }

    pub fn has_pending_render(&self) -> bool {
        self.state().pending.is_some()
    }

    /// Record an inclusive dirty line range for the next frame.
    pub fn add_dirty_region(&self, start_line: usize, end_line: usize) -> DirtyOutcome {
        let mut st = self.state();
        if st.destroyed {
            return DirtyOutcome::Ignored;
        }
        let (height, lh) = (st.viewport_height, st.line_height);
        let outcome = st.dirty.add(start_line, end_line, height, lh);
        match outcome {
            DirtyOutcome::Ignored => RenderMetrics::incr(&self.metrics().ignored_regions),
            DirtyOutcome::Escalated => {
                RenderMetrics::incr(&self.metrics().escalations);
                debug!(target: "render.optimizer", start_line, end_line, "escalated_to_full_render");
            }
            DirtyOutcome::Tracked => {
                trace!(target: "render.optimizer", start_line, end_line, "dirty_region_added");
            }
        }
        outcome
    }

    pub fn mark_full_render(&self) {
        self.state().dirty.mark_full();
    }

    pub fn should_trigger_full_render(&self) -> bool {
        let st = self.state();
        st.dirty
            .should_trigger_full_render(st.viewport_height, st.line_height)
    }

    pub fn full_render_pending(&self) -> bool {
        self.state().dirty.full_render_pending()
    }

    pub fn dirty_regions(&self) -> Vec<DirtyRegion> {
        self.state().dirty.regions().to_vec()
    }

    pub fn invalidate_static_layer(&self, why: LayerInvalidation) {
        let mut st = self.state();
        match st.layer.as_mut() {
            Some(layer) => layer.invalidate(why),
            None => st.deferred_invalidations |= why,
        }
        debug!(target: "render.optimizer", reasons = ?why, "static_layer_invalidated");
    }

    pub fn static_layer_dirty(&self) -> bool {
        self.state().static_layer_dirty()
    }

    /// Resize the offscreen layer and update the coverage estimate.
    pub fn set_viewport_size(&self, width: f64, height: f64) {
        let mut st = self.state();
        st.viewport_width = width;
        st.viewport_height = height;
        if let Some(layer) = st.layer.as_mut() {
            layer.resize(width, height);
        }
    }

    pub fn set_line_height(&self, line_height: f64) {
        if line_height > 0.0 {
            self.state().line_height = line_height;
            self.invalidate_static_layer(LayerInvalidation::FONT_METRICS);
        }
    }

    /// Cancel pending work and ignore all later requests. Idempotent.
    pub fn destroy(&self) {
        let mut st = self.state();
        if st.destroyed {
            return;
        }
        st.destroyed = true;
        if let Some(pending) = st.take_pending() {
            pending.abort();
        }
        st.dirty.clear();
        if let Some(layer) = st.layer.as_mut() {
            layer.surface.clear();
        }
        debug!(target: "render.optimizer", "render_optimizer_destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.state().destroyed
    }

    pub fn metrics_snapshot(&self) -> RenderMetricsSnapshot {
        self.metrics().snapshot()
    }

    pub fn stats(&self) -> RenderStats {
        let st = self.state();
        RenderStats {
            metrics: self.metrics().snapshot(),
            mode: st.pacer.mode(),
            last_render_time: st.timing.last(),
            average_render_time: st.timing.average(),
            pending_render: st.pending.is_some(),
            full_render_pending: st.dirty.full_render_pending(),
            dirty_regions: st.dirty.regions().len(),
            dirty_lines: st.dirty.dirty_line_count(),
            static_layer_dirty: st.static_layer_dirty(),
            destroyed: st.destroyed,
        }
    }
}

async fn frame_task(inner: Weak<Inner>, id: u64, pacer: FramePacer) {
    loop {
        tokio::time::sleep(pacer.refresh_interval()).await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let optimizer = RenderOptimizer { inner };
        let last_frame = optimizer.state().last_frame;
        if pacer.should_defer(last_frame, Instant::now()) {
            RenderMetrics::incr(&optimizer.metrics().deferred_frames);
            trace!(target: "render.optimizer", "frame_deferred_by_fps_limit");
            continue;
        }
        optimizer.run_pending(id);
        return;
    }
}

async fn debounce_task(inner: Weak<Inner>, id: u64, delay: Duration) {
    tokio::time::sleep(delay).await;
    if let Some(inner) = inner.upgrade() {
        RenderOptimizer { inner }.run_pending(id);
    }
}

//! `PreloadManager`: scroll tracking and the single in-flight preload.
//!
//! The in-flight preload is a task owned by the manager that holds only a
//! weak reference back; it is aborted on `destroy` or when the last handle
//! drops. A failed or timed-out preload frees the slot and forgets its memo
//! key so the same range can be retried.

use crate::{
    MAX_PRELOAD_LINES, NullPreloadHandler, PRELOAD_MEMO_SIZE, PreloadHandler, PreloadRange,
    ScrollDirection, SpeedClass,
};
use core_cache::BoundedMap;
use core_config::PreloadConfig;
use core_predict::Prediction;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PreloadStats {
    pub scroll_direction: ScrollDirection,
    /// px/ms
    pub scroll_speed: f64,
    pub preload_lines: usize,
    pub preloading: bool,
    pub triggered: u64,
    pub completed: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub skipped_duplicate: u64,
    pub skipped_in_flight: u64,
    pub memo_len: usize,
}

impl PreloadStats {
    /// Share of triggered preloads that finished successfully.
    pub fn hit_rate(&self) -> f64 {
        if self.triggered == 0 {
            0.0
        } else {
            self.completed as f64 / self.triggered as f64
        }
    }
}

struct InFlight {
    id: u64,
    range: PreloadRange,
    task: Option<JoinHandle<()>>,
}

struct State {
    config: PreloadConfig,
    line_height: f64,
    preload_lines: usize,
    scroll_top: f64,
    viewport_height: f64,
    total_height: f64,
    last_update: Option<Instant>,
    direction: ScrollDirection,
    speed: f64,
    in_flight: Option<InFlight>,
    next_id: u64,
    destroyed: bool,
    stats: PreloadStats,
}

impl State {
    /// Lines just past the visible edge in `direction`.
    fn range_beyond_edge(&self, direction: ScrollDirection) -> Option<PreloadRange> {
        let lh = self.line_height;
        let total_lines = (self.total_height / lh).ceil() as usize;
        let first_visible = ((self.scroll_top / lh).floor() as usize).min(total_lines);
        let past_visible =
            (((self.scroll_top + self.viewport_height) / lh).ceil() as usize).min(total_lines);
        let n = self.preload_lines;
        let (start_line, end_line) = match direction {
            ScrollDirection::Down => (past_visible, past_visible.saturating_add(n).min(total_lines)),
            ScrollDirection::Up => (first_visible.saturating_sub(n), first_visible),
            ScrollDirection::None => return None,
        };
        (start_line < end_line).then_some(PreloadRange {
            start_line,
            end_line,
            direction,
            speed: self.speed,
        })
    }
}

struct Inner {
    state: Mutex<State>,
    memo: BoundedMap<String, PreloadRange>,
    handler: Arc<dyn PreloadHandler>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|p| p.into_inner());
        if let Some(task) = state.in_flight.take().and_then(|f| f.task) {
            task.abort();
        }
    }
}

/// Cloneable handle; clones share one scroll history and in-flight slot.
#[derive(Clone)]
pub struct PreloadManager {
    inner: Arc<Inner>,
}

impl PreloadManager {
    pub fn new(config: PreloadConfig, line_height: f64) -> Self {
        Self::with_handler(config, line_height, Arc::new(NullPreloadHandler))
    }

    pub fn with_handler(
        config: PreloadConfig,
        line_height: f64,
        handler: Arc<dyn PreloadHandler>,
    ) -> Self {
        let line_height = if line_height > 0.0 { line_height } else { 20.0 };
        let preload_lines = config.preload_lines;
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    config,
                    line_height,
                    preload_lines,
                    scroll_top: 0.0,
                    viewport_height: 0.0,
                    total_height: 0.0,
                    last_update: None,
                    direction: ScrollDirection::None,
                    speed: 0.0,
                    in_flight: None,
                    next_id: 0,
                    destroyed: false,
                    stats: PreloadStats::default(),
                }),
                memo: BoundedMap::new(PRELOAD_MEMO_SIZE),
                handler,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Feed one scroll sample. Returns the range handed to the handler, if
    /// this sample started a preload.
    pub fn update_scroll(
        &self,
        scroll_top: f64,
        viewport_height: f64,
        total_height: f64,
    ) -> Option<PreloadRange> {
        self.update_scroll_at(scroll_top, viewport_height, total_height, Instant::now())
    }

    /// `update_scroll` with an explicit sample time.
    pub fn update_scroll_at(
        &self,
        scroll_top: f64,
        viewport_height: f64,
        total_height: f64,
        now: Instant,
    ) -> Option<PreloadRange> {
        let scroll_top = if scroll_top.is_nan() { 0.0 } else { scroll_top };
        {
            let mut st = self.state();
            if st.destroyed {
                return None;
            }
            let delta = scroll_top - st.scroll_top;
            st.direction = if delta > 0.0 {
                ScrollDirection::Down
            } else if delta < 0.0 {
                ScrollDirection::Up
            } else {
                ScrollDirection::None
            };
            if let Some(last) = st.last_update {
                let dt_ms = now.saturating_duration_since(last).as_secs_f64() * 1000.0;
                if dt_ms > 0.0 {
                    st.speed = delta.abs() / dt_ms;
                }
            }
            st.scroll_top = scroll_top;
            st.viewport_height = viewport_height.max(0.0);
            st.total_height = total_height.max(0.0);
            st.last_update = Some(now);
            trace!(
                target: "preload",
                scroll_top,
                direction = ?st.direction,
                speed = st.speed,
                "scroll_sampled"
            );
        }
        self.check_preload()
    }

    /// Trigger a preload when the viewport edge is within the threshold of
    /// the end it is scrolling towards.
    pub fn check_preload(&self) -> Option<PreloadRange> {
        let direction = {
            let st = self.state();
            let threshold = st.config.preload_threshold * st.viewport_height;
            let distance_to_bottom = st.total_height - (st.scroll_top + st.viewport_height);
            let distance_to_top = st.scroll_top;
            match st.direction {
                ScrollDirection::Down if distance_to_bottom < threshold => ScrollDirection::Down,
                ScrollDirection::Up if distance_to_top < threshold => ScrollDirection::Up,
                _ => return None,
            }
        };
        self.trigger_preload(direction)
    }

    /// Start preloading the lines beyond the visible edge in `direction`.
    /// Skipped while another preload runs or when the range was already
    /// preloaded recently.
    pub fn trigger_preload(&self, direction: ScrollDirection) -> Option<PreloadRange> {
        let mut st = self.state();
        if st.destroyed {
            return None;
        }
        let range = st.range_beyond_edge(direction)?;
        if st.in_flight.is_some() {
            st.stats.skipped_in_flight += 1;
            trace!(target: "preload", key = range.key().as_str(), "preload_skipped_in_flight");
            return None;
        }
        let key = range.key();
        if self.inner.memo.contains_key(&key) {
            st.stats.skipped_duplicate += 1;
            trace!(target: "preload", key = key.as_str(), "preload_skipped_duplicate");
            return None;
        }
        self.perform_preload(&mut st, key, range)
    }

    fn perform_preload(
        &self,
        st: &mut State,
        key: String,
        range: PreloadRange,
    ) -> Option<PreloadRange> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(target: "preload", key = key.as_str(), "preload_skipped_no_runtime");
            return None;
        };
        self.inner.memo.insert(key, range);
        st.next_id += 1;
        let id = st.next_id;
        let task = runtime.spawn(preload_task(
            Arc::downgrade(&self.inner),
            id,
            range,
            self.inner.handler.clone(),
            st.config.preload_timeout(),
        ));
        st.in_flight = Some(InFlight {
            id,
            range,
            task: Some(task),
        });
        st.stats.triggered += 1;
        debug!(
            target: "preload",
            start = range.start_line,
            end = range.end_line,
            direction = ?range.direction,
            speed = range.speed,
            "preload_started"
        );
        Some(range)
    }

    fn finish(&self, id: u64, outcome: Result<anyhow::Result<()>, tokio::time::error::Elapsed>) {
        let mut st = self.state();
        let range = match st.in_flight.as_ref() {
            Some(f) if f.id == id => f.range,
            _ => return,
        };
        st.in_flight = None;
        let key = range.key();
        match outcome {
            Ok(Ok(())) => {
                st.stats.completed += 1;
                debug!(target: "preload", key = key.as_str(), "preload_completed");
            }
            Ok(Err(err)) => {
                st.stats.failed += 1;
                self.inner.memo.remove(&key);
                warn!(target: "preload", key = key.as_str(), error = %err, "preload_failed");
            }
            Err(_) => {
                st.stats.timeouts += 1;
                self.inner.memo.remove(&key);
                warn!(
                    target: "preload",
                    key = key.as_str(),
                    timeout_ms = st.config.preload_timeout_ms,
                    "preload_timed_out"
                );
            }
        }
    }

    /// Scale the lookahead from the configured base by predicted speed.
    /// Returns the new `preload_lines`.
    pub fn apply_prediction(&self, prediction: &Prediction) -> usize {
        let mut st = self.state();
        let factor = match prediction.next_scroll_speed {
            SpeedClass::Fast => 3.0,
            SpeedClass::Normal => 1.5,
            SpeedClass::Slow => 1.0,
        };
        let lines = ((st.config.preload_lines as f64) * factor).round() as usize;
        let lines = lines.clamp(1, MAX_PRELOAD_LINES);
        if lines != st.preload_lines {
            debug!(
                target: "preload",
                from = st.preload_lines,
                to = lines,
                speed = ?prediction.next_scroll_speed,
                "preload_lines_adjusted"
            );
        }
        st.preload_lines = lines;
        lines
    }

    pub fn set_line_height(&self, line_height: f64) {
        if line_height > 0.0 {
            self.state().line_height = line_height;
        }
    }

    pub fn is_preloading(&self) -> bool {
        self.state().in_flight.is_some()
    }

    pub fn scroll_direction(&self) -> ScrollDirection {
        self.state().direction
    }

    pub fn scroll_speed(&self) -> f64 {
        self.state().speed
    }

    pub fn preload_lines(&self) -> usize {
        self.state().preload_lines
    }

    /// Whether `range` is in the recent-preload memo.
    pub fn was_preloaded(&self, range: &PreloadRange) -> bool {
        self.inner.memo.contains_key(&range.key())
    }

    pub fn stats(&self) -> PreloadStats {
        let st = self.state();
        PreloadStats {
            scroll_direction: st.direction,
            scroll_speed: st.speed,
            preload_lines: st.preload_lines,
            preloading: st.in_flight.is_some(),
            memo_len: self.inner.memo.len(),
            ..st.stats
        }
    }

    /// Abort the in-flight preload and ignore later samples. Idempotent.
    pub fn destroy(&self) {
        let mut st = self.state();
        if st.destroyed {
            return;
        }
        st.destroyed = true;
        if let Some(task) = st.in_flight.take().and_then(|f| f.task) {
            task.abort();
        }
        self.inner.memo.clear();
        debug!(target: "preload", "preload_manager_destroyed");
    }
}

async fn preload_task(
    inner: Weak<Inner>,
    id: u64,
    range: PreloadRange,
    handler: Arc<dyn PreloadHandler>,
    timeout: Duration,
) {
    let outcome = tokio::time::timeout(timeout, handler.preload(range)).await;
    if let Some(inner) = inner.upgrade() {
        PreloadManager { inner }.finish(id, outcome);
    }
}

//! Frame pacing policy.
//!
//! Two ways to turn a burst of render requests into one paint:
//! - `AnimationFrame`: the first request arms a frame; later requests are
//!   absorbed until it fires. A frame that wakes less than `min_interval`
//!   after the last painted frame waits another refresh interval.
//! - `Debounce`: every request restarts a `delay` timer and the last
//!   request's paint callback wins.

use core_config::RenderConfig;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    AnimationFrame,
    Debounce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePacer {
    mode: ScheduleMode,
    refresh_interval: Duration,
    min_interval: Duration,
    debounce_delay: Duration,
}

impl FramePacer {
    pub fn from_config(config: &RenderConfig) -> Self {
        Self {
            mode: if config.use_raf {
                ScheduleMode::AnimationFrame
            } else {
                ScheduleMode::Debounce
            },
            refresh_interval: config.refresh_interval().max(Duration::from_millis(1)),
            min_interval: config.min_frame_interval(),
            debounce_delay: config.debounce_delay(),
        }
    }

    pub fn mode(&self) -> ScheduleMode {
        self.mode
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Minimum spacing between painted frames (`1 / target_fps`).
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn debounce_delay(&self) -> Duration {
        self.debounce_delay
    }

    /// Whether a frame waking at `now` must be pushed back by the fps limit.
    pub fn should_defer(&self, last_frame: Option<Instant>, now: Instant) -> bool {
        last_frame.is_some_and(|last| now.saturating_duration_since(last) < self.min_interval)
    }
}

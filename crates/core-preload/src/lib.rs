//! Scroll-driven speculative loading.
//!
//! `PreloadManager` watches scroll telemetry and, when the viewport edge gets
//! within `preload_threshold * viewport_height` of the end it is moving
//! towards, hands the next `preload_lines` lines to a `PreloadHandler`. Only
//! one preload runs at a time, identical ranges are skipped through a small
//! FIFO memo, and every preload is bounded by `preload_timeout`.

mod manager;

pub use core_predict::{ScrollDirection, SpeedClass};
pub use manager::{PreloadManager, PreloadStats};

use std::future::Future;
use std::pin::Pin;
use tracing::trace;

/// Entries kept in the "already preloaded" memo.
pub const PRELOAD_MEMO_SIZE: usize = 20;

/// Upper bound for the prediction-scaled lookahead.
pub const MAX_PRELOAD_LINES: usize = 1000;

/// Half-open line range handed to the handler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreloadRange {
    pub start_line: usize,
    pub end_line: usize,
    pub direction: ScrollDirection,
    /// Scroll speed in px/ms when the preload was triggered.
    pub speed: f64,
}

impl PreloadRange {
    /// Memo key, `"start-end"`.
    pub fn key(&self) -> String {
        format!("{}-{}", self.start_line, self.end_line)
    }

    pub fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line)
    }
}

pub type PreloadFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// Does the actual warm-up work (chunk paging, pre-parsing, ...).
///
/// Errors are logged and never reach the scroll path.
pub trait PreloadHandler: Send + Sync {
    fn preload(&self, range: PreloadRange) -> PreloadFuture<'_>;
}

impl<F, Fut> PreloadHandler for F
where
    F: Fn(PreloadRange) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn preload(&self, range: PreloadRange) -> PreloadFuture<'_> {
        Box::pin(self(range))
    }
}

/// Handler used until one is plugged in; accepts every range.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPreloadHandler;

impl PreloadHandler for NullPreloadHandler {
    fn preload(&self, range: PreloadRange) -> PreloadFuture<'_> {
        Box::pin(async move {
            trace!(target: "preload", start = range.start_line, end = range.end_line, "preload_handler_not_configured");
            Ok::<_, anyhow::Error>(())
        })
    }
}

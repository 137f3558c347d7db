//! Wiring of the view core: one of each component driven by user events.
//!
//! Scroll and edit events update the viewport and dirty state, `frame`
//! pulls the visible lines from the chunk store and hands them to the
//! `Painter` through the render optimizer. Every recorded behavior feeds the
//! predictor, whose speed estimate resizes the preloader's lookahead; the
//! preloader warms chunks through the chunk store. The chunk store and the
//! pre-render cache share the cache manager's memory budget.

mod painter;

pub use painter::{Frame, PaintCounters, PaintSnapshot, Painter, SurfacePainter};

use core_cache::{BoundedMap, CacheManager, CacheManagerStats, CacheOptions};
use core_chunks::{ChunkError, ChunkManager, ChunkStats};
use core_config::ConfigFile;
use core_predict::{ActionKind, Behavior, PredictStats, PredictiveRenderer, ScrollDirection};
use core_preload::{PreloadHandler, PreloadManager, PreloadRange, PreloadStats};
use core_render::{DirtyOutcome, LayerInvalidation, RenderOptimizer, RenderStats};
use core_viewport::{DEFAULT_BUFFER_LINES, LineRange, ViewportManager, ViewportStats};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// Registry name of the chunk store.
pub const CHUNK_CACHE: &str = "chunks";
/// Registry name of the speculative render cache.
pub const PRE_RENDER_CACHE: &str = "pre_render";

/// Budget charge per resident line.
const LINE_BYTES_ESTIMATE: usize = 80;
const PRE_RENDER_ITEM_ESTIMATE: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStats {
    pub chunks: ChunkStats,
    pub viewport: ViewportStats,
    pub render: RenderStats,
    pub cache: CacheManagerStats,
    pub preload: PreloadStats,
    pub predict: PredictStats,
}

pub struct Pipeline {
    chunks: ChunkManager,
    viewport: ViewportManager,
    render: RenderOptimizer,
    cache: CacheManager,
    preload: PreloadManager,
    predict: PredictiveRenderer,
    painter: Arc<Mutex<Box<dyn Painter>>>,
    /// Latest requested frame; the paint callback reads it when it runs.
    target: Arc<Mutex<Frame>>,
    last_scroll: Option<Instant>,
    center_chunk: Option<usize>,
    destroyed: bool,
}

fn chunk_warmer(chunks: ChunkManager) -> Arc<dyn PreloadHandler> {
    Arc::new(move |range: PreloadRange| {
        let chunks = chunks.clone();
        async move {
            chunks.warm_lines(range.start_line, range.end_line).await?;
            Ok::<_, anyhow::Error>(())
        }
    })
}

impl Pipeline {
    /// Build every component from `config`. Call from inside a tokio runtime
    /// to get background cleanup, frame scheduling and preloading.
    pub fn new(config: &ConfigFile, painter: impl Painter + 'static) -> Self {
        let chunks = ChunkManager::new(config.chunks.clone());
        let viewport = ViewportManager::new(&config.viewport);
        let render = RenderOptimizer::new(&config.render, &config.viewport);
        let cache = CacheManager::new(&config.cache);
        let preload = PreloadManager::with_handler(
            config.preload.clone(),
            viewport.line_height(),
            chunk_warmer(chunks.clone()),
        );
        let predict = PredictiveRenderer::new(config.predict.clone());
        let painter: Box<dyn Painter> = Box::new(painter);
        let target = Frame {
            range: LineRange { start: 0, end: 0 },
            lines: Vec::new(),
            scroll_top: 0.0,
            line_height: viewport.line_height(),
            padding: viewport.padding(),
        };

        cache.register_cache::<usize, ChunkManager>(
            CHUNK_CACHE,
            Arc::new(chunks.clone()),
            CacheOptions {
                max_size: config.chunks.max_loaded_chunks,
                priority: 2,
                estimated_item_size: config.chunks.chunk_size.saturating_mul(LINE_BYTES_ESTIMATE),
            },
        );
        cache.register_cache::<String, BoundedMap<String, Arc<String>>>(
            PRE_RENDER_CACHE,
            predict.pre_render_cache(),
            CacheOptions {
                max_size: config.predict.pre_render_cache_size,
                priority: 1,
                estimated_item_size: PRE_RENDER_ITEM_ESTIMATE,
            },
        );

        Self {
            chunks,
            viewport,
            render,
            cache,
            preload,
            predict,
            painter: Arc::new(Mutex::new(painter)),
            target: Arc::new(Mutex::new(target)),
            last_scroll: None,
            center_chunk: None,
            destroyed: false,
        }
    }

    /// Load a document and reset scroll and render state.
    pub async fn open_text(&mut self, text: &str) -> Result<(), ChunkError> {
        self.chunks.initialize_from_text(text).await?;
        self.viewport.set_total_lines(self.chunks.total_lines());
        self.viewport.set_scroll_top(0.0);
        self.last_scroll = None;
        self.center_chunk = None;
        self.render.invalidate_static_layer(LayerInvalidation::LINE_COUNT);
        self.render.mark_full_render();
        info!(
            target: "pipeline",
            lines = self.chunks.total_lines(),
            chunks = self.chunks.total_chunks(),
            "document_opened"
        );
        Ok(())
    }

    fn record(&mut self, behavior: Behavior) {
        self.predict.validate_prediction(behavior.kind());
        let prediction = self.predict.record_behavior(behavior);
        self.preload.apply_prediction(&prediction);
    }

    /// Scroll to `scroll_top` (clamped). Returns the range a preload was
    /// started for, if any.
    pub fn on_scroll(&mut self, scroll_top: f64) -> Option<PreloadRange> {
        if self.destroyed {
            return None;
        }
        let now = Instant::now();
        let before = self.viewport.scroll_top();
        self.viewport.set_scroll_top(scroll_top);
        let after = self.viewport.scroll_top();
        let delta = after - before;
        if delta == 0.0 {
            trace!(target: "pipeline", scroll_top, "scroll_clamped_noop");
            return None;
        }

        let elapsed_ms = self
            .last_scroll
            .map(|t| now.saturating_duration_since(t).as_secs_f64() * 1000.0)
            .filter(|ms| *ms > 0.0);
        self.last_scroll = Some(now);
        let direction = if delta > 0.0 {
            ScrollDirection::Down
        } else {
            ScrollDirection::Up
        };
        let speed = elapsed_ms.map_or(0.0, |ms| delta.abs() / ms);
        self.record(Behavior::Scroll { direction, speed });

        self.render.mark_full_render();
        self.warm_neighbours();
        self.preload.update_scroll_at(
            after,
            self.viewport.height(),
            self.viewport.content_height(),
            now,
        )
    }

    /// Page adjacent chunks in when the chunk under the viewport changes.
    fn warm_neighbours(&mut self) {
        let first = self.viewport.visible_range(0).start;
        let Some(center) = self.chunks.chunk_for_line(first) else {
            return;
        };
        if self.center_chunk == Some(center) {
            return;
        }
        self.center_chunk = Some(center);
        let spawned = self.chunks.preload_adjacent_chunks(center).len();
        debug!(target: "pipeline", center, spawned, "center_chunk_changed");
    }

    /// Lines `start..=end` changed in place.
    pub fn on_edit(&mut self, start_line: usize, end_line: usize) -> DirtyOutcome {
        if self.destroyed {
            return DirtyOutcome::Ignored;
        }
        self.record(Behavior::Edit { line: start_line });
        self.render.add_dirty_region(start_line, end_line)
    }

    /// Bring `line` into view. Returns whether the viewport moved.
    pub fn on_jump(&mut self, line: usize) -> bool {
        if self.destroyed {
            return false;
        }
        self.record(Behavior::JumpToLine { line });
        let moved = self.viewport.ensure_line_visible(line);
        if moved {
            self.render.mark_full_render();
            self.warm_neighbours();
            self.last_scroll = None;
        }
        moved
    }

    pub fn on_search(&mut self, query: &str) {
        if self.destroyed {
            return;
        }
        self.record(Behavior::Search {
            query: query.to_string(),
        });
    }

    pub fn on_resize(&mut self, width: f64, height: f64) {
        if self.destroyed {
            return;
        }
        self.viewport.set_size(width, height);
        self.render.set_viewport_size(self.viewport.width(), self.viewport.height());
        self.render.invalidate_static_layer(LayerInvalidation::RESIZE);
        self.render.mark_full_render();
    }

    /// Fetch the visible lines and request a render of them. Returns the
    /// fetched range.
    ///
    /// A coalesced or debounced request paints whatever the latest `frame`
    /// call fetched, with line text re-read from the resident chunks at
    /// paint time.
    pub async fn frame(&mut self, immediate: bool) -> LineRange {
        let range = self.viewport.visible_range(DEFAULT_BUFFER_LINES);
        if self.destroyed {
            return range;
        }
        let (hits, misses) = self.chunks.residency(range.start, range.end);
        let lines = self.chunks.get_lines(range.start, range.end).await;
        self.cache.record_access(CHUNK_CACHE, hits, misses);

        *self.target.lock().unwrap_or_else(|p| p.into_inner()) = Frame {
            range,
            lines,
            scroll_top: self.viewport.scroll_top(),
            line_height: self.viewport.line_height(),
            padding: self.viewport.padding(),
        };
        let target = self.target.clone();
        let chunks = self.chunks.clone();
        let painter = self.painter.clone();
        self.render.request_render(
            move |ctx| {
                let mut frame = target.lock().unwrap_or_else(|p| p.into_inner()).clone();
                if let Some(lines) = chunks.resident_lines(frame.range.start, frame.range.end) {
                    frame.lines = lines;
                }
                let mut painter = painter.lock().unwrap_or_else(|p| p.into_inner());
                painter.paint(&frame, ctx);
            },
            immediate,
        );
        trace!(target: "pipeline", start = range.start, end = range.end, immediate, "frame_requested");
        range
    }

    /// Pre-render the page the predictor expects next. Returns the cached
    /// or freshly rendered output, `None` with no predicted direction.
    pub async fn pre_render_ahead(&mut self) -> Option<Arc<String>> {
        if self.destroyed {
            return None;
        }
        let prediction = self.predict.prediction();
        if prediction.likely_action != ActionKind::Scroll {
            return None;
        }
        let visible = self.viewport.visible_range(0);
        let page = self.viewport.lines_per_page().max(1);
        let total = self.viewport.total_lines();
        let (start, end) = match prediction.next_scroll_direction {
            ScrollDirection::Down => (visible.end.min(total), (visible.end + page).min(total)),
            ScrollDirection::Up => (visible.start.saturating_sub(page), visible.start),
            ScrollDirection::None => return None,
        };
        if start >= end {
            return None;
        }
        let key = format!("lines:{start}-{end}");
        let hits_before = self.predict.stats().pre_render_hits;
        let chunks = self.chunks.clone();
        let painter = self.painter.clone();
        let out = self
            .predict
            .pre_render(key, move || async move {
                let lines = chunks.get_lines(start, end).await;
                let mut painter = painter.lock().unwrap_or_else(|p| p.into_inner());
                Ok::<_, anyhow::Error>(painter.pre_render(LineRange { start, end }, &lines))
            })
            .await;
        let hit = self.predict.stats().pre_render_hits > hits_before;
        self.cache
            .record_access(PRE_RENDER_CACHE, u64::from(hit), u64::from(!hit));
        out
    }

    /// Run one memory rebalancing pass now.
    pub fn rebalance(&self) -> usize {
        self.cache.adjust_cache_sizes()
    }

    pub fn chunks(&self) -> &ChunkManager {
        &self.chunks
    }

    pub fn viewport(&self) -> &ViewportManager {
        &self.viewport
    }

    pub fn render(&self) -> &RenderOptimizer {
        &self.render
    }

    pub fn preload(&self) -> &PreloadManager {
        &self.preload
    }

    pub fn predictor(&self) -> &PredictiveRenderer {
        &self.predict
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            chunks: self.chunks.stats(),
            viewport: self.viewport.stats(),
            render: self.render.stats(),
            cache: self.cache.all_stats(),
            preload: self.preload.stats(),
            predict: self.predict.stats(),
        }
    }

    /// Tear every component down. Idempotent.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.render.destroy();
        self.preload.destroy();
        self.predict.destroy();
        self.cache.destroy();
        self.chunks.destroy();
        info!(target: "pipeline", "pipeline_destroyed");
    }
}

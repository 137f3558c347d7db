//! Paint seam between the pipeline and whatever draws the text.

use core_render::RenderContext;
use core_viewport::LineRange;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lines of one frame, read when the frame is painted.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub range: LineRange,
    /// Text of `range`, one entry per line.
    pub lines: Vec<String>,
    pub scroll_top: f64,
    pub line_height: f64,
    pub padding: f64,
}

/// Draws frames. Runs from the render task with no pipeline lock held.
pub trait Painter: Send {
    fn paint(&mut self, frame: &Frame, ctx: &mut RenderContext<'_>);

    /// Speculative output for lines the user is predicted to reach.
    fn pre_render(&mut self, _range: LineRange, lines: &[String]) -> String {
        lines.join("\n")
    }
}

#[derive(Debug, Default)]
pub struct PaintCounters {
    frames: AtomicU64,
    full_frames: AtomicU64,
    lines_painted: AtomicU64,
    gutter_repaints: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaintSnapshot {
    pub frames: u64,
    pub full_frames: u64,
    pub lines_painted: u64,
    pub gutter_repaints: u64,
}

impl PaintCounters {
    pub fn snapshot(&self) -> PaintSnapshot {
        PaintSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            full_frames: self.full_frames.load(Ordering::Relaxed),
            lines_painted: self.lines_painted.load(Ordering::Relaxed),
            gutter_repaints: self.gutter_repaints.load(Ordering::Relaxed),
        }
    }
}

/// Keeps a text grid of the visible rows and a line-number gutter in the
/// static layer. Only dirty rows are rewritten on incremental frames.
#[derive(Debug, Default)]
pub struct SurfacePainter {
    rows: Vec<String>,
    range: LineRange,
    counters: Arc<PaintCounters>,
}

impl SurfacePainter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared counters; stays valid after the painter moves into a pipeline.
    pub fn counters(&self) -> Arc<PaintCounters> {
        self.counters.clone()
    }

    pub fn rows(&self) -> &[String] {
        &self.rows
    }

    fn repaint_all(&mut self, frame: &Frame) -> usize {
        self.rows.clone_from(&frame.lines);
        self.range = frame.range;
        self.rows.len()
    }

    fn repaint_gutter(frame: &Frame, ctx: &mut RenderContext<'_>) {
        let width = frame.range.end.max(1).to_string().len();
        ctx.static_layer.surface = (frame.range.start..frame.range.end)
            .map(|line| format!("{:>width$}", line + 1))
            .collect();
    }
}

impl Painter for SurfacePainter {
    fn paint(&mut self, frame: &Frame, ctx: &mut RenderContext<'_>) {
        let c = self.counters.clone();
        let full = ctx.full_render || self.range != frame.range;
        let painted = if full {
            c.full_frames.fetch_add(1, Ordering::Relaxed);
            self.repaint_all(frame)
        } else {
            let mut painted = 0;
            for region in ctx.dirty_regions {
                let start = region.start_line.max(frame.range.start);
                let end = (region.end_line + 1).min(frame.range.end);
                for line in start..end {
                    let row = line - frame.range.start;
                    if let (Some(slot), Some(text)) = (self.rows.get_mut(row), frame.lines.get(row)) {
                        slot.clone_from(text);
                        painted += 1;
                    }
                }
            }
            painted
        };
        if ctx.static_layer_dirty || full {
            Self::repaint_gutter(frame, ctx);
            c.gutter_repaints.fetch_add(1, Ordering::Relaxed);
        }
        c.frames.fetch_add(1, Ordering::Relaxed);
        c.lines_painted.fetch_add(painted as u64, Ordering::Relaxed);
    }
}

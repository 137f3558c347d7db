//! Scroll state and document <-> canvas coordinate mapping.
//!
//! Every scroll write goes through `set_scroll_top`, which clamps to
//! `[0, max(0, content_height - height)]`. Vertical geometry is exact; the
//! horizontal mapping is only as precise as the plugged `TextMeasurer`.

mod measure;

pub use measure::{AverageWidthMeasurer, MonospaceMeasurer, TextMeasurer};

use core_config::ViewportConfig;
use tracing::{debug, trace};

/// Default lines rendered beyond each visible edge.
pub const DEFAULT_BUFFER_LINES: usize = 2;

/// Read access to document lines for hit testing.
pub trait LineSource {
    fn line_count(&self) -> usize;
    fn line(&self, index: usize) -> Option<&str>;
}

impl LineSource for [String] {
    fn line_count(&self) -> usize {
        self.len()
    }

    fn line(&self, index: usize) -> Option<&str> {
        self.get(index).map(String::as_str)
    }
}

impl LineSource for Vec<String> {
    fn line_count(&self) -> usize {
        self.len()
    }

    fn line(&self, index: usize) -> Option<&str> {
        self.get(index).map(String::as_str)
    }
}

impl LineSource for [&str] {
    fn line_count(&self) -> usize {
        self.len()
    }

    fn line(&self, index: usize) -> Option<&str> {
        self.get(index).copied()
    }
}

/// Half-open line range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, line: usize) -> bool {
        (self.start..self.end).contains(&line)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DocPosition {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CanvasPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportStats {
    pub width: f64,
    pub height: f64,
    pub line_height: f64,
    pub padding: f64,
    pub scroll_top: f64,
    pub scroll_left: f64,
    pub max_scroll_top: f64,
    pub content_height: f64,
    pub total_lines: usize,
    pub visible: LineRange,
}

pub struct ViewportManager {
    width: f64,
    height: f64,
    line_height: f64,
    padding: f64,
    scroll_top: f64,
    scroll_left: f64,
    content_height: f64,
    total_lines: usize,
    measurer: Box<dyn TextMeasurer>,
}

fn finite_or(v: f64, fallback: f64) -> f64 {
    if v.is_finite() { v } else { fallback }
}

impl ViewportManager {
    pub fn new(config: &ViewportConfig) -> Self {
        Self::with_measurer(config, Box::new(AverageWidthMeasurer::new(config.char_width)))
    }

    pub fn with_measurer(config: &ViewportConfig, measurer: Box<dyn TextMeasurer>) -> Self {
        let line_height = finite_or(config.line_height, 20.0);
        let mut vp = Self {
            width: finite_or(config.width, 0.0).max(0.0),
            height: finite_or(config.height, 0.0).max(0.0),
            line_height: if line_height > 0.0 { line_height } else { 20.0 },
            padding: finite_or(config.padding, 0.0).max(0.0),
            scroll_top: 0.0,
            scroll_left: 0.0,
            content_height: 0.0,
            total_lines: 0,
            measurer,
        };
        vp.recompute_extent();
        vp
    }

    pub fn set_measurer(&mut self, measurer: Box<dyn TextMeasurer>) {
        self.measurer = measurer;
    }

    pub fn measurer(&self) -> &dyn TextMeasurer {
        self.measurer.as_ref()
    }

    fn recompute_extent(&mut self) {
        self.content_height = self.total_lines as f64 * self.line_height + 2.0 * self.padding;
        let top = self.scroll_top;
        self.set_scroll_top(top);
    }

    /// Update the document extent after structural changes.
    pub fn set_total_lines(&mut self, total_lines: usize) {
        self.total_lines = total_lines;
        self.recompute_extent();
        debug!(
            target: "viewport",
            total_lines,
            content_height = self.content_height,
            "extent_updated"
        );
    }

    /// Change chrome padding (e.g. line numbers toggled).
    pub fn set_padding(&mut self, padding: f64) {
        self.padding = finite_or(padding, 0.0).max(0.0);
        self.recompute_extent();
    }

    pub fn set_size(&mut self, width: f64, height: f64) {
        self.width = finite_or(width, 0.0).max(0.0);
        self.height = finite_or(height, 0.0).max(0.0);
        self.recompute_extent();
        debug!(target: "viewport", width = self.width, height = self.height, "viewport_resized");
    }

    pub fn max_scroll_top(&self) -> f64 {
        (self.content_height - self.height).max(0.0)
    }

    /// Clamp and store the vertical scroll offset. NaN becomes 0.
    pub fn set_scroll_top(&mut self, value: f64) {
        let v = if value.is_nan() { 0.0 } else { value };
        self.scroll_top = v.clamp(0.0, self.max_scroll_top());
        trace!(target: "viewport", requested = value, scroll_top = self.scroll_top, "scroll_top_set");
    }

    pub fn set_scroll_left(&mut self, value: f64) {
        self.scroll_left = if value.is_nan() { 0.0 } else { value.max(0.0) };
        if self.scroll_left.is_infinite() {
            self.scroll_left = 0.0;
        }
    }

    pub fn scroll_top(&self) -> f64 {
        self.scroll_top
    }

    pub fn scroll_left(&self) -> f64 {
        self.scroll_left
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn line_height(&self) -> f64 {
        self.line_height
    }

    pub fn padding(&self) -> f64 {
        self.padding
    }

    pub fn content_height(&self) -> f64 {
        self.content_height
    }

    pub fn total_lines(&self) -> usize {
        self.total_lines
    }

    /// Lines that fit in the viewport height (`ceil(height / line_height)`).
    pub fn lines_per_page(&self) -> usize {
        (self.height / self.line_height).ceil() as usize
    }

    /// Rows to render: the visible rows widened by `buffer` lines each side.
    pub fn visible_range(&self, buffer: usize) -> LineRange {
        let first = (self.scroll_top / self.line_height).floor() as usize;
        let start = first.saturating_sub(buffer);
        let end = (start + self.lines_per_page() + 2 * buffer + 1).min(self.total_lines);
        LineRange {
            start: start.min(end),
            end,
        }
    }

    /// Document line under canvas `y`, clamped to the document.
    pub fn line_at_y(&self, y: f64) -> usize {
        let doc_y = finite_or(y, 0.0) + self.scroll_top - self.padding;
        let line = (doc_y / self.line_height + 1e-9).floor();
        if line <= 0.0 {
            return 0;
        }
        (line as usize).min(self.total_lines.saturating_sub(1))
    }

    /// Canvas coordinates of the top-left corner of `pos`.
    pub fn doc_to_canvas<L: LineSource + ?Sized>(&self, pos: DocPosition, lines: &L) -> CanvasPoint {
        let text = lines.line(pos.line).unwrap_or("");
        CanvasPoint {
            x: self.padding + self.measurer.column_x(text, pos.column) - self.scroll_left,
            y: self.padding + pos.line as f64 * self.line_height - self.scroll_top,
        }
    }

    pub fn canvas_to_doc<L: LineSource + ?Sized>(&self, point: CanvasPoint, lines: &L) -> DocPosition {
        let line = self.line_at_y(point.y);
        let text = lines.line(line).unwrap_or("");
        let text_x = finite_or(point.x, 0.0) - self.padding + self.scroll_left;
        DocPosition {
            line,
            column: self.measurer.column_from_x(text, text_x),
        }
    }

    /// Put `line` at the top of the viewport (subject to the clamp).
    pub fn scroll_to_line(&mut self, line: usize) {
        self.set_scroll_top(line as f64 * self.line_height);
    }

    /// Scroll only when `line` is entirely outside the viewport. Returns
    /// whether the scroll offset changed.
    pub fn ensure_line_visible(&mut self, line: usize) -> bool {
        let top = self.padding + line as f64 * self.line_height - self.scroll_top;
        let bottom = top + self.line_height;
        let before = self.scroll_top;
        if bottom <= 0.0 {
            self.scroll_to_line(line);
        } else if top >= self.height {
            let line_bottom = self.padding + (line + 1) as f64 * self.line_height;
            self.set_scroll_top(line_bottom - self.height);
        } else {
            return false;
        }
        let moved = self.scroll_top != before;
        if moved {
            debug!(target: "viewport", line, scroll_top = self.scroll_top, "scrolled_into_view");
        }
        moved
    }

    pub fn stats(&self) -> ViewportStats {
        ViewportStats {
            width: self.width,
            height: self.height,
            line_height: self.line_height,
            padding: self.padding,
            scroll_top: self.scroll_top,
            scroll_left: self.scroll_left,
            max_scroll_top: self.max_scroll_top(),
            content_height: self.content_height,
            total_lines: self.total_lines,
            visible: self.visible_range(DEFAULT_BUFFER_LINES),
        }
    }
}

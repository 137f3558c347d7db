//! Column <-> pixel measurement.
//!
//! Columns are grapheme cluster indices within a line. `AverageWidthMeasurer`
//! approximates every cluster as `char_width` pixels, so mapping a pixel
//! back to a column is only exact for plain ASCII. `MonospaceMeasurer`
//! counts terminal-style cells (wide clusters take two) and round-trips
//! exactly for fixed-pitch fonts.

use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

/// Slack for float comparisons when snapping pixels to cell edges.
const EDGE_EPSILON: f64 = 1e-6;

pub trait TextMeasurer: Send + Sync {
    /// Nominal width of one column in pixels.
    fn char_width(&self) -> f64;
    /// Left edge of `column` within `line`, relative to the text origin.
    fn column_x(&self, line: &str, column: usize) -> f64;
    /// Column whose cell contains `x`, clamped to `[0, column_count]`.
    fn column_from_x(&self, line: &str, x: f64) -> usize;
}

fn grapheme_count(line: &str) -> usize {
    line.graphemes(true).count()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AverageWidthMeasurer {
    char_width: f64,
}

impl AverageWidthMeasurer {
    pub fn new(char_width: f64) -> Self {
        let char_width = if char_width.is_finite() && char_width > 0.0 {
            char_width
        } else {
            8.0
        };
        Self { char_width }
    }
}

impl TextMeasurer for AverageWidthMeasurer {
    fn char_width(&self) -> f64 {
        self.char_width
    }

    fn column_x(&self, _line: &str, column: usize) -> f64 {
        column as f64 * self.char_width
    }

    fn column_from_x(&self, line: &str, x: f64) -> usize {
        if !x.is_finite() || x <= 0.0 {
            return 0;
        }
        ((x / self.char_width).round() as usize).min(grapheme_count(line))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonospaceMeasurer {
    cell_width: f64,
}

impl MonospaceMeasurer {
    pub fn new(cell_width: f64) -> Self {
        let cell_width = if cell_width.is_finite() && cell_width > 0.0 {
            cell_width
        } else {
            8.0
        };
        Self { cell_width }
    }

    /// Display cells of one grapheme; zero-width clusters still occupy one.
    fn cells(egc: &str) -> usize {
        egc.width().max(1)
    }
}

impl TextMeasurer for MonospaceMeasurer {
    fn char_width(&self) -> f64 {
        self.cell_width
    }

    fn column_x(&self, line: &str, column: usize) -> f64 {
        let cells: usize = line.graphemes(true).take(column).map(Self::cells).sum();
        // Columns past the end extend with single cells.
        let past_end = column.saturating_sub(grapheme_count(line));
        (cells + past_end) as f64 * self.cell_width
    }

    fn column_from_x(&self, line: &str, x: f64) -> usize {
        if !x.is_finite() || x <= 0.0 {
            return 0;
        }
        let target = x / self.cell_width + EDGE_EPSILON;
        let mut edge = 0usize;
        for (column, egc) in line.graphemes(true).enumerate() {
            let next = edge + Self::cells(egc);
            if (next as f64) > target {
                return column;
            }
            edge = next;
        }
        grapheme_count(line)
    }
}

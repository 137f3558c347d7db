//! Deterministic scripted reading session used to drive the pipeline.

use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Absolute scroll offset in px.
    Scroll(f64),
    /// Inclusive line range edited in place.
    Edit(usize, usize),
    Jump(usize),
    Search(String),
}

/// Where the reader is when the next step is chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cursor {
    pub scroll_top: f64,
    pub first_visible: usize,
    pub total_lines: usize,
    pub line_height: f64,
    pub page_lines: usize,
}

/// Step `n` of the session. Cycles through slow reading, page flicks and a
/// short scroll back, with periodic edits, searches and jumps mixed in.
pub fn next_step(n: usize, at: Cursor) -> Step {
    if n > 0 && n % 97 == 0 && at.total_lines > 0 {
        return Step::Jump((n * 7919) % at.total_lines);
    }
    if n > 0 && n % 40 == 0 {
        return Step::Search(format!("## Section {}", n / 40));
    }
    if n > 0 && n % 25 == 0 {
        let line = (at.first_visible + 5).min(at.total_lines.saturating_sub(1));
        return Step::Edit(line, line + 1);
    }
    let delta = match n % 50 {
        0..30 => 3.0 * at.line_height,
        30..40 => at.page_lines as f64 * at.line_height,
        _ => -2.0 * at.line_height,
    };
    Step::Scroll((at.scroll_top + delta).max(0.0))
}

/// Synthetic Markdown document of exactly `lines` lines.
pub fn generate_markdown(lines: usize) -> String {
    let mut out = String::new();
    for i in 0..lines {
        if i > 0 {
            out.push('\n');
        }
        let _ = match i % 40 {
            0 => write!(out, "## Section {}", i / 40 + 1),
            1 | 12 | 24 => Ok(()),
            13 => write!(out, "```rust"),
            14..=17 => write!(out, "let value_{i} = {i} * 2;"),
            18 => write!(out, "```"),
            25..=29 => write!(out, "- item {} of the list", i % 40 - 24),
            _ => write!(out, "Paragraph text on line {i}, wrapped for reading."),
        };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cursor(scroll_top: f64) -> Cursor {
        Cursor {
            scroll_top,
            first_visible: (scroll_top / 20.0) as usize,
            total_lines: 1000,
            line_height: 20.0,
            page_lines: 30,
        }
    }

    #[test]
    fn reading_phases() {
        assert_eq!(next_step(1, cursor(0.0)), Step::Scroll(60.0));
        assert_eq!(next_step(31, cursor(100.0)), Step::Scroll(700.0));
        assert_eq!(next_step(45, cursor(100.0)), Step::Scroll(60.0));
        assert_eq!(next_step(49, cursor(10.0)), Step::Scroll(0.0));
    }

    #[test]
    fn periodic_actions() {
        assert_eq!(next_step(25, cursor(200.0)), Step::Edit(15, 16));
        assert_eq!(next_step(80, cursor(0.0)), Step::Search("## Section 2".into()));
        assert_eq!(next_step(97, cursor(0.0)), Step::Jump(97 * 7919 % 1000));
    }

    #[test]
    fn generated_document_has_requested_length() {
        let doc = generate_markdown(85);
        assert_eq!(doc.lines().count(), 85);
        assert!(doc.starts_with("## Section 1\n"));
        assert_eq!(doc.lines().nth(40), Some("## Section 2"));
        assert_eq!(generate_markdown(0), "");
    }
}

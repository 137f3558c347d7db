//! Dirty region tracking.
//!
//! Regions are inclusive line ranges. Every insert re-runs a sort-then-sweep
//! merge, so the set stays sorted by `start_line` and no two regions overlap
//! or sit within `MERGE_GAP` lines of each other.
//!
//! Once a full render is pending, further regions are ignored: the next
//! frame repaints everything anyway.

/// Regions whose start lies within this many lines of the previous region's
/// end are merged into it.
pub const MERGE_GAP: usize = 2;
/// More regions than this forces a full render.
pub const MAX_REGIONS: usize = 15;
/// Fraction of the visible rows that, once dirty, forces a full render.
pub const COVERAGE_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRegion {
    pub start_line: usize,
    pub end_line: usize,
}

impl DirtyRegion {
    /// Build a region; reversed bounds are swapped.
    pub fn new(start_line: usize, end_line: usize) -> Self {
        Self {
            start_line: start_line.min(end_line),
            end_line: start_line.max(end_line),
        }
    }

    pub fn line_count(&self) -> usize {
        self.end_line - self.start_line + 1
    }

    pub fn contains(&self, line: usize) -> bool {
        (self.start_line..=self.end_line).contains(&line)
    }
}

/// Outcome of `DirtyRegionSet::add`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyOutcome {
    /// Region recorded (possibly merged).
    Tracked,
    /// A full render was already pending; region dropped.
    Ignored,
    /// The add pushed the set over a threshold and it collapsed to full.
    Escalated,
}

#[derive(Debug, Default, Clone)]
pub struct DirtyRegionSet {
    regions: Vec<DirtyRegion>,
    full: bool,
}

impl DirtyRegionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `[start, end]` and decide whether to promote to a full render
    /// against a viewport of `viewport_height` pixels.
    pub fn add(
        &mut self,
        start: usize,
        end: usize,
        viewport_height: f64,
        line_height: f64,
    ) -> DirtyOutcome {
        if self.full {
            return DirtyOutcome::Ignored;
        }
        self.regions.push(DirtyRegion::new(start, end));
        self.merge();
        if self.should_trigger_full_render(viewport_height, line_height) {
            self.mark_full();
            return DirtyOutcome::Escalated;
        }
        DirtyOutcome::Tracked
    }

    fn merge(&mut self) {
        if self.regions.len() < 2 {
            return;
        }
        self.regions.sort_unstable_by_key(|r| (r.start_line, r.end_line));
        let mut merged: Vec<DirtyRegion> = Vec::with_capacity(self.regions.len());
        for r in self.regions.drain(..) {
            match merged.last_mut() {
                Some(last) if r.start_line <= last.end_line.saturating_add(MERGE_GAP) => {
                    last.end_line = last.end_line.max(r.end_line);
                }
                _ => merged.push(r),
            }
        }
        self.regions = merged;
    }

    /// Too many regions, or dirty lines above 70% of
    /// `ceil(viewport_height / line_height)`.
    pub fn should_trigger_full_render(&self, viewport_height: f64, line_height: f64) -> bool {
        if self.full || self.regions.len() > MAX_REGIONS {
            return true;
        }
        if self.regions.is_empty() || line_height.is_nan() || line_height <= 0.0 {
            return false;
        }
        let visible = (viewport_height.max(0.0) / line_height).ceil();
        self.dirty_line_count() as f64 > visible * COVERAGE_THRESHOLD
    }

    pub fn mark_full(&mut self) {
        self.full = true;
        self.regions.clear();
    }

    pub fn full_render_pending(&self) -> bool {
        self.full
    }

    pub fn regions(&self) -> &[DirtyRegion] {
        &self.regions
    }

    pub fn dirty_line_count(&self) -> usize {
        self.regions.iter().map(DirtyRegion::line_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        !self.full && self.regions.is_empty()
    }

    /// Consume the pending state: `(full, regions)`. The set is empty after.
    pub fn take(&mut self) -> (bool, Vec<DirtyRegion>) {
        let full = std::mem::take(&mut self.full);
        (full, std::mem::take(&mut self.regions))
    }

    pub fn clear(&mut self) {
        self.full = false;
        self.regions.clear();
    }
}

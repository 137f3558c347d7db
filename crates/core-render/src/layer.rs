//! Offscreen static layer (gutter, background).
//!
//! Static content is painted into the layer only when it is dirty and blitted
//! from it otherwise. Theme, line-number visibility, font metrics, line count
//! and viewport size changes all invalidate it.

use bitflags::bitflags;

bitflags! {
    /// Why the static layer must be repainted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LayerInvalidation: u8 {
        const THEME        = 0b0000_0001;
        const LINE_NUMBERS = 0b0000_0010;
        const FONT_METRICS = 0b0000_0100;
        const LINE_COUNT   = 0b0000_1000;
        const RESIZE       = 0b0001_0000;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffscreenLayer {
    width: f64,
    height: f64,
    reasons: LayerInvalidation,
    repaints: u64,
    /// Rows of cached static content; owned by the painter.
    pub surface: Vec<String>,
}

impl OffscreenLayer {
    /// New layers start dirty.
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            reasons: LayerInvalidation::RESIZE,
            repaints: 0,
            surface: Vec::new(),
        }
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn is_dirty(&self) -> bool {
        !self.reasons.is_empty()
    }

    pub fn invalidations(&self) -> LayerInvalidation {
        self.reasons
    }

    /// Times the static content was repainted.
    pub fn repaints(&self) -> u64 {
        self.repaints
    }

    pub fn invalidate(&mut self, why: LayerInvalidation) {
        self.reasons |= why;
    }

    /// Resize; a real size change drops the cached surface.
    pub fn resize(&mut self, width: f64, height: f64) -> bool {
        if self.width == width && self.height == height {
            return false;
        }
        self.width = width;
        self.height = height;
        self.surface.clear();
        self.invalidate(LayerInvalidation::RESIZE);
        true
    }

    pub(crate) fn mark_painted(&mut self) {
        self.reasons = LayerInvalidation::empty();
        self.repaints += 1;
    }
}

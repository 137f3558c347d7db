//! Session behavior learning and speculative pre-rendering.
//!
//! Every recorded behavior updates an EWMA profile (`PatternVector`) and
//! yields a fresh `Prediction`, which the preloader uses to size its
//! lookahead. A small FIFO cache memoizes speculative render results keyed by
//! caller-chosen strings.

mod patterns;
mod renderer;

pub use patterns::{PatternVector, Prediction};
pub use renderer::{PatternAnalysis, PredictStats, PredictiveRenderer};

/// Vertical scroll direction. `None` when the position did not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScrollDirection {
    Up,
    Down,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpeedClass {
    Slow,
    Normal,
    Fast,
}

/// Coarse action category used for prediction and pattern analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Scroll,
    JumpToLine,
    Search,
    Edit,
}

/// A user behavior with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Behavior {
    /// `speed` in px/ms.
    Scroll {
        direction: ScrollDirection,
        speed: f64,
    },
    JumpToLine {
        line: usize,
    },
    Search {
        query: String,
    },
    Edit {
        line: usize,
    },
}

impl Behavior {
    pub fn kind(&self) -> ActionKind {
        match self {
            Behavior::Scroll { .. } => ActionKind::Scroll,
            Behavior::JumpToLine { .. } => ActionKind::JumpToLine,
            Behavior::Search { .. } => ActionKind::Search,
            Behavior::Edit { .. } => ActionKind::Edit,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BehaviorRecord {
    pub behavior: Behavior,
    pub timestamp: tokio::time::Instant,
}

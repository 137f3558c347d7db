//! EWMA behavior profile and the prediction derived from it.

use crate::{ActionKind, Behavior, ScrollDirection, SpeedClass};

/// Minimum smoothed signal before a speed class is trusted.
const SPEED_CONFIDENCE: f64 = 0.3;

/// Smoothed frequency of each behavior signal, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PatternVector {
    pub scroll_down: f64,
    pub scroll_up: f64,
    pub fast_scroll: f64,
    pub slow_scroll: f64,
    pub jump_to_line: f64,
    pub search: f64,
    pub edit: f64,
}

fn ewma(v: f64, alpha: f64, hit: bool) -> f64 {
    v * (1.0 - alpha) + alpha * if hit { 1.0 } else { 0.0 }
}

impl PatternVector {
    /// Fold one behavior into every signal.
    pub fn update(&mut self, behavior: &Behavior, alpha: f64, fast_speed: f64) {
        let (down, up, fast, slow) = match *behavior {
            Behavior::Scroll { direction, speed } => {
                let fast = speed >= fast_speed;
                (
                    direction == ScrollDirection::Down,
                    direction == ScrollDirection::Up,
                    fast,
                    !fast,
                )
            }
            _ => (false, false, false, false),
        };
        self.scroll_down = ewma(self.scroll_down, alpha, down);
        self.scroll_up = ewma(self.scroll_up, alpha, up);
        self.fast_scroll = ewma(self.fast_scroll, alpha, fast);
        self.slow_scroll = ewma(self.slow_scroll, alpha, slow);
        self.jump_to_line = ewma(
            self.jump_to_line,
            alpha,
            matches!(behavior, Behavior::JumpToLine { .. }),
        );
        self.search = ewma(self.search, alpha, matches!(behavior, Behavior::Search { .. }));
        self.edit = ewma(self.edit, alpha, matches!(behavior, Behavior::Edit { .. }));
    }

    pub fn predict(&self) -> Prediction {
        let next_scroll_direction = if self.scroll_down > self.scroll_up {
            ScrollDirection::Down
        } else if self.scroll_up > self.scroll_down {
            ScrollDirection::Up
        } else {
            ScrollDirection::None
        };
        let next_scroll_speed =
            if self.fast_scroll > self.slow_scroll && self.fast_scroll >= SPEED_CONFIDENCE {
                SpeedClass::Fast
            } else if self.slow_scroll > self.fast_scroll && self.slow_scroll >= SPEED_CONFIDENCE {
                SpeedClass::Slow
            } else {
                SpeedClass::Normal
            };
        let candidates = [
            (ActionKind::Scroll, self.scroll_down + self.scroll_up),
            (ActionKind::JumpToLine, self.jump_to_line),
            (ActionKind::Search, self.search),
            (ActionKind::Edit, self.edit),
        ];
        let mut likely_action = ActionKind::Scroll;
        let mut best = f64::NEG_INFINITY;
        for (kind, score) in candidates {
            if score > best {
                best = score;
                likely_action = kind;
            }
        }
        Prediction {
            next_scroll_direction,
            next_scroll_speed,
            likely_action,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prediction {
    pub next_scroll_direction: ScrollDirection,
    pub next_scroll_speed: SpeedClass,
    pub likely_action: ActionKind,
}

impl Default for Prediction {
    fn default() -> Self {
        Self {
            next_scroll_direction: ScrollDirection::None,
            next_scroll_speed: SpeedClass::Normal,
            likely_action: ActionKind::Scroll,
        }
    }
}

//! Render scheduling for the virtualized view.
//!
//! `RenderOptimizer` sits between input handlers and the paint callback. It
//! answers two questions per frame:
//!
//! * What: dirty line regions are merged as they arrive (`dirty`). When the
//!   set grows past 15 regions or covers more than 70% of the visible rows it
//!   collapses into a single full render. The offscreen static layer
//!   (`layer`) is repainted only after an explicit invalidation.
//! * When: `immediate` requests paint synchronously. Everything else goes
//!   through the pacer (`scheduler`): animation-frame coalescing limited to
//!   `target_fps`, or a trailing debounce where the latest callback wins.
//!
//! Frame accounting (`metrics`, `timing`) feeds `RenderOptimizer::stats`.
//!
//! Failure policy: a panicking paint callback is caught and logged under
//! `render.optimizer`; the frame still counts and dirty state is consumed so
//! the next request starts clean.

pub mod dirty;
pub mod layer;
pub mod metrics;
pub mod optimizer;
pub mod scheduler;
pub mod timing;

pub use dirty::{DirtyOutcome, DirtyRegion, DirtyRegionSet};
pub use layer::{LayerInvalidation, OffscreenLayer};
pub use metrics::{RenderMetrics, RenderMetricsSnapshot};
pub use optimizer::{PaintFn, RenderContext, RenderOptimizer, RenderStats};
pub use scheduler::{FramePacer, ScheduleMode};
pub use timing::FrameTiming;

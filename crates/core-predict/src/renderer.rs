use crate::{ActionKind, Behavior, BehaviorRecord, PatternVector, Prediction};
use core_cache::BoundedMap;
use core_config::PredictConfig;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

/// Behaviors retained for analysis.
pub const HISTORY_LIMIT: usize = 100;
/// Window used by `analyze_patterns`.
pub const ANALYSIS_WINDOW: usize = 20;

pub type PredictCallback = Box<dyn Fn(&Prediction) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternAnalysis {
    /// Most frequent action in the window; `None` with no history.
    pub dominant_action: Option<ActionKind>,
    /// Share of the window taken by the dominant action.
    pub consistency: f64,
    pub sample_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictStats {
    pub behaviors_recorded: u64,
    pub history_len: usize,
    pub patterns: PatternVector,
    pub prediction: Prediction,
    pub predictions_validated: u64,
    pub predictions_correct: u64,
    pub accuracy: f64,
    pub pre_render_hits: u64,
    pub pre_render_misses: u64,
    pub pre_render_failures: u64,
    pub pre_render_cached: usize,
}

#[derive(Debug, Default)]
struct PreRenderCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
}

pub struct PredictiveRenderer {
    config: PredictConfig,
    history: VecDeque<BehaviorRecord>,
    patterns: PatternVector,
    prediction: Prediction,
    on_predict: Option<PredictCallback>,
    cache: Arc<BoundedMap<String, Arc<String>>>,
    recorded: u64,
    validated: u64,
    correct: u64,
    counters: PreRenderCounters,
    destroyed: bool,
}

impl PredictiveRenderer {
    pub fn new(config: PredictConfig) -> Self {
        let cache = Arc::new(BoundedMap::new(config.pre_render_cache_size));
        Self {
            config,
            history: VecDeque::with_capacity(HISTORY_LIMIT),
            patterns: PatternVector::default(),
            prediction: Prediction::default(),
            on_predict: None,
            cache,
            recorded: 0,
            validated: 0,
            correct: 0,
            counters: PreRenderCounters::default(),
            destroyed: false,
        }
    }

    /// Called with every recomputed prediction.
    pub fn set_on_predict<F>(&mut self, callback: F)
    where
        F: Fn(&Prediction) + Send + Sync + 'static,
    {
        self.on_predict = Some(Box::new(callback));
    }

    /// Record a behavior, update the profile and return the new prediction.
    pub fn record_behavior(&mut self, behavior: Behavior) -> Prediction {
        if self.destroyed {
            return self.prediction;
        }
        let alpha = self.config.learning_rate;
        self.patterns
            .update(&behavior, alpha, self.config.fast_scroll_speed);
        trace!(target: "predict", kind = ?behavior.kind(), "behavior_recorded");
        self.history.push_back(BehaviorRecord {
            behavior,
            timestamp: tokio::time::Instant::now(),
        });
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.recorded += 1;

        let previous = self.prediction;
        self.prediction = self.patterns.predict();
        if previous != self.prediction {
            debug!(
                target: "predict",
                direction = ?self.prediction.next_scroll_direction,
                speed = ?self.prediction.next_scroll_speed,
                action = ?self.prediction.likely_action,
                "prediction_changed"
            );
        }
        if let Some(cb) = &self.on_predict {
            cb(&self.prediction);
        }
        self.prediction
    }

    pub fn prediction(&self) -> Prediction {
        self.prediction
    }

    pub fn patterns(&self) -> PatternVector {
        self.patterns
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Return the cached result for `key` or run `render` and cache its
    /// output. Render failures are logged and yield `None`.
    pub async fn pre_render<F, Fut>(&self, key: impl Into<String>, render: F) -> Option<Arc<String>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<String>>,
    {
        if self.destroyed {
            return None;
        }
        let key = key.into();
        if let Some(hit) = self.cache.get(&key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            trace!(target: "predict", key = key.as_str(), "pre_render_hit");
            return Some(hit);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        match render().await {
            Ok(content) => {
                let content = Arc::new(content);
                self.cache.insert(key, content.clone());
                Some(content)
            }
            Err(err) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(target: "predict", key = key.as_str(), error = %err, "pre_render_failed");
                None
            }
        }
    }

    pub fn pre_rendered(&self, key: &str) -> Option<Arc<String>> {
        self.cache.get(&key.to_string())
    }

    /// Store shared with `CacheManager` registrations.
    pub fn pre_render_cache(&self) -> Arc<BoundedMap<String, Arc<String>>> {
        self.cache.clone()
    }

    /// Compare the current prediction with what actually happened.
    pub fn validate_prediction(&mut self, actual: ActionKind) -> bool {
        let hit = self.prediction.likely_action == actual;
        self.validated += 1;
        if hit {
            self.correct += 1;
        }
        hit
    }

    pub fn accuracy(&self) -> f64 {
        if self.validated == 0 {
            0.0
        } else {
            self.correct as f64 / self.validated as f64
        }
    }

    /// Dominant action and its share over the last `ANALYSIS_WINDOW`
    /// behaviors.
    pub fn analyze_patterns(&self) -> PatternAnalysis {
        let window: Vec<ActionKind> = self
            .history
            .iter()
            .rev()
            .take(ANALYSIS_WINDOW)
            .map(|r| r.behavior.kind())
            .collect();
        let sample_size = window.len();
        let mut best: Option<(ActionKind, usize)> = None;
        for kind in [
            ActionKind::Scroll,
            ActionKind::JumpToLine,
            ActionKind::Search,
            ActionKind::Edit,
        ] {
            let count = window.iter().filter(|&&k| k == kind).count();
            if count > 0 && best.is_none_or(|(_, c)| count > c) {
                best = Some((kind, count));
            }
        }
        PatternAnalysis {
            dominant_action: best.map(|(k, _)| k),
            consistency: match best {
                Some((_, c)) => c as f64 / sample_size as f64,
                None => 0.0,
            },
            sample_size,
        }
    }

    pub fn stats(&self) -> PredictStats {
        PredictStats {
            behaviors_recorded: self.recorded,
            history_len: self.history.len(),
            patterns: self.patterns,
            prediction: self.prediction,
            predictions_validated: self.validated,
            predictions_correct: self.correct,
            accuracy: self.accuracy(),
            pre_render_hits: self.counters.hits.load(Ordering::Relaxed),
            pre_render_misses: self.counters.misses.load(Ordering::Relaxed),
            pre_render_failures: self.counters.failures.load(Ordering::Relaxed),
            pre_render_cached: self.cache.len(),
        }
    }

    /// Drop history, cached renders and the callback. Idempotent.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.history.clear();
        self.cache.clear();
        self.on_predict = None;
        debug!(target: "predict", "predictive_renderer_destroyed");
    }
}

//! Configuration loading and parsing.
//!
//! Parses `mdv.toml` (or an override path provided by the binary) into one
//! explicit struct per component. Every field has a default so a missing file,
//! a missing section or a missing key all resolve to the documented defaults:
//!
//! ```toml
//! version = 1
//! [chunks]   chunk_size = 1000, max_loaded_chunks = 10, preload_chunks = 2
//! [render]   debounce_delay_ms = 16, target_fps = 60, use_raf = true
//! [cache]    total_memory_limit = 52428800, cleanup_interval_ms = 30000
//! [preload]  preload_lines = 10, preload_threshold = 0.3
//! [predict]  learning_rate = 0.1
//! ```
//!
//! Unknown fields are ignored so newer files keep loading on older builds.
//! Values that would wedge a component (zero chunk size, zero fps, ratios
//! outside `[0, 1]`) are clamped by `Config::sanitize` and logged under the
//! `config` target.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::PathBuf, time::Duration};
use tracing::{info, warn};

/// Version of the configuration layout understood by this build.
pub const CONFIG_VERSION: u32 = 1;

/// Local file name looked up by `discover`.
pub const CONFIG_FILE_NAME: &str = "mdv.toml";

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ChunkConfig {
    #[serde(default = "ChunkConfig::default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "ChunkConfig::default_max_loaded_chunks")]
    pub max_loaded_chunks: usize,
    #[serde(default = "ChunkConfig::default_preload_chunks")]
    pub preload_chunks: usize,
    /// Upper bound for a single `ChunkSource` load before it degrades to empty.
    #[serde(default = "ChunkConfig::default_storage_timeout_ms")]
    pub storage_timeout_ms: u64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: Self::default_chunk_size(),
            max_loaded_chunks: Self::default_max_loaded_chunks(),
            preload_chunks: Self::default_preload_chunks(),
            storage_timeout_ms: Self::default_storage_timeout_ms(),
        }
    }
}

impl ChunkConfig {
    const fn default_chunk_size() -> usize {
        1000
    }
    const fn default_max_loaded_chunks() -> usize {
        10
    }
    const fn default_preload_chunks() -> usize {
        2
    }
    const fn default_storage_timeout_ms() -> u64 {
        5000
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ViewportConfig {
    #[serde(default = "ViewportConfig::default_width")]
    pub width: f64,
    #[serde(default = "ViewportConfig::default_height")]
    pub height: f64,
    #[serde(default = "ViewportConfig::default_line_height")]
    pub line_height: f64,
    #[serde(default = "ViewportConfig::default_padding")]
    pub padding: f64,
    /// Average glyph advance used when no precise measurer is plugged in.
    #[serde(default = "ViewportConfig::default_char_width")]
    pub char_width: f64,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            width: Self::default_width(),
            height: Self::default_height(),
            line_height: Self::default_line_height(),
            padding: Self::default_padding(),
            char_width: Self::default_char_width(),
        }
    }
}

impl ViewportConfig {
    const fn default_width() -> f64 {
        800.0
    }
    const fn default_height() -> f64 {
        600.0
    }
    const fn default_line_height() -> f64 {
        20.0
    }
    const fn default_padding() -> f64 {
        10.0
    }
    const fn default_char_width() -> f64 {
        8.0
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RenderConfig {
    #[serde(default = "RenderConfig::default_debounce_delay_ms")]
    pub debounce_delay_ms: u64,
    #[serde(default = "RenderConfig::default_target_fps")]
    pub target_fps: u32,
    /// Frame-aligned scheduling when true, trailing debounce when false.
    #[serde(default = "RenderConfig::default_use_raf")]
    pub use_raf: bool,
    /// Cadence of the emulated display refresh used by frame-aligned scheduling.
    #[serde(default = "RenderConfig::default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            debounce_delay_ms: Self::default_debounce_delay_ms(),
            target_fps: Self::default_target_fps(),
            use_raf: Self::default_use_raf(),
            refresh_interval_ms: Self::default_refresh_interval_ms(),
        }
    }
}

impl RenderConfig {
    const fn default_debounce_delay_ms() -> u64 {
        16
    }
    const fn default_target_fps() -> u32 {
        60
    }
    const fn default_use_raf() -> bool {
        true
    }
    const fn default_refresh_interval_ms() -> u64 {
        16
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_delay_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    /// Minimum spacing between two painted frames (`1000 / target_fps` ms).
    pub fn min_frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.target_fps.max(1)))
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CacheConfig {
    /// Global budget in bytes shared by every registered cache.
    #[serde(default = "CacheConfig::default_total_memory_limit")]
    pub total_memory_limit: usize,
    #[serde(default = "CacheConfig::default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            total_memory_limit: Self::default_total_memory_limit(),
            cleanup_interval_ms: Self::default_cleanup_interval_ms(),
        }
    }
}

impl CacheConfig {
    const fn default_total_memory_limit() -> usize {
        50 * 1024 * 1024
    }
    const fn default_cleanup_interval_ms() -> u64 {
        30_000
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PreloadConfig {
    #[serde(default = "PreloadConfig::default_preload_lines")]
    pub preload_lines: usize,
    /// Fraction of the viewport height that arms a preload near either edge.
    #[serde(default = "PreloadConfig::default_preload_threshold")]
    pub preload_threshold: f64,
    #[serde(default = "PreloadConfig::default_preload_timeout_ms")]
    pub preload_timeout_ms: u64,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            preload_lines: Self::default_preload_lines(),
            preload_threshold: Self::default_preload_threshold(),
            preload_timeout_ms: Self::default_preload_timeout_ms(),
        }
    }
}

impl PreloadConfig {
    const fn default_preload_lines() -> usize {
        10
    }
    const fn default_preload_threshold() -> f64 {
        0.3
    }
    const fn default_preload_timeout_ms() -> u64 {
        5000
    }

    pub fn preload_timeout(&self) -> Duration {
        Duration::from_millis(self.preload_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PredictConfig {
    /// EWMA smoothing factor (alpha).
    #[serde(default = "PredictConfig::default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "PredictConfig::default_pre_render_cache_size")]
    pub pre_render_cache_size: usize,
    /// Scroll speed (px/ms) at or above which a scroll counts as fast.
    #[serde(default = "PredictConfig::default_fast_scroll_speed")]
    pub fast_scroll_speed: f64,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            learning_rate: Self::default_learning_rate(),
            pre_render_cache_size: Self::default_pre_render_cache_size(),
            fast_scroll_speed: Self::default_fast_scroll_speed(),
        }
    }
}

impl PredictConfig {
    const fn default_learning_rate() -> f64 {
        0.1
    }
    const fn default_pre_render_cache_size() -> usize {
        10
    }
    const fn default_fast_scroll_speed() -> f64 {
        2.0
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ConfigFile {
    #[serde(default = "ConfigFile::default_version")]
    pub version: u32,
    #[serde(default)]
    pub chunks: ChunkConfig,
    #[serde(default)]
    pub viewport: ViewportConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub preload: PreloadConfig,
    #[serde(default)]
    pub predict: PredictConfig,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            chunks: ChunkConfig::default(),
            viewport: ViewportConfig::default(),
            render: RenderConfig::default(),
            cache: CacheConfig::default(),
            preload: PreloadConfig::default(),
            predict: PredictConfig::default(),
        }
    }
}

impl ConfigFile {
    const fn default_version() -> u32 {
        CONFIG_VERSION
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub raw: Option<String>, // original file string (optional)
    pub file: ConfigFile,    // parsed (or default) data
}

/// Best-effort config path following platform conventions (XDG / AppData Roaming).
pub fn discover() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("mdv").join(CONFIG_FILE_NAME);
    }
    PathBuf::from(CONFIG_FILE_NAME)
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    let Ok(content) = fs::read_to_string(&path) else {
        return Ok(Config::default());
    };
    match toml::from_str::<ConfigFile>(&content) {
        Ok(file) => {
            if file.version != CONFIG_VERSION {
                warn!(
                    target: "config",
                    found = file.version,
                    expected = CONFIG_VERSION,
                    "config_version_mismatch"
                );
            }
            let mut cfg = Config {
                raw: Some(content),
                file,
            };
            cfg.sanitize();
            Ok(cfg)
        }
        Err(e) => {
            // Parse errors fall back to defaults rather than aborting startup.
            warn!(target: "config", path = %path.display(), error = %e, "config_parse_failed");
            Ok(Config::default())
        }
    }
}

impl Config {
    /// Clamp values that would stall a component. Returns the number of
    /// fields that were adjusted.
    pub fn sanitize(&mut self) -> usize {
        let mut adjusted = 0usize;
        let f = &mut self.file;

        if f.chunks.chunk_size == 0 {
            info!(target: "config", field = "chunks.chunk_size", raw = 0, clamped = 1, "config_value_clamped");
            f.chunks.chunk_size = 1;
            adjusted += 1;
        }
        if f.chunks.max_loaded_chunks == 0 {
            info!(target: "config", field = "chunks.max_loaded_chunks", raw = 0, clamped = 1, "config_value_clamped");
            f.chunks.max_loaded_chunks = 1;
            adjusted += 1;
        }
        if f.render.target_fps == 0 {
            info!(target: "config", field = "render.target_fps", raw = 0, clamped = 1, "config_value_clamped");
            f.render.target_fps = 1;
            adjusted += 1;
        }
        if f.viewport.line_height.is_nan() || f.viewport.line_height <= 0.0 {
            info!(
                target: "config",
                field = "viewport.line_height",
                raw = f.viewport.line_height,
                clamped = ViewportConfig::default_line_height(),
                "config_value_clamped"
            );
            f.viewport.line_height = ViewportConfig::default_line_height();
            adjusted += 1;
        }
        let threshold = f.preload.preload_threshold;
        let clamped = if threshold.is_nan() { 0.0 } else { threshold.clamp(0.0, 1.0) };
        if clamped != threshold {
            info!(target: "config", field = "preload.preload_threshold", raw = threshold, clamped, "config_value_clamped");
            f.preload.preload_threshold = clamped;
            adjusted += 1;
        }
        let rate = f.predict.learning_rate;
        let clamped = if rate.is_nan() { PredictConfig::default_learning_rate() } else { rate.clamp(0.0, 1.0) };
        if clamped != rate {
            info!(target: "config", field = "predict.learning_rate", raw = rate, clamped, "config_value_clamped");
            f.predict.learning_rate = clamped;
            adjusted += 1;
        }
        adjusted
    }
}

//! Cross-component memory budget.
//!
//! `CacheManager` is a registry, not a cache: components keep ownership of
//! their stores and register them (through the `Cache` trait) so a single
//! global byte budget can be enforced across all of them. The manager only
//! holds a registration wrapper plus hit / miss / eviction counters.
//!
//! Stores registered here are mutated from outside their owner (periodic
//! rebalancing runs on its own task). Owners must re-check an entry after any
//! await instead of assuming it survived since insertion.

pub mod manager;
pub mod store;

pub use manager::{CacheEntryStats, CacheManager, CacheManagerStats, CacheOptions, CacheStats};
pub use store::{BoundedMap, Cache};

/// Pressure ratio (usage / limit) under which `adjust_cache_sizes` is a no-op.
pub const PRESSURE_THRESHOLD: f64 = 0.7;

/// Usage ratio rebalancing aims to return to.
pub const TARGET_UTILIZATION: f64 = 0.5;

/// Share of a cache's entries removed per eviction pass, in percent.
pub const EVICTION_PERCENT: usize = 30;

/// Number of entries an eviction pass removes from a store holding `len`
/// entries (`ceil(len * 30%)`), computed in integers so 10 entries always
/// yield exactly 3.
pub fn eviction_batch(len: usize) -> usize {
    (len * EVICTION_PERCENT).div_ceil(100)
}

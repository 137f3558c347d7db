//! Registry enforcing one memory budget across named caches.
//!
//! Rebalancing policy (`adjust_cache_sizes`):
//! * Below `PRESSURE_THRESHOLD` (70%) of the budget nothing happens.
//! * Otherwise caches are visited lowest priority first, ties broken by the
//!   lowest hit rate, and each visited cache loses its oldest 30% of entries
//!   until the estimated bytes freed reach `(pressure - 0.5) * limit`.
//!
//! The manager owns a periodic cleanup task (spawned on the ambient tokio
//! runtime at construction) that runs the same rebalancing every
//! `cleanup_interval`. `destroy` stops it; dropping the manager does too.

use crate::eviction_batch;
use crate::store::{Cache, Erased, ErasedCache};
use crate::{PRESSURE_THRESHOLD, TARGET_UTILIZATION};
use core_config::CacheConfig;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Registration options for one cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// Advisory entry bound, reported in stats.
    pub max_size: usize,
    /// Lower priorities are evicted first.
    pub priority: u32,
    /// Bytes charged against the budget per entry.
    pub estimated_item_size: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_size: 100,
            priority: 1,
            estimated_item_size: 1024,
        }
    }
}

/// Per-cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub last_access: Option<Instant>,
}

impl CacheStats {
    /// Hit rate in `[0, 1]`; zero before any access.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntryStats {
    pub name: String,
    pub size: usize,
    pub max_size: usize,
    pub priority: u32,
    pub estimated_item_size: usize,
    pub estimated_bytes: usize,
    pub stats: CacheStats,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheManagerStats {
    pub caches: Vec<CacheEntryStats>,
    pub estimated_memory: usize,
    pub total_memory_limit: usize,
    /// Estimated usage as a percentage of the budget.
    pub memory_usage_percent: f64,
    /// Rebalancing passes that actually evicted something.
    pub adjustments: u64,
}

struct CacheEntry {
    name: String,
    store: Box<dyn ErasedCache>,
    options: CacheOptions,
    stats: CacheStats,
}

impl CacheEntry {
    fn estimated_bytes(&self) -> usize {
        self.store.size().saturating_mul(self.options.estimated_item_size)
    }
}

struct Registry {
    entries: Vec<CacheEntry>,
    total_memory_limit: usize,
    adjustments: u64,
}

impl Registry {
    fn find_mut(&mut self, name: &str) -> Option<&mut CacheEntry> {
        self.entries.iter_mut().find(|e| e.name == name)
    }

    fn estimated_usage(&self) -> usize {
        self.entries
            .iter()
            .map(CacheEntry::estimated_bytes)
            .fold(0usize, usize::saturating_add)
    }

    fn adjust(&mut self) -> usize {
        let limit = self.total_memory_limit;
        if limit == 0 {
            return 0;
        }
        let usage = self.estimated_usage();
        let pressure = usage as f64 / limit as f64;
        if pressure < PRESSURE_THRESHOLD {
            trace!(target: "cache", usage, limit, pressure, "adjust_skipped");
            return 0;
        }
        let target = ((pressure - TARGET_UTILIZATION) * limit as f64) as usize;

        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.sort_by(|&a, &b| {
            let (ea, eb) = (&self.entries[a], &self.entries[b]);
            ea.options
                .priority
                .cmp(&eb.options.priority)
                .then(ea.stats.hit_rate().total_cmp(&eb.stats.hit_rate()))
        });

        let mut freed = 0usize;
        for idx in order {
            if freed >= target {
                break;
            }
            let entry = &mut self.entries[idx];
            let size = entry.store.size();
            if size == 0 {
                continue;
            }
            let removed = entry.store.evict_oldest(eviction_batch(size));
            entry.stats.evictions += removed as u64;
            freed = freed.saturating_add(removed.saturating_mul(entry.options.estimated_item_size));
            debug!(
                target: "cache",
                cache = entry.name.as_str(),
                size,
                removed,
                priority = entry.options.priority,
                "cache_evicted"
            );
        }
        if freed > 0 {
            self.adjustments += 1;
        }
        info!(target: "cache", usage, limit, target, freed, "cache_rebalanced");
        freed
    }
}

struct CleanupTask {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

/// Registry of externally owned caches sharing one byte budget.
pub struct CacheManager {
    registry: Arc<Mutex<Registry>>,
    cleanup: Mutex<Option<CleanupTask>>,
}

fn lock_registry(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|p| p.into_inner())
}

impl CacheManager {
    /// Create a manager and start its periodic cleanup task when a tokio
    /// runtime is available. Without a runtime the manager still works but
    /// only rebalances when `adjust_cache_sizes` is called.
    pub fn new(config: &CacheConfig) -> Self {
        let manager = Self::without_cleanup(config.total_memory_limit);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => manager.start_cleanup(&handle, config.cleanup_interval()),
            Err(_) => warn!(target: "cache", "no_runtime_periodic_cleanup_disabled"),
        }
        manager
    }

    /// Manager with no background task (tests, synchronous hosts).
    pub fn without_cleanup(total_memory_limit: usize) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                entries: Vec::new(),
                total_memory_limit,
                adjustments: 0,
            })),
            cleanup: Mutex::new(None),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        lock_registry(&self.registry)
    }

    fn start_cleanup(&self, handle: &tokio::runtime::Handle, period: Duration) {
        let period = period.max(Duration::from_millis(1));
        let shutdown = Arc::new(Notify::new());
        let registry = self.registry.clone();
        let stop = shutdown.clone();
        let task = handle.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        lock_registry(&registry).adjust();
                    }
                    _ = stop.notified() => break,
                }
            }
            debug!(target: "cache", "cleanup_task_stopped");
        });
        info!(target: "cache", period_ms = period.as_millis() as u64, "cleanup_task_started");
        *self.cleanup.lock().unwrap_or_else(|p| p.into_inner()) = Some(CleanupTask {
            handle: task,
            shutdown,
        });
    }

    /// Whether the periodic cleanup task is running.
    pub fn cleanup_running(&self) -> bool {
        self.cleanup
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Register (or replace) a cache under `name`.
    pub fn register_cache<K, C>(&self, name: impl Into<String>, store: Arc<C>, options: CacheOptions)
    where
        K: 'static,
        C: Cache<K> + 'static,
    {
        let name = name.into();
        let mut reg = self.registry();
        reg.entries.retain(|e| e.name != name);
        debug!(
            target: "cache",
            cache = name.as_str(),
            max_size = options.max_size,
            priority = options.priority,
            item_size = options.estimated_item_size,
            "cache_registered"
        );
        reg.entries.push(CacheEntry {
            name,
            store: Box::new(Erased::<K, C>::new(store)),
            options,
            stats: CacheStats::default(),
        });
    }

    pub fn unregister_cache(&self, name: &str) -> bool {
        let mut reg = self.registry();
        let before = reg.entries.len();
        reg.entries.retain(|e| e.name != name);
        before != reg.entries.len()
    }

    pub fn record_hit(&self, name: &str) {
        self.record_access(name, 1, 0);
    }

    pub fn record_miss(&self, name: &str) {
        self.record_access(name, 0, 1);
    }

    /// Add `hits` and `misses` to `name` in one registry update. A zero
    /// pair leaves `last_access` alone.
    pub fn record_access(&self, name: &str, hits: u64, misses: u64) {
        if hits == 0 && misses == 0 {
            return;
        }
        if let Some(e) = self.registry().find_mut(name) {
            e.stats.hits += hits;
            e.stats.misses += misses;
            e.stats.last_access = Some(Instant::now());
        }
    }

    /// Σ `size * estimated_item_size` over registered caches.
    pub fn estimated_memory_usage(&self) -> usize {
        self.registry().estimated_usage()
    }

    pub fn memory_usage_percent(&self) -> f64 {
        let reg = self.registry();
        if reg.total_memory_limit == 0 {
            return 0.0;
        }
        reg.estimated_usage() as f64 / reg.total_memory_limit as f64 * 100.0
    }

    /// Run one rebalancing pass now. Returns the estimated bytes freed.
    pub fn adjust_cache_sizes(&self) -> usize {
        self.registry().adjust()
    }

    pub fn stats(&self, name: &str) -> Option<CacheEntryStats> {
        let reg = self.registry();
        reg.entries.iter().find(|e| e.name == name).map(entry_stats)
    }

    pub fn all_stats(&self) -> CacheManagerStats {
        let reg = self.registry();
        let estimated_memory = reg.estimated_usage();
        let memory_usage_percent = if reg.total_memory_limit == 0 {
            0.0
        } else {
            estimated_memory as f64 / reg.total_memory_limit as f64 * 100.0
        };
        CacheManagerStats {
            caches: reg.entries.iter().map(entry_stats).collect(),
            estimated_memory,
            total_memory_limit: reg.total_memory_limit,
            memory_usage_percent,
            adjustments: reg.adjustments,
        }
    }

    /// Empty every registered store and reset counters.
    pub fn clear_all(&self) {
        let mut reg = self.registry();
        for e in reg.entries.iter_mut() {
            e.store.clear();
            e.stats = CacheStats::default();
        }
        info!(target: "cache", caches = reg.entries.len(), "cache_clear_all");
    }

    /// Stop the cleanup task and drop every registration. Idempotent.
    pub fn destroy(&self) {
        let task = self.cleanup.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(task) = task {
            task.shutdown.notify_one();
            task.handle.abort();
            debug!(target: "cache", "cleanup_task_cancelled");
        }
        self.registry().entries.clear();
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn entry_stats(e: &CacheEntry) -> CacheEntryStats {
    CacheEntryStats {
        name: e.name.clone(),
        size: e.store.size(),
        max_size: e.options.max_size,
        priority: e.options.priority,
        estimated_item_size: e.options.estimated_item_size,
        estimated_bytes: e.estimated_bytes(),
        stats: e.stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoundedMap;

    fn filled(n: u32) -> Arc<BoundedMap<u32, u32>> {
        let m = Arc::new(BoundedMap::new(1000));
        for i in 0..n {
            m.insert(i, i);
        }
        m
    }

    fn opts(priority: u32, item: usize) -> CacheOptions {
        CacheOptions {
            max_size: 1000,
            priority,
            estimated_item_size: item,
        }
    }

    #[test]
    fn scenario_ninety_percent_pressure_evicts_three_of_nine() {
        let mgr = CacheManager::without_cleanup(1000);
        let store = filled(9);
        mgr.register_cache("lines", store.clone(), opts(1, 100));
        assert_eq!(mgr.estimated_memory_usage(), 900);
        let freed = mgr.adjust_cache_sizes();
        assert_eq!(freed, 300);
        assert_eq!(store.len(), 6);
        assert_eq!(store.keys(), vec![3, 4, 5, 6, 7, 8], "oldest inserted go first");
        assert_eq!(mgr.stats("lines").unwrap().stats.evictions, 3);
    }

    #[test]
    fn below_threshold_is_noop() {
        let mgr = CacheManager::without_cleanup(1000);
        let store = filled(6);
        mgr.register_cache("lines", store.clone(), opts(1, 100));
        assert_eq!(mgr.adjust_cache_sizes(), 0);
        assert_eq!(store.len(), 6);
        assert_eq!(mgr.all_stats().adjustments, 0);
    }

    #[test]
    fn low_priority_cache_evicted_before_high() {
        let mgr = CacheManager::without_cleanup(1000);
        let low = filled(5);
        let high = filled(4);
        mgr.register_cache("high", high.clone(), opts(5, 100));
        mgr.register_cache("low", low.clone(), opts(1, 100));
        // 900 bytes -> target 400; low frees 200, high frees 200.
        let freed = mgr.adjust_cache_sizes();
        assert_eq!(freed, 400);
        assert_eq!(low.len(), 3);
        assert_eq!(high.len(), 2);
    }

    #[test]
    fn hit_rate_breaks_priority_ties() {
        let mgr = CacheManager::without_cleanup(1000);
        let hot = filled(4);
        let cold = filled(4);
        mgr.register_cache("hot", hot.clone(), opts(1, 100));
        mgr.register_cache("cold", cold.clone(), opts(1, 100));
        mgr.record_hit("hot");
        mgr.record_miss("cold");
        // 800 bytes -> target 300; cold first frees 200, then hot frees 200.
        mgr.adjust_cache_sizes();
        assert_eq!(cold.len(), 2);
        assert_eq!(hot.len(), 2);

        // Now only the cold cache is visited before the target is hit.
        let mgr = CacheManager::without_cleanup(1000);
        let hot = filled(1);
        let cold = filled(7);
        mgr.register_cache("hot", hot.clone(), opts(1, 100));
        mgr.register_cache("cold", cold.clone(), opts(1, 100));
        mgr.record_hit("hot");
        mgr.record_miss("cold");
        // 800 bytes -> target 300; cold frees ceil(7*0.3)=3 -> 300.
        mgr.adjust_cache_sizes();
        assert_eq!(cold.len(), 4);
        assert_eq!(hot.len(), 1);
    }

    #[test]
    fn stats_report_percentage_and_hit_rate() {
        let mgr = CacheManager::without_cleanup(2000);
        mgr.register_cache("a", filled(5), opts(1, 100));
        mgr.record_hit("a");
        mgr.record_hit("a");
        mgr.record_miss("a");
        mgr.record_hit("unknown");
        let all = mgr.all_stats();
        assert_eq!(all.estimated_memory, 500);
        assert!((all.memory_usage_percent - 25.0).abs() < 1e-9);
        let a = &all.caches[0];
        assert_eq!(a.stats.hits, 2);
        assert_eq!(a.stats.misses, 1);
        assert!((a.stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert!(a.stats.last_access.is_some());
    }

    #[test]
    fn batched_access_counts() {
        let mgr = CacheManager::without_cleanup(2000);
        mgr.register_cache("a", filled(2), opts(1, 100));
        mgr.record_access("a", 0, 0);
        assert!(mgr.stats("a").unwrap().stats.last_access.is_none());
        mgr.record_access("a", 4, 1);
        mgr.record_access("a", 2, 0);
        let a = mgr.stats("a").unwrap().stats;
        assert_eq!((a.hits, a.misses), (6, 1));
        assert!(a.last_access.is_some());
    }

    #[test]
    fn clear_all_and_unregister() {
        let mgr = CacheManager::without_cleanup(1000);
        let s = filled(3);
        mgr.register_cache("s", s.clone(), opts(1, 10));
        mgr.clear_all();
        assert_eq!(s.len(), 0);
        assert!(mgr.unregister_cache("s"));
        assert!(!mgr.unregister_cache("s"));
        assert!(mgr.all_stats().caches.is_empty());
    }

    #[test]
    fn register_same_name_replaces() {
        let mgr = CacheManager::without_cleanup(1000);
        mgr.register_cache("s", filled(3), opts(1, 10));
        mgr.register_cache("s", filled(1), opts(1, 10));
        let all = mgr.all_stats();
        assert_eq!(all.caches.len(), 1);
        assert_eq!(all.caches[0].size, 1);
    }

    #[test]
    fn new_without_runtime_has_no_task() {
        let mgr = CacheManager::new(&CacheConfig::default());
        assert!(!mgr.cleanup_running());
        mgr.destroy();
        mgr.destroy();
    }
}

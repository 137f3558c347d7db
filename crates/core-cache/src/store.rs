//! Store abstraction the manager evicts through, plus a ready-made
//! insertion-ordered store.

use ahash::AHashMap;
use std::collections::VecDeque;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

/// Map-like store that can be registered with the `CacheManager`.
///
/// Implementors use interior mutability: the manager calls `delete` from its
/// own task while the owner keeps using the store.
pub trait Cache<K>: Send + Sync {
    /// Number of resident entries.
    fn size(&self) -> usize;
    /// Resident keys, oldest inserted first.
    fn keys(&self) -> Vec<K>;
    /// Remove one entry. Returns false when the key was already gone.
    fn delete(&self, key: &K) -> bool;
    fn clear(&self);
}

/// Key-erased view the manager stores so caches with different key types can
/// share one registry.
pub(crate) trait ErasedCache: Send + Sync {
    fn size(&self) -> usize;
    /// Remove up to `count` of the oldest entries, returning how many went.
    fn evict_oldest(&self, count: usize) -> usize;
    fn clear(&self);
}

pub(crate) struct Erased<K, C: ?Sized> {
    store: Arc<C>,
    _key: PhantomData<fn() -> K>,
}

impl<K, C: ?Sized> Erased<K, C> {
    pub(crate) fn new(store: Arc<C>) -> Self {
        Self {
            store,
            _key: PhantomData,
        }
    }
}

impl<K: 'static, C: Cache<K> + ?Sized> ErasedCache for Erased<K, C> {
    fn size(&self) -> usize {
        self.store.size()
    }

    fn evict_oldest(&self, count: usize) -> usize {
        if count == 0 {
            return 0;
        }
        self.store
            .keys()
            .into_iter()
            .take(count)
            .filter(|k| self.store.delete(k))
            .count()
    }

    fn clear(&self) {
        self.store.clear();
    }
}

#[derive(Debug)]
struct BoundedInner<K, V> {
    map: AHashMap<K, V>,
    /// Insertion order (oldest at front).
    order: VecDeque<K>,
}

/// Capacity-bounded map with FIFO replacement.
///
/// Inserting past `max_size` drops the oldest inserted entry. Re-inserting an
/// existing key replaces the value but keeps its original position.
#[derive(Debug)]
pub struct BoundedMap<K, V> {
    inner: Mutex<BoundedInner<K, V>>,
    max_size: usize,
}

impl<K, V> BoundedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    /// `max_size` of zero is treated as one.
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(BoundedInner {
                map: AHashMap::new(),
                order: VecDeque::new(),
            }),
            max_size: max_size.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BoundedInner<K, V>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().map.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.lock().map.contains_key(key)
    }

    /// Insert a value, returning the entry displaced by the capacity bound
    /// (if any).
    pub fn insert(&self, key: K, value: V) -> Option<(K, V)> {
        let mut inner = self.lock();
        if let Some(slot) = inner.map.get_mut(&key) {
            *slot = value;
            return None;
        }
        let mut displaced = None;
        if inner.map.len() >= self.max_size
            && let Some(oldest) = inner.order.pop_front()
        {
            displaced = inner.map.remove(&oldest).map(|v| (oldest, v));
        }
        inner.order.push_back(key.clone());
        inner.map.insert(key, value);
        displaced
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        let value = inner.map.remove(key)?;
        inner.order.retain(|k| k != key);
        Some(value)
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.map.clear();
        inner.order.clear();
    }
}

impl<K, V> BoundedMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn get(&self, key: &K) -> Option<V> {
        self.lock().map.get(key).cloned()
    }
}

impl<K, V> Cache<K> for BoundedMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Send,
{
    fn size(&self) -> usize {
        self.len()
    }

    fn keys(&self) -> Vec<K> {
        self.lock().order.iter().cloned().collect()
    }

    fn delete(&self, key: &K) -> bool {
        self.remove(key).is_some()
    }

    fn clear(&self) {
        BoundedMap::clear(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_replacement_past_capacity() {
        let m = BoundedMap::new(2);
        assert!(m.insert("a", 1).is_none());
        assert!(m.insert("b", 2).is_none());
        assert_eq!(m.insert("c", 3), Some(("a", 1)));
        assert_eq!(m.keys(), vec!["b", "c"]);
        assert_eq!(m.get(&"a"), None);
        assert_eq!(m.get(&"c"), Some(3));
    }

    #[test]
    fn reinsert_keeps_position() {
        let m = BoundedMap::new(3);
        m.insert(1, "x");
        m.insert(2, "y");
        m.insert(1, "z");
        assert_eq!(m.keys(), vec![1, 2]);
        assert_eq!(m.get(&1), Some("z"));
    }

    #[test]
    fn erased_evicts_oldest_first() {
        let m = Arc::new(BoundedMap::new(10));
        for i in 0..5u32 {
            m.insert(i, i * 10);
        }
        let erased: Erased<u32, BoundedMap<u32, u32>> = Erased::new(m.clone());
        assert_eq!(erased.evict_oldest(2), 2);
        assert_eq!(m.keys(), vec![2, 3, 4]);
        assert_eq!(erased.evict_oldest(10), 3);
        assert_eq!(erased.size(), 0);
    }

    #[test]
    fn delete_and_clear() {
        let m = BoundedMap::new(4);
        m.insert("k", 1);
        assert!(Cache::delete(&m, &"k"));
        assert!(!Cache::delete(&m, &"k"));
        m.insert("j", 2);
        Cache::clear(&m);
        assert!(m.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn never_exceeds_capacity(
            cap in 1usize..8,
            keys in proptest::collection::vec(0u8..16, 0..64),
        ) {
            let m = BoundedMap::new(cap);
            for k in &keys {
                m.insert(*k, ());
                proptest::prop_assert!(m.len() <= cap);
                proptest::prop_assert!(m.contains_key(k));
            }
            proptest::prop_assert_eq!(m.keys().len(), m.len());
        }
    }
}

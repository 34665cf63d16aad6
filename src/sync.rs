use crate::{CacheError, SieveCache, SieveConfig};
use parking_lot::ReentrantMutex;
use std::borrow::Borrow;
use std::cell::RefCell;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

/// A thread-safe wrapper around `SieveCache`.
///
/// Every method runs as one critical section over the whole cache, including
/// the producer passed to [`fetch_or_insert_with`](Self::fetch_or_insert_with).
/// Calling back into the same cache from inside such a section (from the
/// producer, a `retain` predicate or a `with_lock` closure) would deadlock a
/// plain mutex; here it fails with [`CacheError::Reentrant`] instead.
///
/// Values are returned by clone since the lock is released when the call returns.
///
/// ```
/// use sieve_engine::SyncSieveCache;
///
/// let cache = SyncSieveCache::new(100).unwrap();
/// let value = cache
///     .fetch_or_insert_with("answer".to_string(), |_| 42)
///     .unwrap();
/// assert_eq!(value, 42);
/// assert_eq!(cache.get("answer").unwrap(), Some(42));
/// ```
pub struct SyncSieveCache<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Send,
{
    inner: Arc<ReentrantMutex<RefCell<SieveCache<K, V>>>>,
    capacity: usize,
}

impl<K, V> Clone for SyncSieveCache<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Send,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            capacity: self.capacity,
        }
    }
}

impl<K, V> SyncSieveCache<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Send,
{
    /// Create a new thread-safe cache with the given capacity.
    pub fn new(capacity: usize) -> Result<Self, CacheError> {
        Self::with_config(SieveConfig::new(capacity))
    }

    /// Create a new thread-safe cache from a full configuration.
    pub fn with_config(config: SieveConfig) -> Result<Self, CacheError> {
        let cache = SieveCache::with_config(config)?;
        Ok(Self {
            inner: Arc::new(ReentrantMutex::new(RefCell::new(cache))),
            capacity: config.capacity,
        })
    }

    fn locked<T>(&self, f: impl FnOnce(&mut SieveCache<K, V>) -> T) -> Result<T, CacheError> {
        let guard = self.inner.lock();
        let mut cache = guard.try_borrow_mut().map_err(|_| {
            debug!("refused re-entrant cache access");
            CacheError::Reentrant
        })?;
        Ok(f(&mut cache))
    }

    /// Return the capacity of the cache.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return the number of cached values.
    pub fn len(&self) -> Result<usize, CacheError> {
        self.locked(|cache| cache.len())
    }

    /// Return `true` when no values are currently cached.
    pub fn is_empty(&self) -> Result<bool, CacheError> {
        self.locked(|cache| cache.is_empty())
    }

    /// Return `true` if there is a value in the cache mapped to by `key`.
    pub fn contains_key<Q>(&self, key: &Q) -> Result<bool, CacheError>
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
    {
        self.locked(|cache| cache.contains_key(key))
    }

    /// Get a clone of the value mapped to by `key`, marking it as visited.
    pub fn get<Q>(&self, key: &Q) -> Result<Option<V>, CacheError>
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
        V: Clone,
    {
        self.locked(|cache| cache.get(key).cloned())
    }

    /// Run `f` on the value mapped to by `key` while the lock is held.
    ///
    /// Returns `Ok(false)` if the key is absent.
    pub fn get_mut<Q, F>(&self, key: &Q, f: F) -> Result<bool, CacheError>
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
        F: FnOnce(&mut V),
    {
        self.locked(|cache| cache.get_mut(key).map(f).is_some())
    }

    /// Look up `key` under the configured miss policy.
    pub fn fetch<Q>(&self, key: &Q) -> Result<Option<V>, CacheError>
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
        V: Clone,
    {
        self.locked(|cache| cache.fetch(key).map(|value| value.cloned()))?
    }

    /// Look up `key`, producing and caching the value on a miss.
    ///
    /// The producer runs while the lock is held.
    pub fn fetch_or_insert_with<F>(&self, key: K, producer: F) -> Result<V, CacheError>
    where
        F: FnOnce(&K) -> V,
        V: Clone,
    {
        self.locked(|cache| cache.fetch_or_insert_with(key, producer).clone())
    }

    /// Like [`fetch_or_insert_with`](Self::fetch_or_insert_with) with a fallible producer.
    pub fn try_fetch_or_insert_with<E, F>(&self, key: K, producer: F) -> Result<V, E>
    where
        F: FnOnce(&K) -> Result<V, E>,
        E: From<CacheError>,
        V: Clone,
    {
        self.locked(|cache| cache.try_fetch_or_insert_with(key, producer).cloned())?
    }

    /// Store a new entry without evicting. See [`SieveCache::store`].
    pub fn store(&self, key: K, value: V) -> Result<(), CacheError> {
        self.locked(|cache| cache.store(key, value).map(|_| ()))?
    }

    /// Map `key` to `value` in the cache, possibly evicting old entries.
    ///
    /// This method returns `true` when this is a new entry, and `false` if an existing entry was
    /// updated.
    pub fn insert(&self, key: K, value: V) -> Result<bool, CacheError> {
        self.locked(|cache| cache.insert(key, value))
    }

    /// Remove the cache entry mapped to by `key`.
    pub fn remove<Q>(&self, key: &Q) -> Result<Option<V>, CacheError>
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
    {
        self.locked(|cache| cache.remove(key))
    }

    /// Evict one entry chosen by the SIEVE scan.
    pub fn evict(&self) -> Result<Option<(K, V)>, CacheError> {
        self.locked(|cache| cache.evict())
    }

    /// Snapshot of the resident keys, in unspecified order.
    pub fn keys(&self) -> Result<Vec<K>, CacheError> {
        self.locked(|cache| cache.keys().cloned().collect())
    }

    /// Remove every entry.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.locked(|cache| cache.clear())
    }

    /// Keep only the entries for which `f` returns `true`.
    pub fn retain<F>(&self, f: F) -> Result<(), CacheError>
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        self.locked(|cache| cache.retain(f))
    }

    /// Get exclusive access to the underlying cache.
    ///
    /// This can be useful for performing multiple operations atomically.
    pub fn with_lock<F, T>(&self, f: F) -> Result<T, CacheError>
    where
        F: FnOnce(&mut SieveCache<K, V>) -> T,
    {
        self.locked(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_sync_cache() {
        let cache = SyncSieveCache::new(100).unwrap();

        cache.store("key1".to_string(), "value1".to_string()).unwrap();
        assert_eq!(cache.get("key1").unwrap(), Some("value1".to_string()));
        assert!(cache.contains_key("key1").unwrap());
        assert_eq!(cache.capacity(), 100);
        assert_eq!(cache.len().unwrap(), 1);

        assert_eq!(cache.remove("key1").unwrap(), Some("value1".to_string()));
        assert_eq!(cache.len().unwrap(), 0);
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn test_store_errors_surface() {
        let cache = SyncSieveCache::new(1).unwrap();
        cache.store("a", 1).unwrap();
        assert_eq!(cache.store("a", 2), Err(CacheError::DuplicateKey));
        assert_eq!(
            cache.store("b", 2),
            Err(CacheError::CapacityExceeded { capacity: 1 })
        );
        assert_eq!(cache.fetch(&"b"), Err(CacheError::KeyNotFound));
        assert_eq!(cache.fetch(&"a"), Ok(Some(1)));
    }

    #[test]
    fn test_multithreaded_access() {
        let cache = SyncSieveCache::new(100).unwrap();
        let cache_clone = cache.clone();

        cache.insert("shared".to_string(), "initial".to_string()).unwrap();

        let thread = thread::spawn(move || {
            cache_clone
                .insert("shared".to_string(), "updated".to_string())
                .unwrap();
            cache_clone
                .insert("thread_only".to_string(), "thread_value".to_string())
                .unwrap();
        });

        cache
            .insert("main_only".to_string(), "main_value".to_string())
            .unwrap();
        thread.join().unwrap();

        assert_eq!(cache.get("shared").unwrap(), Some("updated".to_string()));
        assert_eq!(
            cache.get("thread_only").unwrap(),
            Some("thread_value".to_string())
        );
        assert_eq!(
            cache.get("main_only").unwrap(),
            Some("main_value".to_string())
        );
        assert_eq!(cache.len().unwrap(), 3);
    }

    #[test]
    fn test_with_lock() {
        let cache = SyncSieveCache::new(100).unwrap();

        cache
            .with_lock(|inner_cache| {
                inner_cache.store("key1".to_string(), 1).unwrap();
                inner_cache.store("key2".to_string(), 2).unwrap();
                inner_cache.store("key3".to_string(), 3).unwrap();
            })
            .unwrap();

        assert_eq!(cache.len().unwrap(), 3);
    }

    #[test]
    fn test_reentrant_producer_is_refused() {
        let cache = SyncSieveCache::new(4).unwrap();
        let same = cache.clone();
        let mut observed = None;

        let value = cache
            .fetch_or_insert_with("a".to_string(), |_| {
                observed = Some(same.len());
                7
            })
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(observed, Some(Err(CacheError::Reentrant)));
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn test_reentrant_with_lock_is_refused() {
        let cache: SyncSieveCache<u32, u32> = SyncSieveCache::new(4).unwrap();
        let nested = cache.with_lock(|_| cache.insert(1, 1)).unwrap();
        assert_eq!(nested, Err(CacheError::Reentrant));
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn test_fallible_producer_error_converts() {
        #[derive(Debug, PartialEq)]
        enum LoadError {
            Cache(CacheError),
            Backend,
        }

        impl From<CacheError> for LoadError {
            fn from(err: CacheError) -> Self {
                LoadError::Cache(err)
            }
        }

        let cache: SyncSieveCache<u32, u32> = SyncSieveCache::new(2).unwrap();
        assert_eq!(
            cache.try_fetch_or_insert_with(1, |_| Err(LoadError::Backend)),
            Err(LoadError::Backend)
        );
        assert!(cache.is_empty().unwrap());

        let same = cache.clone();
        assert_eq!(
            cache.try_fetch_or_insert_with(1, |_| same.try_fetch_or_insert_with(2, |_| Ok(2))),
            Err(LoadError::Cache(CacheError::Reentrant))
        );
        assert_eq!(
            cache.try_fetch_or_insert_with(1, |_| Ok::<u32, LoadError>(10)),
            Ok(10)
        );
    }

    #[test]
    fn test_evict_and_retain() {
        let cache = SyncSieveCache::new(3).unwrap();
        for i in 0..3 {
            cache.store(i, i).unwrap();
        }
        assert!(cache.get_mut(&0, |value| *value += 100).unwrap());
        assert!(!cache.get_mut(&9, |value| *value += 100).unwrap());
        assert_eq!(cache.evict().unwrap(), Some((1, 1)));

        cache.retain(|_, value| *value > 50).unwrap();
        assert_eq!(cache.keys().unwrap(), vec![0]);
        cache.clear().unwrap();
        assert!(cache.is_empty().unwrap());
    }
}

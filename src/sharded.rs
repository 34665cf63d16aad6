use crate::{CacheError, SieveCache, SieveConfig, SyncSieveCache};
use std::borrow::Borrow;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::debug;

/// Default number of shards to use if not specified explicitly.
const DEFAULT_SHARDS: usize = 16;

/// A thread-safe `SieveCache` split into independently locked shards.
///
/// The hash of a key picks its shard, so operations on keys living in
/// different shards proceed in parallel. Each shard runs its own SIEVE scan
/// with its own hand: eviction only ever frees room in the shard the new key
/// maps to.
///
/// The requested capacity is divided between the shards (the first
/// `capacity % num_shards` shards get one extra slot), so the total number of
/// resident entries never exceeds it. A shard can fill up while others still
/// have room; [`store`](Self::store) then reports
/// [`CacheError::CapacityExceeded`] with the shard's capacity, and
/// [`insert`](Self::insert) or [`fetch_or_insert_with`](Self::fetch_or_insert_with)
/// evict from that shard even though [`len`](Self::len) is still below
/// [`capacity`](Self::capacity). Over the whole cache, eviction can therefore
/// start before the total capacity is reached.
///
/// Multi-shard operations (`len`, `keys`, `clear`) visit the shards one after
/// another and never hold two shard locks at once; they are not a consistent
/// snapshot under concurrent writes.
///
/// ```
/// # use sieve_engine::ShardedSieveCache;
/// # use std::sync::Arc;
/// # use std::thread;
/// let cache = Arc::new(ShardedSieveCache::with_shards(1000, 8).unwrap());
///
/// let mut handles = vec![];
/// for t in 0..4 {
///     let cache = Arc::clone(&cache);
///     handles.push(thread::spawn(move || {
///         for i in 0..100 {
///             cache.insert(format!("thread{}key{}", t, i), i).unwrap();
///         }
///     }));
/// }
/// for handle in handles {
///     handle.join().unwrap();
/// }
///
/// assert_eq!(cache.len().unwrap(), 400);
/// ```
pub struct ShardedSieveCache<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Send,
{
    shards: Vec<SyncSieveCache<K, V>>,
}

impl<K, V> Clone for ShardedSieveCache<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Send,
{
    fn clone(&self) -> Self {
        Self {
            shards: self.shards.clone(),
        }
    }
}

impl<K, V> ShardedSieveCache<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Send,
{
    /// Create a sharded cache with up to 16 shards.
    ///
    /// Small capacities get fewer shards so that every shard holds at least one entry.
    pub fn new(capacity: usize) -> Result<Self, CacheError> {
        Self::with_shards(capacity, DEFAULT_SHARDS.min(capacity.max(1)))
    }

    /// Create a sharded cache with an explicit number of shards.
    pub fn with_shards(capacity: usize, num_shards: usize) -> Result<Self, CacheError> {
        Self::with_config(SieveConfig::new(capacity), num_shards)
    }

    /// Create a sharded cache; `config.capacity` is the total over all shards.
    pub fn with_config(config: SieveConfig, num_shards: usize) -> Result<Self, CacheError> {
        config.validate()?;
        if num_shards == 0 {
            return Err(CacheError::invalid("number of shards must be greater than 0"));
        }
        if config.capacity < num_shards {
            return Err(CacheError::invalid(format!(
                "capacity {} is smaller than the number of shards {}",
                config.capacity, num_shards
            )));
        }

        let base = config.capacity / num_shards;
        let remaining = config.capacity % num_shards;
        let shards = (0..num_shards)
            .map(|i| {
                let capacity = base + usize::from(i < remaining);
                SyncSieveCache::with_config(SieveConfig { capacity, ..config })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            capacity = config.capacity,
            num_shards, "created sharded sieve cache"
        );
        Ok(Self { shards })
    }

    #[inline]
    fn shard_index<Q>(&self, key: &Q) -> usize
    where
        Q: Hash + ?Sized,
    {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    #[inline]
    fn shard<Q>(&self, key: &Q) -> &SyncSieveCache<K, V>
    where
        Q: Hash + ?Sized,
    {
        &self.shards[self.shard_index(key)]
    }

    /// Return the number of shards.
    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// Return the total capacity over all shards.
    pub fn capacity(&self) -> usize {
        self.shards.iter().map(SyncSieveCache::capacity).sum()
    }

    /// Return the number of cached values over all shards.
    pub fn len(&self) -> Result<usize, CacheError> {
        self.shards.iter().map(SyncSieveCache::len).sum()
    }

    /// Return `true` when no shard holds a value.
    pub fn is_empty(&self) -> Result<bool, CacheError> {
        for shard in &self.shards {
            if !shard.is_empty()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Return `true` if there is a value in the cache mapped to by `key`.
    pub fn contains_key<Q>(&self, key: &Q) -> Result<bool, CacheError>
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
    {
        self.shard(key).contains_key(key)
    }

    /// Get a clone of the value mapped to by `key`, marking it as visited.
    pub fn get<Q>(&self, key: &Q) -> Result<Option<V>, CacheError>
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
        V: Clone,
    {
        self.shard(key).get(key)
    }

    /// Run `f` on the value mapped to by `key` while its shard is locked.
    pub fn get_mut<Q, F>(&self, key: &Q, f: F) -> Result<bool, CacheError>
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
        F: FnOnce(&mut V),
    {
        self.shard(key).get_mut(key, f)
    }

    /// Look up `key` under the configured miss policy.
    pub fn fetch<Q>(&self, key: &Q) -> Result<Option<V>, CacheError>
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
        V: Clone,
    {
        self.shard(key).fetch(key)
    }

    /// Look up `key`, producing and caching the value on a miss.
    ///
    /// Only the key's shard is locked while the producer runs.
    pub fn fetch_or_insert_with<F>(&self, key: K, producer: F) -> Result<V, CacheError>
    where
        F: FnOnce(&K) -> V,
        V: Clone,
    {
        self.shard(&key).fetch_or_insert_with(key, producer)
    }

    /// Like [`fetch_or_insert_with`](Self::fetch_or_insert_with) with a fallible producer.
    pub fn try_fetch_or_insert_with<E, F>(&self, key: K, producer: F) -> Result<V, E>
    where
        F: FnOnce(&K) -> Result<V, E>,
        E: From<CacheError>,
        V: Clone,
    {
        self.shard(&key).try_fetch_or_insert_with(key, producer)
    }

    /// Store a new entry in the key's shard without evicting.
    pub fn store(&self, key: K, value: V) -> Result<(), CacheError> {
        self.shard(&key).store(key, value)
    }

    /// Map `key` to `value`, possibly evicting an entry from the same shard.
    pub fn insert(&self, key: K, value: V) -> Result<bool, CacheError> {
        self.shard(&key).insert(key, value)
    }

    /// Remove the cache entry mapped to by `key`.
    pub fn remove<Q>(&self, key: &Q) -> Result<Option<V>, CacheError>
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
    {
        self.shard(key).remove(key)
    }

    /// Snapshot of the resident keys of every shard.
    pub fn keys(&self) -> Result<Vec<K>, CacheError> {
        let mut keys = Vec::new();
        for shard in &self.shards {
            keys.extend(shard.keys()?);
        }
        Ok(keys)
    }

    /// Remove every entry from every shard.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.shards.iter().try_for_each(SyncSieveCache::clear)
    }

    /// Run `f` with exclusive access to the shard holding `key`.
    pub fn with_key_lock<Q, F, T>(&self, key: &Q, f: F) -> Result<T, CacheError>
    where
        Q: Hash + ?Sized,
        F: FnOnce(&mut SieveCache<K, V>) -> T,
    {
        self.shard(key).with_lock(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_sharded_cache_basics() {
        let cache = ShardedSieveCache::new(100).unwrap();
        assert_eq!(cache.num_shards(), DEFAULT_SHARDS);
        assert_eq!(cache.capacity(), 100);

        cache.store("key1".to_string(), "value1".to_string()).unwrap();
        assert_eq!(cache.get("key1").unwrap(), Some("value1".to_string()));
        assert!(cache.contains_key("key1").unwrap());
        assert_eq!(cache.len().unwrap(), 1);

        assert_eq!(cache.remove("key1").unwrap(), Some("value1".to_string()));
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn test_capacity_is_split_exactly() {
        let cache: ShardedSieveCache<u32, u32> = ShardedSieveCache::with_shards(10, 4).unwrap();
        let capacities: Vec<_> = cache.shards.iter().map(|s| s.capacity()).collect();
        assert_eq!(capacities, vec![3, 3, 2, 2]);
        assert_eq!(cache.capacity(), 10);
    }

    #[test]
    fn test_small_capacity_uses_fewer_shards() {
        let cache: ShardedSieveCache<u32, u32> = ShardedSieveCache::new(3).unwrap();
        assert_eq!(cache.num_shards(), 3);
        assert_eq!(cache.capacity(), 3);
    }

    #[test]
    fn test_invalid_configurations() {
        assert!(matches!(
            ShardedSieveCache::<u32, u32>::new(0),
            Err(CacheError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            ShardedSieveCache::<u32, u32>::with_shards(10, 0),
            Err(CacheError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            ShardedSieveCache::<u32, u32>::with_shards(3, 4),
            Err(CacheError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_eviction_respects_total_capacity() {
        let cache = ShardedSieveCache::with_shards(16, 4).unwrap();
        for i in 0..1000u32 {
            cache.insert(i, i).unwrap();
            assert!(cache.len().unwrap() <= 16);
        }
        assert_eq!(cache.len().unwrap(), 16);
        for shard in &cache.shards {
            shard
                .with_lock(|inner| inner.check_invariants())
                .unwrap()
                .unwrap();
        }
    }

    #[test]
    fn test_full_shard_evicts_below_total_capacity() {
        let cache: ShardedSieveCache<u32, u32> = ShardedSieveCache::with_shards(4, 2).unwrap();
        let target = cache.shard_index(&0u32);
        let keys: Vec<u32> = (0..)
            .filter(|k| cache.shard_index(k) == target)
            .take(4)
            .collect();
        let (inserted, fresh) = keys.split_at(3);

        for &key in inserted {
            assert!(cache.insert(key, key).unwrap());
        }

        assert_eq!(cache.len().unwrap(), 2);
        assert!(cache.len().unwrap() < cache.capacity());
        let resident = inserted
            .iter()
            .filter(|k| cache.contains_key(*k).unwrap())
            .count();
        assert_eq!(resident, 2);
        assert_eq!(
            cache.store(fresh[0], 0).unwrap_err(),
            CacheError::CapacityExceeded { capacity: 2 }
        );
    }

    #[test]
    fn test_parallel_access() {
        let cache = Arc::new(ShardedSieveCache::with_shards(1000, 16).unwrap());
        let mut handles = vec![];

        for t in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    let key = format!("thread{}key{}", t, i);
                    cache.insert(key.clone(), i).unwrap();
                    assert_eq!(cache.get(&key).unwrap(), Some(i));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len().unwrap(), 800);
        assert_eq!(cache.keys().unwrap().len(), 800);
    }

    #[test]
    fn test_with_key_lock() {
        let cache = ShardedSieveCache::new(100).unwrap();
        cache
            .with_key_lock("test_key", |shard| {
                shard.store("test_key".to_string(), 1).unwrap();
            })
            .unwrap();
        assert_eq!(cache.get("test_key").unwrap(), Some(1));
    }

    #[test]
    fn test_fetch_or_insert_with_and_clear() {
        let cache = ShardedSieveCache::new(64).unwrap();
        assert_eq!(cache.fetch(&7u64), Err(CacheError::KeyNotFound));
        assert_eq!(cache.fetch_or_insert_with(7u64, |k| k * 2).unwrap(), 14);
        assert_eq!(cache.fetch(&7u64), Ok(Some(14)));
        assert!(cache.get_mut(&7u64, |v| *v += 1).unwrap());
        assert_eq!(
            cache.try_fetch_or_insert_with(7u64, |_| Err::<u64, CacheError>(CacheError::KeyNotFound)),
            Ok(15)
        );

        cache.clear().unwrap();
        assert!(cache.is_empty().unwrap());
    }
}

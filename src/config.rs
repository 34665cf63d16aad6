//! Construction-time configuration.

use crate::error::CacheError;

/// What [`SieveCache::fetch`](crate::SieveCache::fetch) does when the key is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissPolicy {
    /// Fail with [`CacheError::KeyNotFound`].
    #[default]
    Raise,
    /// Return `Ok(None)`.
    ReturnMissing,
}

/// What [`SieveCache::store`](crate::SieveCache::store) does when the key is already resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorePolicy {
    /// Fail with [`CacheError::DuplicateKey`] and leave the entry untouched.
    #[default]
    Reject,
    /// Drop the old entry, then insert the new value as a fresh, unvisited entry at the head.
    Replace,
}

/// Parameters of a [`SieveCache`](crate::SieveCache), fixed at construction.
///
/// ```
/// use sieve_engine::{MissPolicy, SieveCache, SieveConfig};
///
/// let config = SieveConfig::new(128).miss_policy(MissPolicy::ReturnMissing);
/// let mut cache: SieveCache<u64, String> = SieveCache::with_config(config).unwrap();
/// assert_eq!(cache.fetch(&1).unwrap(), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SieveConfig {
    pub capacity: usize,
    pub miss_policy: MissPolicy,
    pub store_policy: StorePolicy,
}

impl SieveConfig {
    /// A configuration with the given capacity and default policies.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            miss_policy: MissPolicy::default(),
            store_policy: StorePolicy::default(),
        }
    }

    pub fn miss_policy(mut self, miss_policy: MissPolicy) -> Self {
        self.miss_policy = miss_policy;
        self
    }

    pub fn store_policy(mut self, store_policy: StorePolicy) -> Self {
        self.store_policy = store_policy;
        self
    }

    /// Checks that the configuration describes a usable cache.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.capacity == 0 {
            return Err(CacheError::invalid("capacity must be greater than 0"));
        }
        Ok(())
    }
}

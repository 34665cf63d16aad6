//! Error types returned by the cache and its wrappers.
//!
//! - [`CacheError`]: every failure an operation can report to its caller.
//! - [`InvariantError`]: returned by
//!   [`SieveCache::check_invariants`](crate::SieveCache::check_invariants) when
//!   the index and the retention list disagree.

use thiserror::Error;

/// Failure of a cache operation.
///
/// A call that returns an error leaves the cache exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Construction parameters were rejected (zero capacity, zero shards...).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A new key was stored into a full cache without evicting first.
    #[error("cache is full ({capacity} entries), evict before storing")]
    CapacityExceeded { capacity: usize },

    /// The key is not resident and the cache is configured to raise on a miss.
    #[error("key not found")]
    KeyNotFound,

    /// The key is already resident and the cache rejects overwrites.
    #[error("key is already present")]
    DuplicateKey,

    /// The cache was called again from inside one of its own critical sections.
    #[error("re-entrant cache access from within a locked operation")]
    Reentrant,
}

impl CacheError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        CacheError::InvalidConfiguration(msg.into())
    }
}

/// A structural invariant of the cache does not hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invariant violated: {0}")]
pub struct InvariantError(String);

impl InvariantError {
    pub(crate) fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the description of the violated invariant.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

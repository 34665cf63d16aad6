#![doc = include_str!("../README.md")]

mod arena;
mod config;
mod error;
#[cfg(feature = "sharded")]
mod sharded;
#[cfg(feature = "sync")]
mod sync;

pub use config::{MissPolicy, SieveConfig, StorePolicy};
pub use error::{CacheError, InvariantError};
#[cfg(feature = "sharded")]
pub use sharded::ShardedSieveCache;
#[cfg(feature = "sync")]
pub use sync::SyncSieveCache;

use std::borrow::Borrow;
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::hash::Hash;
use std::iter::FusedIterator;

use tracing::{debug, trace};

use crate::arena::{NodeArena, NodeId};

struct Node<K, V> {
    key: K,
    value: V,
    /// Newer neighbour (towards the head).
    prev: Option<NodeId>,
    /// Older neighbour (towards the tail).
    next: Option<NodeId>,
    visited: bool,
}

impl<K, V> Node<K, V> {
    fn new(key: K, value: V) -> Self {
        Self {
            key,
            value,
            prev: None,
            next: None,
            visited: false,
        }
    }
}

/// A cache based on the SIEVE eviction algorithm.
///
/// Entries live in an arena and are linked in insertion order, newest at the
/// head. A hit only sets the entry's visited bit. When room is needed the hand
/// walks from its last position towards the head, clearing visited bits, and
/// evicts the first entry it finds unvisited; the next scan resumes there.
///
/// ```
/// use sieve_engine::SieveCache;
///
/// let mut cache = SieveCache::new(2).unwrap();
/// cache.store("a", 1).unwrap();
/// cache.store("b", 2).unwrap();
/// assert_eq!(cache.fetch(&"a").unwrap(), Some(&1));
///
/// // Full: the miss evicts `b`, which was never read.
/// assert_eq!(*cache.fetch_or_insert_with("c", |_| 3), 3);
/// assert!(cache.contains_key(&"a"));
/// assert!(!cache.contains_key(&"b"));
/// ```
pub struct SieveCache<K: Eq + Hash + Clone, V> {
    map: HashMap<K, NodeId>,
    nodes: NodeArena<Node<K, V>>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    hand: Option<NodeId>,
    config: SieveConfig,
}

impl<K: Eq + Hash + Clone, V> SieveCache<K, V> {
    /// Create a new cache with the given capacity and default policies.
    pub fn new(capacity: usize) -> Result<Self, CacheError> {
        Self::with_config(SieveConfig::new(capacity))
    }

    /// Create a new cache from a full configuration.
    pub fn with_config(config: SieveConfig) -> Result<Self, CacheError> {
        config.validate()?;
        debug!(
            capacity = config.capacity,
            miss_policy = ?config.miss_policy,
            store_policy = ?config.store_policy,
            "created sieve cache"
        );
        Ok(Self {
            map: HashMap::with_capacity(config.capacity),
            nodes: NodeArena::with_capacity(config.capacity),
            head: None,
            tail: None,
            hand: None,
            config,
        })
    }

    /// Return the capacity of the cache.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Return the configuration the cache was built with.
    #[inline]
    pub fn config(&self) -> &SieveConfig {
        &self.config
    }

    /// Return the number of cached values.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Return `true` when no values are currently cached.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Return `true` if there is a value in the cache mapped to by `key`.
    ///
    /// This does not count as an access.
    #[inline]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
    {
        self.map.contains_key(key)
    }

    /// Get an immutable reference to the value in the cache mapped to by `key`,
    /// marking the entry as visited.
    ///
    /// If no value exists for `key`, this returns `None` regardless of the miss policy.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
    {
        let id = *self.map.get(key)?;
        let node = &mut self.nodes[id];
        node.visited = true;
        Some(&node.value)
    }

    /// Get a mutable reference to the value in the cache mapped to by `key`,
    /// marking the entry as visited.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
    {
        let id = *self.map.get(key)?;
        let node = &mut self.nodes[id];
        node.visited = true;
        Some(&mut node.value)
    }

    /// Look up `key`, marking the entry as visited on a hit.
    ///
    /// A miss never changes the cache. It is reported according to the
    /// configured [`MissPolicy`]: `Err(CacheError::KeyNotFound)` or `Ok(None)`.
    pub fn fetch<Q>(&mut self, key: &Q) -> Result<Option<&V>, CacheError>
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
    {
        match self.map.get(key).copied() {
            Some(id) => {
                let node = &mut self.nodes[id];
                node.visited = true;
                Ok(Some(&node.value))
            }
            None => match self.config.miss_policy {
                MissPolicy::Raise => Err(CacheError::KeyNotFound),
                MissPolicy::ReturnMissing => Ok(None),
            },
        }
    }

    /// Look up `key`, computing and caching its value with `producer` on a miss.
    ///
    /// When the cache is full, one entry is evicted before the new one is linked in.
    pub fn fetch_or_insert_with<F>(&mut self, key: K, producer: F) -> &V
    where
        F: FnOnce(&K) -> V,
    {
        match self.try_fetch_or_insert_with(key, |key| Ok::<V, Infallible>(producer(key))) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Like [`fetch_or_insert_with`](Self::fetch_or_insert_with) with a fallible producer.
    ///
    /// The producer runs before anything is evicted, so a producer error leaves
    /// the cache untouched.
    pub fn try_fetch_or_insert_with<E, F>(&mut self, key: K, producer: F) -> Result<&V, E>
    where
        F: FnOnce(&K) -> Result<V, E>,
    {
        if let Some(id) = self.map.get(&key).copied() {
            let node = &mut self.nodes[id];
            node.visited = true;
            return Ok(&node.value);
        }
        let value = producer(&key)?;
        if self.is_full() {
            self.evict();
        }
        let id = self.push_front(key, value);
        Ok(&self.nodes[id].value)
    }

    /// Store a new entry at the head of the retention list.
    ///
    /// Storing never evicts: a new key into a full cache fails with
    /// [`CacheError::CapacityExceeded`]. A key that is already resident is
    /// handled according to the configured [`StorePolicy`].
    pub fn store(&mut self, key: K, value: V) -> Result<&V, CacheError> {
        match self.map.get(&key).copied() {
            Some(id) => match self.config.store_policy {
                StorePolicy::Reject => {
                    trace!("rejected store of a resident key");
                    return Err(CacheError::DuplicateKey);
                }
                StorePolicy::Replace => {
                    self.remove_node(id);
                }
            },
            None if self.is_full() => {
                trace!(capacity = self.capacity(), "rejected store into a full cache");
                return Err(CacheError::CapacityExceeded {
                    capacity: self.capacity(),
                });
            }
            None => {}
        }
        let id = self.push_front(key, value);
        Ok(&self.nodes[id].value)
    }

    /// Map `key` to `value` in the cache, possibly evicting old entries.
    ///
    /// This method returns `true` when this is a new entry, and `false` if an existing entry was
    /// updated. An updated entry keeps its position and visited bit.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        if let Some(id) = self.map.get(&key).copied() {
            self.nodes[id].value = value;
            return false;
        }
        if self.is_full() {
            self.evict();
        }
        self.push_front(key, value);
        true
    }

    /// Remove the cache entry mapped to by `key`.
    ///
    /// This method returns the value removed from the cache. If `key` did not map to any value,
    /// then this returns `None`.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        Q: Hash + Eq + ?Sized,
        K: Borrow<Q>,
    {
        let id = *self.map.get(key)?;
        self.remove_node(id).map(|node| node.value)
    }

    /// Evict one entry chosen by the SIEVE scan and return it.
    ///
    /// Starting at the hand, visited entries get their bit cleared and are
    /// skipped; the first unvisited entry is removed and the hand stops on its
    /// newer neighbour. Returns `None` on an empty cache.
    pub fn evict(&mut self) -> Option<(K, V)> {
        let mut cursor = self.hand.or(self.tail)?;
        let mut demoted = 0usize;
        loop {
            let node = &mut self.nodes[cursor];
            if !node.visited {
                break;
            }
            node.visited = false;
            demoted += 1;
            cursor = match node.prev {
                Some(prev) => prev,
                None => self.tail?,
            };
        }
        self.hand = Some(cursor);
        let victim = self.remove_node(cursor)?;
        trace!(demoted, len = self.len(), "evicted entry");
        Some((victim.key, victim.value))
    }

    /// Keep only the entries for which `f` returns `true`.
    pub fn retain<F>(&mut self, mut f: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let node = &mut self.nodes[id];
            cursor = node.next;
            if !f(&node.key, &mut node.value) {
                self.remove_node(id);
            }
        }
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        debug!(len = self.len(), "clearing sieve cache");
        self.map.clear();
        self.nodes.clear();
        self.head = None;
        self.tail = None;
        self.hand = None;
    }

    /// Iterate over resident keys in unspecified order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.map.keys()
    }

    /// Iterate over values from the newest entry to the oldest.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, value)| value)
    }

    /// Iterate over entries from the newest to the oldest.
    ///
    /// Iteration does not mark entries as visited.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            nodes: &self.nodes,
            cursor: self.head,
            remaining: self.len(),
        }
    }

    /// Verify that the index, the arena and the retention list describe the same entries.
    ///
    /// This walks the whole list and is meant for tests and debugging.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        let len = self.map.len();
        if len > self.capacity() {
            return Err(InvariantError::new(format!(
                "{} entries exceed capacity {}",
                len,
                self.capacity()
            )));
        }
        if self.nodes.len() != len {
            return Err(InvariantError::new(format!(
                "arena holds {} nodes but the index holds {}",
                self.nodes.len(),
                len
            )));
        }
        if len == 0 {
            if self.head.is_some() || self.tail.is_some() || self.hand.is_some() {
                return Err(InvariantError::new("empty cache with a dangling cursor"));
            }
            return Ok(());
        }

        let mut seen = 0usize;
        let mut hand_found = false;
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(id) = cursor {
            seen += 1;
            if seen > len {
                return Err(InvariantError::new("retention list is longer than the index"));
            }
            let node = self
                .nodes
                .get(id)
                .ok_or_else(|| InvariantError::new("retention list links a freed slot"))?;
            if node.prev != prev {
                return Err(InvariantError::new("prev link does not match the walk"));
            }
            if self.map.get(&node.key) != Some(&id) {
                return Err(InvariantError::new("list node is not indexed under its key"));
            }
            hand_found |= self.hand == Some(id);
            prev = cursor;
            cursor = node.next;
        }
        if seen != len {
            return Err(InvariantError::new(format!(
                "retention list has {} nodes but the index holds {}",
                seen, len
            )));
        }
        if self.tail != prev {
            return Err(InvariantError::new("tail is not the last node of the list"));
        }
        if !hand_found {
            return Err(InvariantError::new("hand does not point into the list"));
        }
        Ok(())
    }

    fn push_front(&mut self, key: K, value: V) -> NodeId {
        debug_assert!(!self.is_full());
        let mut node = Node::new(key.clone(), value);
        node.next = self.head;
        let id = self.nodes.insert(node);
        match self.head {
            Some(head) => self.nodes[head].prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        if self.hand.is_none() {
            self.hand = Some(id);
        }
        self.map.insert(key, id);
        id
    }

    /// Unlink `id` from the list and drop it from the index and the arena.
    ///
    /// If the hand was on it, the hand moves to the newer neighbour, wrapping to the tail.
    fn remove_node(&mut self, id: NodeId) -> Option<Node<K, V>> {
        let node = self.nodes.remove(id)?;
        match node.prev {
            Some(prev) => self.nodes[prev].next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.nodes[next].prev = node.prev,
            None => self.tail = node.prev,
        }
        if self.hand == Some(id) {
            self.hand = node.prev.or(self.tail);
        }
        self.map.remove(&node.key);
        Some(node)
    }
}

impl<K, V> fmt::Debug for SieveCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, K: Eq + Hash + Clone, V> IntoIterator for &'a SieveCache<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the entries of a [`SieveCache`], newest first.
pub struct Iter<'a, K, V> {
    nodes: &'a NodeArena<Node<K, V>>,
    cursor: Option<NodeId>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let nodes = self.nodes;
        let node = &nodes[self.cursor?];
        self.cursor = node.next;
        self.remaining -= 1;
        Some((&node.key, &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<K, V> FusedIterator for Iter<'_, K, V> {}

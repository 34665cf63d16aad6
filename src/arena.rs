use std::ops::{Index, IndexMut};

/// Stable handle to a node while it is resident in the arena.
///
/// Slots are recycled, so a handle must not be used after its node is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(usize);

/// Slot storage for cache nodes.
///
/// Freed slots are kept on a free list and reused by later insertions, so the
/// backing vector never grows past the peak number of live nodes.
#[derive(Debug)]
pub(crate) struct NodeArena<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> NodeArena<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            len: 0,
        }
    }

    pub(crate) fn insert(&mut self, value: T) -> NodeId {
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(value);
                idx
            }
            None => {
                self.slots.push(Some(value));
                self.slots.len() - 1
            }
        };
        self.len += 1;
        NodeId(idx)
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> Option<T> {
        let value = self.slots.get_mut(id.0)?.take()?;
        self.free.push(id.0);
        self.len -= 1;
        Some(value)
    }

    #[inline]
    pub(crate) fn get(&self, id: NodeId) -> Option<&T> {
        self.slots.get(id.0)?.as_ref()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.len = 0;
    }
}

impl<T> Index<NodeId> for NodeArena<T> {
    type Output = T;

    /// # Panics
    ///
    /// Panics if `id` refers to a free slot.
    #[inline]
    fn index(&self, id: NodeId) -> &T {
        match self.slots[id.0].as_ref() {
            Some(value) => value,
            None => panic!("stale node handle {}", id.0),
        }
    }
}

impl<T> IndexMut<NodeId> for NodeArena<T> {
    #[inline]
    fn index_mut(&mut self, id: NodeId) -> &mut T {
        match self.slots[id.0].as_mut() {
            Some(value) => value,
            None => panic!("stale node handle {}", id.0),
        }
    }
}

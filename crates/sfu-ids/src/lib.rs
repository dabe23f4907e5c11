//! `sfu-ids`: bounded-capacity, dense-from-one identifier allocation.
//!
//! Every hardware identifier space the rule materializer hands out — MGID,
//! NID, RID/L1-XID — is a small fixed-size table on the switch. IDs are
//! handed out starting at 1 (0 is reserved), reused once freed, and never
//! handed out past the table's capacity.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;

/// Errors raised by [`IdAllocator`] and [`ScopedIdMap`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdError {
    #[error("id space exhausted: capacity {capacity} already allocated")]
    Exhausted { capacity: u32 },
    #[error("id {0} was not allocated by this allocator")]
    NotAllocated(u32),
}

/// A dense-from-1, capacity-bounded identifier allocator.
///
/// IDs below the high-water mark that have been freed are kept on a
/// min-heap and handed out before the watermark advances, so a sequence of
/// `alloc`/`free` calls reuses the lowest available ID rather than
/// climbing monotonically — this keeps the live ID set packed towards the
/// low end of the space, which matters when `capacity` is small (e.g. a
/// 16-bit RID space shared across every meeting on the switch).
#[derive(Debug, Clone)]
pub struct IdAllocator {
    capacity: u32,
    watermark: u32,
    free: BinaryHeap<Reverse<u32>>,
}

impl IdAllocator {
    /// Create an allocator that will hand out IDs `1..=capacity`.
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            watermark: 1,
            free: BinaryHeap::new(),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of IDs currently handed out and not yet freed.
    pub fn in_use(&self) -> u32 {
        (self.watermark - 1) - self.free.len() as u32
    }

    /// Allocate the lowest available ID.
    pub fn alloc(&mut self) -> Result<u32, IdError> {
        if let Some(Reverse(id)) = self.free.pop() {
            return Ok(id);
        }
        if self.watermark > self.capacity {
            return Err(IdError::Exhausted {
                capacity: self.capacity,
            });
        }
        let id = self.watermark;
        self.watermark += 1;
        Ok(id)
    }

    /// Return an ID to the free pool so a future `alloc` can reuse it.
    ///
    /// Freeing an ID outside `1..watermark` is a caller bug; it is
    /// accepted but will never be handed back out, since it was never
    /// handed out in the first place.
    pub fn free(&mut self, id: u32) {
        if id >= 1 && id < self.watermark {
            self.free.push(Reverse(id));
        }
    }
}

/// A bijective map between application-level keys and bounded-capacity
/// hardware IDs, backed by an [`IdAllocator`].
///
/// Used for MGID (keyed by send-stream), NID (keyed by send-stream), and
/// RID/L1-XID (keyed by receive-stream) assignment: repeated calls with
/// the same key return the same ID, and releasing a key frees its ID for
/// reuse by a later, unrelated key.
#[derive(Debug, Clone)]
pub struct ScopedIdMap<K> {
    allocator: IdAllocator,
    forward: HashMap<K, u32>,
    reverse: HashMap<u32, K>,
}

impl<K> ScopedIdMap<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: u32) -> Self {
        Self {
            allocator: IdAllocator::new(capacity),
            forward: HashMap::new(),
            reverse: HashMap::new(),
        }
    }

    /// Return the existing ID for `key`, or allocate and record a new one.
    pub fn get_or_assign(&mut self, key: K) -> Result<u32, IdError> {
        if let Some(id) = self.forward.get(&key) {
            return Ok(*id);
        }
        let id = self.allocator.alloc()?;
        self.forward.insert(key.clone(), id);
        self.reverse.insert(id, key);
        Ok(id)
    }

    /// Look up the ID currently assigned to `key`, without allocating.
    pub fn get(&self, key: &K) -> Option<u32> {
        self.forward.get(key).copied()
    }

    /// Look up the key currently assigned to `id`.
    pub fn key_for(&self, id: u32) -> Option<&K> {
        self.reverse.get(&id)
    }

    /// Release `key`'s ID back to the free pool. Returns the freed ID, if
    /// the key was assigned one.
    pub fn release(&mut self, key: &K) -> Option<u32> {
        let id = self.forward.remove(key)?;
        self.reverse.remove(&id);
        self.allocator.free(id);
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn capacity(&self) -> u32 {
        self.allocator.capacity()
    }
}

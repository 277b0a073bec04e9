//! Fixed-capacity LRU cache.
//!
//! Backs the shared-string hot set: a small bounded map of individually
//! promoted strings that keep getting requested outside the current page
//! windows. All operations are O(1).
//!
//! The recency list is index-linked over a slab of nodes rather than
//! pointer-linked, so no unsafe code is needed and removed slots are
//! recycled through a free list.

use std::collections::HashMap;
use std::hash::Hash;

/// Sentinel for "no node".
const NIL: usize = usize::MAX;

struct Node<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// Fixed-capacity cache evicting the least-recently-used entry.
///
/// Capacity is set at construction and never changes; inserting into a full
/// cache evicts the tail. Not thread-safe.
pub struct LruCache<K, V> {
    map: HashMap<K, usize>,
    slab: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    /// Create a cache holding at most `capacity` entries.
    ///
    /// A zero capacity is pinned to 1 so that `put` always retains the entry
    /// it just inserted.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        LruCache {
            map: HashMap::with_capacity(capacity),
            slab: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            capacity,
        }
    }

    /// Number of entries currently cached.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up `key`, marking it most-recently-used on a hit.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.move_to_front(idx);
        self.slab[idx].as_ref().map(|n| &n.value)
    }

    /// Look up `key` without touching recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.slab[idx].as_ref().map(|n| &n.value)
    }

    /// Insert or replace `key`, evicting the least-recently-used entry if the
    /// cache is over capacity. Returns the evicted pair, if any.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.map.get(&key) {
            if let Some(node) = self.slab[idx].as_mut() {
                node.value = value;
            }
            self.move_to_front(idx);
            return None;
        }

        let mut evicted = None;
        if self.map.len() == self.capacity {
            evicted = self.evict_tail();
        }

        let idx = match self.free.pop() {
            Some(i) => {
                self.slab[i] = Some(Node {
                    key: key.clone(),
                    value,
                    prev: NIL,
                    next: self.head,
                });
                i
            }
            None => {
                self.slab.push(Some(Node {
                    key: key.clone(),
                    value,
                    prev: NIL,
                    next: self.head,
                }));
                self.slab.len() - 1
            }
        };

        if self.head != NIL {
            if let Some(h) = self.slab[self.head].as_mut() {
                h.prev = idx;
            }
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
        self.map.insert(key, idx);
        evicted
    }

    /// Remove `key`, returning its value if present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.map.remove(key)?;
        self.unlink(idx);
        self.free.push(idx);
        self.slab[idx].take().map(|n| n.value)
    }

    /// Drop every entry, keeping the allocated capacity.
    pub fn clear(&mut self) {
        self.map.clear();
        self.slab.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    fn evict_tail(&mut self) -> Option<(K, V)> {
        if self.tail == NIL {
            return None;
        }
        let idx = self.tail;
        self.unlink(idx);
        self.free.push(idx);
        let node = self.slab[idx].take()?;
        self.map.remove(&node.key);
        Some((node.key, node.value))
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        if let Some(node) = self.slab[idx].as_mut() {
            node.prev = NIL;
            node.next = self.head;
        }
        if self.head != NIL {
            if let Some(h) = self.slab[self.head].as_mut() {
                h.prev = idx;
            }
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.slab[idx].as_ref() {
            Some(n) => (n.prev, n.next),
            None => return,
        };
        if prev != NIL {
            if let Some(p) = self.slab[prev].as_mut() {
                p.next = next;
            }
        } else {
            self.head = next;
        }
        if next != NIL {
            if let Some(n) = self.slab[next].as_mut() {
                n.prev = prev;
            }
        } else {
            self.tail = prev;
        }
    }
}

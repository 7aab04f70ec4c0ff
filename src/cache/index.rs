//! Generic hashed LRU index (spec §4.L), used by the chunk cache (§4.F)
//! and available for any other intra-file index a caller needs.
//!
//! Spec §9 flags the original's manual linked lists for rearchitecture:
//! "model as a doubly-linked list with stable arena indices; cache
//! nodes reference their buffer by value, not pointer, to simplify
//! ownership transfer during eviction." This is exactly that: a `Vec`
//! arena of nodes linked by index, with a free list for reuse, guarded
//! by one `RwLock` (reads concurrent, structural mutation exclusive).

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

const NIL: usize = usize::MAX;

struct Node<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

struct Inner<K, V> {
    arena: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    lookup: HashMap<K, usize>,
    /// MRU end.
    head: usize,
    /// LRU end.
    tail: usize,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn new() -> Self {
        Self {
            arena: Vec::new(),
            free: Vec::new(),
            lookup: HashMap::new(),
            head: NIL,
            tail: NIL,
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.arena[idx].as_ref().unwrap();
            (node.prev, node.next)
        };
        if prev != NIL {
            self.arena[prev].as_mut().unwrap().next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.arena[next].as_mut().unwrap().prev = prev;
        } else {
            self.tail = prev;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.arena[idx].as_mut().unwrap();
            node.prev = NIL;
            node.next = old_head;
        }
        if old_head != NIL {
            self.arena[old_head].as_mut().unwrap().prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }
}

/// A hashed LRU index mapping `K -> V`. All operations that relink the
/// LRU order acquire the write lock; pure lookups acquire the read
/// lock. Recursive locking is forbidden (spec §5) — no method here
/// calls another method of `self` while already holding a guard.
pub struct CacheIndex<K, V> {
    inner: RwLock<Inner<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> Default for CacheIndex<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> CacheIndex<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-locked hash probe; does not alter LRU order.
    pub fn get(&self, key: &K) -> Option<V> {
        let guard = self.inner.read().unwrap();
        let idx = *guard.lookup.get(key)?;
        Some(guard.arena[idx].as_ref().unwrap().value.clone())
    }

    /// Write-locked promotion to MRU.
    pub fn touch(&self, key: &K) {
        let mut guard = self.inner.write().unwrap();
        if let Some(&idx) = guard.lookup.get(key) {
            guard.touch(idx);
        }
    }

    /// Write-locked insert (or overwrite) and push to MRU.
    pub fn put(&self, key: K, value: V) {
        let mut guard = self.inner.write().unwrap();
        if let Some(&idx) = guard.lookup.get(&key) {
            guard.arena[idx].as_mut().unwrap().value = value;
            guard.touch(idx);
            return;
        }
        let idx = if let Some(free_idx) = guard.free.pop() {
            guard.arena[free_idx] = Some(Node {
                key: key.clone(),
                value,
                prev: NIL,
                next: NIL,
            });
            free_idx
        } else {
            guard.arena.push(Some(Node {
                key: key.clone(),
                value,
                prev: NIL,
                next: NIL,
            }));
            guard.arena.len() - 1
        };
        guard.lookup.insert(key, idx);
        guard.push_front(idx);
    }

    /// Write-locked removal from both the hash and the LRU list.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.write().unwrap();
        let idx = guard.lookup.remove(key)?;
        guard.unlink(idx);
        let node = guard.arena[idx].take().unwrap();
        guard.free.push(idx);
        Some(node.value)
    }

    /// Read-then-write-locked modify-in-place: upgrades to exclusive
    /// before mutating the node's content, per spec §5.
    pub fn modify<F, R>(&self, key: &K, f: F) -> Option<R>
    where
        F: FnOnce(&mut V) -> R,
    {
        let mut guard = self.inner.write().unwrap();
        let idx = *guard.lookup.get(key)?;
        let result = f(&mut guard.arena[idx].as_mut().unwrap().value);
        guard.touch(idx);
        Some(result)
    }

    /// Peek the MRU entry under a read lock.
    pub fn first(&self) -> Option<(K, V)> {
        let guard = self.inner.read().unwrap();
        if guard.head == NIL {
            return None;
        }
        let node = guard.arena[guard.head].as_ref().unwrap();
        Some((node.key.clone(), node.value.clone()))
    }

    /// Peek the LRU entry under a read lock.
    pub fn last(&self) -> Option<(K, V)> {
        let guard = self.inner.read().unwrap();
        if guard.tail == NIL {
            return None;
        }
        let node = guard.arena[guard.tail].as_ref().unwrap();
        Some((node.key.clone(), node.value.clone()))
    }

    /// Remove and return the current LRU entry.
    pub fn pop_last(&self) -> Option<(K, V)> {
        let mut guard = self.inner.write().unwrap();
        if guard.tail == NIL {
            return None;
        }
        let idx = guard.tail;
        let key = guard.arena[idx].as_ref().unwrap().key.clone();
        guard.unlink(idx);
        let node = guard.arena[idx].take().unwrap();
        guard.free.push(idx);
        guard.lookup.remove(&key);
        Some((key, node.value))
    }
}

/// Stable 64-bit hash of an arbitrary byte buffer, used by callers that
/// want a numeric key derived from e.g. a chunk coordinate's encoded
/// form (spec §4.L: "hash key is a 64-bit value produced from any byte
/// buffer ... stable across the life of a dataset").
pub fn hash64(bytes: &[u8]) -> u64 {
    // FNV-1a: simple, dependency-free, and stable across runs/process
    // restarts (unlike SipHash's randomized default state), which
    // matters here because the hash is itself a cache identity.
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[allow(dead_code)]
fn _assert_hasher_unused<H: Hasher>() {}

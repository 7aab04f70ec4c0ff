//! Chunk cache (spec §4.F): per-variable, multi-dimensional-index-keyed
//! chunk buffers with LRU eviction and at-most-one-in-flight builds per
//! key. Built on the hashed LRU of [`super::index::CacheIndex`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};

use crate::error::NczResult;

use super::index::CacheIndex;

/// A chunk coordinate, used as the cache key. `Vec<u64>` rather than
/// `GridCoord` (a `SmallVec`) because [`CacheIndex`] needs `Eq + Hash`.
pub type ChunkKey = Vec<u64>;

#[derive(Clone)]
struct CacheEntry {
    buf: Arc<Vec<u8>>,
    dirty: bool,
}

/// Callback invoked when a dirty chunk is evicted: encode through the
/// filter pipeline and write to the map. Supplied by the owning
/// variable at construction so the cache itself stays storage-agnostic.
pub type FlushFn = dyn Fn(&[u64], &[u8]) -> NczResult<()> + Send + Sync;

pub struct ChunkCache {
    index: CacheIndex<ChunkKey, CacheEntry>,
    byte_budget: AtomicU64,
    current_bytes: AtomicU64,
    inflight: Mutex<HashMap<ChunkKey, Arc<(Mutex<bool>, Condvar)>>>,
    fill_chunk: RwLock<Option<Arc<Vec<u8>>>>,
    flush: Box<FlushFn>,
}

impl ChunkCache {
    pub fn new(byte_budget: u64, flush: Box<FlushFn>) -> Self {
        Self {
            index: CacheIndex::new(),
            byte_budget: AtomicU64::new(byte_budget),
            current_bytes: AtomicU64::new(0),
            inflight: Mutex::new(HashMap::new()),
            fill_chunk: RwLock::new(None),
            flush,
        }
    }

    pub fn set_byte_budget(&self, budget: u64) {
        self.byte_budget.store(budget, Ordering::SeqCst);
    }

    /// Read-locked hash probe; miss returns `None` immediately.
    pub fn lookup(&self, key: &ChunkKey) -> Option<Vec<u8>> {
        self.index.get(key).map(|e| (*e.buf).clone())
    }

    pub fn touch(&self, key: &ChunkKey) {
        self.index.touch(key);
    }

    /// Write-locked insert; evicts LRU entries until back under budget.
    pub fn insert(&self, key: ChunkKey, buf: Vec<u8>, dirty: bool) -> NczResult<()> {
        let size = buf.len() as u64;
        if let Some(old) = self.index.get(&key) {
            self.current_bytes.fetch_sub(old.buf.len() as u64, Ordering::SeqCst);
        }
        self.index.put(
            key,
            CacheEntry {
                buf: Arc::new(buf),
                dirty,
            },
        );
        self.current_bytes.fetch_add(size, Ordering::SeqCst);
        self.evict_over_budget()
    }

    /// Mark an already-cached chunk dirty (e.g. after an in-place write).
    pub fn mark_dirty(&self, key: &ChunkKey, buf: Vec<u8>) -> NczResult<()> {
        self.insert(key.clone(), buf, true)
    }

    pub fn remove(&self, key: &ChunkKey) -> Option<Vec<u8>> {
        let entry = self.index.remove(key)?;
        self.current_bytes.fetch_sub(entry.buf.len() as u64, Ordering::SeqCst);
        Some((*entry.buf).clone())
    }

    pub fn first(&self) -> Option<ChunkKey> {
        self.index.first().map(|(k, _)| k)
    }

    pub fn last(&self) -> Option<ChunkKey> {
        self.index.last().map(|(k, _)| k)
    }

    fn evict_over_budget(&self) -> NczResult<()> {
        let budget = self.byte_budget.load(Ordering::SeqCst);
        while self.current_bytes.load(Ordering::SeqCst) > budget {
            let Some((key, entry)) = self.index.pop_last() else {
                break;
            };
            self.current_bytes.fetch_sub(entry.buf.len() as u64, Ordering::SeqCst);
            if entry.dirty {
                (self.flush)(&key, &entry.buf)?;
            }
        }
        Ok(())
    }

    /// Fetch a chunk, building it via `builder` on a miss. Concurrent
    /// callers requesting the same missing key all wait on one producer
    /// (spec §4.F "at-most-one-in-flight"): the first caller runs
    /// `builder` and signals the condvar; the rest block until it's
    /// done, then re-probe the cache.
    pub fn get_or_build<F>(&self, key: &ChunkKey, builder: F) -> NczResult<Vec<u8>>
    where
        F: FnOnce() -> NczResult<Vec<u8>>,
    {
        if let Some(buf) = self.lookup(key) {
            self.touch(key);
            return Ok(buf);
        }

        // Whichever caller's `entry()` actually inserts the gate becomes
        // the leader (the map insertion is itself the atomic decision
        // point); everyone else who finds an existing gate is a
        // follower and only ever waits on it.
        let (is_leader, gate) = {
            let mut inflight = self.inflight.lock().unwrap();
            match inflight.get(key) {
                Some(g) => (false, g.clone()),
                None => {
                    let g = Arc::new((Mutex::new(false), Condvar::new()));
                    inflight.insert(key.clone(), g.clone());
                    (true, g)
                }
            }
        };

        let (lock, cvar) = &*gate;
        if is_leader {
            let result = builder();
            if let Ok(bytes) = &result {
                self.insert(key.clone(), bytes.clone(), false)?;
            }
            *lock.lock().unwrap() = true;
            cvar.notify_all();
            self.inflight.lock().unwrap().remove(key);
            return result;
        }

        let mut done = lock.lock().unwrap();
        while !*done {
            done = cvar.wait(done).unwrap();
        }
        drop(done);
        match self.lookup(key) {
            Some(buf) => Ok(buf),
            // The leader's build failed; fall back to building locally
            // rather than propagating a stale error to an unrelated caller.
            None => builder(),
        }
    }

    /// Set the canonical fill chunk for this variable's current
    /// (fill-value, chunk-shape, element-type) triple.
    pub fn set_fill_chunk(&self, buf: Vec<u8>) {
        *self.fill_chunk.write().unwrap() = Some(Arc::new(buf));
    }

    pub fn fill_chunk(&self) -> Option<Vec<u8>> {
        self.fill_chunk.read().unwrap().as_ref().map(|b| (**b).clone())
    }

    /// Invalidate the fill chunk (spec §4.F: whenever fill-value, chunk
    /// shape, or element type changes).
    pub fn invalidate_fill_chunk(&self) {
        *self.fill_chunk.write().unwrap() = None;
    }

    pub fn current_bytes(&self) -> u64 {
        self.current_bytes.load(Ordering::SeqCst)
    }

    /// Flush every dirty entry through the flush callback regardless of
    /// budget, then reinstate all entries (now clean) in their original
    /// relative LRU order. Spec §3: "close must flush all dirty
    /// groups/vars" — this is the per-variable half of that.
    pub fn flush_all(&self) -> NczResult<()> {
        let mut drained = Vec::new();
        while let Some((key, entry)) = self.index.pop_last() {
            self.current_bytes.fetch_sub(entry.buf.len() as u64, Ordering::SeqCst);
            if entry.dirty {
                (self.flush)(&key, &entry.buf)?;
            }
            drained.push((key, entry));
        }
        for (key, mut entry) in drained {
            entry.dirty = false;
            self.current_bytes.fetch_add(entry.buf.len() as u64, Ordering::SeqCst);
            self.index.put(key, entry);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn noop_flush() -> Box<FlushFn> {
        Box::new(|_, _| Ok(()))
    }

    #[test]
    fn insert_and_lookup() {
        let cache = ChunkCache::new(1024, noop_flush());
        cache.insert(vec![0, 0], vec![1, 2, 3, 4], false).unwrap();
        assert_eq!(cache.lookup(&vec![0, 0]), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn eviction_ordering_a_b_a_c_budget_of_two_chunks() {
        // spec §8 scenario 6: budget = 2 chunks of 4 bytes each, access A B A C.
        let flush_count = Arc::new(AtomicUsize::new(0));
        let fc = flush_count.clone();
        let cache = ChunkCache::new(
            8,
            Box::new(move |_k, _b| {
                fc.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        cache.insert(vec![0], vec![1; 4], false).unwrap(); // A
        cache.insert(vec![1], vec![2; 4], false).unwrap(); // B
        cache.touch(&vec![0]); // access A again -> MRU
        cache.insert(vec![2], vec![3; 4], false).unwrap(); // C, evicts B (LRU)

        assert!(cache.lookup(&vec![0]).is_some()); // A survives
        assert!(cache.lookup(&vec![2]).is_some()); // C survives
        assert!(cache.lookup(&vec![1]).is_none()); // B evicted
    }

    #[test]
    fn dirty_eviction_flushes_through_callback() {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let f2 = flushed.clone();
        let cache = ChunkCache::new(
            4,
            Box::new(move |k, b| {
                f2.lock().unwrap().push((k.to_vec(), b.to_vec()));
                Ok(())
            }),
        );
        cache.insert(vec![0], vec![1; 4], true).unwrap();
        cache.insert(vec![1], vec![2; 4], true).unwrap(); // evicts [0], dirty -> flush
        let log = flushed.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, vec![0]);
    }

    #[test]
    fn get_or_build_only_runs_builder_once_for_a_miss() {
        let builds = Arc::new(AtomicUsize::new(0));
        let cache = ChunkCache::new(1024, noop_flush());
        let b = builds.clone();
        let result = cache
            .get_or_build(&vec![0, 0], || {
                b.fetch_add(1, Ordering::SeqCst);
                Ok(vec![9, 9, 9])
            })
            .unwrap();
        assert_eq!(result, vec![9, 9, 9]);
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        // second call is a cache hit, builder not invoked again
        let result2 = cache.get_or_build(&vec![0, 0], || unreachable!()).unwrap();
        assert_eq!(result2, vec![9, 9, 9]);
    }

    #[test]
    fn flush_all_persists_dirty_entries_and_keeps_them_cached() {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let f2 = flushed.clone();
        let cache = ChunkCache::new(
            1024,
            Box::new(move |k, b| {
                f2.lock().unwrap().push((k.to_vec(), b.to_vec()));
                Ok(())
            }),
        );
        cache.insert(vec![0], vec![1; 4], true).unwrap();
        cache.insert(vec![1], vec![2; 4], false).unwrap();
        cache.flush_all().unwrap();

        let log = flushed.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, vec![0]);
        // still cached after flush, just clean now
        assert!(cache.lookup(&vec![0]).is_some());
        assert!(cache.lookup(&vec![1]).is_some());
    }

    #[test]
    fn fill_chunk_invalidated_on_demand() {
        let cache = ChunkCache::new(1024, noop_flush());
        cache.set_fill_chunk(vec![0; 8]);
        assert!(cache.fill_chunk().is_some());
        cache.invalidate_fill_chunk();
        assert!(cache.fill_chunk().is_none());
    }
}

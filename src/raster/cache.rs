use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use ndarray::Array3;

use crate::area::{Area, Size};
use crate::config::Interpolation;

/// Identifies a decoded region: the source window, the size it was
/// resampled to, and the kernel used for resampling.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct RegionKey {
    pub read: Area,
    pub size: Size,
    pub interpolation: Interpolation,
}

struct CacheEntry {
    pixels: Arc<Array3<u8>>,
    size_bytes: usize,
}

struct CacheState {
    capacity_bytes: usize,
    current_bytes: usize,
    hits: u64,
    misses: u64,
    entries: LruCache<RegionKey, CacheEntry>,
}

impl CacheState {
    /// Evict least recently used regions until at most `bytes` remain.
    fn shrink_to(&mut self, bytes: usize) -> usize {
        let mut evicted = 0;
        while self.current_bytes > bytes {
            match self.entries.pop_lru() {
                Some((_key, entry)) => {
                    self.current_bytes = self.current_bytes.saturating_sub(entry.size_bytes);
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }
}

/// Snapshot of a [`RegionCache`]'s counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CacheStats {
    pub capacity_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub bytes: usize,
}

/// Least-recently-used cache of decoded pixel regions bounded by a byte
/// budget. Safe to share between workers; the lock is only held for lookups
/// and insertions, never while decoding.
pub struct RegionCache {
    state: Mutex<CacheState>,
}

impl RegionCache {
    pub fn new(capacity_bytes: usize) -> Self {
        RegionCache {
            state: Mutex::new(CacheState {
                capacity_bytes,
                current_bytes: 0,
                hits: 0,
                misses: 0,
                entries: LruCache::unbounded(),
            }),
        }
    }

    pub fn capacity_bytes(&self) -> usize {
        self.lock().capacity_bytes
    }

    /// Change the budget, evicting least recently used regions until the
    /// cached bytes fit.
    pub fn set_capacity_bytes(&self, capacity_bytes: usize) {
        let mut state = self.lock();
        state.capacity_bytes = capacity_bytes;
        let evicted = state.shrink_to(capacity_bytes);
        if evicted > 0 {
            tracing::debug!(evicted, capacity_bytes, "region cache budget lowered");
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // a panic while holding the lock leaves the bookkeeping consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &RegionKey) -> Option<Arc<Array3<u8>>> {
        let mut state = self.lock();
        match state.entries.get(key).map(|entry| Arc::clone(&entry.pixels)) {
            Some(pixels) => {
                state.hits += 1;
                Some(pixels)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Insert a region, evicting the least recently used entries until it
    /// fits. Regions larger than the whole budget are not cached.
    pub fn insert(&self, key: RegionKey, pixels: Arc<Array3<u8>>) {
        let size_bytes = pixels.len();
        let mut state = self.lock();
        if size_bytes > state.capacity_bytes {
            return;
        }

        if let Some(old) = state.entries.pop(&key) {
            state.current_bytes = state.current_bytes.saturating_sub(old.size_bytes);
        }

        let budget = state.capacity_bytes - size_bytes;
        let evicted = state.shrink_to(budget);
        if evicted > 0 {
            tracing::debug!(evicted, size_bytes, "evicted cached raster regions");
        }

        state.current_bytes = state.current_bytes.saturating_add(size_bytes);
        state.entries.put(key, CacheEntry { pixels, size_bytes });
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            capacity_bytes: state.capacity_bytes,
            hits: state.hits,
            misses: state.misses,
            entries: state.entries.len(),
            bytes: state.current_bytes,
        }
    }
}

// Copyright 2015-2020 Eirene developers.
// This file is part of Eirene.

// Eirene is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Eirene is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Eirene.  If not, see <http://www.gnu.org/licenses/>.

//! Caches: a capacity-bounded LRU with hit/miss and byte accounting,
//! and a write-behind buffer that coalesces writes in front of a
//! [`KVStore`] and serves reads from the in-memory overlay before
//! falling back to the bounded read cache and, last, the store.

use eirene_types::{Error, KVStore};
use lru_cache::LruCache;
use parking_lot::{Mutex, RwLock};

/// Running counters for one cache instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Total key + value bytes currently resident.
    pub current_bytes: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Called with each evicted `(key, value)` pair, before the pair is
/// dropped.
pub type EvictionCallback = Box<dyn Fn(&[u8], &[u8]) + Send>;

struct CacheInner {
    entries: LruCache<Vec<u8>, Vec<u8>>,
    capacity: usize,
    stats: CacheStats,
    on_evict: Option<EvictionCallback>,
}

impl CacheInner {
    fn entry_size(key: &[u8], value: &[u8]) -> u64 {
        (key.len() + value.len()) as u64
    }

    fn evict_to_capacity(&mut self) {
        while self.entries.len() > self.capacity {
            if let Some((key, value)) = self.entries.remove_lru() {
                self.stats.current_bytes -= Self::entry_size(&key, &value);
                if let Some(cb) = &self.on_evict {
                    cb(&key, &value);
                }
            } else {
                break;
            }
        }
    }
}

/// An entry-capacity-bounded LRU keyed by arbitrary byte strings,
/// tracking per-entry sizes and hit/miss statistics the auto-tuner
/// can sample. Eviction is driven explicitly so the callback and
/// byte accounting observe every evicted pair; the recency order
/// itself is the `lru_cache` crate's.
pub struct BoundedCache {
    inner: Mutex<CacheInner>,
}

impl BoundedCache {
    pub fn new(capacity: usize) -> Self {
        BoundedCache::with_eviction_callback(capacity, None)
    }

    pub fn with_eviction_callback(capacity: usize, on_evict: Option<EvictionCallback>) -> Self {
        BoundedCache {
            inner: Mutex::new(CacheInner {
                // The crate would evict silently on insert; keep its own
                // bound out of the way and evict via `evict_to_capacity`.
                entries: LruCache::new(usize::MAX),
                capacity: capacity.max(1),
                stats: CacheStats::default(),
                on_evict,
            }),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        let hit = inner.entries.get_mut(key).cloned();
        if hit.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        hit
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        let mut inner = self.inner.lock();
        let added = CacheInner::entry_size(&key, &value);
        if let Some(previous) = inner.entries.insert(key.clone(), value) {
            inner.stats.current_bytes -= CacheInner::entry_size(&key, &previous);
        }
        inner.stats.current_bytes += added;
        inner.evict_to_capacity();
    }

    pub fn remove(&self, key: &[u8]) {
        let mut inner = self.inner.lock();
        if let Some(value) = inner.entries.remove(key) {
            inner.stats.current_bytes -= CacheInner::entry_size(key, &value);
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }

    pub fn resize(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        inner.capacity = capacity.max(1);
        inner.evict_to_capacity();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fronts a [`KVStore`] with a write-behind buffer plus a bounded read
/// cache: writes accumulate in the buffer and are visible to reads
/// immediately; `flush` commits them as one atomic batch and seeds
/// the read cache, so a write is always readable regardless of when
/// the batch lands.
pub struct BufferedStore {
    store: Box<dyn KVStore>,
    write_buffer: RwLock<std::collections::HashMap<Vec<u8>, Vec<u8>>>,
    read_cache: BoundedCache,
    flush_threshold: usize,
}

impl BufferedStore {
    pub fn new(store: Box<dyn KVStore>, read_cache_capacity: usize, flush_threshold: usize) -> Self {
        BufferedStore {
            store,
            write_buffer: RwLock::new(std::collections::HashMap::new()),
            read_cache: BoundedCache::new(read_cache_capacity),
            flush_threshold: flush_threshold.max(1),
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        if let Some(v) = self.write_buffer.read().get(key) {
            return Ok(Some(v.clone()));
        }
        if let Some(v) = self.read_cache.get(key) {
            return Ok(Some(v));
        }
        let v = self.store.get(key)?;
        if let Some(ref v) = v {
            self.read_cache.put(key.to_vec(), v.clone());
        }
        Ok(v)
    }

    /// Buffers `value` for `key`, flushing the whole buffer once it
    /// reaches `flush_threshold` entries.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), Error> {
        let should_flush = {
            let mut buf = self.write_buffer.write();
            buf.insert(key, value);
            buf.len() >= self.flush_threshold
        };
        if should_flush {
            self.flush()?;
        }
        Ok(())
    }

    /// Commits every buffered write as one atomic batch and seeds the
    /// read cache with the flushed entries.
    pub fn flush(&self) -> Result<(), Error> {
        let drained: Vec<(Vec<u8>, Vec<u8>)> = {
            let mut buf = self.write_buffer.write();
            buf.drain().collect()
        };
        if drained.is_empty() {
            return Ok(());
        }
        let mut batch = self.store.batch();
        for (k, v) in &drained {
            batch.put(k, v);
        }
        batch.commit()?;
        for (k, v) in drained {
            self.read_cache.put(k, v);
        }
        Ok(())
    }

    pub fn read_cache_stats(&self) -> CacheStats {
        self.read_cache.stats()
    }

    pub fn pending_writes(&self) -> usize {
        self.write_buffer.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eirene_types::WriteBatch;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    struct MemStore(StdMutex<HashMap<Vec<u8>, Vec<u8>>>);
    struct MemBatch<'a> {
        store: &'a MemStore,
        pending: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    }
    impl MemStore {
        fn new() -> Self {
            MemStore(StdMutex::new(HashMap::new()))
        }
    }
    impl KVStore for MemStore {
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
            Ok(self.0.lock().unwrap().get(key).cloned())
        }
        fn put(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
            self.0.lock().unwrap().insert(key.to_vec(), value.to_vec());
            Ok(())
        }
        fn delete(&self, key: &[u8]) -> Result<(), Error> {
            self.0.lock().unwrap().remove(key);
            Ok(())
        }
        fn batch(&self) -> Box<dyn WriteBatch + '_> {
            Box::new(MemBatch { store: self, pending: Vec::new() })
        }
    }
    impl<'a> WriteBatch for MemBatch<'a> {
        fn put(&mut self, key: &[u8], value: &[u8]) {
            self.pending.push((key.to_vec(), Some(value.to_vec())));
        }
        fn delete(&mut self, key: &[u8]) {
            self.pending.push((key.to_vec(), None));
        }
        fn commit(self: Box<Self>) -> Result<(), Error> {
            let mut guard = self.store.0.lock().unwrap();
            for (k, v) in self.pending {
                match v {
                    Some(v) => { guard.insert(k, v); }
                    None => { guard.remove(&k); }
                }
            }
            Ok(())
        }
    }

    #[test]
    fn bounded_cache_tracks_hits_and_misses() {
        let cache = BoundedCache::new(8);
        assert!(cache.get(b"a").is_none());
        cache.put(b"a".to_vec(), b"1".to_vec());
        assert_eq!(cache.get(b"a"), Some(b"1".to_vec()));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn bounded_cache_evicts_least_recently_used() {
        let cache = BoundedCache::new(2);
        cache.put(b"a".to_vec(), b"1".to_vec());
        cache.put(b"b".to_vec(), b"2".to_vec());
        cache.put(b"c".to_vec(), b"3".to_vec()); // evicts "a"
        assert!(cache.get(b"a").is_none());
        assert!(cache.get(b"b").is_some());
        assert!(cache.get(b"c").is_some());
    }

    #[test]
    fn a_capacity_five_cache_evicts_only_the_oldest_two_of_seven_inserts() {
        let cache = BoundedCache::new(5);
        for i in 0..7u8 {
            cache.put(vec![i], vec![i]);
        }
        assert!(cache.get(&[0]).is_none());
        assert!(cache.get(&[1]).is_none());
        for i in 2..7u8 {
            assert_eq!(cache.get(&[i]), Some(vec![i]));
        }
    }

    #[test]
    fn byte_accounting_tracks_inserts_replacements_and_evictions() {
        let cache = BoundedCache::new(2);
        cache.put(b"a".to_vec(), b"11".to_vec()); // 3 bytes
        cache.put(b"b".to_vec(), b"22".to_vec()); // 3 bytes
        assert_eq!(cache.stats().current_bytes, 6);
        cache.put(b"a".to_vec(), b"1".to_vec()); // replaces: 2 bytes
        assert_eq!(cache.stats().current_bytes, 5);
        cache.put(b"c".to_vec(), b"33".to_vec()); // evicts "b"
        assert_eq!(cache.stats().current_bytes, 5);
        cache.remove(b"c");
        assert_eq!(cache.stats().current_bytes, 2);
    }

    #[test]
    fn eviction_callback_sees_each_evicted_pair() {
        let evicted = std::sync::Arc::new(StdMutex::new(Vec::new()));
        let log = std::sync::Arc::clone(&evicted);
        let cache = BoundedCache::with_eviction_callback(
            2,
            Some(Box::new(move |key: &[u8], _value: &[u8]| {
                log.lock().unwrap().push(key.to_vec());
            })),
        );
        cache.put(b"a".to_vec(), b"1".to_vec());
        cache.put(b"b".to_vec(), b"2".to_vec());
        cache.put(b"c".to_vec(), b"3".to_vec());
        cache.put(b"d".to_vec(), b"4".to_vec());
        assert_eq!(&*evicted.lock().unwrap(), &[b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn resize_evicts_down_to_the_new_capacity() {
        let cache = BoundedCache::new(5);
        for i in 0..5u8 {
            cache.put(vec![i], vec![i]);
        }
        cache.resize(2);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&[4]).is_some());
        assert!(cache.get(&[0]).is_none());
    }

    #[test]
    fn buffered_store_serves_reads_from_the_write_buffer_before_flush() {
        let store = BufferedStore::new(Box::new(MemStore::new()), 16, 100);
        store.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        assert_eq!(store.pending_writes(), 1);
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn buffered_store_flushes_automatically_at_the_threshold() {
        let store = BufferedStore::new(Box::new(MemStore::new()), 16, 2);
        store.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        store.put(b"b".to_vec(), b"2".to_vec()).unwrap();
        assert_eq!(store.pending_writes(), 0);
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn explicit_flush_seeds_the_read_cache() {
        let store = BufferedStore::new(Box::new(MemStore::new()), 16, 100);
        store.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        store.flush().unwrap();
        assert_eq!(store.pending_writes(), 0);
        // Served from the read cache now, not the write buffer.
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(store.read_cache_stats().hits >= 1);
    }
}

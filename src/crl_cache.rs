//! CRL Cache — specification §4.4.
//!
//! A concurrency-safe, O(1) LRU cache keyed by CRL URL, with TTL-based
//! freshness, size-based eviction, and a singleton background cleanup
//! task.
//!
//! The teacher's own CRL cache (`tls/crl_cache.rs`) and the pack's
//! `cache/response_cache/eviction.rs` both back their cache with a plain
//! `HashMap` and an O(n) scan/sort for eviction — neither is O(1). This
//! module instead keeps the teacher's locking shape (single `RwLock`
//! guarding the map, atomics for counters updated outside the lock,
//! poisoned-lock recovery with a `tracing::warn!`) but backs it with an
//! intrusive doubly-linked list over a `Vec`-based slab (index links, no
//! `unsafe`) so hit/insert/evict are genuinely O(1).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use tokio::sync::Notify;

use crate::error::{ChainError, Result};

const FRESHNESS_GRACE: Duration = Duration::from_secs(60 * 60); // 1 hour
const FETCHED_AT_CAP: Duration = Duration::from_secs(24 * 60 * 60); // 24 hours
const MAX_NEXT_UPDATE_SKEW: Duration = Duration::from_secs(365 * 24 * 60 * 60); // 365 days
const PER_ENTRY_OVERHEAD_BYTES: usize = 120;

#[derive(Debug, Clone)]
pub struct CrlCacheEntry {
    pub bytes: Vec<u8>,
    pub fetched_at: SystemTime,
    pub next_update: SystemTime,
    pub source_url: String,
}

impl CrlCacheEntry {
    fn is_fresh(&self, now: SystemTime) -> bool {
        let next_update_ok = self
            .next_update
            .duration_since(now)
            .map(|remaining| remaining > Duration::ZERO)
            .unwrap_or(false)
            || now.duration_since(self.next_update).unwrap_or(Duration::ZERO) < FRESHNESS_GRACE;
        let fetched_at_ok =
            now.duration_since(self.fetched_at).unwrap_or(Duration::ZERO) < FETCHED_AT_CAP;
        next_update_ok && fetched_at_ok
    }

    /// Expiry rule for the cleanup sweep: `next_update < now - 1h`.
    fn is_expired_for_cleanup(&self, now: SystemTime) -> bool {
        now.duration_since(self.next_update).unwrap_or(Duration::ZERO) > FRESHNESS_GRACE
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CrlCacheConfig {
    /// 0 means unlimited (discouraged).
    pub max_size: usize,
    pub cleanup_interval: Duration,
}

impl Default for CrlCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 512,
            cleanup_interval: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CrlCacheMetrics {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub cleanups: u64,
    pub approx_bytes: usize,
}

struct Node {
    key: String,
    entry: CrlCacheEntry,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Intrusive doubly-linked list over a slab of slots, giving O(1)
/// move-to-MRU, O(1) push-MRU, and O(1) pop-LRU without `unsafe`.
#[derive(Default)]
struct LruState {
    map: HashMap<String, usize>,
    slab: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>, // LRU
    tail: Option<usize>, // MRU
}

impl LruState {
    fn len(&self) -> usize {
        self.map.len()
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.slab[idx].as_ref().expect("node present");
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.slab[p].as_mut().unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slab[n].as_mut().unwrap().prev = prev,
            None => self.tail = prev,
        }
    }

    fn push_mru(&mut self, idx: usize) {
        let old_tail = self.tail;
        {
            let node = self.slab[idx].as_mut().expect("node present");
            node.prev = old_tail;
            node.next = None;
        }
        if let Some(t) = old_tail {
            self.slab[t].as_mut().unwrap().next = Some(idx);
        } else {
            self.head = Some(idx);
        }
        self.tail = Some(idx);
    }

    fn move_to_mru(&mut self, idx: usize) {
        if self.tail == Some(idx) {
            return;
        }
        self.detach(idx);
        self.push_mru(idx);
    }

    fn alloc_slot(&mut self, node: Node) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slab[idx] = Some(node);
            idx
        } else {
            self.slab.push(Some(node));
            self.slab.len() - 1
        }
    }

    fn insert_mru(&mut self, key: String, entry: CrlCacheEntry) -> usize {
        let idx = self.alloc_slot(Node {
            key: key.clone(),
            entry,
            prev: None,
            next: None,
        });
        self.map.insert(key, idx);
        self.push_mru(idx);
        idx
    }

    fn evict_lru(&mut self) -> Option<(String, CrlCacheEntry)> {
        let idx = self.head?;
        self.detach(idx);
        let node = self.slab[idx].take().expect("node present");
        self.map.remove(&node.key);
        self.free.push(idx);
        Some((node.key, node.entry))
    }

    fn remove_key(&mut self, key: &str) -> Option<CrlCacheEntry> {
        let idx = self.map.remove(key)?;
        self.detach(idx);
        let node = self.slab[idx].take().expect("node present");
        self.free.push(idx);
        Some(node.entry)
    }

    fn clear(&mut self) {
        self.map.clear();
        self.slab.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    fn approx_bytes(&self) -> usize {
        self.map
            .iter()
            .filter_map(|(url, &idx)| self.slab[idx].as_ref().map(|n| (url, n)))
            .map(|(url, node)| node.entry.bytes.len() + url.len() + PER_ENTRY_OVERHEAD_BYTES)
            .sum()
    }
}

#[derive(Clone)]
pub struct CrlCache {
    state: Arc<RwLock<LruState>>,
    config: Arc<RwLock<CrlCacheConfig>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    evictions: Arc<AtomicU64>,
    cleanups: Arc<AtomicU64>,
    cleanup_running: Arc<AtomicBool>,
    cleanup_stop: Arc<RwLock<Option<Arc<Notify>>>>,
}

impl std::fmt::Debug for CrlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrlCache")
            .field("size", &self.read_state().len())
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for CrlCache {
    fn default() -> Self {
        Self::new(CrlCacheConfig::default())
    }
}

impl CrlCache {
    #[must_use]
    pub fn new(config: CrlCacheConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(LruState::default())),
            config: Arc::new(RwLock::new(config)),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            evictions: Arc::new(AtomicU64::new(0)),
            cleanups: Arc::new(AtomicU64::new(0)),
            cleanup_running: Arc::new(AtomicBool::new(false)),
            cleanup_stop: Arc::new(RwLock::new(None)),
        }
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, LruState> {
        self.state.read().unwrap_or_else(|p| {
            tracing::warn!("CRL cache read lock poisoned, recovering");
            p.into_inner()
        })
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, LruState> {
        self.state.write().unwrap_or_else(|p| {
            tracing::warn!("CRL cache write lock poisoned, recovering");
            p.into_inner()
        })
    }

    /// `Get(url)` — a defensive copy of the cached bytes iff a fresh entry
    /// exists; on hit, the entry moves to MRU.
    pub fn get(&self, url: &str) -> Option<Vec<u8>> {
        let now = SystemTime::now();
        let mut state = self.write_state();
        if let Some(&idx) = state.map.get(url) {
            let fresh = state.slab[idx].as_ref().expect("node present").entry.is_fresh(now);
            if fresh {
                let bytes = state.slab[idx].as_ref().unwrap().entry.bytes.clone();
                state.move_to_mru(idx);
                drop(state);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(bytes);
            }
        }
        drop(state);
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// `Set(url, bytes, next_update)` — validates and inserts/updates,
    /// evicting the LRU head if the cache is full and the URL is new.
    pub fn set(&self, url: &str, bytes: Vec<u8>, next_update: SystemTime) -> Result<()> {
        if bytes.is_empty() {
            return Err(ChainError::CacheValidation("CRL bytes must not be empty".to_string()));
        }
        if url.is_empty() {
            return Err(ChainError::CacheValidation("CRL URL must not be empty".to_string()));
        }
        let now = SystemTime::now();
        let lower = now.checked_sub(MAX_NEXT_UPDATE_SKEW);
        let upper = now.checked_add(MAX_NEXT_UPDATE_SKEW);
        let within_bounds = match (lower, upper) {
            (Some(lo), Some(hi)) => next_update >= lo && next_update <= hi,
            _ => true,
        };
        if !within_bounds {
            return Err(ChainError::CacheValidation(
                "next-update timestamp is outside the allowed +/-365 day window".to_string(),
            ));
        }

        let entry = CrlCacheEntry {
            bytes,
            fetched_at: now,
            next_update,
            source_url: url.to_string(),
        };

        let mut state = self.write_state();
        if let Some(&idx) = state.map.get(url) {
            state.slab[idx].as_mut().unwrap().entry = entry;
            state.move_to_mru(idx);
            return Ok(());
        }

        let max_size = self.config.read().unwrap_or_else(|p| p.into_inner()).max_size;
        if max_size > 0 {
            while state.len() >= max_size {
                if state.evict_lru().is_some() {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                } else {
                    break;
                }
            }
        }
        state.insert_mru(url.to_string(), entry);
        Ok(())
    }

    #[must_use]
    pub fn get_config(&self) -> CrlCacheConfig {
        *self.config.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Atomic swap of configuration by value. A smaller `max_size`
    /// triggers immediate pruning of the LRU tail.
    pub fn set_config(&self, new_config: CrlCacheConfig) {
        *self.config.write().unwrap_or_else(|p| p.into_inner()) = new_config;
        if new_config.max_size > 0 {
            let mut state = self.write_state();
            while state.len() > new_config.max_size {
                if state.evict_lru().is_some() {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                } else {
                    break;
                }
            }
        }
    }

    #[must_use]
    pub fn get_metrics(&self) -> CrlCacheMetrics {
        let state = self.read_state();
        CrlCacheMetrics {
            size: state.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            cleanups: self.cleanups.load(Ordering::Relaxed),
            approx_bytes: state.approx_bytes(),
        }
    }

    pub fn clear(&self) {
        self.write_state().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.cleanups.store(0, Ordering::Relaxed);
    }

    /// Two-phase cleanup: scan under the read lock to collect expired
    /// URLs, then remove under the write lock (re-checking expiry, since
    /// a concurrent `Set` may have refreshed the entry in between).
    fn cleanup_once(&self) {
        let now = SystemTime::now();
        let expired: Vec<String> = {
            let state = self.read_state();
            state
                .map
                .keys()
                .filter(|url| {
                    state
                        .map
                        .get(*url)
                        .and_then(|&idx| state.slab[idx].as_ref())
                        .map(|n| n.entry.is_expired_for_cleanup(now))
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        };

        if expired.is_empty() {
            self.cleanups.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut state = self.write_state();
        for url in expired {
            if let Some(&idx) = state.map.get(&url) {
                let still_expired = state.slab[idx]
                    .as_ref()
                    .map(|n| n.entry.is_expired_for_cleanup(now))
                    .unwrap_or(false);
                if still_expired {
                    state.remove_key(&url);
                }
            }
        }
        drop(state);
        self.cleanups.fetch_add(1, Ordering::Relaxed);
    }

    /// Starts the singleton background cleanup task. Idempotent: calling
    /// this while a task is already running is a no-op.
    pub fn start_cleanup(&self) {
        if self
            .cleanup_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return; // already running
        }

        let stop = Arc::new(Notify::new());
        *self.cleanup_stop.write().unwrap_or_else(|p| p.into_inner()) = Some(stop.clone());

        let cache = self.clone();
        tokio::spawn(async move {
            loop {
                let interval = cache.config.read().unwrap_or_else(|p| p.into_inner()).cleanup_interval;
                tokio::select! {
                    () = tokio::time::sleep(interval) => {
                        cache.cleanup_once();
                    }
                    () = stop.notified() => {
                        break;
                    }
                }
            }
            cache.cleanup_running.store(false, Ordering::Release);
            tracing::debug!("CRL cache cleanup task stopped");
        });
        tracing::debug!("CRL cache cleanup task started");
    }

    /// Stops the background cleanup task, if running. Idempotent.
    pub fn stop_cleanup(&self) {
        if let Some(stop) = self.cleanup_stop.write().unwrap_or_else(|p| p.into_inner()).take() {
            stop.notify_one();
        }
        self.cleanup_running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn far_future() -> SystemTime {
        SystemTime::now() + Duration::from_secs(24 * 60 * 60)
    }

    #[test]
    fn set_then_get_roundtrips() {
        let cache = CrlCache::new(CrlCacheConfig { max_size: 2, ..Default::default() });
        cache.set("a", vec![1, 2, 3], far_future()).unwrap();
        assert_eq!(cache.get("a"), Some(vec![1, 2, 3]));
        assert_eq!(cache.get_metrics().hits, 1);
    }

    #[test]
    fn empty_bytes_rejected_without_mutating_cache() {
        let cache = CrlCache::new(CrlCacheConfig::default());
        assert!(cache.set("a", vec![], far_future()).is_err());
        assert_eq!(cache.get_metrics().size, 0);
    }

    #[test]
    fn lru_eviction_scenario_s3() {
        // S3: max_size = 2; insert a, b; Get(a); insert c.
        // Then Get(a)->hit, Get(b)->miss, Get(c)->hit, evictions == 1.
        let cache = CrlCache::new(CrlCacheConfig { max_size: 2, ..Default::default() });
        cache.set("a", vec![1], far_future()).unwrap();
        cache.set("b", vec![2], far_future()).unwrap();
        assert!(cache.get("a").is_some());
        cache.set("c", vec![3], far_future()).unwrap();

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.get_metrics().evictions, 1);
    }

    #[test]
    fn stale_entry_misses_on_get() {
        let cache = CrlCache::new(CrlCacheConfig::default());
        let long_ago = SystemTime::now() - Duration::from_secs(2 * 60 * 60);
        cache.set("x", vec![1], long_ago).unwrap();
        assert_eq!(cache.get("x"), None);
    }

    #[test]
    fn smaller_max_size_prunes_immediately() {
        let cache = CrlCache::new(CrlCacheConfig { max_size: 10, ..Default::default() });
        for i in 0..5 {
            cache.set(&i.to_string(), vec![1], far_future()).unwrap();
        }
        cache.set_config(CrlCacheConfig { max_size: 2, ..Default::default() });
        assert_eq!(cache.get_metrics().size, 2);
    }

    #[tokio::test]
    async fn cleanup_start_is_idempotent() {
        let cache = CrlCache::new(CrlCacheConfig {
            max_size: 10,
            cleanup_interval: Duration::from_millis(20),
        });
        cache.start_cleanup();
        cache.start_cleanup();
        assert!(cache.cleanup_running.load(Ordering::Acquire));
        cache.stop_cleanup();
    }
}

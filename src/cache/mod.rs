//! 4.A — two-tier key/value cache: an in-memory LRU layered over a
//! persistent `sled` tree, with TTL and a background housekeeper.
//!
//! Grounded in the teacher's `performance/cache.rs` (`LruCache` behind a
//! `parking_lot::Mutex`) for the memory tier, and in the source's
//! `BaseCache` (SQLite tier + cleanup daemon) for the persistent-tier and
//! housekeeper shape, adapted to `sled`.

pub mod embedding_cache;

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    created_at: Instant,
    ttl: Option<Duration>,
}

impl<V> Entry<V> {
    fn is_expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => self.created_at.elapsed() >= ttl,
            None => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub requests: AtomicU64,
}

impl CacheStats {
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let requests = self.requests.load(Ordering::Relaxed);
        let hit_rate = if requests == 0 {
            0.0
        } else {
            100.0 * hits as f64 / requests as f64
        };
        CacheStatsSnapshot {
            hits,
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            requests,
            hit_rate,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub requests: u64,
    pub hit_rate: f64,
}

/// Two-tier cache over `String` keys and a serializable value type.
///
/// The persistent tier is optional: when `db` is `None` the cache behaves as
/// memory-only (used for tests and for a degraded mode when the persistent
/// tier fails to open).
pub struct KvCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    memory: Mutex<LruCache<String, Entry<V>>>,
    db: Option<sled::Tree>,
    stats: Arc<CacheStats>,
    default_ttl: Option<Duration>,
}

impl<V> KvCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(max_memory_entries: usize, db: Option<sled::Tree>, default_ttl: Option<Duration>) -> Self {
        let cap = NonZeroUsize::new(max_memory_entries.max(1)).unwrap();
        Self {
            memory: Mutex::new(LruCache::new(cap)),
            db,
            stats: Arc::new(CacheStats::default()),
            default_ttl,
        }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);

        {
            let mut mem = self.memory.lock();
            if let Some(entry) = mem.get(key) {
                if entry.is_expired() {
                    mem.pop(key);
                } else {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
            }
        }

        if let Some(db) = &self.db {
            match db.get(key.as_bytes()) {
                Ok(Some(bytes)) => match bincode::deserialize::<PersistedEntry<V>>(&bytes) {
                    Ok(persisted) => {
                        if persisted.is_expired() {
                            let _ = db.remove(key.as_bytes());
                        } else {
                            self.hydrate_memory(key, persisted.value.clone(), persisted.remaining_ttl());
                            self.stats.hits.fetch_add(1, Ordering::Relaxed);
                            return Some(persisted.value);
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "cache: corrupt persistent entry, ignoring"),
                },
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "cache: persistent tier read failed, degrading to memory-only");
                }
            }
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let ttl = ttl.or(self.default_ttl);
        self.hydrate_memory(key, value.clone(), ttl);

        if let Some(db) = &self.db {
            let persisted = PersistedEntry::new(value, ttl);
            match bincode::serialize(&persisted) {
                Ok(bytes) => {
                    if let Err(e) = db.insert(key.as_bytes(), bytes) {
                        tracing::warn!(error = %e, "cache: persistent tier write failed");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "cache: failed to serialize entry"),
            }
        }
    }

    pub fn delete(&self, key: &str) {
        self.memory.lock().pop(key);
        if let Some(db) = &self.db {
            if let Err(e) = db.remove(key.as_bytes()) {
                tracing::warn!(error = %e, "cache: persistent tier delete failed");
            }
        }
    }

    pub fn clear(&self) {
        self.memory.lock().clear();
        if let Some(db) = &self.db {
            if let Err(e) = db.clear() {
                tracing::warn!(error = %e, "cache: persistent tier clear failed");
            }
        }
    }

    pub fn get_or_compute<F>(&self, key: &str, ttl: Option<Duration>, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(v) = self.get(key) {
            return v;
        }
        let v = compute();
        self.set(key, v.clone(), ttl);
        v
    }

    fn hydrate_memory(&self, key: &str, value: V, ttl: Option<Duration>) {
        let mut mem = self.memory.lock();
        if mem.len() >= mem.cap().get() && !mem.contains(key) {
            if mem.pop_lru().is_some() {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        mem.put(
            key.to_string(),
            Entry {
                value,
                created_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Runs one pass of expired-entry removal across both tiers. Intended to
    /// be driven by a periodic housekeeper task; never holds the memory lock
    /// across persistent I/O.
    pub fn sweep_expired(&self) {
        {
            let mut mem = self.memory.lock();
            let expired: Vec<String> = mem
                .iter()
                .filter(|(_, e)| e.is_expired())
                .map(|(k, _)| k.clone())
                .collect();
            for k in expired {
                mem.pop(&k);
            }
        }

        if let Some(db) = &self.db {
            let mut expired_keys = Vec::new();
            for item in db.iter() {
                let (k, v) = match item {
                    Ok(kv) => kv,
                    Err(e) => {
                        tracing::warn!(error = %e, "cache: sweep iteration failed");
                        break;
                    }
                };
                if let Ok(persisted) = bincode::deserialize::<PersistedEntry<V>>(&v) {
                    if persisted.is_expired() {
                        expired_keys.push(k);
                    }
                }
            }
            for k in expired_keys {
                let _ = db.remove(k);
            }
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct PersistedEntry<V> {
    value: V,
    created_at_unix_ms: i64,
    ttl_ms: Option<u64>,
}

impl<V> PersistedEntry<V> {
    fn new(value: V, ttl: Option<Duration>) -> Self {
        Self {
            value,
            created_at_unix_ms: chrono::Utc::now().timestamp_millis(),
            ttl_ms: ttl.map(|d| d.as_millis() as u64),
        }
    }

    fn is_expired(&self) -> bool {
        match self.ttl_ms {
            None => false,
            Some(ttl_ms) => {
                let now = chrono::Utc::now().timestamp_millis();
                now - self.created_at_unix_ms >= ttl_ms as i64
            }
        }
    }

    fn remaining_ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(|ttl_ms| {
            let now = chrono::Utc::now().timestamp_millis();
            let elapsed = (now - self.created_at_unix_ms).max(0) as u64;
            Duration::from_millis(ttl_ms.saturating_sub(elapsed))
        })
    }
}

/// Spawns the periodic housekeeper task described in SPEC_FULL.md §4.A.
pub fn spawn_housekeeper<V>(cache: Arc<KvCache<V>>, interval: Duration) -> tokio::task::JoinHandle<()>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            cache.sweep_expired();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_only_cache() -> KvCache<String> {
        KvCache::new(4, None, None)
    }

    #[test]
    fn set_then_get_returns_value() {
        let cache = memory_only_cache();
        cache.set("a", "1".to_string(), None);
        assert_eq!(cache.get("a"), Some("1".to_string()));
    }

    #[test]
    fn miss_is_recorded() {
        let cache = memory_only_cache();
        assert_eq!(cache.get("missing"), None);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let cache = memory_only_cache();
        cache.set("a", "1".to_string(), Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn eviction_drops_least_recently_used() {
        let cache = KvCache::<String>::new(2, None, None);
        cache.set("a", "1".into(), None);
        cache.set("b", "2".into(), None);
        // touch a so b becomes LRU
        assert_eq!(cache.get("a"), Some("1".into()));
        cache.set("c", "3".into(), None);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some("1".into()));
        assert_eq!(cache.get("c"), Some("3".into()));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn persistent_tier_survives_memory_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let tree = db.open_tree("kv").unwrap();
        let cache = KvCache::<String>::new(1, Some(tree), None);
        cache.set("a", "1".into(), None);
        cache.set("b", "2".into(), None); // evicts "a" from memory
        assert_eq!(cache.get("a"), Some("1".into())); // hydrated back from sled
    }

    #[test]
    fn get_or_compute_only_computes_once() {
        let cache = memory_only_cache();
        let calls = std::sync::atomic::AtomicU32::new(0);
        let compute = || {
            calls.fetch_add(1, Ordering::Relaxed);
            "computed".to_string()
        };
        assert_eq!(cache.get_or_compute("k", None, compute), "computed");
        assert_eq!(cache.get_or_compute("k", None, || "computed".to_string()), "computed");
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn hit_rate_is_percentage() {
        let cache = memory_only_cache();
        cache.set("a", "1".into(), None);
        cache.get("a");
        cache.get("missing");
        let stats = cache.stats();
        assert_eq!(stats.requests, 2);
        assert!((stats.hit_rate - 50.0).abs() < 1e-9);
    }
}

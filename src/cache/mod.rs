//! Result cache with pluggable eviction policies
//!
//! Values are serialized with serde_json and zstd-compressed above a size
//! threshold. Any codec failure is logged and treated as a miss.
//!
//! Policies:
//! - [`CachePolicyKind::Lru`]: least recently used
//! - [`CachePolicyKind::Lfu`]: least frequently used
//! - [`CachePolicyKind::Ttl`]: time-to-live with background sweep
//! - [`CachePolicyKind::Hybrid`]: LRU hot tier over a TTL tier

mod hybrid;
mod key;
mod lfu;
mod lru;
mod ttl;

pub use hybrid::HybridPolicy;
pub use key::{normalize_query, CacheKey};
pub use lfu::LfuPolicy;
pub use self::lru::LruPolicy;
pub use ttl::TtlPolicy;

use crate::config::CacheConfig;
use crate::error::{MeldError, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Eviction policy selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicyKind {
    #[default]
    Lru,
    Lfu,
    Ttl,
    Hybrid,
}

impl fmt::Display for CachePolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CachePolicyKind::Lru => "lru",
            CachePolicyKind::Lfu => "lfu",
            CachePolicyKind::Ttl => "ttl",
            CachePolicyKind::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

impl FromStr for CachePolicyKind {
    type Err = MeldError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "lru" => Ok(CachePolicyKind::Lru),
            "lfu" => Ok(CachePolicyKind::Lfu),
            "ttl" => Ok(CachePolicyKind::Ttl),
            "hybrid" => Ok(CachePolicyKind::Hybrid),
            other => Err(MeldError::InvalidConfigValue {
                path: "cache.policy".to_string(),
                message: format!("Unknown cache policy: {}", other),
            }),
        }
    }
}

/// Encoded cache value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    data: Arc<[u8]>,
    compressed: bool,
}

impl Payload {
    pub fn raw(data: Vec<u8>) -> Self {
        Self {
            data: data.into(),
            compressed: false,
        }
    }

    pub fn compressed(data: Vec<u8>) -> Self {
        Self {
            data: data.into(),
            compressed: true,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }
}

/// Outcome of a policy lookup
#[derive(Debug, Clone)]
pub enum Lookup {
    Hit(Payload),
    Miss,
    /// Present but past its TTL; removed by the lookup
    Expired,
}

/// Storage and eviction for encoded values. Implementations lock internally.
pub trait CachePolicy: Send + Sync {
    fn kind(&self) -> CachePolicyKind;

    fn get(&self, key: &str) -> Lookup;

    /// Insert or replace; returns how many entries were evicted for room
    fn put(&self, key: String, value: Payload) -> usize;

    fn remove(&self, key: &str) -> bool;

    fn len(&self) -> usize;

    fn capacity(&self) -> usize;

    /// Drop expired entries; returns how many were removed
    fn sweep(&self) -> usize {
        0
    }
}

/// Build the policy described by `config`
pub fn build_policy(config: &CacheConfig) -> Arc<dyn CachePolicy> {
    let ttl = Duration::from_secs(config.ttl_secs);
    match config.policy {
        CachePolicyKind::Lru => Arc::new(LruPolicy::new(config.capacity)),
        CachePolicyKind::Lfu => Arc::new(LfuPolicy::new(config.capacity)),
        CachePolicyKind::Ttl => Arc::new(TtlPolicy::new(config.capacity, ttl)),
        CachePolicyKind::Hybrid => {
            let hot = config.hot_capacity.min(config.capacity.saturating_sub(1)).max(1);
            let warm = config.capacity.saturating_sub(hot).max(1);
            Arc::new(HybridPolicy::new(hot, warm, ttl, config.promotion_hits))
        }
    }
}

/// Cache statistics for monitoring and tuning
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub policy: CachePolicyKind,
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub codec_failures: u64,
    pub hit_rate: f64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    codec_failures: AtomicU64,
}

fn shape_changed(old: &CacheConfig, new: &CacheConfig) -> bool {
    old.policy != new.policy
        || old.capacity != new.capacity
        || old.ttl_secs != new.ttl_secs
        || old.hot_capacity != new.hot_capacity
        || old.promotion_hits != new.promotion_hits
}

/// Thread-safe result cache
pub struct ResultCache {
    policy: RwLock<Arc<dyn CachePolicy>>,
    settings: RwLock<CacheConfig>,
    counters: Counters,
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            policy: RwLock::new(build_policy(config)),
            settings: RwLock::new(config.clone()),
            counters: Counters::default(),
        }
    }

    fn current(&self) -> Arc<dyn CachePolicy> {
        Arc::clone(&self.policy.read())
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.read().enabled
    }

    /// Decode the value under `key`. Misses, expiry and codec failures all
    /// return `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        self.fetch(key, true)
    }

    /// Second lookup for a caller that already missed on `key`; a miss here
    /// is not counted again.
    pub fn recheck<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        self.fetch(key, false)
    }

    fn fetch<T: DeserializeOwned>(&self, key: &CacheKey, count_miss: bool) -> Option<T> {
        if !self.is_enabled() {
            return None;
        }
        let policy = self.current();
        let miss = |counters: &Counters| {
            if count_miss {
                counters.misses.fetch_add(1, Ordering::Relaxed);
            }
        };

        let payload = match policy.get(key.as_str()) {
            Lookup::Hit(payload) => payload,
            Lookup::Miss => {
                miss(&self.counters);
                return None;
            }
            Lookup::Expired => {
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                miss(&self.counters);
                return None;
            }
        };

        match decode(&payload) {
            Ok(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Dropping undecodable cache entry");
                policy.remove(key.as_str());
                self.counters.codec_failures.fetch_add(1, Ordering::Relaxed);
                miss(&self.counters);
                None
            }
        }
    }

    /// Encode and store `value`. Returns false if the cache is disabled or
    /// encoding failed.
    pub fn put<T: Serialize>(&self, key: &CacheKey, value: &T) -> bool {
        let settings = self.settings.read().clone();
        if !settings.enabled {
            return false;
        }

        let payload = match encode(value, &settings) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Skipping cache write");
                self.counters.codec_failures.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };

        let evicted = self.current().put(key.as_str().to_string(), payload);
        if evicted > 0 {
            self.counters
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
        true
    }

    /// Store an already-encoded payload
    pub fn put_payload(&self, key: &CacheKey, payload: Payload) {
        let evicted = self.current().put(key.as_str().to_string(), payload);
        self.counters
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        self.current().remove(key.as_str())
    }

    /// Empty every tier at once by swapping in a fresh policy
    pub fn clear(&self) {
        let fresh = build_policy(&self.settings.read());
        *self.policy.write() = fresh;
        tracing::debug!("Cache cleared");
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries; returns how many were removed
    pub fn sweep(&self) -> usize {
        let removed = self.current().sweep();
        if removed > 0 {
            self.counters
                .expirations
                .fetch_add(removed as u64, Ordering::Relaxed);
            tracing::debug!(removed, "Swept expired cache entries");
        }
        removed
    }

    /// Apply new settings. A changed policy shape rebuilds (and empties) the
    /// cache; codec settings take effect immediately.
    pub fn reconfigure(&self, config: &CacheConfig) {
        let mut settings = self.settings.write();
        if shape_changed(&settings, config) {
            tracing::info!(
                policy = %config.policy,
                capacity = config.capacity,
                "Rebuilding cache for new policy settings"
            );
            *self.policy.write() = build_policy(config);
        }
        *settings = config.clone();
    }

    pub fn stats(&self) -> CacheStats {
        let policy = self.current();
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            enabled: self.is_enabled(),
            policy: policy.kind(),
            entries: policy.len(),
            capacity: policy.capacity(),
            hits,
            misses,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            codec_failures: self.counters.codec_failures.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

fn encode<T: Serialize>(value: &T, settings: &CacheConfig) -> Result<Payload> {
    let json = serde_json::to_vec(value).map_err(|e| MeldError::Cache(e.to_string()))?;
    if !settings.compress || json.len() < settings.compression_threshold {
        return Ok(Payload::raw(json));
    }
    let packed = zstd::bulk::compress(&json, settings.compression_level)
        .map_err(|e| MeldError::Cache(format!("compression failed: {}", e)))?;
    Ok(Payload::compressed(packed))
}

fn decode<T: DeserializeOwned>(payload: &Payload) -> Result<T> {
    if payload.is_compressed() {
        let json = zstd::stream::decode_all(payload.bytes())
            .map_err(|e| MeldError::Cache(format!("decompression failed: {}", e)))?;
        serde_json::from_slice(&json).map_err(|e| MeldError::Cache(e.to_string()))
    } else {
        serde_json::from_slice(payload.bytes()).map_err(|e| MeldError::Cache(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(policy: CachePolicyKind, capacity: usize) -> CacheConfig {
        CacheConfig {
            policy,
            capacity,
            hot_capacity: 1,
            ..CacheConfig::default()
        }
    }

    fn key(n: usize) -> CacheKey {
        CacheKey::new(&format!("query {}", n), [("top_k", "10")])
    }

    #[test]
    fn test_roundtrip_every_policy() {
        for policy in [
            CachePolicyKind::Lru,
            CachePolicyKind::Lfu,
            CachePolicyKind::Ttl,
            CachePolicyKind::Hybrid,
        ] {
            let cache = ResultCache::new(&config(policy, 8));
            let value = vec!["alpha".to_string(), "beta".to_string()];
            assert!(cache.put(&key(1), &value));
            assert_eq!(cache.get::<Vec<String>>(&key(1)), Some(value), "{}", policy);
        }
    }

    #[test]
    fn test_large_values_are_compressed() {
        let cache = ResultCache::new(&CacheConfig {
            compression_threshold: 64,
            ..CacheConfig::default()
        });
        let value: Vec<String> = (0..100).map(|i| format!("document body {}", i)).collect();
        cache.put(&key(1), &value);

        assert_eq!(cache.get::<Vec<String>>(&key(1)), Some(value));
        let policy = cache.current();
        match policy.get(key(1).as_str()) {
            Lookup::Hit(payload) => assert!(payload.is_compressed()),
            _ => panic!("expected hit"),
        }
    }

    #[test]
    fn test_corrupt_payload_is_a_miss() {
        let cache = ResultCache::new(&CacheConfig::default());
        cache.put_payload(&key(1), Payload::compressed(b"not zstd".to_vec()));
        cache.put_payload(&key(2), Payload::raw(b"{not json".to_vec()));

        assert_eq!(cache.get::<Vec<String>>(&key(1)), None);
        assert_eq!(cache.get::<Vec<String>>(&key(2)), None);

        let stats = cache.stats();
        assert_eq!(stats.codec_failures, 2);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn test_type_mismatch_is_a_miss() {
        let cache = ResultCache::new(&CacheConfig::default());
        cache.put(&key(1), &"text");
        assert_eq!(cache.get::<Vec<u32>>(&key(1)), None);
        assert_eq!(cache.stats().codec_failures, 1);
    }

    #[test]
    fn test_lru_capacity_and_stats() {
        let cache = ResultCache::new(&config(CachePolicyKind::Lru, 3));
        for n in 0..4 {
            cache.put(&key(n), &n);
        }

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get::<usize>(&key(0)), None);
        assert_eq!(cache.get::<usize>(&key(3)), Some(3));

        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_recheck_counts_hits_but_not_repeat_misses() {
        let cache = ResultCache::new(&CacheConfig::default());
        assert_eq!(cache.get::<usize>(&key(1)), None);
        assert_eq!(cache.recheck::<usize>(&key(1)), None);
        assert_eq!(cache.stats().misses, 1);

        cache.put(&key(1), &7usize);
        assert_eq!(cache.recheck::<usize>(&key(1)), Some(7));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_clear_empties_all_tiers() {
        let cache = ResultCache::new(&CacheConfig {
            policy: CachePolicyKind::Hybrid,
            capacity: 10,
            hot_capacity: 2,
            promotion_hits: 1,
            ..CacheConfig::default()
        });
        for n in 0..5 {
            cache.put(&key(n), &n);
        }
        cache.get::<usize>(&key(0));

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get::<usize>(&key(0)), None);
    }

    #[test]
    fn test_disabled_cache() {
        let cache = ResultCache::new(&CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        assert!(!cache.put(&key(1), &1));
        assert_eq!(cache.get::<u32>(&key(1)), None);
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn test_reconfigure_swaps_policy() {
        let cache = ResultCache::new(&CacheConfig::default());
        cache.put(&key(1), &1);

        let mut codec_only = CacheConfig::default();
        codec_only.compress = false;
        cache.reconfigure(&codec_only);
        assert_eq!(cache.get::<u32>(&key(1)), Some(1));

        let lfu = CacheConfig {
            policy: CachePolicyKind::Lfu,
            ..codec_only
        };
        cache.reconfigure(&lfu);
        assert_eq!(cache.stats().policy, CachePolicyKind::Lfu);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("Hybrid".parse::<CachePolicyKind>().unwrap(), CachePolicyKind::Hybrid);
        assert!("fifo".parse::<CachePolicyKind>().is_err());
    }
}

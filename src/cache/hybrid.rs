//! Two-tier policy: a small LRU hot tier in front of a larger TTL tier
//!
//! New entries land in the TTL tier. After `promotion_hits` hits there an
//! entry moves to the hot tier, keeping its deadline; whatever the hot tier
//! displaces is demoted back into the TTL tier with that same deadline. A key
//! lives in at most one tier and is never served past its deadline.

use crate::cache::ttl::{TtlLookup, TtlPolicy};
use crate::cache::{CachePolicy, CachePolicyKind, Lookup, Payload};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;

struct HotEntry {
    value: Payload,
    expires_at: Instant,
}

pub struct HybridPolicy {
    hot: Mutex<LruCache<String, HotEntry>>,
    hot_capacity: usize,
    warm: TtlPolicy,
    promotion_hits: u32,
}

impl HybridPolicy {
    pub fn new(hot_capacity: usize, warm_capacity: usize, ttl: Duration, promotion_hits: u32) -> Self {
        let hot_capacity = hot_capacity.max(1);
        let bound = NonZeroUsize::new(hot_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            hot: Mutex::new(LruCache::new(bound)),
            hot_capacity,
            warm: TtlPolicy::new(warm_capacity, ttl),
            promotion_hits: promotion_hits.max(1),
        }
    }

    pub fn hot_len(&self) -> usize {
        self.hot.lock().len()
    }

    pub fn warm_len(&self) -> usize {
        self.warm.len()
    }

    /// Returns how many entries the demotion evicted from the TTL tier
    fn promote(&self, key: &str, value: Payload, expires_at: Instant) -> usize {
        self.warm.remove(key);
        let displaced = self
            .hot
            .lock()
            .push(key.to_string(), HotEntry { value, expires_at });

        match displaced {
            Some((demoted, entry)) if demoted != key => {
                tracing::trace!(key = %demoted, "Demoting entry to TTL tier");
                self.warm.insert_until(demoted, entry.value, entry.expires_at).0
            }
            _ => 0,
        }
    }
}

impl CachePolicy for HybridPolicy {
    fn kind(&self) -> CachePolicyKind {
        CachePolicyKind::Hybrid
    }

    fn get(&self, key: &str) -> Lookup {
        {
            let mut hot = self.hot.lock();
            let expired = match hot.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Lookup::Hit(entry.value.clone());
                }
                Some(_) => true,
                None => false,
            };
            if expired {
                hot.pop(key);
                return Lookup::Expired;
            }
        }

        match self.warm.touch(key) {
            TtlLookup::Hit {
                value,
                hits,
                expires_at,
            } => {
                if hits >= self.promotion_hits {
                    self.promote(key, value.clone(), expires_at);
                }
                Lookup::Hit(value)
            }
            TtlLookup::Miss => Lookup::Miss,
            TtlLookup::Expired => Lookup::Expired,
        }
    }

    fn put(&self, key: String, value: Payload) -> usize {
        {
            let mut hot = self.hot.lock();
            if let Some(entry) = hot.get_mut(&key) {
                entry.value = value;
                entry.expires_at = Instant::now() + self.warm.ttl();
                return 0;
            }
        }
        self.warm.insert(key, value).0
    }

    fn remove(&self, key: &str) -> bool {
        let hot = self.hot.lock().pop(key).is_some();
        let warm = self.warm.remove(key);
        hot || warm
    }

    fn len(&self) -> usize {
        self.hot_len() + self.warm.len()
    }

    fn capacity(&self) -> usize {
        self.hot_capacity + self.warm.capacity()
    }

    fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut hot = self.hot.lock();
        let stale: Vec<String> = hot
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            hot.pop(key);
        }
        drop(hot);

        stale.len() + self.warm.sweep()
    }
}

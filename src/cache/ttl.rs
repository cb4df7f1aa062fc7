//! Time-to-live policy
//!
//! Entries expire `ttl` after their last write. Expiry is checked lazily on
//! read and eagerly by [`CachePolicy::sweep`]. When full, the entry closest to
//! expiry is evicted.

use crate::cache::{CachePolicy, CachePolicyKind, Lookup, Payload};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::time::Instant;

struct Entry {
    value: Payload,
    expires_at: Instant,
    seq: u64,
    hits: u32,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    /// (expires_at, insertion sequence, key), earliest first
    expiry: BTreeSet<(Instant, u64, String)>,
    seq: u64,
}

impl State {
    fn drop_entry(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.expiry
            .remove(&(entry.expires_at, entry.seq, key.to_string()));
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        while let Some((expires_at, _, _)) = self.expiry.first() {
            if *expires_at > now {
                break;
            }
            if let Some((_, _, key)) = self.expiry.pop_first() {
                self.entries.remove(&key);
                removed += 1;
            }
        }
        removed
    }
}

/// Result of a TTL lookup that also reports the entry's hit count and deadline
pub enum TtlLookup {
    Hit {
        value: Payload,
        hits: u32,
        expires_at: Instant,
    },
    Miss,
    Expired,
}

pub struct TtlPolicy {
    state: Mutex<State>,
    ttl: Duration,
    capacity: usize,
}

impl TtlPolicy {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up `key`, counting the hit
    pub fn touch(&self, key: &str) -> TtlLookup {
        let now = Instant::now();
        let mut state = self.state.lock();

        match state.entries.get_mut(key) {
            None => return TtlLookup::Miss,
            Some(entry) if entry.expires_at > now => {
                entry.hits += 1;
                return TtlLookup::Hit {
                    value: entry.value.clone(),
                    hits: entry.hits,
                    expires_at: entry.expires_at,
                };
            }
            Some(_) => {}
        }

        state.drop_entry(key);
        TtlLookup::Expired
    }

    /// Insert with a fresh TTL; returns (evicted, expired) counts
    pub fn insert(&self, key: String, value: Payload) -> (usize, usize) {
        let expires_at = Instant::now() + self.ttl;
        self.insert_until(key, value, expires_at)
    }

    /// Insert keeping an existing deadline. Already-expired values are not stored.
    pub fn insert_until(&self, key: String, value: Payload, expires_at: Instant) -> (usize, usize) {
        let now = Instant::now();
        let mut state = self.state.lock();
        if expires_at <= now {
            state.drop_entry(&key);
            return (0, 1);
        }
        state.drop_entry(&key);

        let mut expired = 0;
        let mut evicted = 0;
        if state.entries.len() >= self.capacity {
            expired = state.purge_expired(now);
        }
        while state.entries.len() >= self.capacity {
            let Some((_, _, victim)) = state.expiry.pop_first() else {
                break;
            };
            state.entries.remove(&victim);
            evicted += 1;
        }

        state.seq += 1;
        let seq = state.seq;
        state.expiry.insert((expires_at, seq, key.clone()));
        state.entries.insert(
            key,
            Entry {
                value,
                expires_at,
                seq,
                hits: 0,
            },
        );

        (evicted, expired)
    }
}

impl CachePolicy for TtlPolicy {
    fn kind(&self) -> CachePolicyKind {
        CachePolicyKind::Ttl
    }

    fn get(&self, key: &str) -> Lookup {
        match self.touch(key) {
            TtlLookup::Hit { value, .. } => Lookup::Hit(value),
            TtlLookup::Miss => Lookup::Miss,
            TtlLookup::Expired => Lookup::Expired,
        }
    }

    fn put(&self, key: String, value: Payload) -> usize {
        self.insert(key, value).0
    }

    fn remove(&self, key: &str) -> bool {
        self.state.lock().drop_entry(key).is_some()
    }

    fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn sweep(&self) -> usize {
        self.state.lock().purge_expired(Instant::now())
    }
}

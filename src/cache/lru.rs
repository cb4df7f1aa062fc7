//! Least-recently-used policy backed by the `lru` crate

use crate::cache::{CachePolicy, CachePolicyKind, Lookup, Payload};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

pub struct LruPolicy {
    entries: Mutex<LruCache<String, Payload>>,
    capacity: usize,
}

impl LruPolicy {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let bound = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(bound)),
            capacity,
        }
    }

    /// Insert and hand back the entry displaced to make room, if any
    pub fn put_evicting(&self, key: String, value: Payload) -> Option<(String, Payload)> {
        let mut entries = self.entries.lock();
        if entries.contains(&key) {
            entries.put(key, value);
            return None;
        }
        entries.push(key, value)
    }
}

impl CachePolicy for LruPolicy {
    fn kind(&self) -> CachePolicyKind {
        CachePolicyKind::Lru
    }

    fn get(&self, key: &str) -> Lookup {
        match self.entries.lock().get(key) {
            Some(value) => Lookup::Hit(value.clone()),
            None => Lookup::Miss,
        }
    }

    fn put(&self, key: String, value: Payload) -> usize {
        usize::from(self.put_evicting(key, value).is_some())
    }

    fn remove(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

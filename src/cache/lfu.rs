//! Least-frequently-used policy
//!
//! Evicts the entry with the lowest access count; ties go to the entry whose
//! last access is oldest.

use crate::cache::{CachePolicy, CachePolicyKind, Lookup, Payload};
use parking_lot::Mutex;
use ahash::HashMap;
use std::collections::BTreeSet;

struct Entry {
    value: Payload,
    frequency: u64,
    last_access: u64,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    /// (frequency, last_access, key), smallest first
    order: BTreeSet<(u64, u64, String)>,
    tick: u64,
}

impl State {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

pub struct LfuPolicy {
    state: Mutex<State>,
    capacity: usize,
}

impl LfuPolicy {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            capacity: capacity.max(1),
        }
    }
}

impl CachePolicy for LfuPolicy {
    fn kind(&self) -> CachePolicyKind {
        CachePolicyKind::Lfu
    }

    fn get(&self, key: &str) -> Lookup {
        let mut state = self.state.lock();
        let tick = state.next_tick();
        let State { entries, order, .. } = &mut *state;

        match entries.get_mut(key) {
            Some(entry) => {
                order.remove(&(entry.frequency, entry.last_access, key.to_string()));
                entry.frequency += 1;
                entry.last_access = tick;
                order.insert((entry.frequency, entry.last_access, key.to_string()));
                Lookup::Hit(entry.value.clone())
            }
            None => Lookup::Miss,
        }
    }

    fn put(&self, key: String, value: Payload) -> usize {
        let mut state = self.state.lock();
        let tick = state.next_tick();
        let State { entries, order, .. } = &mut *state;

        if let Some(entry) = entries.get_mut(&key) {
            order.remove(&(entry.frequency, entry.last_access, key.clone()));
            entry.value = value;
            entry.frequency += 1;
            entry.last_access = tick;
            order.insert((entry.frequency, entry.last_access, key));
            return 0;
        }

        let mut evicted = 0;
        while entries.len() >= self.capacity {
            let Some((_, _, victim)) = order.pop_first() else {
                break;
            };
            entries.remove(&victim);
            evicted += 1;
        }

        order.insert((1, tick, key.clone()));
        entries.insert(
            key,
            Entry {
                value,
                frequency: 1,
                last_access: tick,
            },
        );
        evicted
    }

    fn remove(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        let State { entries, order, .. } = &mut *state;
        match entries.remove(key) {
            Some(entry) => {
                order.remove(&(entry.frequency, entry.last_access, key.to_string()));
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(text: &str) -> Payload {
        Payload::raw(text.as_bytes().to_vec())
    }

    #[test]
    fn test_evicts_least_frequent() {
        let policy = LfuPolicy::new(2);
        policy.put("hot".to_string(), payload("1"));
        policy.put("cold".to_string(), payload("2"));
        policy.get("hot");
        policy.get("hot");

        assert_eq!(policy.put("new".to_string(), payload("3")), 1);
        assert!(matches!(policy.get("cold"), Lookup::Miss));
        assert!(matches!(policy.get("hot"), Lookup::Hit(_)));
        assert!(matches!(policy.get("new"), Lookup::Hit(_)));
    }

    #[test]
    fn test_frequency_tie_evicts_oldest_access() {
        let policy = LfuPolicy::new(2);
        policy.put("a".to_string(), payload("1"));
        policy.put("b".to_string(), payload("2"));
        policy.get("b");
        policy.get("a");

        // both at frequency 2; "b" was accessed longer ago
        policy.put("c".to_string(), payload("3"));
        assert!(matches!(policy.get("b"), Lookup::Miss));
        assert!(matches!(policy.get("a"), Lookup::Hit(_)));
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let policy = LfuPolicy::new(3);
        for i in 0..10 {
            policy.put(format!("k{}", i), payload("v"));
            assert!(policy.len() <= 3);
        }
        assert!(policy.remove("k9"));
        assert_eq!(policy.len(), 2);
    }
}

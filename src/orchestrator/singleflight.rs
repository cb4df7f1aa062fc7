//! Collapse concurrent identical requests into one execution
//!
//! The first caller for a key becomes the leader and runs the work; callers
//! arriving while it runs wait for the leader's outcome. If the leader is
//! dropped before finishing, waiters receive [`FlightError::Abandoned`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlightError {
    Timeout { timeout_ms: u64 },
    Abandoned,
    Failed(String),
}

impl std::fmt::Display for FlightError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlightError::Timeout { timeout_ms } => write!(f, "timed out after {}ms", timeout_ms),
            FlightError::Abandoned => f.write_str("leader abandoned the request"),
            FlightError::Failed(reason) => f.write_str(reason),
        }
    }
}

type Waiter<T> = oneshot::Sender<Result<T, FlightError>>;

pub struct SingleFlight<T> {
    calls: Mutex<HashMap<String, Vec<Waiter<T>>>>,
}

/// Removes the leader's entry if it is dropped before completing
struct LeaderGuard<'a, T: Clone> {
    flight: &'a SingleFlight<T>,
    key: &'a str,
    armed: bool,
}

impl<T: Clone> LeaderGuard<'_, T> {
    fn complete(mut self, outcome: &Result<T, FlightError>) -> usize {
        self.armed = false;
        let waiters = self.flight.calls.lock().remove(self.key).unwrap_or_default();
        let shared = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        shared
    }
}

impl<T: Clone> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            // dropping the senders wakes every waiter with Abandoned
            self.flight.calls.lock().remove(self.key);
        }
    }
}

enum Role<T> {
    Leader,
    Follower(oneshot::Receiver<Result<T, FlightError>>),
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys currently in flight
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }

    /// Run `work` for `key`, or wait for the run already in progress.
    /// The flag is true when this caller shared another caller's run.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> (Result<T, FlightError>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FlightError>>,
    {
        let role = {
            let mut calls = self.calls.lock();
            match calls.get_mut(key) {
                Some(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Role::Follower(rx)
                }
                None => {
                    calls.insert(key.to_string(), Vec::new());
                    Role::Leader
                }
            }
        };

        match role {
            Role::Follower(rx) => {
                tracing::debug!(key, "Joining in-flight request");
                let outcome = rx.await.unwrap_or(Err(FlightError::Abandoned));
                (outcome, true)
            }
            Role::Leader => {
                let guard = LeaderGuard {
                    flight: self,
                    key,
                    armed: true,
                };
                let outcome = work().await;
                let shared = guard.complete(&outcome);
                if shared > 0 {
                    tracing::debug!(key, waiters = shared, "Resolved de-duplicated waiters");
                }
                (outcome, false)
            }
        }
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

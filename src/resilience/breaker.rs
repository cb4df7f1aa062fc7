//! Per-resource circuit breaker
//!
//! ```text
//! ┌────────┐ failure_threshold ┌──────┐ recovery_timeout ┌──────────┐
//! │ Closed ├──────────────────►│ Open ├─────────────────►│ HalfOpen │
//! └───▲────┘                   └──▲───┘                  └────┬─────┘
//!     │  success_threshold        │        any failure        │
//!     └───────────────────────────┴───────────────────────────┘
//! ```
//!
//! All state for one breaker sits behind one lock. Counters reset on every
//! transition.

use crate::config::BreakerConfig;
use crate::error::{MeldError, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of one breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub short_circuited: u64,
    pub last_transition: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

struct Inner {
    config: BreakerConfig,
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    half_open_in_flight: u32,
    opened_at: Option<Instant>,
    last_transition: DateTime<Utc>,
    total_calls: u64,
    total_failures: u64,
    short_circuited: u64,
    last_error: Option<String>,
}

impl Inner {
    fn transition(&mut self, name: &str, to: BreakerState) {
        if self.state == to {
            return;
        }
        tracing::info!(breaker = name, from = %self.state, to = %to, "Circuit breaker transition");
        self.state = to;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.half_open_in_flight = 0;
        self.last_transition = Utc::now();
        self.opened_at = match to {
            BreakerState::Open => Some(Instant::now()),
            _ => None,
        };
    }

    fn recovery_elapsed(&self) -> bool {
        let timeout = Duration::from_millis(self.config.recovery_timeout_ms);
        self.opened_at.map_or(true, |at| at.elapsed() >= timeout)
    }
}

/// Admission ticket for one protected call. Dropping it without recording an
/// outcome (the caller was cancelled) frees any half-open trial slot.
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self, error: &MeldError) {
        self.settled = true;
        self.breaker.on_failure(self.trial, error);
    }

    /// Give the slot back without counting a success or a failure
    pub fn release(self) {}
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            let mut inner = self.breaker.inner.lock();
            if inner.state == BreakerState::HalfOpen {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
            }
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                config,
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                half_open_in_flight: 0,
                opened_at: None,
                last_transition: Utc::now(),
                total_calls: 0,
                total_failures: 0,
                short_circuited: 0,
                last_error: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. An open breaker past its recovery timeout reports
    /// `HalfOpen` only once a call has been admitted.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.lock().config.call_timeout_ms)
    }

    /// Admit a call or short-circuit with `AdapterUnavailable`
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>> {
        let mut inner = self.inner.lock();

        if inner.state == BreakerState::Open && inner.recovery_elapsed() {
            inner.transition(&self.name, BreakerState::HalfOpen);
        }

        let trial = match inner.state {
            BreakerState::Closed => false,
            BreakerState::HalfOpen if inner.half_open_in_flight < inner.config.half_open_max_calls => {
                inner.half_open_in_flight += 1;
                true
            }
            BreakerState::HalfOpen | BreakerState::Open => {
                inner.short_circuited += 1;
                let reason = match inner.state {
                    BreakerState::Open => "circuit open",
                    _ => "circuit half-open, trial calls exhausted",
                };
                return Err(MeldError::AdapterUnavailable {
                    engine: self.name.clone(),
                    reason: reason.to_string(),
                });
            }
        };

        inner.total_calls += 1;
        Ok(BreakerPermit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => inner.consecutive_failures = 0,
            BreakerState::HalfOpen if trial => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= inner.config.success_threshold {
                    inner.transition(&self.name, BreakerState::Closed);
                }
            }
            // late result from a call admitted before the breaker opened
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool, error: &MeldError) {
        let mut inner = self.inner.lock();
        inner.total_failures += 1;
        inner.last_error = Some(error.to_string());

        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= inner.config.failure_threshold {
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        error = %error,
                        "Opening circuit breaker"
                    );
                    inner.transition(&self.name, BreakerState::Open);
                }
            }
            BreakerState::HalfOpen if trial => {
                tracing::warn!(breaker = %self.name, error = %error, "Trial call failed, reopening");
                inner.transition(&self.name, BreakerState::Open);
            }
            _ => {}
        }
    }

    /// Run `op` through the breaker under the configured call timeout.
    /// A timeout counts as a failure and surfaces as `AdapterTimeout`.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.try_acquire()?;
        let timeout = self.call_timeout();

        let outcome = match tokio::time::timeout(timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(MeldError::AdapterTimeout {
                engine: self.name.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        match &outcome {
            Ok(_) => permit.success(),
            // rejected input says nothing about the resource's health
            Err(MeldError::InvalidRequest(_)) => permit.release(),
            Err(e) => permit.failure(e),
        }
        outcome
    }

    /// Force the breaker open, as if the failure threshold had been reached
    pub fn trip(&self) {
        self.inner.lock().transition(&self.name, BreakerState::Open);
    }

    /// Return to closed with cleared counters
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.transition(&self.name, BreakerState::Closed);
        inner.consecutive_failures = 0;
    }

    pub fn reconfigure(&self, config: &BreakerConfig) {
        self.inner.lock().config = config.clone();
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            short_circuited: inner.short_circuited,
            last_transition: inner.last_transition,
            last_error: inner.last_error.clone(),
        }
    }
}

/// Breakers keyed by resource name, created on first use
pub struct BreakerRegistry {
    config: RwLock<BreakerConfig>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config: RwLock::new(config),
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return Arc::clone(breaker);
        }

        let config = self.config.read().clone();
        let mut breakers = self.breakers.write();
        Arc::clone(
            breakers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config))),
        )
    }

    pub fn state(&self, name: &str) -> BreakerState {
        self.breakers
            .read()
            .get(name)
            .map_or(BreakerState::Closed, |b| b.state())
    }

    /// Snapshots of every breaker, sorted by name
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.read().values().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Apply new thresholds to existing and future breakers. States are kept.
    pub fn reconfigure(&self, config: &BreakerConfig) {
        *self.config.write() = config.clone();
        for breaker in self.breakers.read().values() {
            breaker.reconfigure(config);
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.read().values() {
            breaker.reset();
        }
    }
}

//! Engine health assessment
//!
//! Each assessment round sends the configured canary queries to every
//! adapter concurrently, each under its own probe timeout, and folds the
//! outcomes into an [`EngineCapabilityAssessment`]. Probe failures only lower
//! the engine's score.

mod strategy;

pub use strategy::{QueryProfile, SearchStrategy, StrategyDecision, StrategySelector};

use crate::config::{HealthConfig, StrategyConfig};
use crate::engine::{EngineAdapter, EngineKind, EngineQuery};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const CANARY_TOP_K: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Healthy,
    Degraded,
    Unavailable,
    #[default]
    Unknown,
}

impl EngineStatus {
    /// Healthy or degraded engines are worth querying
    pub fn is_reachable(self) -> bool {
        matches!(self, EngineStatus::Healthy | EngineStatus::Degraded)
    }

    pub fn from_score(score: f64, thresholds: &StrategyConfig) -> Self {
        if score >= thresholds.hybrid_threshold {
            EngineStatus::Healthy
        } else if score >= thresholds.degraded_threshold {
            EngineStatus::Degraded
        } else if score >= thresholds.unavailable_threshold {
            EngineStatus::Unavailable
        } else {
            EngineStatus::Unknown
        }
    }
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineStatus::Healthy => "healthy",
            EngineStatus::Degraded => "degraded",
            EngineStatus::Unavailable => "unavailable",
            EngineStatus::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Outcome of one assessment round for one engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineCapabilityAssessment {
    pub engine: String,
    pub kind: EngineKind,
    pub status: EngineStatus,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub success_rate: f64,
    /// Successful probes per second over the round
    pub throughput: f64,
    pub score: f64,
    pub probes: usize,
    pub assessed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl EngineCapabilityAssessment {
    /// Placeholder for an engine that has not been probed yet
    pub fn unknown(engine: impl Into<String>, kind: EngineKind) -> Self {
        Self {
            engine: engine.into(),
            kind,
            status: EngineStatus::Unknown,
            latency_p50_ms: 0.0,
            latency_p95_ms: 0.0,
            latency_p99_ms: 0.0,
            success_rate: 0.0,
            throughput: 0.0,
            score: 0.0,
            probes: 0,
            assessed_at: Utc::now(),
            last_error: None,
        }
    }
}

/// Nearest-rank percentile of an ascending slice
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Weighted composite of latency, success, throughput and the accuracy proxy
pub fn composite_score(
    config: &HealthConfig,
    p95_ms: f64,
    success_rate: f64,
    throughput: f64,
) -> f64 {
    let ceiling = config.latency_ceiling_ms.max(1) as f64;
    let latency = 1.0 - (p95_ms / ceiling).min(1.0);
    let throughput = if config.throughput_ceiling > 0.0 {
        (throughput / config.throughput_ceiling).min(1.0)
    } else {
        0.0
    };
    // success rate stands in for accuracy until a relevance signal exists
    let accuracy = success_rate;

    let score = config.latency_weight * latency
        + config.success_weight * success_rate
        + config.throughput_weight * throughput
        + config.accuracy_weight * accuracy;
    score.clamp(0.0, 1.0)
}

struct Probe {
    latency_ms: f64,
    error: Option<String>,
}

pub struct HealthAssessor {
    adapters: Vec<Arc<dyn EngineAdapter>>,
    config: RwLock<HealthConfig>,
    thresholds: RwLock<StrategyConfig>,
    assessments: RwLock<HashMap<String, EngineCapabilityAssessment>>,
}

impl HealthAssessor {
    pub fn new(
        adapters: Vec<Arc<dyn EngineAdapter>>,
        config: HealthConfig,
        thresholds: StrategyConfig,
    ) -> Self {
        let assessments = adapters
            .iter()
            .map(|a| {
                (
                    a.name().to_string(),
                    EngineCapabilityAssessment::unknown(a.name(), a.kind()),
                )
            })
            .collect();

        Self {
            adapters,
            config: RwLock::new(config),
            thresholds: RwLock::new(thresholds),
            assessments: RwLock::new(assessments),
        }
    }

    pub fn reconfigure(&self, config: &HealthConfig, thresholds: &StrategyConfig) {
        *self.config.write() = config.clone();
        *self.thresholds.write() = thresholds.clone();
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.config.read().interval_secs.max(1))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.config.read().retry_cooldown_secs.max(1))
    }

    pub fn is_enabled(&self) -> bool {
        self.config.read().enabled
    }

    async fn probe(adapter: &dyn EngineAdapter, query: &str, timeout: Duration) -> Probe {
        let started = Instant::now();
        let request = EngineQuery::text(query, CANARY_TOP_K);
        let error = match tokio::time::timeout(timeout, adapter.search(&request)).await {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("probe timed out after {}ms", timeout.as_millis())),
        };
        Probe {
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            error,
        }
    }

    /// Probe one adapter with every canary query
    pub async fn assess_engine(&self, adapter: &dyn EngineAdapter) -> EngineCapabilityAssessment {
        let config = self.config.read().clone();
        let thresholds = self.thresholds.read().clone();
        let timeout = Duration::from_millis(config.probe_timeout_ms);

        if config.canary_queries.is_empty() {
            return EngineCapabilityAssessment::unknown(adapter.name(), adapter.kind());
        }

        let round = Instant::now();
        let probes = join_all(
            config
                .canary_queries
                .iter()
                .map(|q| Self::probe(adapter, q, timeout)),
        )
        .await;
        let elapsed = round.elapsed().as_secs_f64().max(1e-3);

        let mut latencies: Vec<f64> = probes
            .iter()
            .filter(|p| p.error.is_none())
            .map(|p| p.latency_ms)
            .collect();
        latencies.sort_by(f64::total_cmp);

        let successes = latencies.len();
        let success_rate = successes as f64 / probes.len() as f64;
        let throughput = successes as f64 / elapsed;

        // an engine with no successful probe gets worst-case latency
        let worst = config.probe_timeout_ms as f64;
        let (p50, p95, p99) = if latencies.is_empty() {
            (worst, worst, worst)
        } else {
            (
                percentile(&latencies, 50.0),
                percentile(&latencies, 95.0),
                percentile(&latencies, 99.0),
            )
        };

        let score = composite_score(&config, p95, success_rate, throughput);
        let status = EngineStatus::from_score(score, &thresholds);
        let last_error = probes.into_iter().rev().find_map(|p| p.error);

        if let Some(error) = &last_error {
            tracing::debug!(engine = adapter.name(), error = %error, "Canary probe failed");
        }

        EngineCapabilityAssessment {
            engine: adapter.name().to_string(),
            kind: adapter.kind(),
            status,
            latency_p50_ms: p50,
            latency_p95_ms: p95,
            latency_p99_ms: p99,
            success_rate,
            throughput,
            score,
            probes: config.canary_queries.len(),
            assessed_at: Utc::now(),
            last_error,
        }
    }

    /// Assess every adapter concurrently and publish the results
    pub async fn assess_all(&self) -> Vec<EngineCapabilityAssessment> {
        let results = join_all(self.adapters.iter().map(|a| self.assess_engine(a.as_ref()))).await;

        let mut assessments = self.assessments.write();
        for assessment in &results {
            let previous = assessments.get(&assessment.engine).map(|a| a.status);
            if previous != Some(assessment.status) {
                tracing::info!(
                    engine = %assessment.engine,
                    status = %assessment.status,
                    score = assessment.score,
                    "Engine health changed"
                );
            }
            assessments.insert(assessment.engine.clone(), assessment.clone());
        }
        results
    }

    /// Overwrite one engine's assessment
    pub fn record(&self, assessment: EngineCapabilityAssessment) {
        self.assessments
            .write()
            .insert(assessment.engine.clone(), assessment);
    }

    pub fn get(&self, engine: &str) -> Option<EngineCapabilityAssessment> {
        self.assessments.read().get(engine).cloned()
    }

    /// Latest assessments in adapter registration order
    pub fn snapshot(&self) -> Vec<EngineCapabilityAssessment> {
        let assessments = self.assessments.read();
        self.adapters
            .iter()
            .filter_map(|a| assessments.get(a.name()).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineHit;
    use crate::error::{MeldError, Result};
    use async_trait::async_trait;

    struct Probed {
        name: String,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl EngineAdapter for Probed {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> EngineKind {
            EngineKind::Text
        }

        async fn search(&self, _query: &EngineQuery) -> Result<Vec<EngineHit>> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                Err(MeldError::AdapterUnavailable {
                    engine: self.name.clone(),
                    reason: "down".to_string(),
                })
            } else {
                Ok(vec![EngineHit::new("1", "hit", 1.0)])
            }
        }
    }

    fn adapter(name: &str, delay_ms: u64, fail: bool) -> Arc<dyn EngineAdapter> {
        Arc::new(Probed {
            name: name.to_string(),
            delay: Duration::from_millis(delay_ms),
            fail,
        })
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let values = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&values, 50.0), 20.0);
        assert_eq!(percentile(&values, 95.0), 40.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_composite_score_weights() {
        let config = HealthConfig::default();
        // instant, always successful, at throughput ceiling
        let best = composite_score(&config, 0.0, 1.0, config.throughput_ceiling);
        assert!((best - 1.0).abs() < 1e-9);

        // latency at ceiling and nothing succeeded
        let worst = composite_score(&config, config.latency_ceiling_ms as f64, 0.0, 0.0);
        assert_eq!(worst, 0.0);
    }

    #[test]
    fn test_status_thresholds() {
        let thresholds = StrategyConfig::default();
        assert_eq!(EngineStatus::from_score(0.9, &thresholds), EngineStatus::Healthy);
        assert_eq!(EngineStatus::from_score(0.5, &thresholds), EngineStatus::Degraded);
        assert_eq!(EngineStatus::from_score(0.2, &thresholds), EngineStatus::Unavailable);
        assert_eq!(EngineStatus::from_score(0.05, &thresholds), EngineStatus::Unknown);
        assert!(EngineStatus::Degraded.is_reachable());
        assert!(!EngineStatus::Unavailable.is_reachable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_engine_is_healthy() {
        let assessor = HealthAssessor::new(
            vec![adapter("text", 5, false)],
            HealthConfig::default(),
            StrategyConfig::default(),
        );
        let results = assessor.assess_all().await;

        assert_eq!(results[0].status, EngineStatus::Healthy);
        assert_eq!(results[0].success_rate, 1.0);
        assert_eq!(assessor.get("text").unwrap().status, EngineStatus::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_and_slow_engines_score_low() {
        let config = HealthConfig {
            probe_timeout_ms: 100,
            ..HealthConfig::default()
        };
        let assessor = HealthAssessor::new(
            vec![adapter("broken", 1, true), adapter("stuck", 10_000, false)],
            config,
            StrategyConfig::default(),
        );
        let results = assessor.assess_all().await;

        for assessment in &results {
            assert_eq!(assessment.success_rate, 0.0);
            assert!(!assessment.status.is_reachable(), "{:?}", assessment);
            assert!(assessment.last_error.is_some());
        }
        assert!(results[1].last_error.as_deref().unwrap_or("").contains("timed out"));
    }

    #[test]
    fn test_unprobed_engines_are_unknown() {
        let assessor = HealthAssessor::new(
            vec![adapter("text", 0, false)],
            HealthConfig::default(),
            StrategyConfig::default(),
        );
        let snapshot = assessor.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, EngineStatus::Unknown);
    }
}

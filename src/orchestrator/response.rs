//! Response and status types exposed by the service

use crate::cache::CacheStats;
use crate::concurrency::ConcurrencyStats;
use crate::engine::EngineKind;
use crate::health::{EngineCapabilityAssessment, SearchStrategy};
use crate::resilience::{BreakerSnapshot, BreakerState};
use crate::retrieval::{FusionStrategy, ResultItem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one adapter call within a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineReport {
    pub engine: String,
    pub kind: EngineKind,
    pub hits: usize,
    pub latency_ms: u64,
    pub breaker: BreakerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EngineReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// False only when every queried engine failed
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub cache_hit: bool,
    pub deduplicated: bool,
    pub strategy_reason: String,
    pub fusion: FusionStrategy,
    pub vector_weight: f32,
    pub keyword_weight: f32,
    pub engines: Vec<EngineReport>,
    /// Engine lists discarded as malformed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped: Vec<String>,
    pub reranked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<ResultItem>,
    pub strategy_used: SearchStrategy,
    pub engine_used: String,
    pub elapsed_ms: u64,
    pub diagnostics: Diagnostics,
}

impl SearchResponse {
    pub fn is_available(&self) -> bool {
        self.diagnostics.available
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub config_version: u64,
    pub started_at: DateTime<Utc>,
    pub engines: Vec<String>,
    pub health: Vec<EngineCapabilityAssessment>,
    pub cache_stats: CacheStats,
    pub breaker_states: Vec<BreakerSnapshot>,
    pub concurrency_stats: ConcurrencyStats,
    pub in_flight_keys: usize,
}

/// Name the engines that produced a response.
///
/// All requested engines succeeded: their names joined with `+`. Some failed:
/// the survivors followed by ` (fallback)`. None succeeded: `none`.
pub fn engine_used(reports: &[EngineReport]) -> String {
    let succeeded: Vec<&str> = reports
        .iter()
        .filter(|r| r.succeeded())
        .map(|r| r.engine.as_str())
        .collect();

    if succeeded.is_empty() {
        return "none".to_string();
    }
    let joined = succeeded.join("+");
    if succeeded.len() < reports.len() {
        format!("{} (fallback)", joined)
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(engine: &str, error: Option<&str>) -> EngineReport {
        EngineReport {
            engine: engine.to_string(),
            kind: EngineKind::Text,
            hits: 0,
            latency_ms: 1,
            breaker: BreakerState::Closed,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_engine_used_labels() {
        assert_eq!(
            engine_used(&[report("text", None), report("vector", None)]),
            "text+vector"
        );
        assert_eq!(engine_used(&[report("text", None)]), "text");
        assert_eq!(
            engine_used(&[report("vector", Some("circuit open")), report("text", None)]),
            "text (fallback)"
        );
        assert_eq!(engine_used(&[report("text", Some("down"))]), "none");
        assert_eq!(engine_used(&[]), "none");
    }
}

//! Per-query strategy selection from query shape and engine health
//!
//! Rules, first match wins:
//! 1. keyword-flagged query and a healthy text engine: keyword only
//! 2. long or semantic query and a healthy vector engine: vector only
//! 3. text and vector both healthy: hybrid, weights tuned by health
//! 4. exactly one engine reachable: that engine alone
//! 5. otherwise: fallback over every engine with the configured fusion

use crate::config::StrategyConfig;
use crate::engine::EngineKind;
use crate::error::{MeldError, Result};
use crate::health::{EngineCapabilityAssessment, EngineStatus};
use crate::retrieval::FusionConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    KeywordOnly,
    VectorOnly,
    Hybrid,
    SingleEngine,
    Fallback,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::KeywordOnly => "keyword_only",
            SearchStrategy::VectorOnly => "vector_only",
            SearchStrategy::Hybrid => "hybrid",
            SearchStrategy::SingleEngine => "single_engine",
            SearchStrategy::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of a query as seen by the selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryProfile {
    pub words: usize,
    pub keyword: bool,
    pub semantic: bool,
}

/// Which engines to query and how to weight them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDecision {
    pub strategy: SearchStrategy,
    /// Engine names to query, in registration order
    pub engines: Vec<String>,
    pub vector_weight: f32,
    pub keyword_weight: f32,
    pub reason: String,
}

fn healthy(engine: Option<&EngineCapabilityAssessment>) -> Option<&EngineCapabilityAssessment> {
    engine.filter(|e| e.status == EngineStatus::Healthy)
}

fn decision(
    strategy: SearchStrategy,
    picked: Vec<&EngineCapabilityAssessment>,
    weights: (f32, f32),
    reason: String,
) -> StrategyDecision {
    StrategyDecision {
        strategy,
        engines: picked.iter().map(|e| e.engine.clone()).collect(),
        vector_weight: weights.0,
        keyword_weight: weights.1,
        reason,
    }
}

fn compile(patterns: &[String], path: &str) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| MeldError::InvalidConfigValue {
                path: path.to_string(),
                message: format!("invalid pattern '{}': {}", p, e),
            })
        })
        .collect()
}

pub struct StrategySelector {
    config: StrategyConfig,
    keyword: Vec<Regex>,
    semantic: Vec<Regex>,
}

impl StrategySelector {
    pub fn new(config: &StrategyConfig) -> Result<Self> {
        Ok(Self {
            keyword: compile(&config.keyword_patterns, "strategy.keyword_patterns")?,
            semantic: compile(&config.semantic_patterns, "strategy.semantic_patterns")?,
            config: config.clone(),
        })
    }

    pub fn profile(&self, query: &str) -> QueryProfile {
        let words = query.split_whitespace().count();
        QueryProfile {
            words,
            keyword: self.keyword.iter().any(|r| r.is_match(query)),
            semantic: words >= self.config.long_query_words
                || self.semantic.iter().any(|r| r.is_match(query)),
        }
    }

    /// Pick a strategy for `query` given the latest engine assessments
    pub fn select(
        &self,
        query: &str,
        engines: &[EngineCapabilityAssessment],
        fusion: &FusionConfig,
    ) -> StrategyDecision {
        let profile = self.profile(query);
        let best = |kind: EngineKind| {
            engines
                .iter()
                .filter(|e| e.kind == kind)
                .max_by(|a, b| a.score.total_cmp(&b.score))
        };
        let text = best(EngineKind::Text);
        let vector = best(EngineKind::Vector);

        let configured = (fusion.vector_weight, fusion.keyword_weight);

        if profile.keyword {
            if let Some(text) = healthy(text) {
                return decision(
                    SearchStrategy::KeywordOnly,
                    vec![text],
                    (0.0, 1.0),
                    "keyword query".to_string(),
                );
            }
        }

        if profile.semantic {
            if let Some(vector) = healthy(vector) {
                return decision(
                    SearchStrategy::VectorOnly,
                    vec![vector],
                    (1.0, 0.0),
                    "semantic query".to_string(),
                );
            }
        }

        if let (Some(text), Some(vector)) = (healthy(text), healthy(vector)) {
            let weights = if self.config.adaptive_weights {
                self.tuned_weights(configured, vector.score, text.score)
            } else {
                configured
            };
            return decision(
                SearchStrategy::Hybrid,
                vec![text, vector],
                weights,
                "both engines healthy".to_string(),
            );
        }

        let reachable: Vec<_> = engines.iter().filter(|e| e.status.is_reachable()).collect();
        if let [only] = reachable.as_slice() {
            let weights = match only.kind {
                EngineKind::Vector => (1.0, 0.0),
                EngineKind::Text => (0.0, 1.0),
            };
            return decision(
                SearchStrategy::SingleEngine,
                vec![*only],
                weights,
                format!("only {} is reachable", only.engine),
            );
        }

        decision(
            SearchStrategy::Fallback,
            engines.iter().collect(),
            configured,
            format!("{} of {} engines reachable", reachable.len(), engines.len()),
        )
    }

    /// Scale configured weights by relative health, then renormalize
    fn tuned_weights(&self, configured: (f32, f32), vector_score: f64, text_score: f64) -> (f32, f32) {
        let vector = configured.0 as f64 * vector_score;
        let keyword = configured.1 as f64 * text_score;
        let total = vector + keyword;
        if total <= f64::EPSILON {
            return configured;
        }
        ((vector / total) as f32, (keyword / total) as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(name: &str, kind: EngineKind, status: EngineStatus, score: f64) -> EngineCapabilityAssessment {
        EngineCapabilityAssessment {
            status,
            score,
            ..EngineCapabilityAssessment::unknown(name, kind)
        }
    }

    fn healthy_pair() -> Vec<EngineCapabilityAssessment> {
        vec![
            engine("text", EngineKind::Text, EngineStatus::Healthy, 0.9),
            engine("vector", EngineKind::Vector, EngineStatus::Healthy, 0.9),
        ]
    }

    fn selector() -> StrategySelector {
        StrategySelector::new(&StrategyConfig::default()).unwrap()
    }

    #[test]
    fn test_query_profile() {
        let selector = selector();
        assert!(selector.profile("\"exact phrase\"").keyword);
        assert!(selector.profile("rust AND tokio").keyword);
        assert!(selector.profile("title:config").keyword);
        assert!(selector.profile("JIRA-1234").keyword);
        assert!(selector.profile("max_in_flight").keyword);
        assert!(selector.profile("how does the cache work").semantic);
        assert!(selector.profile("cache eviction?").semantic);
        assert!(selector.profile("one two three four five six seven eight").semantic);

        let plain = selector.profile("cache eviction");
        assert!(!plain.keyword && !plain.semantic);
    }

    #[test]
    fn test_keyword_query_prefers_text() {
        let decision = selector().select("\"circuit breaker\"", &healthy_pair(), &FusionConfig::default());
        assert_eq!(decision.strategy, SearchStrategy::KeywordOnly);
        assert_eq!(decision.engines, vec!["text"]);
    }

    #[test]
    fn test_semantic_query_prefers_vector() {
        let decision = selector().select("why do breakers open?", &healthy_pair(), &FusionConfig::default());
        assert_eq!(decision.strategy, SearchStrategy::VectorOnly);
        assert_eq!(decision.engines, vec!["vector"]);
    }

    #[test]
    fn test_keyword_query_without_healthy_text_falls_through() {
        let engines = vec![
            engine("text", EngineKind::Text, EngineStatus::Degraded, 0.5),
            engine("vector", EngineKind::Vector, EngineStatus::Healthy, 0.9),
        ];
        let decision = selector().select("\"quoted\"", &engines, &FusionConfig::default());
        assert_eq!(decision.strategy, SearchStrategy::Fallback);
        assert_eq!(decision.engines.len(), 2);
    }

    #[test]
    fn test_hybrid_weights_follow_health() {
        let engines = vec![
            engine("text", EngineKind::Text, EngineStatus::Healthy, 1.0),
            engine("vector", EngineKind::Vector, EngineStatus::Healthy, 0.75),
        ];
        let fusion = FusionConfig {
            vector_weight: 0.5,
            keyword_weight: 0.5,
            ..FusionConfig::default()
        };
        let decision = selector().select("cache eviction", &engines, &fusion);

        assert_eq!(decision.strategy, SearchStrategy::Hybrid);
        assert!((decision.vector_weight + decision.keyword_weight - 1.0).abs() < 1e-6);
        assert!((decision.keyword_weight - 1.0 / 1.75).abs() < 1e-6);
    }

    #[test]
    fn test_fixed_weights_when_not_adaptive() {
        let selector = StrategySelector::new(&StrategyConfig {
            adaptive_weights: false,
            ..StrategyConfig::default()
        })
        .unwrap();
        let decision = selector.select("cache eviction", &healthy_pair(), &FusionConfig::default());
        assert_eq!(decision.vector_weight, 0.7);
        assert_eq!(decision.keyword_weight, 0.3);
    }

    #[test]
    fn test_single_reachable_engine() {
        let engines = vec![
            engine("text", EngineKind::Text, EngineStatus::Unavailable, 0.2),
            engine("vector", EngineKind::Vector, EngineStatus::Degraded, 0.5),
        ];
        let decision = selector().select("cache eviction", &engines, &FusionConfig::default());
        assert_eq!(decision.strategy, SearchStrategy::SingleEngine);
        assert_eq!(decision.engines, vec!["vector"]);
    }

    #[test]
    fn test_all_unknown_falls_back_to_everything() {
        let engines = vec![
            EngineCapabilityAssessment::unknown("text", EngineKind::Text),
            EngineCapabilityAssessment::unknown("vector", EngineKind::Vector),
        ];
        let decision = selector().select("cache eviction", &engines, &FusionConfig::default());
        assert_eq!(decision.strategy, SearchStrategy::Fallback);
        assert_eq!(decision.engines, vec!["text", "vector"]);
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let config = StrategyConfig {
            keyword_patterns: vec!["(".to_string()],
            ..StrategyConfig::default()
        };
        assert!(StrategySelector::new(&config).is_err());
    }
}

//! Hybrid retrieval: request model, result identity, fusion and reranking
//!
//! Engines return ranked [`EngineHit`](crate::engine::EngineHit) lists; the
//! [`FusionEngine`] merges them into one deduplicated list of [`ResultItem`]s,
//! which an optional [`Reranker`] may reorder.

mod deduplication;
mod fusion;
mod provenance;
mod reranker;

pub use deduplication::{dedup_first, identity_key};
pub use fusion::{
    min_max_normalize, EngineResults, FusionConfig, FusionEngine, FusionOutput, FusionStrategy,
};
pub use provenance::{Provenance, ResultItem};
pub use reranker::{
    apply_rerank, parse_rerank_payload, LexicalReranker, PayloadReranker, RerankFormat,
    RerankOutcome, RerankTransport, Reranker,
};

use crate::error::{MeldError, Result};
use serde::{Deserialize, Serialize};

/// Allowed drift of `vector_weight + keyword_weight` from 1.0
pub const WEIGHT_SUM_TOLERANCE: f32 = 0.01;

/// Search request as issued by a caller. Immutable once dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query text
    pub query: String,

    /// Precomputed query embedding; skips the embedding provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,

    /// Knowledge bases to search; empty means all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub knowledge_base_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_weight: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword_weight: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<FusionStrategy>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            vector: None,
            knowledge_base_ids: Vec::new(),
            top_k: None,
            vector_weight: None,
            keyword_weight: None,
            strategy: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn with_knowledge_bases(mut self, ids: Vec<String>) -> Self {
        self.knowledge_base_ids = ids;
        self
    }

    pub fn with_weights(mut self, vector_weight: f32, keyword_weight: f32) -> Self {
        self.vector_weight = Some(vector_weight);
        self.keyword_weight = Some(keyword_weight);
        self
    }

    pub fn with_strategy(mut self, strategy: FusionStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Reject requests that cannot be dispatched
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() && self.vector.is_none() {
            return Err(MeldError::InvalidRequest(
                "query text or query vector is required".to_string(),
            ));
        }
        if self.top_k == Some(0) {
            return Err(MeldError::InvalidRequest(
                "top_k must be greater than 0".to_string(),
            ));
        }
        if let Some(vector) = &self.vector {
            if vector.is_empty() || vector.iter().any(|v| !v.is_finite()) {
                return Err(MeldError::InvalidRequest(
                    "query vector must be non-empty and finite".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Apply this request's overrides to a base fusion configuration.
    ///
    /// A single weight override implies its complement; two overrides must
    /// sum to 1.0 within [`WEIGHT_SUM_TOLERANCE`].
    pub fn resolve_fusion(&self, base: &FusionConfig) -> Result<FusionConfig> {
        let mut config = base.clone();

        match (self.vector_weight, self.keyword_weight) {
            (None, None) => {}
            (Some(v), None) => {
                check_weight("vector_weight", v)?;
                config.vector_weight = v;
                config.keyword_weight = 1.0 - v;
            }
            (None, Some(k)) => {
                check_weight("keyword_weight", k)?;
                config.keyword_weight = k;
                config.vector_weight = 1.0 - k;
            }
            (Some(v), Some(k)) => {
                check_weight("vector_weight", v)?;
                check_weight("keyword_weight", k)?;
                if ((v + k) - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
                    return Err(MeldError::InvalidRequest(format!(
                        "vector_weight + keyword_weight must equal 1.0, got {}",
                        v + k
                    )));
                }
                config.vector_weight = v;
                config.keyword_weight = k;
            }
        }

        if let Some(top_k) = self.top_k {
            config.top_k = top_k;
        }
        if let Some(strategy) = self.strategy {
            config.strategy = strategy;
        }
        Ok(config)
    }
}

fn check_weight(name: &str, value: f32) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(MeldError::InvalidRequest(format!(
            "{} must be between 0.0 and 1.0, got {}",
            name, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query_rejected() {
        assert!(SearchRequest::new("   ").validate().is_err());
        assert!(SearchRequest::new("").with_vector(vec![0.1, 0.2]).validate().is_ok());
        assert!(SearchRequest::new("x").with_top_k(0).validate().is_err());
    }

    #[test]
    fn test_single_weight_override_implies_complement() {
        let base = FusionConfig::default();
        let request = SearchRequest {
            vector_weight: Some(0.4),
            ..SearchRequest::new("q")
        };
        let config = request.resolve_fusion(&base).unwrap();
        assert!((config.vector_weight - 0.4).abs() < 1e-6);
        assert!((config.keyword_weight - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_inconsistent_weight_overrides_rejected() {
        let request = SearchRequest::new("q").with_weights(0.9, 0.9);
        assert!(request.resolve_fusion(&FusionConfig::default()).is_err());
    }

    #[test]
    fn test_overrides_top_k_and_strategy() {
        let request = SearchRequest::new("q")
            .with_top_k(3)
            .with_strategy(FusionStrategy::Cascade);
        let config = request.resolve_fusion(&FusionConfig::default()).unwrap();
        assert_eq!(config.top_k, 3);
        assert_eq!(config.strategy, FusionStrategy::Cascade);
    }

    #[test]
    fn test_request_json_defaults() {
        let request: SearchRequest = serde_json::from_str(r#"{"query":"vpn setup"}"#).unwrap();
        assert_eq!(request, SearchRequest::new("vpn setup"));
    }
}

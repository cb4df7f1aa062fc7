//! Second-stage reranking of fused results
//!
//! The service depends only on [`Reranker`]. Remote rerank services answer in
//! a handful of JSON shapes; [`PayloadReranker`] pairs a [`RerankTransport`]
//! with [`parse_rerank_payload`] so each shape is decoded in one place.

use crate::error::{MeldError, Result};
use crate::retrieval::ResultItem;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Scores candidate documents against a query, aligned by index
#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>>;
}

/// Response shapes understood by [`parse_rerank_payload`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankFormat {
    /// `{"results": [{"index": 0, "relevance_score": 0.9}, ...]}`
    Results,
    /// `{"data": [{"index": 0, "score": 0.9}, ...]}`
    Data,
    /// `{"scores": [0.9, ...]}`
    Scores,
    /// Detect from the top-level key
    #[default]
    Auto,
}

fn indexed_scores(entries: &[Value], score_field: &str, expected: usize) -> Result<Vec<f32>> {
    let mut scores = vec![None; expected];

    for entry in entries {
        let index = entry
            .get("index")
            .and_then(Value::as_u64)
            .ok_or_else(|| MeldError::Rerank("entry without index".to_string()))?
            as usize;
        let score = entry
            .get(score_field)
            .and_then(Value::as_f64)
            .ok_or_else(|| MeldError::Rerank(format!("entry without {}", score_field)))?;

        let slot = scores
            .get_mut(index)
            .ok_or_else(|| MeldError::Rerank(format!("index {} out of range", index)))?;
        *slot = Some(score as f32);
    }

    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| MeldError::Rerank(format!("missing score for index {}", i))))
        .collect()
}

fn field_array<'a>(payload: &'a Value, field: &str) -> Result<&'a Vec<Value>> {
    payload
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| MeldError::Rerank(format!("payload has no '{}' array", field)))
}

/// Decode a rerank response into scores aligned with the submitted documents
pub fn parse_rerank_payload(format: RerankFormat, payload: &Value, expected: usize) -> Result<Vec<f32>> {
    let format = match format {
        RerankFormat::Auto => {
            if payload.get("results").is_some() {
                RerankFormat::Results
            } else if payload.get("data").is_some() {
                RerankFormat::Data
            } else if payload.get("scores").is_some() {
                RerankFormat::Scores
            } else {
                return Err(MeldError::Rerank("unrecognized rerank payload".to_string()));
            }
        }
        other => other,
    };

    let scores = match format {
        RerankFormat::Results => {
            indexed_scores(field_array(payload, "results")?, "relevance_score", expected)?
        }
        RerankFormat::Data => indexed_scores(field_array(payload, "data")?, "score", expected)?,
        RerankFormat::Scores | RerankFormat::Auto => field_array(payload, "scores")?
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|s| s as f32)
                    .ok_or_else(|| MeldError::Rerank("non-numeric score".to_string()))
            })
            .collect::<Result<Vec<_>>>()?,
    };

    if scores.len() != expected {
        return Err(MeldError::Rerank(format!(
            "expected {} scores, got {}",
            expected,
            scores.len()
        )));
    }
    Ok(scores)
}

/// Sends a rerank request and returns the raw JSON response
#[async_trait]
pub trait RerankTransport: Send + Sync {
    async fn send(&self, query: &str, documents: &[String]) -> Result<Value>;
}

/// Reranker backed by a transport plus a payload decoder
pub struct PayloadReranker {
    name: String,
    format: RerankFormat,
    transport: Arc<dyn RerankTransport>,
}

impl PayloadReranker {
    pub fn new(name: impl Into<String>, format: RerankFormat, transport: Arc<dyn RerankTransport>) -> Self {
        Self {
            name: name.into(),
            format,
            transport,
        }
    }
}

#[async_trait]
impl Reranker for PayloadReranker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        let payload = self.transport.send(query, documents).await?;
        parse_rerank_payload(self.format, &payload, documents.len())
    }
}

/// Local reranker: fraction of distinct query terms present in the document
#[derive(Debug, Default, Clone)]
pub struct LexicalReranker;

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[async_trait]
impl Reranker for LexicalReranker {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Err(MeldError::Rerank("query has no terms".to_string()));
        }

        Ok(documents
            .iter()
            .map(|doc| {
                let doc_terms = terms(doc);
                let overlap = query_terms.intersection(&doc_terms).count();
                overlap as f32 / query_terms.len() as f32
            })
            .collect())
    }
}

/// Result of [`apply_rerank`]
#[derive(Debug, Clone, PartialEq)]
pub struct RerankOutcome {
    pub items: Vec<ResultItem>,
    pub applied: bool,
    pub diagnostic: Option<String>,
}

/// Rerank the first `candidates` items. On failure or a length mismatch the
/// fused order is kept and a diagnostic returned; items past the candidate
/// window keep their positions after the reranked head.
pub async fn apply_rerank(
    reranker: &dyn Reranker,
    query: &str,
    mut items: Vec<ResultItem>,
    candidates: usize,
) -> RerankOutcome {
    let window = candidates.min(items.len());
    if window == 0 {
        return RerankOutcome {
            items,
            applied: false,
            diagnostic: None,
        };
    }

    let documents: Vec<String> = items[..window].iter().map(|i| i.content.clone()).collect();
    let scores = match reranker.rerank(query, &documents).await {
        Ok(scores) if scores.len() == window => scores,
        Ok(scores) => {
            let reason = format!(
                "{} returned {} scores for {} documents",
                reranker.name(),
                scores.len(),
                window
            );
            tracing::warn!(reranker = reranker.name(), "{}", reason);
            return RerankOutcome {
                items,
                applied: false,
                diagnostic: Some(reason),
            };
        }
        Err(e) => {
            tracing::warn!(reranker = reranker.name(), error = %e, "Rerank failed, keeping fused order");
            return RerankOutcome {
                items,
                applied: false,
                diagnostic: Some(format!("{}: {}", reranker.name(), e)),
            };
        }
    };

    if let Some(bad) = scores.iter().position(|s| !s.is_finite()) {
        return RerankOutcome {
            items,
            applied: false,
            diagnostic: Some(format!("{} returned a non-finite score at {}", reranker.name(), bad)),
        };
    }

    let tail = items.split_off(window);
    let mut head: Vec<ResultItem> = items
        .into_iter()
        .zip(scores)
        .map(|(mut item, score)| {
            item.rerank_score = Some(score);
            item
        })
        .collect();
    // stable: equal rerank scores keep fused order
    head.sort_by(|a, b| {
        b.rerank_score
            .unwrap_or(0.0)
            .total_cmp(&a.rerank_score.unwrap_or(0.0))
    });
    head.extend(tail);

    RerankOutcome {
        items: head,
        applied: true,
        diagnostic: None,
    }
}

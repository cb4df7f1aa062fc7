//! Search engine adapters
//!
//! Every backend sits behind [`EngineAdapter`]. The orchestrator never talks
//! to a backend directly; it calls adapters through their circuit breakers.
//!
//! Reference implementations:
//! - [`TantivyTextEngine`]: in-memory BM25 index
//! - [`HnswVectorEngine`]: HNSW cosine index
//! - [`HashingEmbedder`]: deterministic feature-hashing embeddings

mod corpus;
mod embedder;
mod text;
mod vector;

pub use corpus::{Corpus, CorpusDocument};
pub use embedder::HashingEmbedder;
pub use text::TantivyTextEngine;
pub use vector::HnswVectorEngine;

use crate::config::EnginesConfig;
use crate::error::Result;
use crate::retrieval::identity_key;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Engine family; decides which fusion weight applies to its results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Text,
    Vector,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Text => f.write_str("text"),
            EngineKind::Vector => f.write_str("vector"),
        }
    }
}

/// Query handed to an adapter
#[derive(Debug, Clone, PartialEq)]
pub struct EngineQuery {
    pub text: Option<String>,
    pub vector: Option<Vec<f32>>,
    /// Knowledge bases to restrict to; empty means all
    pub knowledge_base_ids: Vec<String>,
    pub top_k: usize,
}

impl EngineQuery {
    pub fn text(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: Some(text.into()),
            vector: None,
            knowledge_base_ids: Vec::new(),
            top_k,
        }
    }

    /// True if `knowledge_base_id` passes the scope filter
    pub fn in_scope(&self, knowledge_base_id: Option<&str>) -> bool {
        self.knowledge_base_ids.is_empty()
            || knowledge_base_id
                .map(|kb| self.knowledge_base_ids.iter().any(|id| id == kb))
                .unwrap_or(false)
    }
}

/// One ranked hit as returned by an adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineHit {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub knowledge_base_id: Option<String>,
    #[serde(default)]
    pub content: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Value,
}

impl EngineHit {
    pub fn new(id: impl Into<String>, content: impl Into<String>, score: f32) -> Self {
        Self {
            id: Some(id.into()),
            document_id: None,
            knowledge_base_id: None,
            content: content.into(),
            score,
            metadata: Value::Null,
        }
    }

    pub fn identity(&self) -> Option<String> {
        identity_key(
            self.id.as_deref(),
            self.document_id.as_deref(),
            self.knowledge_base_id.as_deref(),
            &self.content,
        )
    }
}

/// A search backend. Implementations must be safe to call concurrently.
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    /// Stable name used for breakers, health and diagnostics
    fn name(&self) -> &str;

    fn kind(&self) -> EngineKind;

    /// Ranked hits, best first
    async fn search(&self, query: &EngineQuery) -> Result<Vec<EngineHit>>;
}

/// Turns query text into a vector for the vector engine
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Index `corpus` into the enabled reference engines, text first
pub async fn build_reference_engines(
    settings: &EnginesConfig,
    corpus: &Corpus,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<Vec<Arc<dyn EngineAdapter>>> {
    let mut adapters: Vec<Arc<dyn EngineAdapter>> = Vec::new();
    if settings.text_enabled {
        adapters.push(Arc::new(TantivyTextEngine::build("text", corpus)?));
    }
    if settings.vector_enabled {
        adapters.push(Arc::new(
            HnswVectorEngine::build("vector", corpus, embedder, settings).await?,
        ));
    }
    Ok(adapters)
}

//! HNSW vector engine (cosine similarity)

use crate::config::EnginesConfig;
use crate::engine::{
    Corpus, CorpusDocument, EmbeddingProvider, EngineAdapter, EngineHit, EngineKind, EngineQuery,
};
use crate::error::{MeldError, Result};
use async_trait::async_trait;
use hnsw_rs::prelude::*;
use parking_lot::RwLock;
use std::sync::Arc;

const MAX_LAYERS: usize = 16;

/// Approximate nearest-neighbour search over a [`Corpus`]
pub struct HnswVectorEngine {
    name: String,
    index: RwLock<Hnsw<'static, f32, DistCosine>>,
    documents: Vec<CorpusDocument>,
    dimension: usize,
    ef_search: usize,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl HnswVectorEngine {
    /// Index `corpus`, embedding documents that carry no precomputed vector
    pub async fn build(
        name: impl Into<String>,
        corpus: &Corpus,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: &EnginesConfig,
    ) -> Result<Self> {
        let name = name.into();
        let dimension = embedder.dimension();
        let index = Hnsw::<f32, DistCosine>::new(
            settings.hnsw_m,
            corpus.len().max(1),
            MAX_LAYERS,
            settings.hnsw_ef_construction,
            DistCosine,
        );

        for (slot, document) in corpus.documents.iter().enumerate() {
            let vector = match &document.vector {
                Some(vector) => vector.clone(),
                None => embedder.embed(&document.content).await?,
            };
            if vector.len() != dimension {
                return Err(MeldError::Index(format!(
                    "Invalid dimension for document {}: expected {}, got {}",
                    slot,
                    dimension,
                    vector.len()
                )));
            }
            index.insert((&vector, slot));
        }

        tracing::info!(
            "Built vector index '{}' with {} documents ({}D, {})",
            name,
            corpus.len(),
            dimension,
            embedder.model_name()
        );

        Ok(Self {
            name,
            index: RwLock::new(index),
            documents: corpus.documents.clone(),
            dimension,
            ef_search: settings.hnsw_ef_search,
            embedder,
        })
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    async fn query_vector(&self, query: &EngineQuery) -> Result<Option<Vec<f32>>> {
        if let Some(vector) = &query.vector {
            return Ok(Some(vector.clone()));
        }
        match query.text.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(text) => Ok(Some(self.embedder.embed(text).await?)),
            None => Ok(None),
        }
    }

    fn search_index(&self, vector: &[f32], query: &EngineQuery) -> Result<Vec<EngineHit>> {
        if vector.len() != self.dimension {
            return Err(MeldError::Index(format!(
                "Invalid query dimension: expected {}, got {}",
                self.dimension,
                vector.len()
            )));
        }

        // Scoped queries scan the whole index so filtering cannot starve top_k.
        let k = if query.knowledge_base_ids.is_empty() {
            query.top_k.min(self.documents.len())
        } else {
            self.documents.len()
        };
        let neighbours = self.index.read().search(vector, k, self.ef_search.max(k));

        let hits = neighbours
            .into_iter()
            .filter_map(|n| {
                let document = self.documents.get(n.d_id)?;
                query
                    .in_scope(document.knowledge_base_id.as_deref())
                    .then(|| document.to_hit(1.0 - n.distance))
            })
            .take(query.top_k)
            .collect();

        Ok(hits)
    }
}

#[async_trait]
impl EngineAdapter for HnswVectorEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Vector
    }

    async fn search(&self, query: &EngineQuery) -> Result<Vec<EngineHit>> {
        if self.documents.is_empty() || query.top_k == 0 {
            return Ok(Vec::new());
        }
        let Some(vector) = self.query_vector(query).await? else {
            return Ok(Vec::new());
        };
        self.search_index(&vector, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::HashingEmbedder;

    fn unit(dimension: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dimension];
        v[axis] = 1.0;
        v
    }

    fn corpus() -> Corpus {
        let mut a = CorpusDocument::new("a", "alpha").with_knowledge_base("kb1");
        a.vector = Some(unit(8, 0));
        let mut b = CorpusDocument::new("b", "beta").with_knowledge_base("kb2");
        b.vector = Some(unit(8, 1));
        let mut c = CorpusDocument::new("c", "gamma").with_knowledge_base("kb1");
        c.vector = Some(vec![0.9, 0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        Corpus::new(vec![a, b, c])
    }

    async fn engine() -> HnswVectorEngine {
        let embedder = Arc::new(HashingEmbedder::new(8).unwrap());
        HnswVectorEngine::build("vector", &corpus(), embedder, &EnginesConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_nearest_neighbour() {
        let engine = engine().await;
        let mut query = EngineQuery::text("", 2);
        query.text = None;
        query.vector = Some(unit(8, 0));

        let results = engine.search(&query).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id.as_deref(), Some("a"));
        assert!(results[0].score > 0.99);
        assert_eq!(results[1].id.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_scope_filter() {
        let engine = engine().await;
        let mut query = EngineQuery::text("", 3);
        query.text = None;
        query.vector = Some(unit(8, 0));
        query.knowledge_base_ids = vec!["kb2".to_string()];

        let results = engine.search(&query).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_dimension_validation() {
        let engine = engine().await;
        let mut query = EngineQuery::text("", 3);
        query.vector = Some(vec![1.0; 4]);
        assert!(engine.search(&query).await.is_err());
    }

    #[tokio::test]
    async fn test_embeds_documents_and_queries() {
        let embedder = Arc::new(HashingEmbedder::new(128).unwrap());
        let corpus = Corpus::new(vec![
            CorpusDocument::new("vpn", "reset the vpn password from the portal"),
            CorpusDocument::new("tax", "quarterly tax filing deadlines"),
        ]);
        let engine = HnswVectorEngine::build("vector", &corpus, embedder, &EnginesConfig::default())
            .await
            .unwrap();

        let results = engine
            .search(&EngineQuery::text("vpn password reset", 1))
            .await
            .unwrap();
        assert_eq!(results[0].id.as_deref(), Some("vpn"));
    }
}

//! Deterministic feature-hashing embedder
//!
//! Hashes unigrams and adjacent-word bigrams into a fixed number of signed
//! buckets, then L2-normalises. No model download, stable across runs.

use crate::engine::EmbeddingProvider;
use crate::error::{MeldError, Result};
use async_trait::async_trait;

pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(MeldError::Embedding(
                "Embedding dimension must be greater than 0".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    /// Synchronous embedding, used when indexing a corpus
    pub fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();

        if tokens.is_empty() {
            return Err(MeldError::Embedding(
                "Text has no indexable terms".to_string(),
            ));
        }

        let mut vector = vec![0.0f32; self.dimension];
        for token in &tokens {
            self.add_feature(&mut vector, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.add_feature(&mut vector, bigram.as_bytes(), 0.5);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn add_feature(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = blake3::hash(feature);
        let bytes = hash.as_bytes();
        let mut bucket = [0u8; 8];
        bucket.copy_from_slice(&bytes[..8]);
        let slot = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[slot] += sign * weight;
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_text(text)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "feature-hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_embedding_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64).unwrap();
        let a = embedder.embed_text("Configure the VPN client").unwrap();
        let b = embedder.embed_text("configure the vpn client").unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_overlapping_text_is_closer() {
        let embedder = HashingEmbedder::new(256).unwrap();
        let query = embedder.embed_text("reset vpn password").unwrap();
        let close = embedder.embed_text("how to reset your vpn password").unwrap();
        let far = embedder.embed_text("quarterly revenue report").unwrap();

        assert!(cosine(&query, &close) > cosine(&query, &far));
    }

    #[test]
    fn test_rejects_empty_input() {
        let embedder = HashingEmbedder::new(16).unwrap();
        assert!(embedder.embed_text(" ,. ").is_err());
        assert!(HashingEmbedder::new(0).is_err());
    }

    #[tokio::test]
    async fn test_provider_interface() {
        let embedder = HashingEmbedder::new(32).unwrap();
        let vector = embedder.embed("hello world").await.unwrap();
        assert_eq!(vector.len(), embedder.dimension());
        assert_eq!(embedder.model_name(), "feature-hashing");
    }
}

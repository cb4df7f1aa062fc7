//! Fused result items and their provenance

use crate::engine::EngineKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Which engines contributed a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Text,
    Vector,
    Hybrid,
}

impl From<EngineKind> for Provenance {
    fn from(kind: EngineKind) -> Self {
        match kind {
            EngineKind::Text => Provenance::Text,
            EngineKind::Vector => Provenance::Vector,
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Provenance::Text => "text",
            Provenance::Vector => "vector",
            Provenance::Hybrid => "hybrid",
        };
        f.write_str(tag)
    }
}

/// One logical chunk in a fused result list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    /// Resolved identity key
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base_id: Option<String>,

    pub content: String,

    #[serde(default)]
    pub metadata: Value,

    /// Native score reported by each engine, keyed by engine name
    pub engine_scores: BTreeMap<String, f32>,

    /// Fused score (native score when a single list passed through)
    pub score: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,

    pub provenance: Provenance,
}

impl ResultItem {
    /// Get a short preview of the content (first N characters)
    pub fn preview(&self, max_chars: usize) -> String {
        match self.content.char_indices().nth(max_chars) {
            None => self.content.clone(),
            Some((cut, _)) => format!("{}...", &self.content[..cut]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(content: &str) -> ResultItem {
        ResultItem {
            key: "k".to_string(),
            id: None,
            document_id: None,
            knowledge_base_id: None,
            content: content.to_string(),
            metadata: Value::Null,
            engine_scores: BTreeMap::new(),
            score: 0.0,
            rerank_score: None,
            provenance: Provenance::Text,
        }
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        assert_eq!(item("short").preview(10), "short");
        assert_eq!(item("héllo wörld").preview(5), "héllo...");
    }

    #[test]
    fn test_provenance_tags() {
        assert_eq!(Provenance::from(EngineKind::Vector), Provenance::Vector);
        assert_eq!(
            serde_json::to_string(&Provenance::Hybrid).unwrap(),
            "\"hybrid\""
        );
    }
}

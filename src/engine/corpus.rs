//! JSON corpus loading for the reference engines

use crate::engine::EngineHit;
use crate::error::{MeldError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// One indexable chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusDocument {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub knowledge_base_id: Option<String>,
    pub content: String,
    /// Precomputed embedding; computed at index time when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: Value,
}

impl CorpusDocument {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            document_id: None,
            knowledge_base_id: None,
            content: content.into(),
            vector: None,
            metadata: Value::Null,
        }
    }

    pub fn with_knowledge_base(mut self, kb: impl Into<String>) -> Self {
        self.knowledge_base_id = Some(kb.into());
        self
    }

    pub fn to_hit(&self, score: f32) -> EngineHit {
        EngineHit {
            id: self.id.clone(),
            document_id: self.document_id.clone(),
            knowledge_base_id: self.knowledge_base_id.clone(),
            content: self.content.clone(),
            score,
            metadata: self.metadata.clone(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CorpusFile {
    List(Vec<CorpusDocument>),
    Wrapped { documents: Vec<CorpusDocument> },
}

/// Documents shared by the reference engines
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Corpus {
    pub documents: Vec<CorpusDocument>,
}

impl Corpus {
    pub fn new(documents: Vec<CorpusDocument>) -> Self {
        Self { documents }
    }

    /// Load a JSON array of documents, or an object with a `documents` array
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| MeldError::Io {
            source: e,
            context: format!("Failed to read corpus file: {:?}", path),
        })?;
        Self::from_json(&content).map_err(|e| match e {
            MeldError::Json { source, .. } => MeldError::Json {
                source,
                context: format!("Failed to parse corpus file: {:?}", path),
            },
            other => other,
        })
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let file: CorpusFile = serde_json::from_str(content).map_err(|e| MeldError::Json {
            source: e,
            context: "Failed to parse corpus".to_string(),
        })?;
        let documents = match file {
            CorpusFile::List(documents) => documents,
            CorpusFile::Wrapped { documents } => documents,
        };

        let before = documents.len();
        let documents: Vec<CorpusDocument> = documents
            .into_iter()
            .filter(|d| !d.content.trim().is_empty())
            .collect();
        if documents.len() < before {
            tracing::warn!(
                skipped = before - documents.len(),
                "Skipping corpus documents with empty content"
            );
        }

        tracing::info!("Loaded corpus with {} documents", documents.len());
        Ok(Self { documents })
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

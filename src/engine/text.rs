//! In-memory tantivy text engine (BM25)

use crate::engine::{Corpus, CorpusDocument, EngineAdapter, EngineHit, EngineKind, EngineQuery};
use crate::error::{MeldError, Result};
use async_trait::async_trait;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};

const WRITER_HEAP_BYTES: usize = 50_000_000;

fn index_error(e: impl std::fmt::Display) -> MeldError {
    MeldError::Index(e.to_string())
}

/// Full-text search over a [`Corpus`] with BM25 ranking
pub struct TantivyTextEngine {
    name: String,
    index: Index,
    reader: IndexReader,
    slot_field: Field,
    content_field: Field,
    kb_field: Field,
    documents: Vec<CorpusDocument>,
}

impl TantivyTextEngine {
    /// Index every document of `corpus` into a RAM directory
    pub fn build(name: impl Into<String>, corpus: &Corpus) -> Result<Self> {
        let mut schema_builder = Schema::builder();
        let slot_field = schema_builder.add_u64_field("slot", INDEXED | STORED);
        let content_field = schema_builder.add_text_field("content", TEXT);
        let kb_field = schema_builder.add_text_field("kb", STRING);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        let mut writer: IndexWriter = index.writer(WRITER_HEAP_BYTES).map_err(index_error)?;

        for (slot, document) in corpus.documents.iter().enumerate() {
            let mut entry = doc!(
                slot_field => slot as u64,
                content_field => document.content.as_str(),
            );
            if let Some(kb) = &document.knowledge_base_id {
                entry.add_text(kb_field, kb);
            }
            writer.add_document(entry).map_err(index_error)?;
        }
        writer.commit().map_err(index_error)?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(index_error)?;
        reader.reload().map_err(index_error)?;

        let name = name.into();
        tracing::info!("Built text index '{}' with {} documents", name, corpus.len());

        Ok(Self {
            name,
            index,
            reader,
            slot_field,
            content_field,
            kb_field,
            documents: corpus.documents.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn search_index(&self, query: &EngineQuery) -> Result<Vec<EngineHit>> {
        let Some(text) = query.text.as_deref().filter(|t| !t.trim().is_empty()) else {
            return Ok(Vec::new());
        };
        if self.documents.is_empty() || query.top_k == 0 {
            return Ok(Vec::new());
        }

        let parser = QueryParser::for_index(&self.index, vec![self.content_field]);
        let (parsed, errors) = parser.parse_query_lenient(text);
        if !errors.is_empty() {
            tracing::debug!(engine = %self.name, errors = errors.len(), "Lenient query parse");
        }

        let full_query: Box<dyn Query> = if query.knowledge_base_ids.is_empty() {
            parsed
        } else {
            let scope: Vec<(Occur, Box<dyn Query>)> = query
                .knowledge_base_ids
                .iter()
                .map(|kb| {
                    let term = Term::from_field_text(self.kb_field, kb);
                    let clause: Box<dyn Query> =
                        Box::new(TermQuery::new(term, IndexRecordOption::Basic));
                    (Occur::Should, clause)
                })
                .collect();
            // The scope clause only filters; a zero boost keeps BM25 scores untouched.
            let scope: Box<dyn Query> =
                Box::new(BoostQuery::new(Box::new(BooleanQuery::new(scope)), 0.0));
            Box::new(BooleanQuery::new(vec![
                (Occur::Must, parsed),
                (Occur::Must, scope),
            ]))
        };

        let searcher = self.reader.searcher();
        let top_docs = searcher
            .search(full_query.as_ref(), &TopDocs::with_limit(query.top_k))
            .map_err(index_error)?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let stored: TantivyDocument = searcher.doc(address).map_err(index_error)?;
            let slot = stored
                .get_first(self.slot_field)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| MeldError::Index("Missing slot field".to_string()))?;
            let document = self
                .documents
                .get(slot as usize)
                .ok_or_else(|| MeldError::Index(format!("Unknown slot {}", slot)))?;
            hits.push(document.to_hit(score));
        }

        Ok(hits)
    }
}

#[async_trait]
impl EngineAdapter for TantivyTextEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Text
    }

    async fn search(&self, query: &EngineQuery) -> Result<Vec<EngineHit>> {
        self.search_index(query)
    }
}

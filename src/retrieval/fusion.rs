//! Fusion of per-engine ranked lists
//!
//! Three strategies are supported:
//!
//! - weighted sum: per-list min-max normalisation, then `Σ weight × score`
//! - reciprocal rank fusion: `Σ weight / (k + rank)` with 1-based ranks
//! - cascade: results returned by several engines first, then each engine's
//!   exclusive results interleaved by a configurable vector/text ratio
//!
//! Fusion is deterministic and never fails: malformed lists are dropped with
//! a diagnostic and a single surviving list passes through unscaled.

use ahash::{HashMap, HashMapExt};
use crate::engine::{EngineHit, EngineKind};
use crate::error::MeldError;
use crate::retrieval::{dedup_first, Provenance, ResultItem};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Fusion algorithm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    #[default]
    WeightedSum,
    #[serde(alias = "reciprocal_rank_fusion")]
    Rrf,
    Cascade,
}

impl FusionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionStrategy::WeightedSum => "weighted_sum",
            FusionStrategy::Rrf => "rrf",
            FusionStrategy::Cascade => "cascade",
        }
    }
}

impl fmt::Display for FusionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FusionStrategy {
    type Err = MeldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "weighted_sum" | "weighted" => Ok(FusionStrategy::WeightedSum),
            "rrf" | "reciprocal_rank_fusion" => Ok(FusionStrategy::Rrf),
            "cascade" => Ok(FusionStrategy::Cascade),
            other => Err(MeldError::InvalidRequest(format!(
                "Unknown fusion strategy: {}",
                other
            ))),
        }
    }
}

/// Parameters for one fusion run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    pub strategy: FusionStrategy,

    /// Weight for vector engine results
    pub vector_weight: f32,

    /// Weight for text engine results
    pub keyword_weight: f32,

    /// RRF K constant (typically 60)
    pub rrf_k: f32,

    /// Share of cascade's exclusive slots given to vector-only results
    pub cascade_vector_ratio: f32,

    pub top_k: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            strategy: FusionStrategy::WeightedSum,
            vector_weight: 0.7,
            keyword_weight: 0.3,
            rrf_k: 60.0,
            cascade_vector_ratio: 0.5,
            top_k: 10,
        }
    }
}

impl FusionConfig {
    pub fn weight_for(&self, kind: EngineKind) -> f32 {
        match kind {
            EngineKind::Vector => self.vector_weight,
            EngineKind::Text => self.keyword_weight,
        }
    }
}

/// One engine's ranked list, in received order
#[derive(Debug, Clone)]
pub struct EngineResults {
    pub engine: String,
    pub kind: EngineKind,
    pub hits: Vec<EngineHit>,
}

impl EngineResults {
    pub fn new(engine: impl Into<String>, kind: EngineKind, hits: Vec<EngineHit>) -> Self {
        Self {
            engine: engine.into(),
            kind,
            hits,
        }
    }
}

/// Fused list plus diagnostics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FusionOutput {
    pub items: Vec<ResultItem>,

    /// One message per engine list that was dropped as malformed
    pub dropped: Vec<String>,

    /// True when exactly one non-empty list survived and was passed through
    pub passthrough: bool,
}

/// Min-max normalise scores to [0, 1]. A list whose scores are all equal
/// normalises to 1.0.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    if !(range > f32::EPSILON) {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / range).collect()
}

struct RankedList {
    engine: String,
    kind: EngineKind,
    weight: f32,
    entries: Vec<(String, EngineHit)>,
    normalized: Vec<f32>,
}

struct Candidate {
    key: String,
    hit: EngineHit,
    engine_scores: BTreeMap<String, f32>,
    kinds: Vec<EngineKind>,
    fused: f32,
    best_single: f32,
    lists: usize,
}

impl Candidate {
    fn provenance(&self) -> Provenance {
        match self.kinds.split_first() {
            Some((first, rest)) if rest.iter().all(|k| k == first) => (*first).into(),
            _ => Provenance::Hybrid,
        }
    }

    fn native_score(&self) -> f32 {
        self.engine_scores
            .values()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max)
    }

    fn into_item(self) -> ResultItem {
        let provenance = self.provenance();
        into_item(self.key, self.hit, self.engine_scores, self.fused, provenance)
    }
}

fn into_item(
    key: String,
    hit: EngineHit,
    engine_scores: BTreeMap<String, f32>,
    score: f32,
    provenance: Provenance,
) -> ResultItem {
    ResultItem {
        key,
        id: hit.id,
        document_id: hit.document_id,
        knowledge_base_id: hit.knowledge_base_id,
        content: hit.content,
        metadata: hit.metadata,
        engine_scores,
        score,
        rerank_score: None,
        provenance,
    }
}

fn by_fused_score(a: &Candidate, b: &Candidate) -> Ordering {
    b.fused
        .total_cmp(&a.fused)
        .then_with(|| b.best_single.total_cmp(&a.best_single))
        .then_with(|| a.key.cmp(&b.key))
}

fn by_native_score(a: &Candidate, b: &Candidate) -> Ordering {
    b.native_score()
        .total_cmp(&a.native_score())
        .then_with(|| a.key.cmp(&b.key))
}

/// Merges per-engine ranked lists
#[derive(Debug, Clone)]
pub struct FusionEngine {
    config: FusionConfig,
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Fuse the given lists into one ranked, deduplicated, `top_k`-bounded list
    pub fn fuse(&self, lists: Vec<EngineResults>) -> FusionOutput {
        let mut dropped = Vec::new();
        let mut ranked = Vec::with_capacity(lists.len());

        for list in lists {
            match self.prepare(list) {
                Ok(Some(list)) => ranked.push(list),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping engine results");
                    dropped.push(e.to_string());
                }
            }
        }

        let passthrough = ranked.len() == 1;
        let items = match ranked.len() {
            0 => Vec::new(),
            1 => self.pass_through(ranked.remove(0)),
            _ => match self.config.strategy {
                FusionStrategy::WeightedSum => self.weighted_sum(&ranked),
                FusionStrategy::Rrf => self.reciprocal_rank(&ranked),
                FusionStrategy::Cascade => self.cascade(&ranked),
            },
        };

        tracing::debug!(
            strategy = %self.config.strategy,
            results = items.len(),
            dropped = dropped.len(),
            passthrough,
            "Fused engine results"
        );

        FusionOutput {
            items,
            dropped,
            passthrough,
        }
    }

    fn prepare(&self, list: EngineResults) -> Result<Option<RankedList>, MeldError> {
        if list.hits.is_empty() {
            return Ok(None);
        }

        if let Some(rank) = list.hits.iter().position(|h| !h.score.is_finite()) {
            return Err(MeldError::FusionInput {
                engine: list.engine,
                reason: format!("non-finite score at rank {}", rank + 1),
            });
        }

        let entries = dedup_first(list.hits).map_err(|index| MeldError::FusionInput {
            engine: list.engine.clone(),
            reason: format!("hit at rank {} has no resolvable identity", index + 1),
        })?;

        let scores: Vec<f32> = entries.iter().map(|(_, hit)| hit.score).collect();
        Ok(Some(RankedList {
            weight: self.config.weight_for(list.kind),
            engine: list.engine,
            kind: list.kind,
            normalized: min_max_normalize(&scores),
            entries,
        }))
    }

    fn pass_through(&self, list: RankedList) -> Vec<ResultItem> {
        let provenance = Provenance::from(list.kind);
        list.entries
            .into_iter()
            .take(self.config.top_k)
            .map(|(key, hit)| {
                let mut engine_scores = BTreeMap::new();
                engine_scores.insert(list.engine.clone(), hit.score);
                let score = hit.score;
                into_item(key, hit, engine_scores, score, provenance)
            })
            .collect()
    }

    /// Sum per-list contributions. `contribution` returns `(weighted, single)`
    /// for the entry at `rank` (0-based) in `list`.
    fn accumulate<F>(&self, lists: &[RankedList], contribution: F) -> Vec<Candidate>
    where
        F: Fn(&RankedList, usize) -> (f32, f32),
    {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut candidates: Vec<Candidate> = Vec::new();

        for list in lists {
            for (rank, (key, hit)) in list.entries.iter().enumerate() {
                let (weighted, single) = contribution(list, rank);
                let slot = *index.entry(key.as_str()).or_insert_with(|| {
                    candidates.push(Candidate {
                        key: key.clone(),
                        hit: hit.clone(),
                        engine_scores: BTreeMap::new(),
                        kinds: Vec::new(),
                        fused: 0.0,
                        best_single: f32::NEG_INFINITY,
                        lists: 0,
                    });
                    candidates.len() - 1
                });

                let candidate = &mut candidates[slot];
                candidate.fused += weighted;
                candidate.best_single = candidate.best_single.max(single);
                candidate.engine_scores.insert(list.engine.clone(), hit.score);
                candidate.kinds.push(list.kind);
                candidate.lists += 1;
            }
        }

        candidates
    }

    fn finish(&self, mut candidates: Vec<Candidate>) -> Vec<ResultItem> {
        candidates.sort_by(by_fused_score);
        candidates
            .into_iter()
            .take(self.config.top_k)
            .map(Candidate::into_item)
            .collect()
    }

    fn weighted_sum(&self, lists: &[RankedList]) -> Vec<ResultItem> {
        let candidates = self.accumulate(lists, |list, rank| {
            let normalized = list.normalized[rank];
            (list.weight * normalized, normalized)
        });
        self.finish(candidates)
    }

    fn reciprocal_rank(&self, lists: &[RankedList]) -> Vec<ResultItem> {
        let k = self.config.rrf_k;
        let candidates = self.accumulate(lists, |list, rank| {
            let rrf = 1.0 / (k + rank as f32 + 1.0);
            (list.weight * rrf, rrf)
        });
        self.finish(candidates)
    }

    fn cascade(&self, lists: &[RankedList]) -> Vec<ResultItem> {
        let top_k = self.config.top_k;
        let candidates = self.accumulate(lists, |list, rank| {
            let normalized = list.normalized[rank];
            (list.weight * normalized, normalized)
        });

        let (mut shared, exclusive): (Vec<Candidate>, Vec<Candidate>) =
            candidates.into_iter().partition(|c| c.lists > 1);
        shared.sort_by(by_fused_score);
        shared.truncate(top_k);

        let remaining = top_k - shared.len();
        let (mut vector_pool, mut text_pool): (Vec<Candidate>, Vec<Candidate>) = exclusive
            .into_iter()
            .partition(|c| c.kinds.first() == Some(&EngineKind::Vector));
        vector_pool.sort_by(by_native_score);
        text_pool.sort_by(by_native_score);

        let wanted = (remaining as f32 * self.config.cascade_vector_ratio).round() as usize;
        let mut vector_quota = wanted.min(remaining).min(vector_pool.len());
        let text_quota = (remaining - vector_quota).min(text_pool.len());
        vector_quota = (remaining - text_quota).min(vector_pool.len());

        let mut items: Vec<ResultItem> = shared.into_iter().map(Candidate::into_item).collect();
        let mut vector_iter = vector_pool.into_iter();
        let mut text_iter = text_pool.into_iter();
        let (mut vector_taken, mut text_taken) = (0usize, 0usize);

        while vector_taken < vector_quota || text_taken < text_quota {
            // Pick whichever side is furthest behind its share of the quota.
            let take_vector = text_taken >= text_quota
                || (vector_taken < vector_quota
                    && vector_taken * text_quota <= text_taken * vector_quota);

            let next = if take_vector {
                vector_taken += 1;
                vector_iter.next()
            } else {
                text_taken += 1;
                text_iter.next()
            };
            if let Some(candidate) = next {
                items.push(candidate.into_item());
            }
        }

        items
    }
}

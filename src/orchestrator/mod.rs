//! The search service
//!
//! [`MeldService`] owns every collaborator (config, cache, breakers, health,
//! admission control) and drives a request through them:
//!
//! 1. normalize the query and build the cache key
//! 2. return a cached response if there is one
//! 3. join an identical in-flight request, or lead a new one
//! 4. wait for a concurrency slot
//! 5. pick a strategy and call the chosen engines in parallel, each through
//!    its breaker
//! 6. fuse, optionally rerank, write through to the cache

mod response;
mod singleflight;
mod task;

pub use response::{engine_used, Diagnostics, EngineReport, SearchResponse, SystemStatus};
pub use singleflight::{FlightError, SingleFlight};
pub use task::RepeatingTask;

use crate::cache::{normalize_query, CacheKey, ResultCache};
use crate::concurrency::ConcurrencyController;
use crate::config::{Config, ConfigListener, ConfigManager};
use crate::engine::{EmbeddingProvider, EngineAdapter, EngineKind, EngineQuery};
use crate::error::{MeldError, Result};
use crate::health::{HealthAssessor, SearchStrategy, StrategySelector};
use crate::resilience::{BreakerRegistry, ErrorHandler};
use crate::retrieval::{apply_rerank, EngineResults, FusionConfig, FusionEngine, Reranker, SearchRequest};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Assembles a [`MeldService`]
pub struct MeldServiceBuilder {
    config: Arc<ConfigManager>,
    adapters: Vec<Arc<dyn EngineAdapter>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl MeldServiceBuilder {
    pub fn adapter(mut self, adapter: Arc<dyn EngineAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn adapters(mut self, adapters: impl IntoIterator<Item = Arc<dyn EngineAdapter>>) -> Self {
        self.adapters.extend(adapters);
        self
    }

    /// Embeds query text once per request when a vector engine is queried
    /// without a caller-supplied vector
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn build(self) -> Result<Arc<MeldService>> {
        let mut names = HashSet::new();
        for adapter in &self.adapters {
            if !names.insert(adapter.name().to_string()) {
                return Err(MeldError::Config(format!(
                    "Duplicate engine name: {}",
                    adapter.name()
                )));
            }
        }

        let snapshot = self.config.get();
        let service = Arc::new(MeldService {
            selector: RwLock::new(Arc::new(StrategySelector::new(&snapshot.strategy)?)),
            cache: ResultCache::new(&snapshot.cache),
            errors: ErrorHandler::new(snapshot.breaker.clone(), snapshot.retry.clone()),
            health: HealthAssessor::new(
                self.adapters.clone(),
                snapshot.health.clone(),
                snapshot.strategy.clone(),
            ),
            concurrency: ConcurrencyController::new(snapshot.concurrency.max_in_flight),
            flights: SingleFlight::new(),
            config: self.config,
            adapters: self.adapters,
            embedder: self.embedder,
            reranker: self.reranker,
            tasks: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
            started_at: Utc::now(),
        });

        let weak = Arc::downgrade(&service);
        let listener: ConfigListener = Arc::new(move |config: &Config| match weak.upgrade() {
            Some(service) => service.apply_config(config),
            None => Ok(()),
        });
        *service.listener.lock() = Some(service.config.subscribe(listener));

        tracing::info!(
            engines = service.adapters.len(),
            reranker = service.reranker.as_ref().map(|r| r.name()).unwrap_or("none"),
            "Search service ready"
        );
        Ok(service)
    }
}

pub struct MeldService {
    config: Arc<ConfigManager>,
    adapters: Vec<Arc<dyn EngineAdapter>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    reranker: Option<Arc<dyn Reranker>>,
    cache: ResultCache,
    errors: ErrorHandler,
    health: HealthAssessor,
    selector: RwLock<Arc<StrategySelector>>,
    concurrency: ConcurrencyController,
    flights: SingleFlight<SearchResponse>,
    tasks: Mutex<Vec<RepeatingTask>>,
    listener: Mutex<Option<u64>>,
    started_at: DateTime<Utc>,
}

impl MeldService {
    pub fn builder(config: Arc<ConfigManager>) -> MeldServiceBuilder {
        MeldServiceBuilder {
            config,
            adapters: Vec::new(),
            embedder: None,
            reranker: None,
        }
    }

    pub fn config(&self) -> &Arc<ConfigManager> {
        &self.config
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        self.errors.breakers()
    }

    pub fn error_handler(&self) -> &ErrorHandler {
        &self.errors
    }

    pub fn health(&self) -> &HealthAssessor {
        &self.health
    }

    pub fn concurrency(&self) -> &ConcurrencyController {
        &self.concurrency
    }

    /// Run a first health assessment, then start the background tasks:
    /// periodic health assessment, cache sweep and the optional config watcher
    pub async fn start(self: &Arc<Self>) {
        let config = self.config.get();
        let mut tasks = Vec::new();

        if config.health.enabled {
            Arc::clone(self).assess_health().await;

            let weak = Arc::downgrade(self);
            tasks.push(RepeatingTask::spawn("health", self.health.interval(), move || {
                let weak = Weak::clone(&weak);
                async move {
                    if let Some(service) = weak.upgrade() {
                        service.assess_health().await;
                    }
                }
            }));
        }

        if config.cache.enabled && config.cache.sweep_interval_secs > 0 {
            let weak = Arc::downgrade(self);
            let period = Duration::from_secs(config.cache.sweep_interval_secs);
            tasks.push(RepeatingTask::spawn("cache-sweep", period, move || {
                let weak = Weak::clone(&weak);
                async move {
                    if let Some(service) = weak.upgrade() {
                        service.cache.sweep();
                    }
                }
            }));
        }

        if config.watcher.enabled && self.config.path().is_some() {
            let weak = Arc::downgrade(self);
            let period = Duration::from_secs(config.watcher.poll_interval_secs.max(1));
            tasks.push(RepeatingTask::spawn("config-watcher", period, move || {
                let weak = Weak::clone(&weak);
                async move {
                    if let Some(service) = weak.upgrade() {
                        if let Err(e) = service.config.reload_if_changed() {
                            tracing::warn!(error = %e, "Config watcher reload failed");
                        }
                    }
                }
            }));
        }

        let started = tasks.len();
        self.tasks.lock().extend(tasks);
        tracing::info!(tasks = started, "Search service started");
    }

    /// Stop background tasks, detach from config updates and stop admitting
    pub async fn shutdown(&self) {
        if let Some(id) = self.listener.lock().take() {
            self.config.unsubscribe(id);
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.stop().await;
        }

        self.concurrency.close();
        tracing::info!("Search service stopped");
    }

    /// One assessment round. A failed round is logged and retried after the
    /// configured cool-down.
    pub async fn assess_health(self: Arc<Self>) {
        loop {
            let service = Arc::clone(&self);
            match tokio::spawn(async move { service.health.assess_all().await }).await {
                Ok(_) => return,
                Err(e) => {
                    let cooldown = self.health.cooldown();
                    tracing::error!(
                        error = %e,
                        cooldown_secs = cooldown.as_secs(),
                        "Health assessment failed, retrying after cool-down"
                    );
                    tokio::time::sleep(cooldown).await;
                }
            }
        }
    }

    fn apply_config(&self, config: &Config) -> Result<()> {
        let selector = StrategySelector::new(&config.strategy)?;
        *self.selector.write() = Arc::new(selector);

        self.cache.reconfigure(&config.cache);
        self.cache.clear();
        self.errors.reconfigure(&config.breaker, &config.retry);
        self.health.reconfigure(&config.health, &config.strategy);
        self.concurrency.resize(config.concurrency.max_in_flight);

        tracing::debug!("Applied new configuration to service components");
        Ok(())
    }

    /// Deep-merge a partial config; true if it was committed
    pub fn update_config(&self, partial: serde_json::Value) -> bool {
        match self.config.update_json(partial) {
            Ok(version) => {
                tracing::info!(version, "Configuration updated");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Configuration update rejected");
                false
            }
        }
    }

    /// Re-read the config file; true if a new snapshot was committed
    pub fn reload_config(&self) -> bool {
        match self.config.load() {
            Ok(version) => {
                tracing::info!(version, "Configuration reloaded");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Configuration reload failed");
                false
            }
        }
    }

    pub fn get_system_status(&self) -> SystemStatus {
        SystemStatus {
            config_version: self.config.version(),
            started_at: self.started_at,
            engines: self.adapters.iter().map(|a| a.name().to_string()).collect(),
            health: self.health.snapshot(),
            cache_stats: self.cache.stats(),
            breaker_states: self.breakers().snapshot(),
            concurrency_stats: self.concurrency.stats(),
            in_flight_keys: self.flights.in_flight(),
        }
    }

    fn cache_key(query: &str, request: &SearchRequest, fusion: &FusionConfig) -> CacheKey {
        let mut scope = request.knowledge_base_ids.clone();
        scope.sort();
        scope.dedup();

        let mut params = vec![
            ("top_k", fusion.top_k.to_string()),
            ("strategy", fusion.strategy.as_str().to_string()),
            ("vector_weight", format!("{:.4}", fusion.vector_weight)),
            ("keyword_weight", format!("{:.4}", fusion.keyword_weight)),
            ("rrf_k", format!("{:.2}", fusion.rrf_k)),
            ("cascade_vector_ratio", format!("{:.4}", fusion.cascade_vector_ratio)),
            ("knowledge_bases", scope.join(",")),
        ];
        if let Some(vector) = &request.vector {
            let mut hasher = blake3::Hasher::new();
            for value in vector {
                hasher.update(&value.to_le_bytes());
            }
            params.push(("vector", hasher.finalize().to_hex().to_string()));
        }
        CacheKey::new(query, params)
    }

    /// Run a search. Engine failures degrade the response; only request
    /// validation and the overall timeout produce an `Err`.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();
        request.validate()?;
        if self.concurrency.is_closed() {
            return Err(MeldError::AdmissionClosed);
        }

        let config = self.config.get();
        let fusion = request.resolve_fusion(&config.fusion.fusion_config())?;
        let query = if config.orchestrator.normalize_query {
            normalize_query(&request.query)
        } else {
            request.query.clone()
        };
        let key = Self::cache_key(&query, &request, &fusion);
        tracing::trace!(query = %query, key = %key, "Search request");

        if let Some(mut cached) = self.cache.get::<SearchResponse>(&key) {
            tracing::debug!(key = %key, "Cache hit");
            cached.diagnostics.cache_hit = true;
            cached.diagnostics.deduplicated = false;
            cached.elapsed_ms = elapsed_ms(started);
            return Ok(cached);
        }

        self.run_flight(&query, &request, &fusion, &key, &config, started)
            .await
    }

    /// Execute behind single-flight and the request deadline. The leader
    /// re-reads the cache first: a run that finished between this caller's
    /// miss and its arrival here has already stored the answer.
    async fn run_flight(
        &self,
        query: &str,
        request: &SearchRequest,
        fusion: &FusionConfig,
        key: &CacheKey,
        config: &Config,
        started: Instant,
    ) -> Result<SearchResponse> {
        let timeout_ms = config.orchestrator.request_timeout_ms;
        let work = || async {
            if let Some(mut cached) = self.cache.recheck::<SearchResponse>(key) {
                tracing::debug!(key = %key, "Cache filled before flight started");
                cached.diagnostics.cache_hit = true;
                return Ok(cached);
            }

            let run = self.execute(query, request, fusion, key, config);
            match tokio::time::timeout(Duration::from_millis(timeout_ms), run).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(e)) => Err(FlightError::Failed(e.to_string())),
                Err(_) => {
                    tracing::warn!(timeout_ms, "Search abandoned at deadline");
                    Err(FlightError::Timeout { timeout_ms })
                }
            }
        };

        let (outcome, shared) = if config.orchestrator.dedup_enabled {
            self.flights.run(key.as_str(), work).await
        } else {
            (work().await, false)
        };

        match outcome {
            Ok(mut response) => {
                response.diagnostics.deduplicated = shared;
                response.elapsed_ms = elapsed_ms(started);
                Ok(response)
            }
            Err(FlightError::Timeout { timeout_ms }) => Err(MeldError::RequestTimeout { timeout_ms }),
            Err(e) => Err(MeldError::Other(anyhow::anyhow!("search failed: {}", e))),
        }
    }

    async fn execute(
        &self,
        query: &str,
        request: &SearchRequest,
        fusion: &FusionConfig,
        key: &CacheKey,
        config: &Config,
    ) -> Result<SearchResponse> {
        let started = Instant::now();
        let _slot = self.concurrency.acquire().await?;

        let selector = Arc::clone(&*self.selector.read());
        let decision = selector.select(query, &self.health.snapshot(), fusion);

        let mut fusion = fusion.clone();
        let weights_overridden = request.vector_weight.is_some() || request.keyword_weight.is_some();
        if decision.strategy == SearchStrategy::Hybrid && !weights_overridden {
            fusion.vector_weight = decision.vector_weight;
            fusion.keyword_weight = decision.keyword_weight;
        }

        let selected: Vec<&Arc<dyn EngineAdapter>> = self
            .adapters
            .iter()
            .filter(|a| decision.engines.iter().any(|name| name == a.name()))
            .collect();
        tracing::debug!(
            strategy = %decision.strategy,
            engines = ?decision.engines,
            reason = %decision.reason,
            "Selected search strategy"
        );

        let mut engine_query = EngineQuery {
            text: Some(query.to_string()).filter(|t| !t.is_empty()),
            vector: request.vector.clone(),
            knowledge_base_ids: request.knowledge_base_ids.clone(),
            top_k: fusion
                .top_k
                .saturating_mul(config.fusion.candidate_multiplier.max(1)),
        };

        let mut embed_error = None;
        let wants_vector = selected.iter().any(|a| a.kind() == EngineKind::Vector);
        if wants_vector && engine_query.vector.is_none() && !query.is_empty() {
            if let Some(embedder) = &self.embedder {
                match embedder.embed(query).await {
                    Ok(vector) => engine_query.vector = Some(vector),
                    Err(e) => {
                        tracing::warn!(model = embedder.model_name(), error = %e, "Query embedding failed");
                        embed_error = Some(e.to_string());
                    }
                }
            }
        }

        let engine_query = &engine_query;
        let embed_error = embed_error.as_deref();
        let calls = selected.iter().map(|adapter| async move {
            let call_started = Instant::now();
            let outcome = match (adapter.kind(), embed_error) {
                (EngineKind::Vector, Some(reason)) => Err(MeldError::Embedding(reason.to_string())),
                _ => {
                    self.errors
                        .execute(adapter.name(), || adapter.search(engine_query))
                        .await
                }
            };
            (*adapter, outcome, elapsed_ms(call_started))
        });
        let outcomes = join_all(calls).await;

        let mut reports = Vec::with_capacity(outcomes.len());
        let mut lists = Vec::with_capacity(outcomes.len());
        for (adapter, outcome, latency_ms) in outcomes {
            let breaker = self.errors.breakers().state(adapter.name());
            match outcome {
                Ok(hits) => {
                    reports.push(EngineReport {
                        engine: adapter.name().to_string(),
                        kind: adapter.kind(),
                        hits: hits.len(),
                        latency_ms,
                        breaker,
                        error: None,
                    });
                    lists.push(EngineResults::new(adapter.name(), adapter.kind(), hits));
                }
                Err(e) => {
                    reports.push(EngineReport {
                        engine: adapter.name().to_string(),
                        kind: adapter.kind(),
                        hits: 0,
                        latency_ms,
                        breaker,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let available = reports.iter().any(|r| r.succeeded());
        let reason = if reports.is_empty() {
            Some("no engines configured".to_string())
        } else if !available {
            let failures: Vec<String> = reports
                .iter()
                .map(|r| format!("{}: {}", r.engine, r.error.as_deref().unwrap_or("unknown")))
                .collect();
            Some(format!("search unavailable, all engines failed ({})", failures.join("; ")))
        } else {
            None
        };
        if let Some(reason) = &reason {
            tracing::warn!(reason = %reason, "Search unavailable");
        }

        let output = FusionEngine::new(fusion.clone()).fuse(lists);
        let mut results = output.items;
        let mut reranked = false;
        let mut rerank_error = None;

        if config.orchestrator.rerank_enabled && !results.is_empty() {
            if let Some(reranker) = &self.reranker {
                let outcome = apply_rerank(
                    reranker.as_ref(),
                    query,
                    results,
                    config.orchestrator.rerank_candidates,
                )
                .await;
                results = outcome.items;
                reranked = outcome.applied;
                rerank_error = outcome.diagnostic;
            }
        }

        let response = SearchResponse {
            results,
            strategy_used: decision.strategy,
            engine_used: engine_used(&reports),
            elapsed_ms: elapsed_ms(started),
            diagnostics: Diagnostics {
                available: available && reason.is_none(),
                reason,
                cache_hit: false,
                deduplicated: false,
                strategy_reason: decision.reason,
                fusion: fusion.strategy,
                vector_weight: fusion.vector_weight,
                keyword_weight: fusion.keyword_weight,
                engines: reports,
                dropped: output.dropped,
                reranked,
                rerank_error,
            },
        };

        // degraded responses are not cached so recovery shows up immediately
        let complete = response.diagnostics.engines.iter().all(|r| r.succeeded());
        if response.is_available() && complete {
            self.cache.put(key, &response);
        }

        tracing::info!(
            strategy = %response.strategy_used,
            engine_used = %response.engine_used,
            results = response.results.len(),
            elapsed_ms = response.elapsed_ms,
            "Search completed"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineHit;
    use crate::retrieval::LexicalReranker;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        kind: EngineKind,
        hits: Vec<EngineHit>,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(name: &'static str, kind: EngineKind, hits: Vec<EngineHit>) -> Arc<Self> {
            Arc::new(Self {
                name,
                kind,
                hits,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl EngineAdapter for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> EngineKind {
            self.kind
        }

        async fn search(&self, _query: &EngineQuery) -> Result<Vec<EngineHit>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.hits.clone())
        }
    }

    fn manager() -> Arc<ConfigManager> {
        let mut config = Config::default();
        config.health.enabled = false;
        Arc::new(ConfigManager::new(config).unwrap())
    }

    fn service(text: Arc<Fixed>, vector: Arc<Fixed>) -> Arc<MeldService> {
        MeldService::builder(manager())
            .adapter(text)
            .adapter(vector)
            .build()
            .unwrap()
    }

    fn text_hits() -> Vec<EngineHit> {
        vec![EngineHit::new("doc2", "two", 0.8), EngineHit::new("doc3", "three", 0.6)]
    }

    fn vector_hits() -> Vec<EngineHit> {
        vec![EngineHit::new("doc1", "one", 0.9), EngineHit::new("doc2", "two", 0.5)]
    }

    #[tokio::test]
    async fn test_unassessed_engines_use_fallback_fusion() {
        let service = service(
            Fixed::new("text", EngineKind::Text, text_hits()),
            Fixed::new("vector", EngineKind::Vector, vector_hits()),
        );
        let response = service.search(SearchRequest::new("doc")).await.unwrap();

        assert_eq!(response.strategy_used, SearchStrategy::Fallback);
        assert_eq!(response.engine_used, "text+vector");
        let ids: Vec<_> = response.results.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(ids, vec!["doc1", "doc2", "doc3"]);
        assert!(response.diagnostics.available);
    }

    #[tokio::test]
    async fn test_second_search_is_cached() {
        let text = Fixed::new("text", EngineKind::Text, text_hits());
        let service = service(Arc::clone(&text), Fixed::new("vector", EngineKind::Vector, vector_hits()));

        service.search(SearchRequest::new("doc  ")).await.unwrap();
        let again = service.search(SearchRequest::new("doc")).await.unwrap();

        assert!(again.diagnostics.cache_hit);
        assert_eq!(text.calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.get_system_status().cache_stats.hits, 1);
    }

    #[tokio::test]
    async fn test_late_leader_reuses_cached_response() {
        let text = Fixed::new("text", EngineKind::Text, text_hits());
        let service = service(Arc::clone(&text), Fixed::new("vector", EngineKind::Vector, vector_hits()));
        let request = SearchRequest::new("doc");
        let first = service.search(request.clone()).await.unwrap();

        // a caller that missed the cache just before the first run stored its result
        let config = service.config().get();
        let fusion = request.resolve_fusion(&config.fusion.fusion_config()).unwrap();
        let key = MeldService::cache_key("doc", &request, &fusion);
        let late = service
            .run_flight("doc", &request, &fusion, &key, &config, Instant::now())
            .await
            .unwrap();

        assert_eq!(text.calls.load(Ordering::SeqCst), 1);
        assert!(late.diagnostics.cache_hit);
        assert_eq!(late.results, first.results);
        assert_eq!(service.get_system_status().in_flight_keys, 0);
    }

    #[tokio::test]
    async fn test_invalid_request_rejected() {
        let service = service(
            Fixed::new("text", EngineKind::Text, text_hits()),
            Fixed::new("vector", EngineKind::Vector, vector_hits()),
        );
        let result = service
            .search(SearchRequest::new("doc").with_weights(0.9, 0.9))
            .await;
        assert!(matches!(result, Err(MeldError::InvalidRequest(_))));
        assert!(service.search(SearchRequest::new("   ")).await.is_err());
    }

    #[tokio::test]
    async fn test_config_update_clears_cache_and_bumps_version() {
        let service = service(
            Fixed::new("text", EngineKind::Text, text_hits()),
            Fixed::new("vector", EngineKind::Vector, vector_hits()),
        );
        service.search(SearchRequest::new("doc")).await.unwrap();
        assert_eq!(service.cache().len(), 1);

        assert!(service.update_config(serde_json::json!({"fusion": {"top_k": 2}})));
        assert_eq!(service.cache().len(), 0);
        assert_eq!(service.get_system_status().config_version, 2);

        assert!(!service.update_config(serde_json::json!({"fusion": {"vector_weight": 0.9}})));
        assert_eq!(service.get_system_status().config_version, 2);
    }

    #[tokio::test]
    async fn test_reranker_reorders_results() {
        let text = Fixed::new(
            "text",
            EngineKind::Text,
            vec![
                EngineHit::new("a", "unrelated words", 0.9),
                EngineHit::new("b", "breaker recovery timeout", 0.5),
            ],
        );
        let service = MeldService::builder(manager())
            .adapter(text)
            .reranker(Arc::new(LexicalReranker))
            .build()
            .unwrap();

        let response = service
            .search(SearchRequest::new("breaker recovery"))
            .await
            .unwrap();
        assert!(response.diagnostics.reranked);
        assert_eq!(response.results[0].key, "b");
    }

    #[tokio::test]
    async fn test_duplicate_engine_names_rejected() {
        let result = MeldService::builder(manager())
            .adapter(Fixed::new("text", EngineKind::Text, Vec::new()))
            .adapter(Fixed::new("text", EngineKind::Vector, Vec::new()))
            .build();
        assert!(result.is_err());
    }
}

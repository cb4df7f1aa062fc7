//! Service wired from a config file and a corpus, using the reference engines

use meld::cache::CachePolicyKind;
use meld::config::{Config, ConfigManager};
use meld::engine::{build_reference_engines, Corpus, EmbeddingProvider, HashingEmbedder};
use meld::orchestrator::MeldService;
use meld::retrieval::{FusionStrategy, LexicalReranker, SearchRequest};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const CORPUS: &str = r#"[
    {"id": "vpn", "knowledge_base_id": "it", "content": "How to configure the VPN client and reset your VPN password"},
    {"id": "printer", "knowledge_base_id": "it", "content": "Adding a network printer on the third floor"},
    {"id": "leave", "knowledge_base_id": "hr", "content": "Requesting annual leave and sick days"},
    {"id": "expenses", "knowledge_base_id": "finance", "content": "Submitting travel expenses for reimbursement"}
]"#;

fn write_config(path: &Path, config: &Config) {
    std::fs::write(path, toml::to_string_pretty(config).unwrap()).unwrap();
}

async fn service_from(dir: &TempDir, config: Config, profile: Option<String>) -> Arc<MeldService> {
    let config_path = dir.path().join("config.toml");
    write_config(&config_path, &config);

    let manager = ConfigManager::from_file(&config_path, profile).unwrap();
    let snapshot = manager.get();
    let corpus = Corpus::from_json(CORPUS).unwrap();
    let embedder = Arc::new(HashingEmbedder::new(snapshot.engines.embedding_dimension).unwrap());
    let provider: Arc<dyn EmbeddingProvider> = embedder;
    let adapters = build_reference_engines(&snapshot.engines, &corpus, Arc::clone(&provider))
        .await
        .unwrap();

    MeldService::builder(Arc::new(manager))
        .adapters(adapters)
        .embedder(provider)
        .reranker(Arc::new(LexicalReranker))
        .build()
        .unwrap()
}

fn base_config() -> Config {
    let mut config = Config::default();
    config.health.enabled = false;
    config
}

#[tokio::test]
async fn test_reference_engines_answer_end_to_end() {
    let dir = TempDir::new().unwrap();
    let service = service_from(&dir, base_config(), None).await;

    let response = service
        .search(SearchRequest::new("reset VPN password"))
        .await
        .unwrap();

    assert!(response.is_available());
    assert_eq!(response.results[0].key, "vpn");
    assert_eq!(response.engine_used, "text+vector");
}

#[tokio::test]
async fn test_knowledge_base_scope_filters_results() {
    let dir = TempDir::new().unwrap();
    let service = service_from(&dir, base_config(), None).await;

    let response = service
        .search(SearchRequest::new("printer").with_knowledge_bases(vec!["hr".to_string()]))
        .await
        .unwrap();

    assert!(response
        .results
        .iter()
        .all(|r| r.knowledge_base_id.as_deref() == Some("hr")));
}

#[tokio::test]
async fn test_health_assessment_marks_engines() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.health.canary_queries = vec!["vpn".to_string(), "printer".to_string()];
    let service = service_from(&dir, config, None).await;

    Arc::clone(&service).assess_health().await;
    let status = service.get_system_status();

    assert_eq!(status.health.len(), 2);
    for engine in &status.health {
        assert_eq!(engine.probes, 2);
        assert_eq!(engine.success_rate, 1.0);
        assert!(engine.status.is_reachable());
    }
}

#[tokio::test]
async fn test_profile_applies_on_load() {
    let dir = TempDir::new().unwrap();
    let service = service_from(&dir, base_config(), Some("fast".to_string())).await;

    let config = service.config().get();
    assert_eq!(config.fusion.strategy, FusionStrategy::Rrf);
    assert!(!config.orchestrator.rerank_enabled);
}

#[tokio::test]
async fn test_reload_applies_edited_file() {
    let dir = TempDir::new().unwrap();
    let service = service_from(&dir, base_config(), None).await;
    service.search(SearchRequest::new("vpn")).await.unwrap();
    assert_eq!(service.cache().len(), 1);

    let mut edited = base_config();
    edited.cache.policy = CachePolicyKind::Lfu;
    edited.fusion.top_k = 1;
    write_config(&dir.path().join("config.toml"), &edited);

    assert!(service.reload_config());
    assert_eq!(service.get_system_status().config_version, 2);
    assert_eq!(service.cache().stats().policy, CachePolicyKind::Lfu);
    assert!(service.cache().is_empty());

    let response = service.search(SearchRequest::new("vpn")).await.unwrap();
    assert_eq!(response.results.len(), 1);
    assert!(!response.diagnostics.cache_hit);
}

#[tokio::test]
async fn test_broken_file_keeps_running_config() {
    let dir = TempDir::new().unwrap();
    let service = service_from(&dir, base_config(), None).await;

    std::fs::write(
        dir.path().join("config.toml"),
        "[fusion]\nvector_weight = 0.9\nkeyword_weight = 0.9\n",
    )
    .unwrap();

    assert!(!service.reload_config());
    assert_eq!(service.get_system_status().config_version, 1);
    assert_eq!(service.config().get().fusion.vector_weight, 0.7);
    assert!(service.search(SearchRequest::new("vpn")).await.is_ok());
}

//! Configuration management for Meld
//!
//! Layered configuration: a TOML file, `MELD_SECTION__KEY` environment
//! overrides and optional named profiles. Every snapshot handed out by the
//! [`ConfigManager`] has passed [`ConfigValidator`].

use crate::cache::CachePolicyKind;
use crate::error::{MeldError, Result};
use crate::retrieval::{FusionConfig, FusionStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod manager;
mod validator;

pub use manager::{ConfigListener, ConfigManager};
pub use validator::ConfigValidator;

/// Schema version understood by this build
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Prefix for environment overrides (`MELD_FUSION__VECTOR_WEIGHT=0.6`)
pub const ENV_PREFIX: &str = "MELD_";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub fusion: FusionSettings,
    pub strategy: StrategyConfig,
    pub health: HealthConfig,
    pub cache: CacheConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
    pub concurrency: ConcurrencyConfig,
    pub orchestrator: OrchestratorConfig,
    pub watcher: WatcherConfig,
    pub engines: EnginesConfig,
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            created_at: current_timestamp(),
            last_modified: current_timestamp(),
        }
    }
}

/// Default fusion behaviour for hybrid queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    pub strategy: FusionStrategy,
    pub vector_weight: f32,
    pub keyword_weight: f32,
    pub rrf_k: f32,
    /// Share of cascade's exclusive slots given to vector-only results
    pub cascade_vector_ratio: f32,
    pub top_k: usize,
    /// Each engine is asked for `top_k * candidate_multiplier` hits
    pub candidate_multiplier: usize,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            strategy: FusionStrategy::WeightedSum,
            vector_weight: 0.7,
            keyword_weight: 0.3,
            rrf_k: 60.0,
            cascade_vector_ratio: 0.5,
            top_k: 10,
            candidate_multiplier: 2,
        }
    }
}

impl FusionSettings {
    pub fn fusion_config(&self) -> FusionConfig {
        FusionConfig {
            strategy: self.strategy,
            vector_weight: self.vector_weight,
            keyword_weight: self.keyword_weight,
            rrf_k: self.rrf_k,
            cascade_vector_ratio: self.cascade_vector_ratio,
            top_k: self.top_k,
        }
    }
}

/// Strategy selection thresholds and query classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub hybrid_threshold: f64,
    pub degraded_threshold: f64,
    pub unavailable_threshold: f64,
    /// Queries with at least this many words are treated as semantic
    pub long_query_words: usize,
    /// Regex patterns that flag a query as keyword-oriented
    pub keyword_patterns: Vec<String>,
    /// Regex patterns that flag a query as semantic
    pub semantic_patterns: Vec<String>,
    /// Rebalance hybrid weights by relative engine health
    pub adaptive_weights: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            hybrid_threshold: 0.7,
            degraded_threshold: 0.4,
            unavailable_threshold: 0.1,
            long_query_words: 8,
            keyword_patterns: vec![
                r#""[^"]+""#.to_string(),
                r"\b(AND|OR|NOT)\b".to_string(),
                r"^[\w.-]+:\S+".to_string(),
                r"\b[A-Z]{2,}-\d+\b".to_string(),
                r"\b\w+(_\w+)+\b".to_string(),
            ],
            semantic_patterns: vec![
                r"(?i)^(how|why|what|when|where|which|who|explain|describe)\b".to_string(),
                r"\?\s*$".to_string(),
            ],
            adaptive_weights: true,
        }
    }
}

/// Canary-based health assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub canary_queries: Vec<String>,
    pub probe_timeout_ms: u64,
    pub retry_cooldown_secs: u64,
    /// Latency at or above this maps to a latency score of 0
    pub latency_ceiling_ms: u64,
    /// Throughput (probes/sec) at or above this maps to a score of 1
    pub throughput_ceiling: f64,
    pub latency_weight: f64,
    pub success_weight: f64,
    pub throughput_weight: f64,
    pub accuracy_weight: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            canary_queries: vec![
                "health check".to_string(),
                "getting started guide".to_string(),
                "configuration reference".to_string(),
            ],
            probe_timeout_ms: 2_000,
            retry_cooldown_secs: 30,
            latency_ceiling_ms: 2_000,
            throughput_ceiling: 20.0,
            latency_weight: 0.3,
            success_weight: 0.3,
            throughput_weight: 0.2,
            accuracy_weight: 0.2,
        }
    }
}

/// Result cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub policy: CachePolicyKind,
    pub capacity: usize,
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub compress: bool,
    /// Payloads smaller than this are stored uncompressed
    pub compression_threshold: usize,
    pub compression_level: i32,
    /// LRU tier size for the hybrid policy
    pub hot_capacity: usize,
    /// TTL-tier hits needed before an entry moves to the LRU tier
    pub promotion_hits: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: CachePolicyKind::Lru,
            capacity: 1_000,
            ttl_secs: 600,
            sweep_interval_secs: 60,
            compress: true,
            compression_threshold: 1_024,
            compression_level: 3,
            hot_capacity: 100,
            promotion_hits: 2,
        }
    }
}

/// Per-engine circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub success_threshold: u32,
    pub half_open_max_calls: u32,
    pub call_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            success_threshold: 2,
            half_open_max_calls: 1,
            call_timeout_ms: 5_000,
        }
    }
}

/// Retry with exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Fraction of each delay randomised, 0.0..=1.0
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_in_flight: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { max_in_flight: 32 }
    }
}

/// End-to-end request handling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub request_timeout_ms: u64,
    pub normalize_query: bool,
    pub dedup_enabled: bool,
    pub rerank_enabled: bool,
    pub rerank_candidates: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            normalize_query: true,
            dedup_enabled: true,
            rerank_enabled: true,
            rerank_candidates: 50,
        }
    }
}

/// Config file watcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval_secs: 5,
        }
    }
}

/// Reference engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnginesConfig {
    /// JSON corpus indexed by the reference engines
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corpus_path: Option<PathBuf>,
    pub text_enabled: bool,
    pub vector_enabled: bool,
    pub embedding_dimension: usize,
    /// HNSW M parameter (number of connections per layer)
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
}

impl Default for EnginesConfig {
    fn default() -> Self {
        Self {
            corpus_path: None,
            text_enabled: true,
            vector_enabled: true,
            embedding_dimension: 256,
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 64,
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fusion_strategy: Option<FusionStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_policy: Option<CachePolicyKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,
}

impl Config {
    /// Load configuration from a file, apply env overrides, then validate
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::load_unvalidated(path)?;
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Parse a file without applying overrides or validation
    pub fn load_unvalidated(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MeldError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| MeldError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MeldError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| MeldError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| MeldError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(strategy) = overrides.fusion_strategy {
            self.fusion.strategy = strategy;
        }
        if let Some(top_k) = overrides.top_k {
            self.fusion.top_k = top_k;
        }
        if let Some(policy) = overrides.cache_policy {
            self.cache.policy = policy;
        }
        if let Some(enabled) = overrides.rerank_enabled {
            self.orchestrator.rerank_enabled = enabled;
        }
        if let Some(max) = overrides.max_in_flight {
            self.concurrency.max_in_flight = max;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: MELD_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        let vars: Vec<(String, String)> = std::env::vars()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .collect();
        self.apply_overrides(vars);
    }

    /// Apply `SECTION__KEY=value` pairs (prefixed with `MELD_`)
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(config_key) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            if let Err(e) = self.set_value_from_env(config_key, &value) {
                tracing::warn!("Failed to apply env override {}: {}", key, e);
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        let segments: Vec<String> = path.split("__").map(|s| s.to_lowercase()).collect();
        if segments.len() != 2 || segments.iter().any(|s| s.is_empty()) {
            tracing::debug!("Unknown env config key: {}", path);
            return Ok(());
        }

        let mut patch = toml::Table::new();
        let mut section = toml::Table::new();
        section.insert(segments[1].clone(), parse_scalar(value));
        patch.insert(segments[0].clone(), toml::Value::Table(section));

        *self = self.merged_with(toml::Value::Table(patch), path)?;
        Ok(())
    }

    /// Deep-merge a partial table into a copy of this configuration
    pub fn merged_with(&self, patch: toml::Value, context: &str) -> Result<Self> {
        let mut base = toml::Value::try_from(self)?;
        deep_merge(&mut base, patch);
        base.try_into().map_err(|e: toml::de::Error| MeldError::InvalidConfigValue {
            path: context.to_string(),
            message: e.to_string(),
        })
    }

    /// Copy of this configuration with one dotted key (`cache.capacity`) set.
    /// The raw value is typed as bool, integer, float or string, in that order.
    pub fn with_value(&self, key: &str, raw: &str) -> Result<Self> {
        let segments: Vec<&str> = key.split('.').collect();
        if segments.len() < 2 || segments.iter().any(|s| s.is_empty()) {
            return Err(MeldError::InvalidConfigValue {
                path: key.to_string(),
                message: "expected a dotted key such as cache.capacity".to_string(),
            });
        }

        let mut patch = parse_scalar(raw);
        for segment in segments.iter().rev() {
            let mut table = toml::Table::new();
            table.insert(segment.to_string(), patch);
            patch = toml::Value::Table(table);
        }

        let updated = self.merged_with(patch, key)?;
        ConfigValidator::validate(&updated)?;
        Ok(updated)
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| MeldError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("meld").join("config.toml"))
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(
            "fast".to_string(),
            ProfileOverrides {
                fusion_strategy: Some(FusionStrategy::Rrf),
                rerank_enabled: Some(false),
                ..Default::default()
            },
        );
        profiles.insert(
            "accuracy".to_string(),
            ProfileOverrides {
                fusion_strategy: Some(FusionStrategy::Cascade),
                top_k: Some(20),
                rerank_enabled: Some(true),
                ..Default::default()
            },
        );

        Self {
            meta: MetaConfig::default(),
            fusion: FusionSettings::default(),
            strategy: StrategyConfig::default(),
            health: HealthConfig::default(),
            cache: CacheConfig::default(),
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            watcher: WatcherConfig::default(),
            engines: EnginesConfig::default(),
            profiles,
        }
    }
}

/// Recursively merge `patch` into `base`. Tables merge key by key; any other
/// value in `patch` replaces the one in `base`.
pub fn deep_merge(base: &mut toml::Value, patch: toml::Value) {
    match (base, patch) {
        (toml::Value::Table(base_table), toml::Value::Table(patch_table)) => {
            for (key, value) in patch_table {
                match base_table.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn parse_scalar(value: &str) -> toml::Value {
    if let Ok(b) = value.parse::<bool>() {
        toml::Value::Boolean(b)
    } else if let Ok(i) = value.parse::<i64>() {
        toml::Value::Integer(i)
    } else if let Ok(f) = value.parse::<f64>() {
        toml::Value::Float(f)
    } else {
        toml::Value::String(value.to_string())
    }
}

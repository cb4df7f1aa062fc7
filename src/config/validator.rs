use crate::cache::CachePolicyKind;
use crate::config::{Config, SCHEMA_VERSION};
use crate::error::{MeldError, Result, ValidationError};
use crate::retrieval::WEIGHT_SUM_TOLERANCE;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every violation
    pub fn validate(config: &Config) -> Result<()> {
        let errors = Self::collect(config);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(MeldError::ConfigValidation { errors })
        }
    }

    /// Return all violations without failing
    pub fn collect(config: &Config) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_fusion(config, &mut errors);
        Self::validate_strategy(config, &mut errors);
        Self::validate_health(config, &mut errors);
        Self::validate_cache(config, &mut errors);
        Self::validate_resilience(config, &mut errors);
        Self::validate_runtime(config, &mut errors);

        errors
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_fusion(config: &Config, errors: &mut Vec<ValidationError>) {
        let fusion = &config.fusion;

        for (path, weight) in [
            ("fusion.vector_weight", fusion.vector_weight),
            ("fusion.keyword_weight", fusion.keyword_weight),
        ] {
            if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
                errors.push(ValidationError::new(
                    path,
                    format!("Weight must be between 0.0 and 1.0, got {}", weight),
                ));
            }
        }

        let sum = fusion.vector_weight + fusion.keyword_weight;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            errors.push(ValidationError::new(
                "fusion",
                format!(
                    "vector_weight + keyword_weight must equal 1.0 (±{}), got {}",
                    WEIGHT_SUM_TOLERANCE, sum
                ),
            ));
        }

        if !fusion.rrf_k.is_finite() || fusion.rrf_k < 0.0 {
            errors.push(ValidationError::new(
                "fusion.rrf_k",
                format!("rrf_k must be a non-negative number, got {}", fusion.rrf_k),
            ));
        }

        if !(0.0..=1.0).contains(&fusion.cascade_vector_ratio) {
            errors.push(ValidationError::new(
                "fusion.cascade_vector_ratio",
                format!(
                    "Ratio must be between 0.0 and 1.0, got {}",
                    fusion.cascade_vector_ratio
                ),
            ));
        }

        if fusion.top_k == 0 {
            errors.push(ValidationError::new(
                "fusion.top_k",
                "top_k must be greater than 0",
            ));
        }

        if fusion.candidate_multiplier == 0 {
            errors.push(ValidationError::new(
                "fusion.candidate_multiplier",
                "candidate_multiplier must be greater than 0",
            ));
        }
    }

    fn validate_strategy(config: &Config, errors: &mut Vec<ValidationError>) {
        let strategy = &config.strategy;

        for (path, value) in [
            ("strategy.hybrid_threshold", strategy.hybrid_threshold),
            ("strategy.degraded_threshold", strategy.degraded_threshold),
            ("strategy.unavailable_threshold", strategy.unavailable_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(ValidationError::new(
                    path,
                    format!("Threshold must be between 0.0 and 1.0, got {}", value),
                ));
            }
        }

        if !(strategy.hybrid_threshold >= strategy.degraded_threshold
            && strategy.degraded_threshold >= strategy.unavailable_threshold)
        {
            errors.push(ValidationError::new(
                "strategy",
                "Thresholds must satisfy hybrid >= degraded >= unavailable",
            ));
        }

        if strategy.long_query_words == 0 {
            errors.push(ValidationError::new(
                "strategy.long_query_words",
                "long_query_words must be greater than 0",
            ));
        }

        for (section, patterns) in [
            ("strategy.keyword_patterns", &strategy.keyword_patterns),
            ("strategy.semantic_patterns", &strategy.semantic_patterns),
        ] {
            for pattern in patterns {
                if let Err(e) = regex::Regex::new(pattern) {
                    errors.push(ValidationError::new(
                        section,
                        format!("Invalid pattern '{}': {}", pattern, e),
                    ));
                }
            }
        }
    }

    fn validate_health(config: &Config, errors: &mut Vec<ValidationError>) {
        let health = &config.health;

        if health.interval_secs == 0 {
            errors.push(ValidationError::new(
                "health.interval_secs",
                "Interval must be greater than 0",
            ));
        }

        if health.probe_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "health.probe_timeout_ms",
                "Probe timeout must be greater than 0",
            ));
        }

        if health.enabled && health.canary_queries.iter().all(|q| q.trim().is_empty()) {
            errors.push(ValidationError::new(
                "health.canary_queries",
                "At least one non-empty canary query is required",
            ));
        }

        if health.latency_ceiling_ms == 0 {
            errors.push(ValidationError::new(
                "health.latency_ceiling_ms",
                "Latency ceiling must be greater than 0",
            ));
        }

        if health.throughput_ceiling <= 0.0 {
            errors.push(ValidationError::new(
                "health.throughput_ceiling",
                "Throughput ceiling must be greater than 0",
            ));
        }

        let weights = [
            health.latency_weight,
            health.success_weight,
            health.throughput_weight,
            health.accuracy_weight,
        ];
        if weights.iter().any(|w| *w < 0.0) {
            errors.push(ValidationError::new(
                "health",
                "Score weights must be non-negative",
            ));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > f64::from(WEIGHT_SUM_TOLERANCE) {
            errors.push(ValidationError::new(
                "health",
                format!("Score weights must sum to 1.0, got {}", sum),
            ));
        }
    }

    fn validate_cache(config: &Config, errors: &mut Vec<ValidationError>) {
        let cache = &config.cache;

        if cache.capacity == 0 {
            errors.push(ValidationError::new(
                "cache.capacity",
                "Capacity must be greater than 0",
            ));
        }

        if cache.ttl_secs == 0 {
            errors.push(ValidationError::new(
                "cache.ttl_secs",
                "TTL must be greater than 0",
            ));
        }

        if cache.sweep_interval_secs == 0 {
            errors.push(ValidationError::new(
                "cache.sweep_interval_secs",
                "Sweep interval must be greater than 0",
            ));
        }

        if cache.policy == CachePolicyKind::Hybrid
            && (cache.hot_capacity == 0 || cache.hot_capacity >= cache.capacity)
        {
            errors.push(ValidationError::new(
                "cache.hot_capacity",
                format!(
                    "Hot tier capacity must be between 1 and capacity ({}) exclusive, got {}",
                    cache.capacity, cache.hot_capacity
                ),
            ));
        }

        if cache.promotion_hits == 0 {
            errors.push(ValidationError::new(
                "cache.promotion_hits",
                "Promotion hits must be greater than 0",
            ));
        }

        if !(1..=22).contains(&cache.compression_level) {
            errors.push(ValidationError::new(
                "cache.compression_level",
                format!(
                    "zstd level must be between 1 and 22, got {}",
                    cache.compression_level
                ),
            ));
        }
    }

    fn validate_resilience(config: &Config, errors: &mut Vec<ValidationError>) {
        let breaker = &config.breaker;
        if breaker.failure_threshold == 0 {
            errors.push(ValidationError::new(
                "breaker.failure_threshold",
                "Failure threshold must be greater than 0",
            ));
        }
        if breaker.success_threshold == 0 {
            errors.push(ValidationError::new(
                "breaker.success_threshold",
                "Success threshold must be greater than 0",
            ));
        }
        if breaker.half_open_max_calls == 0 {
            errors.push(ValidationError::new(
                "breaker.half_open_max_calls",
                "At least one half-open trial call is required",
            ));
        }
        if breaker.call_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "breaker.call_timeout_ms",
                "Call timeout must be greater than 0",
            ));
        }

        let retry = &config.retry;
        if retry.max_attempts == 0 {
            errors.push(ValidationError::new(
                "retry.max_attempts",
                "At least one attempt is required",
            ));
        }
        if retry.multiplier < 1.0 {
            errors.push(ValidationError::new(
                "retry.multiplier",
                format!("Multiplier must be >= 1.0, got {}", retry.multiplier),
            ));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            errors.push(ValidationError::new(
                "retry.jitter",
                format!("Jitter must be between 0.0 and 1.0, got {}", retry.jitter),
            ));
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            errors.push(ValidationError::new(
                "retry",
                "base_delay_ms must be <= max_delay_ms",
            ));
        }
    }

    fn validate_runtime(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.concurrency.max_in_flight == 0 {
            errors.push(ValidationError::new(
                "concurrency.max_in_flight",
                "max_in_flight must be greater than 0",
            ));
        }

        if config.orchestrator.request_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "orchestrator.request_timeout_ms",
                "Request timeout must be greater than 0",
            ));
        }

        if config.watcher.enabled && config.watcher.poll_interval_secs == 0 {
            errors.push(ValidationError::new(
                "watcher.poll_interval_secs",
                "Poll interval must be greater than 0",
            ));
        }

        let engines = &config.engines;
        for (path, value) in [
            ("engines.embedding_dimension", engines.embedding_dimension),
            ("engines.hnsw_m", engines.hnsw_m),
            ("engines.hnsw_ef_construction", engines.hnsw_ef_construction),
            ("engines.hnsw_ef_search", engines.hnsw_ef_search),
        ] {
            if value == 0 {
                errors.push(ValidationError::new(path, "Value must be greater than 0"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(config: &Config) -> Vec<String> {
        ConfigValidator::collect(config)
            .into_iter()
            .map(|e| e.path)
            .collect()
    }

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut config = Config::default();
        config.fusion.vector_weight = 0.8;
        config.fusion.keyword_weight = 0.3;
        assert_eq!(paths(&config), vec!["fusion".to_string()]);
    }

    #[test]
    fn test_weight_sum_tolerance() {
        let mut config = Config::default();
        config.fusion.vector_weight = 0.705;
        config.fusion.keyword_weight = 0.3;
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut config = Config::default();
        config.fusion.vector_weight = 1.2;
        config.fusion.keyword_weight = -0.2;
        let found = paths(&config);
        assert!(found.contains(&"fusion.vector_weight".to_string()));
        assert!(found.contains(&"fusion.keyword_weight".to_string()));
    }

    #[test]
    fn test_threshold_ordering() {
        let mut config = Config::default();
        config.strategy.degraded_threshold = 0.9;
        assert!(paths(&config).contains(&"strategy".to_string()));
    }

    #[test]
    fn test_invalid_regex_pattern() {
        let mut config = Config::default();
        config.strategy.keyword_patterns.push("(unclosed".to_string());
        assert!(paths(&config).contains(&"strategy.keyword_patterns".to_string()));
    }

    #[test]
    fn test_hot_tier_larger_than_capacity() {
        let mut config = Config::default();
        config.cache.capacity = 10;
        config.cache.hot_capacity = 20;
        assert!(ConfigValidator::validate(&config).is_ok());

        config.cache.policy = CachePolicyKind::Hybrid;
        assert!(paths(&config).contains(&"cache.hot_capacity".to_string()));

        config.cache.hot_capacity = 10;
        assert!(paths(&config).contains(&"cache.hot_capacity".to_string()));
    }

    #[test]
    fn test_collects_multiple_errors() {
        let mut config = Config::default();
        config.fusion.top_k = 0;
        config.breaker.failure_threshold = 0;
        config.concurrency.max_in_flight = 0;
        assert_eq!(ConfigValidator::collect(&config).len(), 3);
    }
}

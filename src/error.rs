use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Meld
#[derive(Error, Debug)]
pub enum MeldError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors. The previously committed snapshot stays active.
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Breaker open or the adapter call failed
    #[error("Engine {engine} unavailable: {reason}")]
    AdapterUnavailable { engine: String, reason: String },

    /// Adapter call exceeded its timeout
    #[error("Engine {engine} timed out after {timeout_ms}ms")]
    AdapterTimeout { engine: String, timeout_ms: u64 },

    /// Malformed per-engine result list
    #[error("Malformed results from {engine}: {reason}")]
    FusionInput { engine: String, reason: String },

    /// Cache payload could not be encoded or decoded
    #[error("Cache error: {0}")]
    Cache(String),

    /// Request abandoned after its overall deadline
    #[error("Request timed out after {timeout_ms}ms")]
    RequestTimeout { timeout_ms: u64 },

    /// Request rejected before dispatch
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The service is shutting down and admits no new requests
    #[error("Admission closed: service is shutting down")]
    AdmissionClosed,

    /// Embedding provider failure
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Reranker failure
    #[error("Rerank error: {0}")]
    Rerank(String),

    /// Reference engine index failure
    #[error("Index error: {0}")]
    Index(String),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Result type for Meld operations
pub type Result<T> = std::result::Result<T, MeldError>;

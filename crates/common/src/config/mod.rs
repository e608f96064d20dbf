//! Configuration management for CiteForge
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values

use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Corpus (chunk store) configuration
    #[serde(default)]
    pub corpus: CorpusConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector index configuration
    #[serde(default)]
    pub vector_index: VectorIndexConfig,

    /// Retrieval and fusion tunables
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Context pack budgets
    #[serde(default)]
    pub context: ContextConfig,

    /// Generator (LLM) configuration
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorpusConfig {
    /// Path of the JSON Lines chunk store
    #[serde(default = "default_chunks_path")]
    pub chunks_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, hashing
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Batch size for embedding requests
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorIndexConfig {
    /// Backend: qdrant, memory
    #[serde(default = "default_vector_backend")]
    pub backend: String,

    /// Qdrant gRPC endpoint
    #[serde(default = "default_qdrant_url")]
    pub url: String,

    /// Qdrant API key (optional)
    pub api_key: Option<String>,

    /// Collection name
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Request timeout in seconds
    #[serde(default = "default_vector_timeout")]
    pub timeout_secs: u64,

    /// Points per upsert request
    #[serde(default = "default_upsert_batch")]
    pub upsert_batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Default mode when a request does not name one: bm25, vector, hybrid
    #[serde(default = "default_mode")]
    pub default_mode: String,

    /// Final number of fused chunks handed to the packer
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Depth of each ranked list before fusion
    #[serde(default = "default_candidate_depth")]
    pub candidate_depth: usize,

    /// RRF smoothing constant
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,

    /// RRF weight of the keyword list
    #[serde(default = "default_weight")]
    pub keyword_weight: f64,

    /// RRF weight of the vector list
    #[serde(default = "default_weight")]
    pub vector_weight: f64,

    /// BM25 term frequency saturation
    #[serde(default = "default_bm25_k1")]
    pub bm25_k1: f64,

    /// BM25 length normalization
    #[serde(default = "default_bm25_b")]
    pub bm25_b: f64,

    /// Timeout for the vector ranker (embed + search) in milliseconds
    #[serde(default = "default_retrieval_timeout")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContextConfig {
    /// Total character budget of the rendered pack
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    /// Character cap per chunk snippet
    #[serde(default = "default_per_chunk_chars")]
    pub per_chunk_chars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneratorConfig {
    /// Provider: openai, scripted
    #[serde(default = "default_generator_provider")]
    pub provider: String,

    /// Chat completions endpoint
    #[serde(default = "default_generator_endpoint")]
    pub endpoint: String,

    /// API key
    pub api_key: Option<String>,

    /// Model name
    #[serde(default = "default_generator_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Timeout for the whole generation in seconds
    #[serde(default = "default_generator_timeout")]
    pub timeout_secs: u64,

    /// Number of prior turns passed to the generator
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 90 }
fn default_chunks_path() -> PathBuf { PathBuf::from("data/processed/chunks.jsonl") }
fn default_embedding_provider() -> String { "hashing".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_batch_size() -> usize { 64 }
fn default_vector_backend() -> String { "qdrant".to_string() }
fn default_qdrant_url() -> String { "http://localhost:6334".to_string() }
fn default_collection() -> String { "citeforge_chunks".to_string() }
fn default_vector_timeout() -> u64 { 10 }
fn default_upsert_batch() -> usize { 256 }
fn default_mode() -> String { "hybrid".to_string() }
fn default_top_k() -> usize { 8 }
fn default_candidate_depth() -> usize { 20 }
fn default_rrf_k() -> f64 { 60.0 }
fn default_weight() -> f64 { 1.0 }
fn default_bm25_k1() -> f64 { 1.5 }
fn default_bm25_b() -> f64 { 0.75 }
fn default_retrieval_timeout() -> u64 { 5_000 }
fn default_max_chars() -> usize { 24_000 }
fn default_per_chunk_chars() -> usize { 1_200 }
fn default_generator_provider() -> String { "openai".to_string() }
fn default_generator_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_generator_model() -> String { "gpt-4o-mini".to_string() }
fn default_temperature() -> f32 { 0.3 }
fn default_max_tokens() -> usize { 1_000 }
fn default_generator_timeout() -> u64 { 60 }
fn default_history_window() -> usize { 12 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "citeforge".to_string() }
fn default_rate_limit() -> u32 { 20 }
fn default_burst() -> u32 { 40 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__RETRIEVAL__RRF_K=40
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject tunables that would make retrieval or packing meaningless
    pub fn validate(&self) -> Result<()> {
        let r = &self.retrieval;
        if !(r.rrf_k.is_finite() && r.rrf_k > 0.0) {
            return Err(invalid("retrieval.rrf_k", "must be a positive number"));
        }
        for (field, weight) in [
            ("retrieval.keyword_weight", r.keyword_weight),
            ("retrieval.vector_weight", r.vector_weight),
        ] {
            if !(weight.is_finite() && weight >= 0.0) {
                return Err(invalid(field, "must be a non-negative number"));
            }
        }
        if r.top_k == 0 {
            return Err(invalid("retrieval.top_k", "must be at least 1"));
        }
        if r.candidate_depth == 0 {
            return Err(invalid("retrieval.candidate_depth", "must be at least 1"));
        }
        if !(r.bm25_k1.is_finite() && r.bm25_k1 >= 0.0) {
            return Err(invalid("retrieval.bm25_k1", "must be a non-negative number"));
        }
        if !(0.0..=1.0).contains(&r.bm25_b) {
            return Err(invalid("retrieval.bm25_b", "must be within [0, 1]"));
        }
        if self.context.max_chars == 0 || self.context.per_chunk_chars == 0 {
            return Err(invalid("context", "character budgets must be positive"));
        }
        if self.vector_index.upsert_batch_size == 0 || self.embedding.batch_size == 0 {
            return Err(invalid("batch_size", "batch sizes must be positive"));
        }
        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get generation timeout as Duration
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generator.timeout_secs)
    }
}

fn invalid(field: &str, message: &str) -> AppError {
    AppError::Configuration {
        message: format!("{}: {}", field, message),
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            chunks_path: default_chunks_path(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            backend: default_vector_backend(),
            url: default_qdrant_url(),
            api_key: None,
            collection: default_collection(),
            timeout_secs: default_vector_timeout(),
            upsert_batch_size: default_upsert_batch(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_mode: default_mode(),
            top_k: default_top_k(),
            candidate_depth: default_candidate_depth(),
            rrf_k: default_rrf_k(),
            keyword_weight: default_weight(),
            vector_weight: default_weight(),
            bm25_k1: default_bm25_k1(),
            bm25_b: default_bm25_b(),
            timeout_ms: default_retrieval_timeout(),
        }
    }
}

impl RetrievalConfig {
    /// Vector ranker timeout (embed + search) as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            per_chunk_chars: default_per_chunk_chars(),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_generator_provider(),
            endpoint: default_generator_endpoint(),
            api_key: None,
            model: default_generator_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generator_timeout(),
            history_window: default_history_window(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.retrieval.rrf_k, 60.0);
        assert_eq!(config.retrieval.keyword_weight, 1.0);
        assert_eq!(config.retrieval.vector_weight, 1.0);
        assert_eq!(config.retrieval.candidate_depth, 20);
        assert_eq!(config.context.max_chars, 24_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_rrf_constant() {
        let mut config = AppConfig::default();
        config.retrieval.rrf_k = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_negative_weight() {
        let mut config = AppConfig::default();
        config.retrieval.vector_weight = -0.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("vector_weight"));
    }

    #[test]
    fn test_from_file_fills_missing_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("citeforge.toml");
        std::fs::write(
            &path,
            "[retrieval]\nrrf_k = 40\nvector_weight = 2.0\n\n[context]\nmax_chars = 8000\n",
        )
        .unwrap();

        let config = AppConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.retrieval.rrf_k, 40.0);
        assert_eq!(config.retrieval.vector_weight, 2.0);
        assert_eq!(config.retrieval.keyword_weight, 1.0);
        assert_eq!(config.context.max_chars, 8000);
        assert_eq!(config.context.per_chunk_chars, 1_200);
        assert_eq!(config.generator.history_window, 12);
    }

    #[test]
    fn test_timeouts_as_durations() {
        let config = AppConfig::default();
        assert_eq!(config.retrieval.timeout(), Duration::from_millis(5_000));
        assert_eq!(config.generation_timeout(), Duration::from_secs(60));
    }
}

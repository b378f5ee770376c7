//! ragstack Configuration Management
//!
//! Configuration is built once at process start, from environment
//! variables or a TOML file, and handed to the components that need it.
//! Nothing re-reads the environment after startup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment keys that must be present for [`AppConfig::from_env`]
pub const REQUIRED_ENV_KEYS: [&str; 5] = [
    "WEAVIATE_HTTP_HOST",
    "WEAVIATE_HTTP_PORT",
    "WEAVIATE_GRPC_HOST",
    "WEAVIATE_GRPC_PORT",
    "EMBEDDING_URL",
];

/// Embedding model used when a caller does not name one
pub const DEFAULT_EMBEDDING_MODEL: &str = "Qwen3-Embedding-0.6B";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Vector database connection
    pub weaviate: WeaviateConfig,

    /// Embedding service
    pub embedding: EmbeddingConfig,

    /// Readiness probe policy
    pub probe: ProbeConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Every key in [`REQUIRED_ENV_KEYS`] must be set; a missing key is a
    /// startup error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let missing: Vec<&str> = REQUIRED_ENV_KEYS
            .iter()
            .copied()
            .filter(|key| lookup(*key).map_or(true, |v| v.trim().is_empty()))
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingRequired(missing.join(", ")));
        }

        let mut config = Self::default();
        config.apply_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_overrides(&|key: &str| std::env::var(key).ok())?;
        self.validate()?;
        Ok(self)
    }

    /// Overwrite every field whose key the lookup knows about
    pub fn apply_overrides<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Weaviate
        if let Some(host) = lookup("WEAVIATE_HTTP_HOST") {
            self.weaviate.http_host = host;
        }
        if let Some(port) = lookup("WEAVIATE_HTTP_PORT") {
            self.weaviate.http_port = parse_value("WEAVIATE_HTTP_PORT", port)?;
        }
        if let Some(secure) = lookup("WEAVIATE_HTTP_SECURE") {
            self.weaviate.http_secure = parse_flag("WEAVIATE_HTTP_SECURE", secure)?;
        }
        if let Some(host) = lookup("WEAVIATE_GRPC_HOST") {
            self.weaviate.grpc_host = host;
        }
        if let Some(port) = lookup("WEAVIATE_GRPC_PORT") {
            self.weaviate.grpc_port = parse_value("WEAVIATE_GRPC_PORT", port)?;
        }
        if let Some(secure) = lookup("WEAVIATE_GRPC_SECURE") {
            self.weaviate.grpc_secure = parse_flag("WEAVIATE_GRPC_SECURE", secure)?;
        }
        if let Some(key) = lookup("WEAVIATE_API_KEY") {
            self.weaviate.api_key = Some(key);
        }
        if let Some(secs) = lookup("WEAVIATE_TIMEOUT_SECS") {
            self.weaviate.request_timeout_secs = parse_value("WEAVIATE_TIMEOUT_SECS", secs)?;
        }

        // Embedding
        if let Some(url) = lookup("EMBEDDING_URL") {
            self.embedding.url = url;
        }
        if let Some(model) = lookup("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(dimension) = lookup("EMBEDDING_DIMENSION") {
            self.embedding.dimension = Some(parse_value("EMBEDDING_DIMENSION", dimension)?);
        }
        if let Some(key) = lookup("EMBEDDING_API_KEY") {
            self.embedding.api_key = key;
        }
        if let Some(url) = lookup("EMBEDDING_VECTORIZER_URL") {
            self.embedding.vectorizer_base_url = Some(url);
        }
        if let Some(secs) = lookup("EMBEDDING_TIMEOUT_SECS") {
            self.embedding.timeout_secs = parse_value("EMBEDDING_TIMEOUT_SECS", secs)?;
        }

        // Probe
        if let Some(attempts) = lookup("WEAVIATE_PROBE_ATTEMPTS") {
            self.probe.max_attempts = parse_value("WEAVIATE_PROBE_ATTEMPTS", attempts)?;
        }
        if let Some(ms) = lookup("WEAVIATE_PROBE_BACKOFF_MS") {
            self.probe.initial_backoff_ms = parse_value("WEAVIATE_PROBE_BACKOFF_MS", ms)?;
        }

        // Logging
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("LOG_JSON") {
            self.logging.json_format = parse_flag("LOG_JSON", json)?;
        }

        Ok(())
    }

    /// Check invariants that defaults or files could violate
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.weaviate.http_host.trim().is_empty() {
            return Err(ConfigError::MissingRequired("WEAVIATE_HTTP_HOST".to_string()));
        }
        if self.weaviate.grpc_host.trim().is_empty() {
            return Err(ConfigError::MissingRequired("WEAVIATE_GRPC_HOST".to_string()));
        }
        let url = self.embedding.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                key: "EMBEDDING_URL".to_string(),
                value: self.embedding.url.clone(),
            });
        }
        if self.weaviate.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "WEAVIATE_TIMEOUT_SECS".to_string(),
                value: "0".to_string(),
            });
        }
        if self.embedding.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "EMBEDDING_TIMEOUT_SECS".to_string(),
                value: "0".to_string(),
            });
        }
        if self.probe.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "WEAVIATE_PROBE_ATTEMPTS".to_string(),
                value: "0".to_string(),
            });
        }
        if self.probe.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "probe.multiplier".to_string(),
                value: self.probe.multiplier.to_string(),
            });
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

fn parse_flag(key: &str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        }),
    }
}

/// Weaviate connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaviateConfig {
    /// REST host
    pub http_host: String,

    /// REST port
    pub http_port: u16,

    /// Use https for REST
    pub http_secure: bool,

    /// gRPC host
    pub grpc_host: String,

    /// gRPC port
    pub grpc_port: u16,

    /// Use TLS for gRPC
    pub grpc_secure: bool,

    /// Bearer token for authenticated clusters
    pub api_key: Option<String>,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl WeaviateConfig {
    /// Base URL for REST calls, without a trailing slash
    pub fn http_url(&self) -> String {
        let scheme = if self.http_secure { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.http_host, self.http_port)
    }

    /// `host:port` of the binary protocol endpoint
    pub fn grpc_endpoint(&self) -> String {
        format!("{}:{}", self.grpc_host, self.grpc_port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for WeaviateConfig {
    fn default() -> Self {
        Self {
            http_host: "localhost".to_string(),
            http_port: 8080,
            http_secure: false,
            grpc_host: "localhost".to_string(),
            grpc_port: 50051,
            grpc_secure: false,
            api_key: None,
            request_timeout_secs: 30,
        }
    }
}

/// Embedding service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Full URL of the OpenAI-compatible embeddings endpoint
    pub url: String,

    /// Model name sent with every request
    pub model: String,

    /// Expected vector length; looked up from the model name when unset
    pub dimension: Option<usize>,

    /// API key forwarded to the service and to the database vectorizer.
    /// Self-hosted servers accept any value.
    pub api_key: String,

    /// Base URL the database itself should use to reach the embedding
    /// service, when it differs from `url` (e.g. a container network name)
    pub vectorizer_base_url: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3390/v1/embeddings".to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimension: None,
            api_key: "dummy".to_string(),
            vectorizer_base_url: None,
            timeout_secs: 10,
        }
    }
}

/// Readiness probe retry policy.
///
/// Only the probe is retried; database and embedding calls are
/// single-attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Total probe attempts, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt, in milliseconds
    pub initial_backoff_ms: u64,

    /// Upper bound on the delay between attempts, in milliseconds
    pub max_backoff_ms: u64,

    /// Growth factor applied to the delay after each failed attempt
    pub multiplier: f64,
}

impl ProbeConfig {
    /// A single attempt with no waiting
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        let capped = delay.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
            multiplier: 2.0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

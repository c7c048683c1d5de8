//! Configuration management for Integrity Assistant services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values

use crate::models::{BackendId, SourceKind};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Document backends, in priority order
    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    /// Search router configuration
    #[serde(default)]
    pub router: RouterConfig,

    /// Content fetch configuration
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Retry policy for idempotent backend reads
    #[serde(default)]
    pub retry: RetryConfig,

    /// Language model configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Context synthesis configuration
    #[serde(default)]
    pub synthesis: SynthesisConfig,

    /// Entity enrichment configuration
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Per-query limits
    #[serde(default)]
    pub query: QueryConfig,

    /// Index sync (refresh policy) configuration
    #[serde(default)]
    pub sync: SyncConfig,

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

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

/// Kind of document backend
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Real-time content-management REST API
    ContentServer,
    /// Pre-synced in-process search index
    SearchIndex,
}

impl BackendKind {
    pub fn source_kind(&self) -> SourceKind {
        match self {
            BackendKind::ContentServer => SourceKind::RealTime,
            BackendKind::SearchIndex => SourceKind::Synced,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Backend identifier, used as the scope of document ids
    pub id: String,

    /// Backend kind
    pub kind: BackendKind,

    /// Base URL (content server only)
    pub base_url: Option<String>,

    /// Static bearer token handed over by the auth collaborator
    pub token: Option<String>,

    /// Token lifetime in seconds (absent means no expiry)
    pub token_ttl_secs: Option<u64>,

    /// Lower sorts first when tie-breaking ranks
    #[serde(default)]
    pub priority: u32,

    /// Maximum in-flight requests to this backend
    #[serde(default = "default_backend_concurrency")]
    pub max_concurrency: usize,

    /// Requests per second cap (absent means uncapped)
    pub requests_per_second: Option<u32>,

    /// Per-call timeout in milliseconds
    #[serde(default = "default_backend_timeout")]
    pub timeout_ms: u64,
}

impl BackendConfig {
    pub fn backend_id(&self) -> BackendId {
        BackendId::new(self.id.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterConfig {
    /// Maximum merged candidates
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Per-backend limit requested during fan-out
    #[serde(default = "default_per_backend_limit")]
    pub per_backend_limit: usize,

    /// Backends slower than this are excluded from the merge
    #[serde(default = "default_router_timeout")]
    pub backend_timeout_ms: u64,

    /// Hits scoring below this are dropped
    #[serde(default)]
    pub min_score: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    /// Maximum concurrent content fetches per query
    #[serde(default = "default_fetch_concurrency")]
    pub concurrency: usize,

    /// Per-fetch timeout in milliseconds
    #[serde(default = "default_fetch_timeout")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff interval in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Chat completions endpoint
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// API key (absent selects the offline extractive model)
    pub api_key: Option<String>,

    /// Model to use
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub temperature: f32,

    /// Maximum output tokens
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SynthesisConfig {
    /// Context budget in estimated tokens
    #[serde(default = "default_context_budget")]
    pub context_budget_tokens: usize,

    /// Maximum characters per passage
    #[serde(default = "default_passage_chars")]
    pub passage_max_chars: usize,

    /// Maximum passages taken from one document
    #[serde(default = "default_passages_per_document")]
    pub max_passages_per_document: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnrichmentConfig {
    /// Fall back to the language model when patterns find nothing
    #[serde(default = "default_enabled")]
    pub use_model_fallback: bool,

    /// Vocabulary for deterministic extraction
    #[serde(default)]
    pub vocabulary: Vocabulary,
}

/// Configured extraction vocabulary
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Vocabulary {
    /// Party roles, e.g. "supplier", "beneficial owner"
    #[serde(default = "default_roles")]
    pub roles: Vec<String>,

    /// Adverse concern types
    #[serde(default = "default_concerns")]
    pub concerns: Vec<String>,

    /// Phrases recording that nothing adverse was found
    #[serde(default = "default_clearances")]
    pub clearances: Vec<String>,

    /// Document type labels
    #[serde(default = "default_document_types")]
    pub document_types: Vec<String>,

    /// Cue phrases introducing mitigating factors
    #[serde(default = "default_mitigating_cues")]
    pub mitigating_cues: Vec<String>,

    /// Legal-entity suffixes used to spot party names
    #[serde(default = "default_company_suffixes")]
    pub company_suffixes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Overall per-query deadline in seconds
    #[serde(default = "default_query_deadline")]
    pub deadline_secs: u64,

    /// Maximum question length in characters
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,

    /// Reject questions matching injection patterns
    #[serde(default = "default_enabled")]
    pub input_guard_enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Synced copies older than this are not trusted
    #[serde(default = "default_max_staleness")]
    pub max_staleness_secs: u64,

    /// Interval between sync passes
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,

    /// Query used to enumerate documents from the real-time source
    #[serde(default = "default_sync_query")]
    pub query: String,

    /// Documents pulled per pass
    #[serde(default = "default_sync_batch")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log filter directive (e.g. "info,integrity_search=debug")
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
fn default_shutdown_timeout() -> u64 { 30 }
fn default_backend_concurrency() -> usize { 8 }
fn default_backend_timeout() -> u64 { 5_000 }
fn default_top_k() -> usize { 20 }
fn default_per_backend_limit() -> usize { 25 }
fn default_router_timeout() -> u64 { 4_000 }
fn default_fetch_concurrency() -> usize { 4 }
fn default_fetch_timeout() -> u64 { 5_000 }
fn default_max_attempts() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 100 }
fn default_max_backoff() -> u64 { 2_000 }
fn default_llm_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_llm_timeout() -> u64 { 30 }
fn default_llm_max_tokens() -> usize { 2000 }
fn default_context_budget() -> usize { 3000 }
/// Smallest passage that still holds a sentence
pub const MIN_PASSAGE_CHARS: usize = 32;

fn default_passage_chars() -> usize { 800 }
fn default_passages_per_document() -> usize { 4 }
fn default_query_deadline() -> u64 { 45 }
fn default_max_query_chars() -> usize { 2000 }
fn default_max_staleness() -> u64 { 86_400 }
fn default_sync_interval() -> u64 { 900 }
fn default_sync_query() -> String { "*".to_string() }
fn default_sync_batch() -> usize { 200 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "integrity-assistant".to_string() }
fn default_rate_limit() -> u32 { 20 }
fn default_burst() -> u32 { 40 }
fn default_enabled() -> bool { true }

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_roles() -> Vec<String> {
    strings(&[
        "beneficial owner",
        "director",
        "shareholder",
        "supplier",
        "distributor",
        "agent",
        "consultant",
        "joint venture partner",
        "customer",
        "guarantor",
    ])
}

fn default_concerns() -> Vec<String> {
    strings(&[
        "sanctions",
        "bribery",
        "corruption",
        "fraud",
        "money laundering",
        "adverse media",
        "conflict of interest",
        "politically exposed person",
        "litigation",
        "export control",
        "tax evasion",
    ])
}

fn default_clearances() -> Vec<String> {
    strings(&["none noted", "no concerns", "no adverse findings", "no issues identified"])
}

fn default_document_types() -> Vec<String> {
    strings(&[
        "integrity due diligence report",
        "assessment",
        "questionnaire",
        "screening report",
        "memo",
        "contract",
        "audit report",
    ])
}

fn default_mitigating_cues() -> Vec<String> {
    strings(&["mitigated by", "mitigating factor", "remediated", "offset by", "resolved through"])
}

fn default_company_suffixes() -> Vec<String> {
    strings(&["Corp", "Corporation", "Inc", "Ltd", "LLC", "GmbH", "AG", "SA", "PLC", "Limited", "Holdings"])
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            per_backend_limit: default_per_backend_limit(),
            backend_timeout_ms: default_router_timeout(),
            min_score: 0.0,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_fetch_concurrency(),
            timeout_ms: default_fetch_timeout(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: None,
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
            temperature: 0.0,
            max_tokens: default_llm_max_tokens(),
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            context_budget_tokens: default_context_budget(),
            passage_max_chars: default_passage_chars(),
            max_passages_per_document: default_passages_per_document(),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            use_model_fallback: default_enabled(),
            vocabulary: Vocabulary::default(),
        }
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            roles: default_roles(),
            concerns: default_concerns(),
            clearances: default_clearances(),
            document_types: default_document_types(),
            mitigating_cues: default_mitigating_cues(),
            company_suffixes: default_company_suffixes(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_query_deadline(),
            max_query_chars: default_max_query_chars(),
            input_guard_enabled: default_enabled(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_staleness_secs: default_max_staleness(),
            interval_secs: default_sync_interval(),
            query: default_sync_query(),
            batch_size: default_sync_batch(),
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

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot serve a query
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for backend in &self.backends {
            if !seen.insert(backend.id.as_str()) {
                return Err(ConfigError::Message(format!(
                    "duplicate backend id '{}'",
                    backend.id
                )));
            }
            if backend.kind == BackendKind::ContentServer && backend.base_url.is_none() {
                return Err(ConfigError::Message(format!(
                    "backend '{}' is a content server without base_url",
                    backend.id
                )));
            }
            if backend.max_concurrency == 0 {
                return Err(ConfigError::Message(format!(
                    "backend '{}' has max_concurrency 0",
                    backend.id
                )));
            }
        }
        if self.router.top_k == 0 {
            return Err(ConfigError::Message("router.top_k must be positive".into()));
        }
        if self.fetch.concurrency == 0 {
            return Err(ConfigError::Message("fetch.concurrency must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Message("retry.max_attempts must be positive".into()));
        }
        if self.synthesis.passage_max_chars < MIN_PASSAGE_CHARS {
            return Err(ConfigError::Message(format!(
                "synthesis.passage_max_chars must be at least {}",
                MIN_PASSAGE_CHARS
            )));
        }
        if self.synthesis.context_budget_tokens < self.synthesis.passage_max_chars.div_ceil(4) {
            return Err(ConfigError::Message(
                "synthesis.context_budget_tokens must fit at least one full passage".into(),
            ));
        }
        if self.synthesis.max_passages_per_document == 0 {
            return Err(ConfigError::Message(
                "synthesis.max_passages_per_document must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Get the overall query deadline as Duration
    pub fn query_deadline(&self) -> Duration {
        Duration::from_secs(self.query.deadline_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            backends: vec![BackendConfig {
                id: "index".to_string(),
                kind: BackendKind::SearchIndex,
                base_url: None,
                token: None,
                token_ttl_secs: None,
                priority: 10,
                max_concurrency: default_backend_concurrency(),
                requests_per_second: None,
                timeout_ms: default_backend_timeout(),
            }],
            router: RouterConfig::default(),
            fetch: FetchConfig::default(),
            retry: RetryConfig::default(),
            llm: LlmConfig::default(),
            synthesis: SynthesisConfig::default(),
            enrichment: EnrichmentConfig::default(),
            query: QueryConfig::default(),
            sync: SyncConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

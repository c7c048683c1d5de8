//! Integrity Assistant Common Library
//!
//! Shared code for the retrieval and answering crates:
//! - Domain model (documents, search results, entities, citations, answers)
//! - Source connector contract and backend credentials
//! - Language model abstraction
//! - Retry and backend concurrency limiting
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod config;
pub mod connector;
pub mod credential;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod models;
pub mod resilience;
pub mod text;

// Re-export commonly used types
pub use config::AppConfig;
pub use connector::{Capabilities, Capability, SourceConnector};
pub use errors::{AppError, Result};
pub use llm::LanguageModel;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

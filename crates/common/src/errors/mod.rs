//! Error types for Integrity Assistant services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for backend, generation and grounding failures
//! - Retryability classification for the resilience layer
//! - HTTP status code mapping
//! - Structured error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFormat,
    InputRejected,

    // Credential errors (2xxx)
    ExpiredCredential,

    // Authorization errors (3xxx)
    Forbidden,

    // Resource errors (4xxx)
    NotFound,
    NoMatchingDocuments,
    Unsupported,

    // Rate limiting (6xxx)
    RateLimited,

    // Backend errors (8xxx)
    BackendUnavailable,
    GenerationUnavailable,
    GroundingViolation,
    DeadlineExceeded,
    UpstreamError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFormat => 1002,
            ErrorCode::InputRejected => 1003,

            ErrorCode::ExpiredCredential => 2001,

            ErrorCode::Forbidden => 3001,

            ErrorCode::NotFound => 4001,
            ErrorCode::NoMatchingDocuments => 4002,
            ErrorCode::Unsupported => 4003,

            ErrorCode::RateLimited => 6001,

            ErrorCode::BackendUnavailable => 8001,
            ErrorCode::GenerationUnavailable => 8002,
            ErrorCode::GroundingViolation => 8003,
            ErrorCode::DeadlineExceeded => 8004,
            ErrorCode::UpstreamError => 8005,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    /// The question matched an injection pattern and never left the gateway.
    #[error("Input rejected: {reason}")]
    InputRejected { reason: String },

    // Credential errors
    #[error("Credential for backend {backend} expired")]
    ExpiredCredential { backend: String },

    // Authorization errors
    #[error("Access denied by backend {backend}: {message}")]
    Forbidden { backend: String, message: String },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("No matching documents for query")]
    NoMatchingDocuments,

    #[error("Backend {backend} does not support {operation}")]
    Unsupported { backend: String, operation: String },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Backend errors
    #[error("Backend {backend} unavailable: {message}")]
    BackendUnavailable { backend: String, message: String },

    #[error("Language model unavailable: {message}")]
    GenerationUnavailable { message: String },

    /// Generated text referenced content outside the supplied context.
    #[error("Grounding violation: {message}")]
    GroundingViolation { message: String },

    #[error("Query deadline of {deadline_ms}ms exceeded")]
    DeadlineExceeded { deadline_ms: u64 },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a backend outage
    pub fn unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::BackendUnavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a missing resource
    pub fn not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        AppError::NotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Shorthand for a permission denial
    pub fn forbidden(backend: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Forbidden {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::InputRejected { .. } => ErrorCode::InputRejected,
            AppError::ExpiredCredential { .. } => ErrorCode::ExpiredCredential,
            AppError::Forbidden { .. } => ErrorCode::Forbidden,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::NoMatchingDocuments => ErrorCode::NoMatchingDocuments,
            AppError::Unsupported { .. } => ErrorCode::Unsupported,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::BackendUnavailable { .. } => ErrorCode::BackendUnavailable,
            AppError::GenerationUnavailable { .. } => ErrorCode::GenerationUnavailable,
            AppError::GroundingViolation { .. } => ErrorCode::GroundingViolation,
            AppError::DeadlineExceeded { .. } => ErrorCode::DeadlineExceeded,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::InvalidFormat { .. }
            | AppError::InputRejected { .. } => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::ExpiredCredential { .. } => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::NotFound { .. } | AppError::NoMatchingDocuments => StatusCode::NOT_FOUND,

            // 422 Unprocessable
            AppError::Unsupported { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::GroundingViolation { .. }
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::BackendUnavailable { .. } | AppError::GenerationUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 504 Gateway Timeout
            AppError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Whether repeating the same idempotent call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::BackendUnavailable { .. }
                | AppError::GenerationUnavailable { .. }
                | AppError::RateLimited { .. }
                | AppError::HttpClient(_)
        )
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub numeric_code: u16,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                numeric_code: code.as_code(),
                message,
                retryable: self.is_retryable(),
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

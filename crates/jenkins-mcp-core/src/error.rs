//! Error types for jenkins-mcp.
//!
//! Every library crate in the workspace returns [`Error`]. The variants follow
//! the failure taxonomy of the bridge: some are retried by the HTTP client
//! (`Http`, `RateLimited`), the rest surface to the caller unchanged and are
//! converted into a stable error code by the tool dispatcher.

use std::time::Duration;

use thiserror::Error;

/// Main error type for jenkins-mcp operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Network failure or 5xx response from Jenkins
    #[error("HTTP error: {0}")]
    Http(String),

    /// Credentials rejected (401/403, or crumb still rejected after refresh)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Unknown job, build or queue item
    #[error("Not found: {0}")]
    NotFound(String),

    /// Jenkins asked us to slow down (429)
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Any other non-success response
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Jenkins discarded the queue item before it became a build
    #[error("Queue item {queue_id} for job '{job}' was cancelled")]
    QueueCancelled { job: String, queue_id: u64 },

    /// Webhook signature did not match
    #[error("Invalid webhook signature")]
    SignatureInvalid,

    /// Webhook payload could not be normalized
    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    /// Orchestration deadline exceeded
    #[error("Timed out after {}ms waiting for build", .waited.as_millis())]
    Timeout { waited: Duration },

    /// Dispatcher is at its concurrency limit
    #[error("Busy: {limit} build orchestrations already in flight")]
    Busy { limit: usize },

    /// A waiter already exists for the same correlation key
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Tool call arguments were missing or invalid
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Response from Jenkins could not be interpreted
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Error::Unauthorized(message),
            404 => Error::NotFound(message),
            429 => Error::RateLimited {
                message,
                retry_after: None,
            },
            500..=599 => Error::Http(format!("{} - {}", status, message)),
            _ => Error::Api { status, message },
        }
    }

    /// Whether the HTTP client should retry the request that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Http(_) | Error::RateLimited { .. })
    }

    /// Stable error code exposed to tool callers.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Http(_) => "TRANSPORT_ERROR",
            Error::Unauthorized(_) => "AUTH_FAILED",
            Error::NotFound(_) => "NOT_FOUND",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::Api { .. } => "API_ERROR",
            Error::QueueCancelled { .. } => "QUEUE_CANCELLED",
            Error::SignatureInvalid => "INVALID_SIGNATURE",
            Error::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            Error::Timeout { .. } => "TIMED_OUT",
            Error::Busy { .. } => "BUSY",
            Error::Conflict(_) => "CONFLICT",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::InvalidData(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::Other(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for jenkins-mcp operations.
pub type Result<T> = std::result::Result<T, Error>;

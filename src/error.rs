//! Error types for the RDS monitoring MCP server.

use serde::Serialize;
use thiserror::Error;

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for monitoring and protocol operations
#[derive(Debug, Error)]
pub enum Error {
    /// Time window is empty or reversed (start >= end) or outside the allowed length
    #[error("Invalid time window: {0}")]
    InvalidWindow(String),

    /// Resource, metric, report or log file does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transient failure of an upstream provider
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Upstream rate limit hit, retryable with backoff
    #[error("Throttled by upstream: {0}")]
    Throttled(String),

    /// Caller deadline expired before the operation completed
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Too many malformed samples or log lines were dropped
    #[error("Data quality degraded: {0}")]
    DataQualityDegraded(String),

    /// Mutating operation attempted while the server runs in readonly mode
    #[error("Readonly mode: {0}")]
    ReadOnly(String),

    /// Local rate limit for a tool exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Invalid parameters
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Invalid JSON-RPC request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Method, tool or resource template not found
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable kind, used in structured tool errors
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidWindow(_) => "invalid_window",
            Error::NotFound(_) => "not_found",
            Error::UpstreamUnavailable(_) => "upstream_unavailable",
            Error::Throttled(_) => "throttled",
            Error::Timeout(_) => "timeout",
            Error::DataQualityDegraded(_) => "data_quality_degraded",
            Error::ReadOnly(_) => "readonly",
            Error::RateLimited(_) => "rate_limited",
            Error::InvalidParams(_) => "invalid_params",
            Error::InvalidRequest(_) => "invalid_request",
            Error::MethodNotFound(_) => "method_not_found",
            Error::Parse(_) => "parse_error",
            Error::Config(_) => "config_error",
            Error::Json(_) => "json_error",
            Error::Io(_) => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Only upstream throttling is retried; everything else is surfaced as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Throttled(_))
    }

    /// Convert error to JSON-RPC error code
    pub fn to_json_rpc_code(&self) -> i32 {
        match self {
            Error::Parse(_) => -32700,
            Error::InvalidRequest(_) => -32600,
            Error::MethodNotFound(_) => -32601,
            Error::InvalidParams(_) | Error::InvalidWindow(_) => -32602,
            Error::Internal(_) => -32603,
            Error::NotFound(_) => -32002,
            _ => -32000, // Server error
        }
    }

    /// Structured body returned to MCP clients when a tool fails
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Structured error body: kind + human-readable message
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub kind: &'static str,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_throttled_is_retryable() {
        assert!(Error::Throttled("slow down".into()).is_retryable());
        assert!(!Error::UpstreamUnavailable("down".into()).is_retryable());
        assert!(!Error::NotFound("db-1".into()).is_retryable());
        assert!(!Error::Timeout("5s".into()).is_retryable());
    }

    #[test]
    fn test_payload_carries_kind_and_message() {
        let payload = Error::InvalidWindow("start == end".into()).to_payload();
        assert_eq!(payload.kind, "invalid_window");
        assert!(payload.message.contains("start == end"));
    }

    #[test]
    fn test_json_rpc_codes() {
        assert_eq!(Error::Parse("x".into()).to_json_rpc_code(), -32700);
        assert_eq!(Error::MethodNotFound("x".into()).to_json_rpc_code(), -32601);
        assert_eq!(Error::InvalidParams("x".into()).to_json_rpc_code(), -32602);
        assert_eq!(Error::Throttled("x".into()).to_json_rpc_code(), -32000);
    }
}

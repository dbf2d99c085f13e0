//! Error types for the Evidex core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering source connectors, LLM oracles, configuration and auditing.
//! Almost none of these reach the caller of a research run: connector and
//! oracle failures are absorbed into metrics and limitations.

use crate::types::SourceKind;
use std::path::PathBuf;

/// Top-level error type for the Evidex core library.
#[derive(Debug, thiserror::Error)]
pub enum EvidexError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by a single source connector call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("No connector registered for source kind {kind}")]
    NotRegistered { kind: SourceKind },

    #[error("{source_name} returned HTTP {status}")]
    Http { source_name: String, status: u16 },

    #[error("{source_name} rate limited the request, retry after {retry_after_secs}s")]
    RateLimited {
        source_name: String,
        retry_after_secs: u64,
    },

    #[error("{source_name} timed out after {timeout_secs}s")]
    Timeout {
        source_name: String,
        timeout_secs: u64,
    },

    #[error("{source_name} connection failed: {message}")]
    Connection {
        source_name: String,
        message: String,
    },

    #[error("{source_name} returned a malformed payload: {message}")]
    Malformed {
        source_name: String,
        message: String,
    },

    #[error("{source_name} call was cancelled")]
    Cancelled { source_name: String },

    #[error("{source_name} is misconfigured: {message}")]
    Misconfigured {
        source_name: String,
        message: String,
    },
}

impl SourceError {
    /// Whether this failure is transient and worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::RateLimited { .. }
                | SourceError::Timeout { .. }
                | SourceError::Connection { .. }
        )
    }

    /// Minimum wait the upstream asked for, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            SourceError::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

/// Errors from the strategy and synthesis oracles.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OracleError {
    #[error("Oracle unavailable: {message}")]
    Unavailable { message: String },

    #[error("Oracle request failed: {message}")]
    Request { message: String },

    #[error("Oracle response could not be parsed: {message}")]
    Malformed { message: String },

    #[error("Oracle rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Oracle timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Authentication failed for oracle endpoint {endpoint}")]
    AuthFailed { endpoint: String },

    #[error("Oracle call was cancelled")]
    Cancelled,
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from the grounding audit.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuditError {
    #[error("Evidence corpus is empty")]
    EmptyCorpus,

    #[error("Too many claims to audit: {count} (limit {limit})")]
    TooManyClaims { count: usize, limit: usize },
}

/// A type alias for results using the top-level `EvidexError`.
pub type Result<T> = std::result::Result<T, EvidexError>;

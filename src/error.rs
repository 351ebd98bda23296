//! Custom error types for Elenchus.
//!
//! Only conditions that end a generation session are modelled as errors.
//! Recoverable in-loop failures (unparsable candidates, failing test runs)
//! are data carried on an [`Attempt`](crate::session::Attempt) and never
//! surface through this type.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Elenchus operations
#[derive(Error, Debug)]
pub enum ElenchusError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// The program under test could not be located
    #[error("PUT file not found: {}", path.display())]
    PutNotFound { put_id: String, path: PathBuf },

    /// The language model call failed
    #[error("LLM interaction failed: {message}")]
    Llm { message: String },

    /// The language model call exceeded its timeout
    #[error("LLM interaction timed out after {timeout_secs} seconds")]
    LlmTimeout { timeout_secs: u64 },

    /// A session artifact could not be written
    #[error("Failed to write artifact {}: {message}", path.display())]
    Artifact { path: PathBuf, message: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ElenchusError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a model-call error
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm {
            message: message.into(),
        }
    }

    /// Create an artifact error
    pub fn artifact(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Artifact {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Short category label used in logs and outcome records.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } | Self::InvalidConfig { .. } => "config",
            Self::PutNotFound { .. } => "put_not_found",
            Self::Llm { .. } | Self::LlmTimeout { .. } => "llm",
            Self::Artifact { .. } => "artifact",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Other(_) => "other",
        }
    }
}

/// Result type alias for Elenchus operations
pub type Result<T> = std::result::Result<T, ElenchusError>;

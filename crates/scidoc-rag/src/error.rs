//! Error types for the document pipeline

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Specialized enrichment stage that can fail independently of the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Equation normalization and tokenization
    Mathematical,
    /// Figure and table extraction
    Asset,
    /// Term/definition extraction
    Glossary,
}

impl Stage {
    /// Operation name used when reporting to the monitor
    pub fn operation(&self) -> &'static str {
        match self {
            Stage::Mathematical => "enrich.mathematical",
            Stage::Asset => "enrich.asset",
            Stage::Glossary => "enrich.glossary",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Mathematical => write!(f, "mathematical"),
            Stage::Asset => write!(f, "asset"),
            Stage::Glossary => write!(f, "glossary"),
        }
    }
}

/// Pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration rejected at load time
    #[error("Configuration error: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    /// Document could not be read or decoded
    #[error("Failed to read document '{source_id}': {message}")]
    DocumentRead { source_id: String, message: String },

    /// Enrichment stage disabled by configuration
    #[error("Stage '{0}' is unavailable")]
    StageUnavailable(Stage),

    /// Enrichment stage failed on a chunk
    #[error("Stage '{stage}' failed: {message}")]
    Stage { stage: Stage, message: String },

    /// Specialized payload does not belong to the chunk's content type
    #[error("Payload '{payload}' cannot be attached to a '{content_type}' chunk")]
    PayloadMismatch {
        payload: &'static str,
        content_type: String,
    },

    /// Unknown export format
    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a document read error
    pub fn read(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DocumentRead {
            source_id: source_id.into(),
            message: message.into(),
        }
    }

    /// Create a stage error
    pub fn stage(stage: Stage, message: impl Into<String>) -> Self {
        Self::Stage {
            stage,
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this error is recovered by the per-chunk fallback path
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::StageUnavailable(_) | Error::Stage { .. } | Error::PayloadMismatch { .. }
        )
    }
}

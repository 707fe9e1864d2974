//src/error.rs

use thiserror::Error;

/// Every failure a sample's pipeline can hit.
///
/// Per-site ambiguity never shows up here: low-quality variant sites are
/// demoted to no-call and mixed species calls are reported as `is_mixed`.
#[derive(Error, Debug)]
pub enum AtlasError {
    /// Structural violation of the coverage stream (bad columns, broken
    /// reference/alternate windows, duplicated sites).
    #[error("Malformed coverage stream at line {line}: {message}")]
    MalformedCoverageStream { line: usize, message: String },

    /// A probe id whose encoding cannot be classified without guessing.
    #[error("Invalid probe encoding: {probe}")]
    InvalidProbeEncoding { probe: String },

    /// Nothing to type, or no expected-depth baseline to type against.
    #[error("Insufficient input: {message}")]
    InsufficientInput { message: String },

    /// Non-zero exit, timeout or missing output from the k-mer coverage tool.
    #[error("External tool failure: {message}")]
    ExternalToolFailure { message: String },

    /// A record-store failure that may succeed when retried.
    #[error("Transient persistence error: {message}")]
    PersistenceTransient { message: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AtlasError>;

impl AtlasError {
    pub fn malformed(line: usize, message: impl Into<String>) -> Self {
        Self::MalformedCoverageStream {
            line,
            message: message.into(),
        }
    }

    pub fn invalid_probe(probe: impl Into<String>) -> Self {
        Self::InvalidProbeEncoding {
            probe: probe.into(),
        }
    }

    pub fn insufficient(message: impl Into<String>) -> Self {
        Self::InsufficientInput {
            message: message.into(),
        }
    }

    pub fn tool(message: impl Into<String>) -> Self {
        Self::ExternalToolFailure {
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::PersistenceTransient {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Only transient store failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PersistenceTransient { .. })
    }
}

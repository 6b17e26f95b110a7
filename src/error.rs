//! Error types for the query cache

use thiserror::Error;

/// Main error type for the query cache
#[derive(Error, Debug)]
pub enum Error {
    /// The injected signature function failed for a target
    #[error("Signature error for target {target}: {reason}")]
    Signature {
        /// Target identity the signature was computed for
        target: String,
        /// Failure reported by the signature function
        reason: String,
    },

    /// Two frames sharing a field identity do not have the same shape
    #[error("Shape mismatch for target {target}, field {field}: {detail}")]
    ShapeMismatch {
        /// Target identity owning the frames
        target: String,
        /// Field identity of the mismatched frames
        field: String,
        /// What differed
        detail: String,
    },

    /// The transport failed to execute a request
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Create a signature error from any displayable reason
    pub fn signature(target: impl ToString, reason: impl ToString) -> Self {
        Self::Signature {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a transport error from any displayable cause
    pub fn transport(cause: impl ToString) -> Self {
        Self::Transport(cause.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

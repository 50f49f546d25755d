//! Error types for recoverable roots
//!
//! Provides error handling for:
//! - Root recomputation (parse, text, storage failures and cancellation)
//! - Configuration loading
//!
//! Contract violations (double bind, a re-parented root owned by the wrong
//! tree, a retrieve-only strategy with nothing to retrieve) are panics, not
//! errors.

use rootcache_syntax::{ParseError, StorageError, TextError};
use std::path::PathBuf;

/// Errors surfaced by root and text accessors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RootError {
    /// The caller's request was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Reparse failed
    #[error("parse failed: {0}")]
    Parse(ParseError),

    /// Text could not be loaded
    #[error("text unavailable: {0}")]
    Text(TextError),

    /// Storage could not return the root
    #[error("storage failed: {0}")]
    Storage(StorageError),

    /// The containing tree was dropped, so there is nothing to re-parent into
    #[error("containing tree for {path} no longer exists")]
    Detached {
        /// File whose tree is gone
        path: String,
    },

    /// The text changed since the tree was created, so the root cannot be rebuilt
    #[error("text of {path} changed since its tree was created")]
    TextChanged {
        /// File whose text moved on
        path: String,
    },
}

impl RootError {
    /// Check if error is a cancellation
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if a later request may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Text(_) | Self::Storage(_))
    }
}

impl From<ParseError> for RootError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Cancelled => Self::Cancelled,
            other => Self::Parse(other),
        }
    }
}

impl From<TextError> for RootError {
    fn from(err: TextError) -> Self {
        match err {
            TextError::Cancelled => Self::Cancelled,
            other => Self::Text(other),
        }
    }
}

impl From<StorageError> for RootError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Cancelled => Self::Cancelled,
            other => Self::Storage(other),
        }
    }
}

/// Errors while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error reading the config file
    #[error("io error reading {path}: {source}")]
    Io {
        /// Config file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// TOML could not be decoded
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values decoded but are unusable
    #[error("invalid config value: {0}")]
    Invalid(String),
}

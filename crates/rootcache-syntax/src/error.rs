//! Error types reported by host collaborators
//!
//! Every error here is `Clone` because a single failed recomputation is
//! delivered to every caller that was waiting on it.

use crate::tree::TreeId;

/// Errors produced while parsing text into a root
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Parse was cancelled
    #[error("parse cancelled")]
    Cancelled,

    /// Source could not be turned into a root
    #[error("syntax error in {path}: {message}")]
    Syntax {
        /// File being parsed
        path: String,
        /// Parser diagnostic
        message: String,
    },
}

impl ParseError {
    /// Create syntax error for path
    pub fn syntax(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Syntax {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Errors produced while resolving source text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TextError {
    /// Load was cancelled
    #[error("text load cancelled")]
    Cancelled,

    /// IO error while reading text
    #[error("io error reading {path}: {message}")]
    Io {
        /// File being read
        path: String,
        /// Rendered io error
        message: String,
    },
}

impl TextError {
    /// Create IO error for path
    pub fn io(path: impl Into<String>, source: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: source.to_string(),
        }
    }
}

/// Errors produced by a storage service
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// Retrieval was cancelled
    #[error("storage access cancelled")]
    Cancelled,

    /// Stored payload failed its integrity check
    #[error("stored root for tree {tree} is corrupt: {reason}")]
    Corrupt {
        /// Tree whose payload is damaged
        tree: TreeId,
        /// What went wrong
        reason: String,
    },

    /// Payload could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

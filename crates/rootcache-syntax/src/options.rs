//! Parse options carried alongside every tree
//!
//! Options are opaque to the cache: they are captured when a tree is created
//! and handed back to the parser unchanged whenever the root is reparsed.

use serde::{Deserialize, Serialize};

/// Supported source languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Rust
    #[default]
    Rust,
    /// TypeScript
    TypeScript,
    /// JavaScript
    JavaScript,
    /// Python
    Python,
}

/// How the source is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Ordinary compilation unit
    #[default]
    Regular,
    /// Top-level script
    Script,
}

/// Options that affect how a file is parsed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ParseOptions {
    /// Source language
    pub language: Language,
    /// Source interpretation
    pub kind: SourceKind,
    /// Symbols defined for conditional compilation
    #[serde(default)]
    pub preprocessor_symbols: Vec<String>,
}

impl ParseOptions {
    /// Create options for a language
    #[inline]
    #[must_use]
    pub fn new(language: Language) -> Self {
        Self {
            language,
            ..Self::default()
        }
    }

    /// With source kind
    #[inline]
    #[must_use]
    pub fn with_kind(mut self, kind: SourceKind) -> Self {
        self.kind = kind;
        self
    }

    /// With an extra preprocessor symbol
    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.preprocessor_symbols.push(symbol.into());
        self
    }
}

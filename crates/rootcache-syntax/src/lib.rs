//! Rootcache Syntax
//!
//! The data a recoverable root is made of, and the traits for everything the
//! cache consumes but does not own.
//!
//! # Core Concepts
//!
//! - [`SyntaxRoot`] / [`Root`]: an immutable, structurally shared green tree
//!   stamped with the [`TreeId`] of the tree that owns it
//! - [`SourceText`]: file contents with a blake3 [`Checksum`]
//! - [`ParseOptions`]: opaque parser configuration passed through unchanged
//! - Host traits: [`TextSource`], [`RootParser`], [`ContainingTree`],
//!   [`EvictionCache`], [`StorageService`]
//!
//! # Example
//!
//! ```rust,ignore
//! use rootcache_syntax::{LineParser, ParseOptions, RootParser, SourceText};
//! use tokio_util::sync::CancellationToken;
//!
//! let text = SourceText::new("fn main() {}\n");
//! let root = LineParser.parse("main.rs", &ParseOptions::default(), &text, &CancellationToken::new())?;
//! assert_eq!(root.full_width(), text.len());
//! ```

#![warn(unreachable_pub)]

mod error;
mod hash;
mod host;
mod options;
mod parser;
mod text;
mod tree;

pub use error::{ParseError, StorageError, TextError};
pub use hash::{Checksum, ChecksumError};
pub use host::{
    ContainingTree, EvictionCache, EvictionCallback, RootParser, StorageService, TextSource,
};
pub use options::{Language, ParseOptions, SourceKind};
pub use parser::LineParser;
pub use text::{ConstantTextSource, FileTextSource, SourceText, TextAndVersion, VersionStamp};
pub use tree::{GreenElement, GreenNode, GreenToken, Root, SyntaxKind, SyntaxRoot, TreeId};

/// Re-exported so hosts name the same token type the traits use
pub use tokio_util::sync::CancellationToken;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

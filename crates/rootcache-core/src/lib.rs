//! Rootcache Core
//!
//! Lets a large number of per-file syntax trees share a bounded amount of
//! memory. Each tree's root is registered with one shared eviction cache;
//! when the cache lets go of a root and nobody else holds it, the tree
//! rebuilds it on demand, either by reparsing the file's text or by pulling a
//! serialized copy back out of temporary storage.
//!
//! # Architecture
//!
//! ```text
//!                     register / touch
//!   RecoverableTree ──► RecoverableRoot ─────────────► RootCache (moka)
//!                          │   ▲                           │
//!                          │   └──── on_evicted ───────────┘
//!                          │
//!                          └─► RecoveryStrategy
//!                                ├─ ReparseStrategy  ─► TextSource + RootParser
//!                                └─ RetrieveStrategy ─► TemporaryStorage
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use rootcache_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RootCacheConfig::load("rootcache.toml")?;
//! let factory = TreeFactory::new(
//!     Arc::new(LineParser),
//!     Arc::new(RootCache::from_config(&config)),
//!     config,
//! )
//! .with_storage(Arc::new(TemporaryStorage::new()));
//!
//! let tree = factory
//!     .parse_tree(
//!         "src/main.rs",
//!         ParseOptions::default(),
//!         Arc::new(FileTextSource::new("src/main.rs")),
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//!
//! // Rebuilt transparently if it was evicted
//! let root = tree.get_root_async(&CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

// Core modules
pub mod cache;
pub mod config;
pub mod error;
pub mod factory;
pub mod recoverable;
pub mod recovery;
pub mod storage;
pub mod tree;

// Re-exports for convenience
pub use cache::{CacheStats, RootCache};
pub use config::{RecoveryMode, RootCacheConfig};
pub use error::{ConfigError, RootError};
pub use factory::TreeFactory;
pub use recoverable::{RecoverableRoot, StateKind};
pub use recovery::{RecoveryContext, RecoveryStrategy, ReparseStrategy, RetrieveStrategy};
pub use storage::{StorageStats, TemporaryStorage};
pub use tree::{ParsedTree, RecoverableTree, SyntaxTree};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with recoverable trees
    pub use crate::cache::RootCache;
    pub use crate::config::{RecoveryMode, RootCacheConfig};
    pub use crate::error::RootError;
    pub use crate::factory::TreeFactory;
    pub use crate::storage::TemporaryStorage;
    pub use crate::tree::{RecoverableTree, SyntaxTree};
    pub use rootcache_syntax::{
        CancellationToken, ContainingTree, FileTextSource, LineParser, ParseOptions, Root,
        TextSource,
    };
}

//! Recovery strategies
//!
//! A strategy decides what happens to a root when the eviction cache lets go
//! of it (`save`) and how it is rebuilt afterwards (`restore`):
//!
//! - [`ReparseStrategy`]: nothing to save; restore by parsing the text again
//! - [`RetrieveStrategy`]: save by enqueueing the root to temporary storage;
//!   restore by reading it back, optionally falling back to a reparse
//!
//! Both are only ever invoked while the owning root holds its gate.

use crate::error::RootError;
use async_trait::async_trait;
use rootcache_syntax::{ParseOptions, Root, RootParser, StorageService, TextSource, TreeId};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// What a strategy may know about the file it is recovering
#[derive(Clone, Copy)]
pub struct RecoveryContext<'a> {
    /// File identity
    pub file_path: &'a str,
    /// Options to reparse with
    pub options: &'a ParseOptions,
    /// Where the text comes from
    pub text: &'a dyn TextSource,
    /// Tree whose root is being saved or restored
    pub tree: TreeId,
}

impl fmt::Debug for RecoveryContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryContext")
            .field("file_path", &self.file_path)
            .field("tree", &self.tree)
            .finish_non_exhaustive()
    }
}

/// Policy for saving an evicted root and rebuilding it later
#[async_trait]
pub trait RecoveryStrategy: Send + Sync + fmt::Debug {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Called once, the first time the root is evicted. Must not block.
    fn save(&self, ctx: &RecoveryContext<'_>, root: &Root);

    /// Produce a root equivalent to the evicted one
    ///
    /// The result may belong to any tree; the caller re-parents it.
    ///
    /// # Errors
    /// Returns error if text, parser or storage fail, or `cancel` fires
    async fn restore(
        &self,
        ctx: &RecoveryContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<Root, RootError>;
}

/// Rebuild roots by parsing their text again
#[derive(Clone)]
pub struct ReparseStrategy {
    parser: Arc<dyn RootParser>,
}

impl ReparseStrategy {
    /// Create strategy around a parser
    #[inline]
    #[must_use]
    pub fn new(parser: Arc<dyn RootParser>) -> Self {
        Self { parser }
    }
}

impl fmt::Debug for ReparseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReparseStrategy").finish_non_exhaustive()
    }
}

#[async_trait]
impl RecoveryStrategy for ReparseStrategy {
    fn name(&self) -> &'static str {
        "reparse"
    }

    fn save(&self, ctx: &RecoveryContext<'_>, _root: &Root) {
        trace!(path = ctx.file_path, "nothing to save for reparse");
    }

    async fn restore(
        &self,
        ctx: &RecoveryContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<Root, RootError> {
        let text = ctx.text.get_value_async(cancel).await?;
        debug!(path = ctx.file_path, len = text.text.len(), "reparsing evicted root");
        Ok(self
            .parser
            .parse(ctx.file_path, ctx.options, &text.text, cancel)?)
    }
}

/// Rebuild roots from temporary storage
#[derive(Clone)]
pub struct RetrieveStrategy {
    storage: Arc<dyn StorageService>,
    fallback: Option<ReparseStrategy>,
}

impl RetrieveStrategy {
    /// Storage only; a storage miss is a contract violation
    #[inline]
    #[must_use]
    pub fn new(storage: Arc<dyn StorageService>) -> Self {
        Self {
            storage,
            fallback: None,
        }
    }

    /// Reparse when storage has nothing for the tree
    #[inline]
    #[must_use]
    pub fn with_fallback(mut self, fallback: ReparseStrategy) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Whether a storage miss falls back to reparsing
    #[inline]
    #[must_use]
    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

impl fmt::Debug for RetrieveStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrieveStrategy")
            .field("fallback", &self.fallback.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RecoveryStrategy for RetrieveStrategy {
    fn name(&self) -> &'static str {
        "retrieve"
    }

    fn save(&self, ctx: &RecoveryContext<'_>, root: &Root) {
        debug!(path = ctx.file_path, tree = %ctx.tree, "enqueueing root for storage");
        self.storage.enqueue_store(ctx.tree, Arc::clone(root));
    }

    async fn restore(
        &self,
        ctx: &RecoveryContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<Root, RootError> {
        if self.storage.can_retrieve(ctx.tree) {
            if let Some(root) = self.storage.retrieve(ctx.tree, cancel).await? {
                debug!(path = ctx.file_path, tree = %ctx.tree, "root retrieved from storage");
                return Ok(root);
            }
        }

        match &self.fallback {
            Some(reparse) => {
                debug!(path = ctx.file_path, tree = %ctx.tree, "storage miss, reparsing");
                reparse.restore(ctx, cancel).await
            }
            None => panic!(
                "no stored root for {} (tree {}) and no fallback to rebuild it",
                ctx.file_path, ctx.tree
            ),
        }
    }
}

//! Tree factory
//!
//! Decides per file whether a root is worth making recoverable and wires the
//! recovery strategy the configuration asks for.

use crate::config::{RecoveryMode, RootCacheConfig};
use crate::error::RootError;
use crate::recovery::{RecoveryStrategy, ReparseStrategy, RetrieveStrategy};
use crate::tree::{ParsedTree, RecoverableTree, SyntaxTree};
use rootcache_syntax::{
    EvictionCache, ParseOptions, Root, RootParser, StorageService, TextSource,
};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Builds trees that share one parser, eviction cache and storage
#[derive(Clone)]
pub struct TreeFactory {
    parser: Arc<dyn RootParser>,
    cache: Arc<dyn EvictionCache>,
    config: RootCacheConfig,
    strategy: Arc<dyn RecoveryStrategy>,
}

impl TreeFactory {
    /// Create a factory that recovers by reparsing
    #[must_use]
    pub fn new(
        parser: Arc<dyn RootParser>,
        cache: Arc<dyn EvictionCache>,
        config: RootCacheConfig,
    ) -> Self {
        let strategy: Arc<dyn RecoveryStrategy> =
            Arc::new(ReparseStrategy::new(Arc::clone(&parser)));
        Self {
            parser,
            cache,
            config,
            strategy,
        }
    }

    /// Use temporary storage when the configuration asks for serialization
    ///
    /// Without this, `RecoveryMode::Serialize` falls back to reparsing.
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn StorageService>) -> Self {
        if self.config.recovery == RecoveryMode::Serialize {
            let mut retrieve = RetrieveStrategy::new(storage);
            if self.config.retrieve_fallback_to_reparse {
                retrieve = retrieve.with_fallback(ReparseStrategy::new(Arc::clone(&self.parser)));
            }
            self.strategy = Arc::new(retrieve);
        }
        self
    }

    /// Configuration in effect
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RootCacheConfig {
        &self.config
    }

    /// Name of the recovery strategy given to new recoverable trees
    #[inline]
    #[must_use]
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Check if a root is large enough to be made recoverable
    #[inline]
    #[must_use]
    pub fn can_create_recoverable_tree(&self, root: &Root) -> bool {
        root.full_width() >= self.config.min_length_for_recoverable_tree
    }

    /// Wrap `root` in a tree, recoverable when it is large enough
    #[must_use]
    pub fn create_tree(
        &self,
        file_path: impl Into<String>,
        options: ParseOptions,
        text_source: Arc<dyn TextSource>,
        root: Root,
    ) -> Arc<dyn SyntaxTree> {
        let file_path = file_path.into();
        if self.can_create_recoverable_tree(&root) {
            return self.create_recoverable_tree(file_path, options, text_source, root);
        }
        debug!(path = %file_path, len = root.full_width(), "root below recoverable threshold");
        ParsedTree::new(file_path, options, text_source, &root)
    }

    /// Wrap `root` in a recoverable tree regardless of its size
    #[must_use]
    pub fn create_recoverable_tree(
        &self,
        file_path: impl Into<String>,
        options: ParseOptions,
        text_source: Arc<dyn TextSource>,
        root: Root,
    ) -> Arc<RecoverableTree> {
        RecoverableTree::new(
            file_path,
            options,
            text_source,
            root,
            Arc::clone(&self.strategy),
            Arc::clone(&self.cache),
        )
    }

    /// Load text, parse it and wrap the result in a tree
    ///
    /// # Errors
    /// Returns error if the text cannot be loaded or parsed, or `cancel` fires
    pub async fn parse_tree(
        &self,
        file_path: impl Into<String>,
        options: ParseOptions,
        text_source: Arc<dyn TextSource>,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn SyntaxTree>, RootError> {
        let file_path = file_path.into();
        let text = text_source.get_value_async(cancel).await?;
        let root = self.parser.parse(&file_path, &options, &text.text, cancel)?;
        Ok(self.create_tree(file_path, options, text_source, root))
    }
}

impl fmt::Debug for TreeFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeFactory")
            .field("config", &self.config)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

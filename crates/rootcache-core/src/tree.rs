//! Per-file syntax trees
//!
//! Two flavors share the [`SyntaxTree`] surface:
//!
//! - [`RecoverableTree`] owns a [`RecoverableRoot`], so its root can be
//!   evicted and rebuilt
//! - [`ParsedTree`] holds its root strongly for its whole life; used for
//!   files too small to be worth recovering

use crate::error::RootError;
use crate::recoverable::{RecoverableRoot, StateKind};
use crate::recovery::RecoveryStrategy;
use async_trait::async_trait;
use rootcache_syntax::{
    ContainingTree, EvictionCache, ParseOptions, Root, TextAndVersion, TextSource, TreeId,
};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A file's syntax tree
#[async_trait]
pub trait SyntaxTree: ContainingTree + fmt::Debug {
    /// File identity
    fn file_path(&self) -> &str;

    /// Options the tree was parsed with
    fn options(&self) -> &ParseOptions;

    /// Full width of the root
    fn length(&self) -> usize;

    /// Whether the root contains directives
    fn contains_directives(&self) -> bool;

    /// Whether the root can be evicted and rebuilt
    fn is_recoverable(&self) -> bool;

    /// The root, if available without work
    fn try_get_root(&self) -> Option<Root>;

    /// The root; blocks the calling thread if it must be rebuilt
    ///
    /// # Errors
    /// Returns error if rebuilding fails or `cancel` fires
    fn get_root(&self, cancel: &CancellationToken) -> Result<Root, RootError>;

    /// The root
    ///
    /// # Errors
    /// Returns error if rebuilding fails or `cancel` fires
    async fn get_root_async(&self, cancel: &CancellationToken) -> Result<Root, RootError>;

    /// The text, if available without work
    fn try_get_text(&self) -> Option<TextAndVersion>;

    /// The text; blocks the calling thread
    ///
    /// # Errors
    /// Returns error if loading fails or `cancel` fires
    fn get_text(&self, cancel: &CancellationToken) -> Result<TextAndVersion, RootError>;

    /// The text
    ///
    /// # Errors
    /// Returns error if loading fails or `cancel` fires
    async fn get_text_async(&self, cancel: &CancellationToken)
        -> Result<TextAndVersion, RootError>;
}

/// Tree whose root may be evicted and rebuilt on demand
pub struct RecoverableTree {
    id: TreeId,
    root: Arc<RecoverableRoot>,
}

impl RecoverableTree {
    /// Create the tree and bind its recoverable root
    ///
    /// `root` may belong to any tree; it is re-parented into the new one.
    #[must_use]
    pub fn new(
        file_path: impl Into<String>,
        options: ParseOptions,
        text_source: Arc<dyn TextSource>,
        root: Root,
        strategy: Arc<dyn RecoveryStrategy>,
        cache: Arc<dyn EvictionCache>,
    ) -> Arc<Self> {
        let recoverable =
            RecoverableRoot::new(file_path, options, text_source, root, strategy, cache);
        let tree = Arc::new(Self {
            id: TreeId::new(),
            root: Arc::clone(&recoverable),
        });
        let containing: Arc<dyn ContainingTree> = Arc::clone(&tree) as Arc<dyn ContainingTree>;
        recoverable.bind(&containing);
        tree
    }

    /// The recoverable root adapter
    #[inline]
    #[must_use]
    pub fn recoverable(&self) -> &Arc<RecoverableRoot> {
        &self.root
    }

    /// Current availability of the root
    #[must_use]
    pub fn state_kind(&self) -> StateKind {
        self.root.state_kind()
    }
}

impl ContainingTree for RecoverableTree {
    fn id(&self) -> TreeId {
        self.id
    }
}

#[async_trait]
impl SyntaxTree for RecoverableTree {
    fn file_path(&self) -> &str {
        self.root.file_path()
    }

    fn options(&self) -> &ParseOptions {
        self.root.options()
    }

    fn length(&self) -> usize {
        self.root.length()
    }

    fn contains_directives(&self) -> bool {
        self.root.contains_directives()
    }

    fn is_recoverable(&self) -> bool {
        true
    }

    fn try_get_root(&self) -> Option<Root> {
        self.root.try_get_root()
    }

    fn get_root(&self, cancel: &CancellationToken) -> Result<Root, RootError> {
        self.root.get_root(cancel)
    }

    async fn get_root_async(&self, cancel: &CancellationToken) -> Result<Root, RootError> {
        self.root.get_root_async(cancel).await
    }

    fn try_get_text(&self) -> Option<TextAndVersion> {
        self.root.try_get_text()
    }

    fn get_text(&self, cancel: &CancellationToken) -> Result<TextAndVersion, RootError> {
        self.root.get_text(cancel)
    }

    async fn get_text_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<TextAndVersion, RootError> {
        self.root.get_text_async(cancel).await
    }
}

impl fmt::Debug for RecoverableTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoverableTree")
            .field("id", &self.id)
            .field("root", &self.root)
            .finish()
    }
}

/// Tree that keeps its root for its whole life
pub struct ParsedTree {
    id: TreeId,
    file_path: String,
    options: ParseOptions,
    text_source: Arc<dyn TextSource>,
    root: Root,
}

impl ParsedTree {
    /// Create the tree, re-parenting `root` into it
    #[must_use]
    pub fn new(
        file_path: impl Into<String>,
        options: ParseOptions,
        text_source: Arc<dyn TextSource>,
        root: &Root,
    ) -> Arc<Self> {
        let id = TreeId::new();
        Arc::new(Self {
            id,
            file_path: file_path.into(),
            options,
            text_source,
            root: root.with_tree(id),
        })
    }
}

impl ContainingTree for ParsedTree {
    fn id(&self) -> TreeId {
        self.id
    }
}

#[async_trait]
impl SyntaxTree for ParsedTree {
    fn file_path(&self) -> &str {
        &self.file_path
    }

    fn options(&self) -> &ParseOptions {
        &self.options
    }

    fn length(&self) -> usize {
        self.root.full_width()
    }

    fn contains_directives(&self) -> bool {
        self.root.contains_directives()
    }

    fn is_recoverable(&self) -> bool {
        false
    }

    fn try_get_root(&self) -> Option<Root> {
        Some(Arc::clone(&self.root))
    }

    fn get_root(&self, cancel: &CancellationToken) -> Result<Root, RootError> {
        if cancel.is_cancelled() {
            return Err(RootError::Cancelled);
        }
        Ok(Arc::clone(&self.root))
    }

    async fn get_root_async(&self, cancel: &CancellationToken) -> Result<Root, RootError> {
        self.get_root(cancel)
    }

    fn try_get_text(&self) -> Option<TextAndVersion> {
        self.text_source.try_get_value()
    }

    fn get_text(&self, cancel: &CancellationToken) -> Result<TextAndVersion, RootError> {
        Ok(self.text_source.get_value(cancel)?)
    }

    async fn get_text_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<TextAndVersion, RootError> {
        Ok(self.text_source.get_value_async(cancel).await?)
    }
}

impl fmt::Debug for ParsedTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedTree")
            .field("id", &self.id)
            .field("file_path", &self.file_path)
            .field("length", &self.root.full_width())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootcache_syntax::{ConstantTextSource, LineParser, SyntaxRoot};

    #[test]
    fn parsed_tree_owns_its_root() {
        let root = SyntaxRoot::detached(LineParser::parse_text("x = 1\n"));
        let tree = ParsedTree::new(
            "a.py",
            ParseOptions::default(),
            Arc::new(ConstantTextSource::new("x = 1\n")),
            &root,
        );

        let held = tree.try_get_root().unwrap();
        assert_eq!(held.tree_id(), tree.id());
        assert!(held.is_equivalent_to(&root));
        assert!(!tree.is_recoverable());
        assert_eq!(tree.length(), 6);
    }

    #[test]
    fn parsed_tree_get_root_honors_cancellation() {
        let root = SyntaxRoot::detached(LineParser::parse_text("x\n"));
        let tree = ParsedTree::new(
            "a.py",
            ParseOptions::default(),
            Arc::new(ConstantTextSource::new("x\n")),
            &root,
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(tree.get_root(&cancel).unwrap_err(), RootError::Cancelled);
    }
}

//! Collaborators the recoverable root relies on
//!
//! None of these are implemented by the cache itself; hosts plug their own
//! parser, text loader, eviction cache and storage in through these traits.

use crate::error::{ParseError, StorageError, TextError};
use crate::options::ParseOptions;
use crate::text::{SourceText, TextAndVersion};
use crate::tree::{Root, SyntaxRoot, TreeId};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Lazily resolvable access to a file's text
#[async_trait]
pub trait TextSource: Send + Sync {
    /// Text if it is available without doing any work
    fn try_get_value(&self) -> Option<TextAndVersion>;

    /// Resolve text, blocking the calling thread
    ///
    /// # Errors
    /// Returns error if loading fails or `cancel` fires
    fn get_value(&self, cancel: &CancellationToken) -> Result<TextAndVersion, TextError>;

    /// Resolve text without blocking a worker thread
    ///
    /// # Errors
    /// Returns error if loading fails or `cancel` fires
    async fn get_value_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<TextAndVersion, TextError>;
}

/// Turns source text into a root
pub trait RootParser: Send + Sync {
    /// Parse `text` as the contents of `path`
    ///
    /// The returned root may belong to any tree; callers re-parent it.
    ///
    /// # Errors
    /// Returns error if the text cannot be parsed or `cancel` fires
    fn parse(
        &self,
        path: &str,
        options: &ParseOptions,
        text: &SourceText,
        cancel: &CancellationToken,
    ) -> Result<Root, ParseError>;
}

/// The per-file tree that owns the current root
pub trait ContainingTree: Send + Sync {
    /// Identity stamped on every root this tree owns
    fn id(&self) -> TreeId;

    /// Re-parent `root` into this tree
    ///
    /// Must not touch any state of the caller.
    fn clone_node_as_root(&self, root: &SyntaxRoot) -> Root {
        root.with_tree(self.id())
    }
}

/// Callback invoked by an eviction cache when it lets go of a root
pub type EvictionCallback = Arc<dyn Fn(Root) + Send + Sync>;

/// Shared, size-bounded store of strongly-held roots
pub trait EvictionCache: Send + Sync {
    /// Hold `root` strongly until the cache decides to let it go, then call
    /// `on_evicted` with it.
    ///
    /// Registering a root the cache already holds refreshes its recency.
    fn register(&self, root: Root, on_evicted: EvictionCallback);
}

/// Persistent temporary storage for serialized roots
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Whether `retrieve` would find a root for `tree` right now
    fn can_retrieve(&self, tree: TreeId) -> bool;

    /// Load the root stored for `tree`
    ///
    /// # Errors
    /// Returns error if the payload is damaged or `cancel` fires
    async fn retrieve(
        &self,
        tree: TreeId,
        cancel: &CancellationToken,
    ) -> Result<Option<Root>, StorageError>;

    /// Store `root` for `tree` in the background
    fn enqueue_store(&self, tree: TreeId, root: Root);
}

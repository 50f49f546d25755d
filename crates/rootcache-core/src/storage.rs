//! In-memory temporary storage for evicted roots
//!
//! Roots are serialized to JSON and stored with a blake3 checksum of the
//! payload. Writes are queued onto the current tokio runtime when there is
//! one, and done inline otherwise; `can_retrieve` reports false until the
//! write has landed.

use async_trait::async_trait;
use dashmap::DashMap;
use rootcache_syntax::{
    Checksum, GreenNode, Root, StorageError, StorageService, SyntaxRoot, TreeId,
};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Storage counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Roots currently stored
    pub stored: usize,
    /// Completed writes
    pub stores: u64,
    /// Successful reads
    pub retrievals: u64,
    /// Writes queued but not yet landed
    pub pending: usize,
}

struct StoredRoot {
    checksum: Checksum,
    payload: Vec<u8>,
}

#[derive(Default)]
struct Inner {
    roots: DashMap<TreeId, StoredRoot>,
    stores: AtomicU64,
    retrievals: AtomicU64,
    pending: AtomicUsize,
}

impl Inner {
    fn write(&self, tree: TreeId, root: &Root) {
        match serde_json::to_vec(root.green().as_ref()) {
            Ok(payload) => {
                let checksum = Checksum::compute(&payload);
                trace!(%tree, bytes = payload.len(), checksum = %checksum.short(), "root stored");
                self.roots.insert(tree, StoredRoot { checksum, payload });
                self.stores.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => warn!(%tree, error = %err, "failed to serialize root"),
        }
    }
}

/// Temporary storage keyed by tree identity
#[derive(Clone, Default)]
pub struct TemporaryStorage {
    inner: Arc<Inner>,
}

impl TemporaryStorage {
    /// Create empty storage
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored roots
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.roots.len()
    }

    /// Check if nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.roots.is_empty()
    }

    /// Drop the stored root of `tree`
    pub fn remove(&self, tree: TreeId) -> bool {
        self.inner.roots.remove(&tree).is_some()
    }

    /// Wait until every queued write has landed
    pub async fn flush(&self) {
        while self.inner.pending.load(Ordering::Acquire) > 0 {
            tokio::task::yield_now().await;
        }
    }

    /// Get storage counters
    #[must_use]
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            stored: self.inner.roots.len(),
            stores: self.inner.stores.load(Ordering::Relaxed),
            retrievals: self.inner.retrievals.load(Ordering::Relaxed),
            pending: self.inner.pending.load(Ordering::Acquire),
        }
    }
}

#[async_trait]
impl StorageService for TemporaryStorage {
    fn can_retrieve(&self, tree: TreeId) -> bool {
        self.inner.roots.contains_key(&tree)
    }

    async fn retrieve(
        &self,
        tree: TreeId,
        cancel: &CancellationToken,
    ) -> Result<Option<Root>, StorageError> {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        let green = {
            let Some(stored) = self.inner.roots.get(&tree) else {
                return Ok(None);
            };
            let actual = Checksum::compute(&stored.payload);
            if actual != stored.checksum {
                return Err(StorageError::Corrupt {
                    tree,
                    reason: format!(
                        "checksum mismatch: expected {}, found {}",
                        stored.checksum.short(),
                        actual.short()
                    ),
                });
            }
            serde_json::from_slice::<GreenNode>(&stored.payload)?
        };

        self.inner.retrievals.fetch_add(1, Ordering::Relaxed);
        trace!(%tree, "root retrieved");
        Ok(Some(SyntaxRoot::detached(Arc::new(green))))
    }

    fn enqueue_store(&self, tree: TreeId, root: Root) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                self.inner.pending.fetch_add(1, Ordering::AcqRel);
                let inner = Arc::clone(&self.inner);
                handle.spawn(async move {
                    inner.write(tree, &root);
                    inner.pending.fetch_sub(1, Ordering::AcqRel);
                });
            }
            Err(_) => self.inner.write(tree, &root),
        }
    }
}

impl fmt::Debug for TemporaryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemporaryStorage")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootcache_syntax::LineParser;

    fn sample_root() -> Root {
        SyntaxRoot::detached(LineParser::parse_text("#if DEBUG\nlog();\n#endif\n"))
    }

    #[test]
    fn inline_write_without_runtime() {
        let storage = TemporaryStorage::new();
        let tree = TreeId::new();

        assert!(!storage.can_retrieve(tree));
        storage.enqueue_store(tree, sample_root());
        assert!(storage.can_retrieve(tree));
        assert_eq!(storage.stats().stores, 1);
    }

    #[tokio::test]
    async fn retrieve_returns_equivalent_root() {
        let storage = TemporaryStorage::new();
        let tree = TreeId::new();
        let original = sample_root();

        storage.enqueue_store(tree, Arc::clone(&original));
        storage.flush().await;

        let restored = storage
            .retrieve(tree, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(restored.is_equivalent_to(&original));
        assert!(restored.contains_directives());
        assert_ne!(restored.tree_id(), tree);
        assert_eq!(storage.stats().retrievals, 1);
    }

    #[tokio::test]
    async fn retrieve_missing_is_none() {
        let storage = TemporaryStorage::new();
        let found = storage
            .retrieve(TreeId::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn retrieve_honors_cancellation() {
        let storage = TemporaryStorage::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = storage.retrieve(TreeId::new(), &cancel).await.unwrap_err();
        assert_eq!(err, StorageError::Cancelled);
    }

    #[tokio::test]
    async fn damaged_payload_is_corrupt() {
        let storage = TemporaryStorage::new();
        let tree = TreeId::new();
        storage.enqueue_store(tree, sample_root());
        storage.flush().await;

        storage
            .inner
            .roots
            .get_mut(&tree)
            .unwrap()
            .payload
            .push(b' ');

        let err = storage
            .retrieve(tree, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { tree: t, .. } if t == tree));
    }

    #[tokio::test]
    async fn remove_forgets_root() {
        let storage = TemporaryStorage::new();
        let tree = TreeId::new();
        storage.enqueue_store(tree, sample_root());
        storage.flush().await;

        assert!(storage.remove(tree));
        assert!(!storage.can_retrieve(tree));
        assert!(storage.is_empty());
    }
}

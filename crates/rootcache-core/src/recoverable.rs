//! Recoverable root
//!
//! [`RecoverableRoot`] sits between a containing tree and the shared eviction
//! cache. It hands out the tree's root while one is alive and rebuilds it
//! through a [`RecoveryStrategy`] when the cache has let go of it and nobody
//! else is holding it either.
//!
//! # State machine
//!
//! ```text
//!            eviction                 weak handle dead
//!   Strong ───────────► Weak ─────────────────────────► Recomputing
//!     ▲                                                     │
//!     └──────────────────── restore succeeded ──────────────┘
//! ```
//!
//! The in-flight computation of the `Recomputing` state lives in a
//! [`SingleFlight`], so every concurrent caller awaits the same restore.
//! Restores and eviction saves are serialized by a per-root gate.
//!
//! A restored root must reproduce the content the adapter was created with.
//! If the text behind a reparse changed in the meantime the restore fails with
//! [`RootError::TextChanged`] instead of handing out a different tree.

use crate::error::RootError;
use crate::recovery::{RecoveryContext, RecoveryStrategy};
use parking_lot::Mutex;
use rootcache_memo::{FlightError, SingleFlight};
use rootcache_syntax::{
    Checksum, ContainingTree, EvictionCache, EvictionCallback, ParseOptions, Root, SyntaxRoot,
    TextAndVersion, TextSource, TreeId,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Observable tag of a root's availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    /// Root is strongly held
    Strong,
    /// Root survives only if someone else holds it
    Weak,
    /// Root is gone and must be rebuilt
    Recomputing,
}

enum RootState {
    Strong(Root),
    Weak(Weak<SyntaxRoot>),
    Recomputing,
}

impl RootState {
    fn kind(&self) -> StateKind {
        match self {
            Self::Strong(_) => StateKind::Strong,
            Self::Weak(_) => StateKind::Weak,
            Self::Recomputing => StateKind::Recomputing,
        }
    }
}

/// Set once by `bind`
struct Binding {
    tree: Weak<dyn ContainingTree>,
    tree_id: TreeId,
    on_evicted: EvictionCallback,
}

/// A file's root that the eviction cache may drop and this object will rebuild
pub struct RecoverableRoot {
    file_path: String,
    options: ParseOptions,
    text_source: Arc<dyn TextSource>,
    length: usize,
    checksum: Checksum,
    contains_directives: bool,
    strategy: Arc<dyn RecoveryStrategy>,
    cache: Arc<dyn EvictionCache>,
    binding: OnceLock<Binding>,
    state: Mutex<RootState>,
    is_saved: AtomicBool,
    gate: tokio::sync::Mutex<()>,
    pending_save: Mutex<Option<Root>>,
    recompute: SingleFlight<Root, RootError>,
}

impl RecoverableRoot {
    /// Wrap a freshly produced root
    ///
    /// The object is unusable until [`bind`](Self::bind) is called.
    #[must_use]
    pub fn new(
        file_path: impl Into<String>,
        options: ParseOptions,
        text_source: Arc<dyn TextSource>,
        root: Root,
        strategy: Arc<dyn RecoveryStrategy>,
        cache: Arc<dyn EvictionCache>,
    ) -> Arc<Self> {
        Arc::new(Self {
            file_path: file_path.into(),
            options,
            text_source,
            length: root.full_width(),
            checksum: Checksum::compute(root.text().as_bytes()),
            contains_directives: root.contains_directives(),
            strategy,
            cache,
            binding: OnceLock::new(),
            state: Mutex::new(RootState::Strong(root)),
            is_saved: AtomicBool::new(false),
            gate: tokio::sync::Mutex::new(()),
            pending_save: Mutex::new(None),
            recompute: SingleFlight::new(),
        })
    }

    /// Attach to the containing tree and start participating in the cache
    ///
    /// Re-parents the held root into `tree` and registers it with the
    /// eviction cache.
    ///
    /// # Panics
    /// If called more than once.
    pub fn bind(self: &Arc<Self>, tree: &Arc<dyn ContainingTree>) {
        let weak_self = Arc::downgrade(self);
        let on_evicted: EvictionCallback = Arc::new(move |root: Root| {
            if let Some(this) = weak_self.upgrade() {
                this.on_evicted(root);
            }
        });
        let binding = Binding {
            tree: Arc::downgrade(tree),
            tree_id: tree.id(),
            on_evicted,
        };
        assert!(
            self.binding.set(binding).is_ok(),
            "recoverable root for {} bound twice",
            self.file_path
        );

        let root = {
            let mut state = self.state.lock();
            let RootState::Strong(current) = &*state else {
                panic!(
                    "recoverable root for {} lost its root before bind",
                    self.file_path
                );
            };
            let root = self.reparent(tree.as_ref(), current);
            *state = RootState::Strong(Arc::clone(&root));
            root
        };
        debug!(path = %self.file_path, tree = %tree.id(), len = self.length, "recoverable root bound");
        self.touch(&root);
    }

    /// File identity
    #[inline]
    #[must_use]
    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Options the root was parsed with
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// Full width of the root; constant for the tree
    #[inline]
    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Whether the root contains directives; constant for the tree
    #[inline]
    #[must_use]
    pub fn contains_directives(&self) -> bool {
        self.contains_directives
    }

    /// Name of the recovery strategy
    #[inline]
    #[must_use]
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Current availability of the root
    #[must_use]
    pub fn state_kind(&self) -> StateKind {
        self.state.lock().kind()
    }

    /// Whether the save step has run
    #[must_use]
    pub fn is_saved(&self) -> bool {
        self.is_saved.load(Ordering::Acquire)
    }

    /// Number of recomputations started so far
    #[must_use]
    pub fn recomputations(&self) -> u64 {
        self.recompute.epochs_started()
    }

    /// The root, if one is alive; never recomputes
    #[must_use]
    pub fn try_get_root(&self) -> Option<Root> {
        let root = self.live_root()?;
        self.touch(&root);
        Some(root)
    }

    /// The root, rebuilding it if needed; blocks the calling thread
    ///
    /// Must not be called from an async context.
    ///
    /// # Errors
    /// Returns error if recomputation fails or `cancel` fires
    pub fn get_root(self: &Arc<Self>, cancel: &CancellationToken) -> Result<Root, RootError> {
        match self.try_get_root() {
            Some(root) => Ok(root),
            None => futures::executor::block_on(self.recompute_root(cancel)),
        }
    }

    /// The root, rebuilding it if needed
    ///
    /// # Errors
    /// Returns error if recomputation fails or `cancel` fires
    pub async fn get_root_async(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<Root, RootError> {
        match self.try_get_root() {
            Some(root) => Ok(root),
            None => self.recompute_root(cancel).await,
        }
    }

    async fn recompute_root(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<Root, RootError> {
        let this = Arc::clone(self);
        let root = self
            .recompute
            .run(cancel, move |token| this.recover(token))
            .await
            .map_err(|err| match err {
                FlightError::Cancelled => RootError::Cancelled,
                FlightError::Failed(err) => err,
            })?;

        self.touch(&root);
        Ok(root)
    }

    /// The text, if available without work
    #[must_use]
    pub fn try_get_text(&self) -> Option<TextAndVersion> {
        self.text_source.try_get_value()
    }

    /// The text; blocks the calling thread
    ///
    /// # Errors
    /// Returns error if loading fails or `cancel` fires
    pub fn get_text(&self, cancel: &CancellationToken) -> Result<TextAndVersion, RootError> {
        Ok(self.text_source.get_value(cancel)?)
    }

    /// The text
    ///
    /// # Errors
    /// Returns error if loading fails or `cancel` fires
    pub async fn get_text_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<TextAndVersion, RootError> {
        Ok(self.text_source.get_value_async(cancel).await?)
    }

    /// Eviction notification from the cache
    ///
    /// The save step runs at most once. If a restore holds the gate, the save
    /// is left for it to perform on release instead of blocking here.
    fn on_evicted(&self, root: Root) {
        trace!(path = %self.file_path, "root evicted");
        if !self.is_saved() {
            self.pending_save
                .lock()
                .get_or_insert_with(|| Arc::clone(&root));
            self.drain_pending_save();
        }
        *self.state.lock() = RootState::Weak(Arc::downgrade(&root));
    }

    fn drain_pending_save(&self) {
        let Some(binding) = self.binding.get() else {
            return;
        };
        loop {
            {
                let Ok(_gate) = self.gate.try_lock() else {
                    return;
                };
                let pending = self.pending_save.lock().take();
                if let Some(root) = pending {
                    if !self.is_saved() {
                        self.strategy.save(&self.context(binding.tree_id), &root);
                        self.is_saved.store(true, Ordering::Release);
                        debug!(path = %self.file_path, strategy = self.strategy.name(), "root saved");
                    }
                }
            }
            // Someone may have queued a save while we held the gate
            if self.pending_save.lock().is_none() {
                return;
            }
        }
    }

    fn live_root(&self) -> Option<Root> {
        let mut state = self.state.lock();
        let upgraded = match &*state {
            RootState::Strong(root) => return Some(Arc::clone(root)),
            RootState::Weak(weak) => weak.upgrade(),
            RootState::Recomputing => return None,
        };
        if upgraded.is_none() {
            trace!(path = %self.file_path, "weak root reclaimed");
            *state = RootState::Recomputing;
        }
        upgraded
    }

    fn touch(&self, root: &Root) {
        if let Some(binding) = self.binding.get() {
            self.cache
                .register(Arc::clone(root), Arc::clone(&binding.on_evicted));
        }
    }

    fn context(&self, tree: TreeId) -> RecoveryContext<'_> {
        RecoveryContext {
            file_path: &self.file_path,
            options: &self.options,
            text: self.text_source.as_ref(),
            tree,
        }
    }

    fn reparent(&self, tree: &dyn ContainingTree, raw: &SyntaxRoot) -> Root {
        let root = tree.clone_node_as_root(raw);
        assert_eq!(
            root.tree_id(),
            tree.id(),
            "re-parented root for {} is owned by another tree",
            self.file_path
        );
        root
    }

    async fn lock_gate(&self) -> GateGuard<'_> {
        let guard = self.gate.lock().await;
        GateGuard {
            owner: self,
            guard: Some(guard),
        }
    }

    async fn recover(self: Arc<Self>, cancel: CancellationToken) -> Result<Root, RootError> {
        let _gate = self.lock_gate().await;

        if let Some(root) = self.live_root() {
            trace!(path = %self.file_path, "root already restored by previous gate holder");
            return Ok(root);
        }

        let Some(binding) = self.binding.get() else {
            panic!("recoverable root for {} used before bind", self.file_path);
        };
        let tree = binding.tree.upgrade().ok_or_else(|| RootError::Detached {
            path: self.file_path.clone(),
        })?;

        debug!(path = %self.file_path, strategy = self.strategy.name(), "restoring root");
        let raw = self
            .strategy
            .restore(&self.context(binding.tree_id), &cancel)
            .await?;
        if raw.full_width() != self.length
            || Checksum::compute(raw.text().as_bytes()) != self.checksum
        {
            warn!(
                path = %self.file_path,
                expected = self.length,
                found = raw.full_width(),
                "restored root does not match the original content"
            );
            return Err(RootError::TextChanged {
                path: self.file_path.clone(),
            });
        }
        let root = self.reparent(tree.as_ref(), &raw);

        *self.state.lock() = RootState::Strong(Arc::clone(&root));
        debug!(path = %self.file_path, "root restored");
        Ok(root)
    }
}

impl fmt::Debug for RecoverableRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoverableRoot")
            .field("file_path", &self.file_path)
            .field("length", &self.length)
            .field("strategy", &self.strategy.name())
            .field("state", &self.state_kind())
            .field("is_saved", &self.is_saved())
            .finish_non_exhaustive()
    }
}

/// Gate held for a restore; performs queued saves after release
struct GateGuard<'a> {
    owner: &'a RecoverableRoot,
    guard: Option<tokio::sync::MutexGuard<'a, ()>>,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.owner.drain_pending_save();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::{ReparseStrategy, RetrieveStrategy};
    use rootcache_syntax::{ConstantTextSource, LineParser, RootParser, SourceText, StorageService};
    use rootcache_test_utils::{ManualEvictionCache, RecordingStorage};

    struct Owner(TreeId);

    impl ContainingTree for Owner {
        fn id(&self) -> TreeId {
            self.0
        }
    }

    /// Breaks the re-parenting contract on purpose
    struct Impostor(TreeId);

    impl ContainingTree for Impostor {
        fn id(&self) -> TreeId {
            self.0
        }

        fn clone_node_as_root(&self, root: &SyntaxRoot) -> Root {
            root.with_tree(TreeId::new())
        }
    }

    const TEXT: &str = "fn main() {\n    run();\n}\n";

    fn adapter(cache: &Arc<ManualEvictionCache>) -> Arc<RecoverableRoot> {
        adapter_with(cache, Arc::new(ReparseStrategy::new(Arc::new(LineParser))))
    }

    fn adapter_with(
        cache: &Arc<ManualEvictionCache>,
        strategy: Arc<dyn RecoveryStrategy>,
    ) -> Arc<RecoverableRoot> {
        let text = SourceText::new(TEXT);
        let root = LineParser
            .parse("main.rs", &ParseOptions::default(), &text, &CancellationToken::new())
            .unwrap();
        RecoverableRoot::new(
            "main.rs",
            ParseOptions::default(),
            Arc::new(ConstantTextSource::new(text)),
            root,
            strategy,
            Arc::clone(cache) as Arc<dyn EvictionCache>,
        )
    }

    #[test]
    fn bind_reparents_and_registers() {
        let cache = Arc::new(ManualEvictionCache::new());
        let recoverable = adapter(&cache);
        let owner: Arc<dyn ContainingTree> = Arc::new(Owner(TreeId::new()));

        recoverable.bind(&owner);

        let root = recoverable.try_get_root().unwrap();
        assert_eq!(root.tree_id(), owner.id());
        assert!(cache.contains(owner.id()));
        assert_eq!(recoverable.state_kind(), StateKind::Strong);
        assert_eq!(recoverable.length(), TEXT.len());
    }

    #[test]
    #[should_panic(expected = "bound twice")]
    fn double_bind_panics() {
        let cache = Arc::new(ManualEvictionCache::new());
        let recoverable = adapter(&cache);
        let owner: Arc<dyn ContainingTree> = Arc::new(Owner(TreeId::new()));
        recoverable.bind(&owner);
        recoverable.bind(&owner);
    }

    #[test]
    #[should_panic(expected = "owned by another tree")]
    fn wrong_owner_after_reparent_panics() {
        let cache = Arc::new(ManualEvictionCache::new());
        let recoverable = adapter(&cache);
        let impostor: Arc<dyn ContainingTree> = Arc::new(Impostor(TreeId::new()));
        recoverable.bind(&impostor);
    }

    #[test]
    fn weak_root_survives_while_held_elsewhere() {
        let cache = Arc::new(ManualEvictionCache::new());
        let recoverable = adapter(&cache);
        let owner: Arc<dyn ContainingTree> = Arc::new(Owner(TreeId::new()));
        recoverable.bind(&owner);

        let held = recoverable.try_get_root().unwrap();
        assert!(cache.evict(owner.id()));
        assert_eq!(recoverable.state_kind(), StateKind::Weak);

        // Still reachable through `held`, and the hit re-registers it
        let again = recoverable.try_get_root().unwrap();
        assert!(Arc::ptr_eq(&held, &again));
        assert!(cache.contains(owner.id()));
        assert_eq!(recoverable.state_kind(), StateKind::Weak);
    }

    #[test]
    fn dead_weak_root_moves_to_recomputing() {
        let cache = Arc::new(ManualEvictionCache::new());
        let recoverable = adapter(&cache);
        let owner: Arc<dyn ContainingTree> = Arc::new(Owner(TreeId::new()));
        recoverable.bind(&owner);

        assert!(cache.evict(owner.id()));
        assert!(recoverable.try_get_root().is_none());
        assert_eq!(recoverable.state_kind(), StateKind::Recomputing);
        assert!(recoverable.is_saved());
    }

    #[test]
    fn blocking_get_root_recovers() {
        let cache = Arc::new(ManualEvictionCache::new());
        let recoverable = adapter(&cache);
        let owner: Arc<dyn ContainingTree> = Arc::new(Owner(TreeId::new()));
        recoverable.bind(&owner);
        assert!(cache.evict(owner.id()));

        let root = recoverable.get_root(&CancellationToken::new()).unwrap();
        assert_eq!(root.text(), TEXT);
        assert_eq!(root.tree_id(), owner.id());
        assert_eq!(recoverable.state_kind(), StateKind::Strong);
        assert_eq!(recoverable.recomputations(), 1);
    }

    #[test]
    fn dropped_tree_reports_detached() {
        let cache = Arc::new(ManualEvictionCache::new());
        let recoverable = adapter(&cache);
        let owner: Arc<dyn ContainingTree> = Arc::new(Owner(TreeId::new()));
        recoverable.bind(&owner);
        let id = owner.id();
        drop(owner);

        assert!(cache.evict(id));
        let err = recoverable.get_root(&CancellationToken::new()).unwrap_err();
        assert!(matches!(err, RootError::Detached { .. }));
    }

    #[test]
    fn text_accessors_pass_through() {
        let cache = Arc::new(ManualEvictionCache::new());
        let recoverable = adapter(&cache);
        assert_eq!(recoverable.try_get_text().unwrap().text.as_str(), TEXT);
        assert_eq!(
            recoverable
                .get_text(&CancellationToken::new())
                .unwrap()
                .text
                .as_str(),
            TEXT
        );
    }

    #[test]
    fn blocking_get_root_serves_live_weak_root() {
        let cache = Arc::new(ManualEvictionCache::new());
        let recoverable = adapter(&cache);
        let owner: Arc<dyn ContainingTree> = Arc::new(Owner(TreeId::new()));
        recoverable.bind(&owner);

        let held = recoverable.try_get_root().unwrap();
        assert!(cache.evict(owner.id()));

        let root = recoverable.get_root(&CancellationToken::new()).unwrap();
        assert!(Arc::ptr_eq(&held, &root));
        assert_eq!(recoverable.state_kind(), StateKind::Weak);
        assert_eq!(recoverable.recomputations(), 0);
    }

    #[tokio::test]
    async fn eviction_while_gate_held_saves_on_release() {
        let cache = Arc::new(ManualEvictionCache::new());
        let storage = Arc::new(RecordingStorage::new());
        let recoverable = adapter_with(
            &cache,
            Arc::new(RetrieveStrategy::new(
                Arc::clone(&storage) as Arc<dyn StorageService>
            )),
        );
        let owner: Arc<dyn ContainingTree> = Arc::new(Owner(TreeId::new()));
        recoverable.bind(&owner);
        let root = recoverable.try_get_root().unwrap();

        let gate = recoverable.lock_gate().await;
        recoverable.on_evicted(Arc::clone(&root));

        assert_eq!(storage.enqueues(), 0);
        assert_eq!(recoverable.state_kind(), StateKind::Weak);
        assert!(!recoverable.is_saved());

        drop(gate);

        assert_eq!(storage.enqueues(), 1);
        assert!(recoverable.is_saved());
        assert!(storage.can_retrieve(owner.id()));
    }

    #[tokio::test]
    async fn repeated_eviction_while_gate_held_saves_once() {
        let cache = Arc::new(ManualEvictionCache::new());
        let storage = Arc::new(RecordingStorage::new());
        let recoverable = adapter_with(
            &cache,
            Arc::new(RetrieveStrategy::new(
                Arc::clone(&storage) as Arc<dyn StorageService>
            )),
        );
        let owner: Arc<dyn ContainingTree> = Arc::new(Owner(TreeId::new()));
        recoverable.bind(&owner);
        let root = recoverable.try_get_root().unwrap();

        let gate = recoverable.lock_gate().await;
        recoverable.on_evicted(Arc::clone(&root));
        recoverable.on_evicted(Arc::clone(&root));
        drop(gate);
        recoverable.on_evicted(root);

        assert_eq!(storage.enqueues(), 1);
    }
}

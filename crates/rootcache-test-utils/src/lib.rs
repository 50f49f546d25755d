//! Testing utilities for the rootcache workspace
//!
//! Instrumented stand-ins for the host collaborators: a parser that counts
//! invocations, a text source that blocks until released, an eviction cache
//! driven by hand and a storage service that records every call.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rootcache_syntax::{
    ContainingTree, EvictionCache, EvictionCallback, GreenNode, LineParser, ParseError,
    ParseOptions, Root, RootParser, SourceText, StorageError, StorageService, SyntaxRoot,
    TextAndVersion, TextError, TextSource, TreeId, VersionStamp,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Source text of roughly `lines` lines, with a directive every tenth line
pub fn sample_text(lines: usize) -> String {
    let mut text = String::new();
    for i in 0..lines {
        if i % 10 == 0 {
            text.push_str(&format!("#region block_{i}\n"));
        } else {
            text.push_str(&format!("    let value_{i} = compute({i});\n"));
        }
    }
    text
}

/// Parse `text` into a root owned by no particular tree
pub fn parse_detached(text: &str) -> Root {
    SyntaxRoot::detached(LineParser::parse_text(text))
}

/// `LineParser` that counts how often it runs
#[derive(Debug, Default)]
pub struct CountingParser {
    calls: AtomicUsize,
}

impl CountingParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RootParser for CountingParser {
    fn parse(
        &self,
        path: &str,
        options: &ParseOptions,
        text: &SourceText,
        cancel: &CancellationToken,
    ) -> Result<Root, ParseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        LineParser.parse(path, options, text, cancel)
    }
}

/// Parser that always fails
#[derive(Debug, Default)]
pub struct FailingParser;

impl RootParser for FailingParser {
    fn parse(
        &self,
        path: &str,
        _options: &ParseOptions,
        _text: &SourceText,
        _cancel: &CancellationToken,
    ) -> Result<Root, ParseError> {
        Err(ParseError::syntax(path, "unexpected end of input"))
    }
}

/// Text source whose async loads wait until `open` is called
#[derive(Debug)]
pub struct GatedTextSource {
    text: SourceText,
    gate: watch::Sender<bool>,
    requests: AtomicUsize,
}

impl GatedTextSource {
    pub fn new(text: impl Into<SourceText>) -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            text: text.into(),
            gate,
            requests: AtomicUsize::new(0),
        }
    }

    /// Let every pending and future load through
    pub fn open(&self) {
        self.gate.send_replace(true);
    }

    /// Loads started so far
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn value(&self) -> TextAndVersion {
        TextAndVersion::new(self.text.clone(), VersionStamp(1))
    }
}

#[async_trait]
impl TextSource for GatedTextSource {
    fn try_get_value(&self) -> Option<TextAndVersion> {
        None
    }

    fn get_value(&self, cancel: &CancellationToken) -> Result<TextAndVersion, TextError> {
        futures::executor::block_on(self.get_value_async(cancel))
    }

    async fn get_value_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<TextAndVersion, TextError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.subscribe();
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TextError::Cancelled),
            opened = gate.wait_for(|open| *open) => match opened {
                Ok(_) => Ok(self.value()),
                Err(_) => Err(TextError::Cancelled),
            },
        }
    }
}

struct Registration {
    root: Root,
    on_evicted: EvictionCallback,
}

/// Eviction cache that only evicts when told to
#[derive(Default)]
pub struct ManualEvictionCache {
    held: Mutex<HashMap<TreeId, Registration>>,
    callbacks: Mutex<HashMap<TreeId, EvictionCallback>>,
    registrations: AtomicUsize,
}

impl ManualEvictionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, tree: TreeId) -> bool {
        self.held.lock().contains_key(&tree)
    }

    pub fn len(&self) -> usize {
        self.held.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.lock().is_empty()
    }

    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Drop the held root of `tree` and deliver its callback
    pub fn evict(&self, tree: TreeId) -> bool {
        let Some(registration) = self.held.lock().remove(&tree) else {
            return false;
        };
        (registration.on_evicted)(registration.root);
        true
    }

    /// Evict everything
    pub fn evict_all(&self) -> usize {
        let drained: Vec<Registration> = self.held.lock().drain().map(|(_, r)| r).collect();
        let count = drained.len();
        for registration in drained {
            (registration.on_evicted)(registration.root);
        }
        count
    }

    /// Deliver a spurious eviction for `tree` with `root`, held or not
    pub fn notify_evicted(&self, tree: TreeId, root: Root) -> bool {
        let Some(callback) = self.callbacks.lock().get(&tree).cloned() else {
            return false;
        };
        callback(root);
        true
    }
}

impl EvictionCache for ManualEvictionCache {
    fn register(&self, root: Root, on_evicted: EvictionCallback) {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        let tree = root.tree_id();
        self.callbacks.lock().insert(tree, Arc::clone(&on_evicted));
        self.held.lock().insert(tree, Registration { root, on_evicted });
    }
}

/// A call made against `RecordingStorage`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageCall {
    CanRetrieve(TreeId),
    Retrieve(TreeId),
    Enqueue(TreeId),
}

/// Storage service that keeps roots in memory and records every call
#[derive(Debug, Default)]
pub struct RecordingStorage {
    roots: Mutex<HashMap<TreeId, Arc<GreenNode>>>,
    calls: Mutex<Vec<StorageCall>>,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<StorageCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&StorageCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| matches(call)).count()
    }

    pub fn enqueues(&self) -> usize {
        self.count(|call| matches!(call, StorageCall::Enqueue(_)))
    }

    pub fn retrieves(&self) -> usize {
        self.count(|call| matches!(call, StorageCall::Retrieve(_)))
    }

    /// Lose whatever was stored for `tree`
    pub fn forget(&self, tree: TreeId) -> bool {
        self.roots.lock().remove(&tree).is_some()
    }
}

#[async_trait]
impl StorageService for RecordingStorage {
    fn can_retrieve(&self, tree: TreeId) -> bool {
        self.calls.lock().push(StorageCall::CanRetrieve(tree));
        self.roots.lock().contains_key(&tree)
    }

    async fn retrieve(
        &self,
        tree: TreeId,
        cancel: &CancellationToken,
    ) -> Result<Option<Root>, StorageError> {
        self.calls.lock().push(StorageCall::Retrieve(tree));
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        let green = self.roots.lock().get(&tree).cloned();
        Ok(green.map(SyntaxRoot::detached))
    }

    fn enqueue_store(&self, tree: TreeId, root: Root) {
        self.calls.lock().push(StorageCall::Enqueue(tree));
        self.roots.lock().insert(tree, Arc::clone(root.green()));
    }
}

/// Minimal containing tree
#[derive(Debug)]
pub struct OwnerTree {
    id: TreeId,
}

impl OwnerTree {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { id: TreeId::new() })
    }

    pub fn shared() -> Arc<dyn ContainingTree> {
        Self::new()
    }
}

impl ContainingTree for OwnerTree {
    fn id(&self) -> TreeId {
        self.id
    }
}

//! Rootcache workload simulator
//!
//! Builds a population of synthetic files behind a deliberately small root
//! cache, then hammers them with concurrent root requests while randomly
//! forcing evictions and cancelling some callers.
//!
//! Invariants checked on every successful request:
//! - The root's text equals the file's text
//! - The root is owned by the tree that returned it

use rand::{rngs::StdRng, Rng, SeedableRng};
use rootcache_core::{
    RecoveryMode, RootCache, RootCacheConfig, SyntaxTree, TemporaryStorage, TreeFactory,
};
use rootcache_syntax::{
    CancellationToken, ConstantTextSource, ContainingTree, EvictionCache, LineParser, ParseError,
    ParseOptions, Root, RootParser, SourceText, StorageService, TextSource,
};
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Number of synthetic files
    pub files: usize,
    /// Total root requests to issue
    pub requests: usize,
    /// Requests in flight at once
    pub concurrency: usize,
    /// Chance a request is cancelled right after it starts
    pub cancel_ratio: f64,
    /// Chance per batch that a given file is forced out of the cache
    pub invalidate_ratio: f64,
    /// Cache and factory configuration
    pub cache: RootCacheConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            files: 64,
            requests: 2_000,
            concurrency: 16,
            cancel_ratio: 0.05,
            invalidate_ratio: 0.02,
            cache: RootCacheConfig::default()
                .with_capacity_bytes(64 * 1024)
                .with_min_recoverable_length(512),
        }
    }
}

/// Statistics for simulation
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulatorStats {
    pub trees_created: u64,
    pub recoverable_trees: u64,
    pub parsed_trees: u64,
    pub requests_issued: u64,
    pub requests_succeeded: u64,
    pub requests_cancelled: u64,
    pub requests_failed: u64,
    pub parser_invocations: u64,
    pub storage_stores: u64,
    pub storage_retrievals: u64,
    pub evictions: u64,
}

/// A broken invariant observed during simulation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Returned root does not reproduce the file's text
    TextMismatch {
        path: String,
        expected_len: usize,
        actual_len: usize,
    },
    /// Returned root is owned by some other tree
    WrongOwner { path: String },
    /// Request failed for a reason other than cancellation
    RequestFailed { path: String, error: String },
}

/// Final report from simulator
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorReport {
    pub seed: u64,
    pub recovery: RecoveryMode,
    pub strategy: &'static str,
    pub cache_capacity_bytes: u64,
    pub stats: SimulatorStats,
    pub violations: Vec<Violation>,
}

impl SimulatorReport {
    /// Check if simulation passed all criteria
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Generate text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let s = &self.stats;
        let mut report = String::new();

        let _ = writeln!(report, "=== Rootcache Simulator Report ===\n");
        let _ = writeln!(report, "Seed: {}", self.seed);
        let _ = writeln!(report, "Strategy: {}", self.strategy);
        let _ = writeln!(report, "Cache Capacity: {} bytes", self.cache_capacity_bytes);
        let _ = writeln!(
            report,
            "Trees Created: {} ({} recoverable, {} parsed)",
            s.trees_created, s.recoverable_trees, s.parsed_trees
        );
        let _ = writeln!(report, "Requests Issued: {}", s.requests_issued);
        let _ = writeln!(report, "Requests Succeeded: {}", s.requests_succeeded);
        let _ = writeln!(report, "Requests Cancelled: {}", s.requests_cancelled);
        let _ = writeln!(report, "Requests Failed: {}", s.requests_failed);
        let _ = writeln!(report, "Parser Invocations: {}", s.parser_invocations);
        let _ = writeln!(report, "Storage Stores: {}", s.storage_stores);
        let _ = writeln!(report, "Storage Retrievals: {}", s.storage_retrievals);
        let _ = writeln!(report, "Evictions: {}", s.evictions);
        let _ = writeln!(report, "Violations: {}", self.violations.len());

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                let _ = writeln!(report, "{}. {:?}", i + 1, v);
            }
        }

        let _ = writeln!(
            report,
            "\n=== Result: {} ===",
            if self.passed() { "PASS" } else { "FAIL" }
        );
        report
    }

    /// Render as pretty JSON
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// `LineParser` with an invocation counter
#[derive(Debug, Default)]
struct MeteredParser {
    calls: AtomicU64,
}

impl RootParser for MeteredParser {
    fn parse(
        &self,
        path: &str,
        options: &ParseOptions,
        text: &SourceText,
        cancel: &CancellationToken,
    ) -> Result<Root, ParseError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        LineParser.parse(path, options, text, cancel)
    }
}

struct SimFile {
    path: String,
    text: Arc<str>,
    tree: Arc<dyn SyntaxTree>,
}

enum Outcome {
    Ok,
    Cancelled,
    Violation(Violation),
}

/// Run the rootcache simulator
///
/// # Errors
/// Returns error if the configuration is invalid or a file cannot be parsed
pub async fn run_simulator(config: SimulatorConfig) -> anyhow::Result<SimulatorReport> {
    config.cache.validate()?;
    anyhow::ensure!(
        (0.0..=1.0).contains(&config.cancel_ratio) && (0.0..=1.0).contains(&config.invalidate_ratio),
        "cancel and invalidate ratios must be within 0..=1"
    );
    let mut rng = StdRng::seed_from_u64(config.seed);

    let parser = Arc::new(MeteredParser::default());
    let cache = Arc::new(RootCache::from_config(&config.cache));
    let storage = Arc::new(TemporaryStorage::new());
    let factory = TreeFactory::new(
        Arc::clone(&parser) as Arc<dyn RootParser>,
        Arc::clone(&cache) as Arc<dyn EvictionCache>,
        config.cache.clone(),
    )
    .with_storage(Arc::clone(&storage) as Arc<dyn StorageService>);

    info!(
        seed = config.seed,
        files = config.files,
        requests = config.requests,
        strategy = factory.strategy_name(),
        "starting simulation"
    );

    let mut stats = SimulatorStats::default();
    let mut files = Vec::with_capacity(config.files);
    for i in 0..config.files {
        let path = format!("src/module_{i}.rs");
        let lines = rng.gen_range(4..=160);
        let text: Arc<str> = generate_source(&mut rng, lines).into();
        let source: Arc<dyn TextSource> = Arc::new(ConstantTextSource::new(SourceText::new(Arc::clone(&text))));
        let tree = factory
            .parse_tree(
                path.clone(),
                ParseOptions::default(),
                source,
                &CancellationToken::new(),
            )
            .await?;

        stats.trees_created += 1;
        if tree.is_recoverable() {
            stats.recoverable_trees += 1;
        } else {
            stats.parsed_trees += 1;
        }
        files.push(Arc::new(SimFile { path, text, tree }));
    }
    cache.run_pending_tasks();

    let mut violations = Vec::new();
    let mut issued = 0;
    let concurrency = config.concurrency.max(1);
    while issued < config.requests && !files.is_empty() {
        for file in &files {
            if rng.gen_bool(config.invalidate_ratio) {
                cache.invalidate(file.tree.id());
            }
        }

        let mut batch = JoinSet::new();
        let batch_size = concurrency.min(config.requests - issued);
        for _ in 0..batch_size {
            let file = Arc::clone(&files[rng.gen_range(0..files.len())]);
            let cancel = CancellationToken::new();
            if rng.gen_bool(config.cancel_ratio) {
                let cancel = cancel.clone();
                batch.spawn(async move {
                    tokio::task::yield_now().await;
                    cancel.cancel();
                    None
                });
            }
            batch.spawn(async move { Some(request(&file, &cancel).await) });
        }
        issued += batch_size;

        while let Some(joined) = batch.join_next().await {
            match joined? {
                Some(Outcome::Ok) => stats.requests_succeeded += 1,
                Some(Outcome::Cancelled) => stats.requests_cancelled += 1,
                Some(Outcome::Violation(violation)) => {
                    if matches!(violation, Violation::RequestFailed { .. }) {
                        stats.requests_failed += 1;
                    }
                    violations.push(violation);
                }
                None => {}
            }
        }
        cache.run_pending_tasks();
        debug!(issued, entries = cache.entry_count(), "batch complete");
    }
    storage.flush().await;

    stats.requests_issued = issued as u64;
    stats.parser_invocations = parser.calls.load(Ordering::Relaxed);
    let storage_stats = storage.stats();
    stats.storage_stores = storage_stats.stores;
    stats.storage_retrievals = storage_stats.retrievals;
    stats.evictions = cache.stats().evictions;

    info!(
        succeeded = stats.requests_succeeded,
        violations = violations.len(),
        "simulation finished"
    );

    Ok(SimulatorReport {
        seed: config.seed,
        recovery: config.cache.recovery,
        strategy: factory.strategy_name(),
        cache_capacity_bytes: config.cache.cache_capacity_bytes,
        stats,
        violations,
    })
}

async fn request(file: &SimFile, cancel: &CancellationToken) -> Outcome {
    match file.tree.get_root_async(cancel).await {
        Ok(root) => check_root(file, &root),
        Err(err) if err.is_cancelled() => Outcome::Cancelled,
        Err(err) => Outcome::Violation(Violation::RequestFailed {
            path: file.path.clone(),
            error: err.to_string(),
        }),
    }
}

fn check_root(file: &SimFile, root: &Root) -> Outcome {
    if root.tree_id() != file.tree.id() {
        return Outcome::Violation(Violation::WrongOwner {
            path: file.path.clone(),
        });
    }
    let text = root.text();
    if text != *file.text {
        return Outcome::Violation(Violation::TextMismatch {
            path: file.path.clone(),
            expected_len: file.text.len(),
            actual_len: text.len(),
        });
    }
    Outcome::Ok
}

/// Generate a synthetic source file of `lines` lines
pub fn generate_source(rng: &mut impl Rng, lines: usize) -> String {
    const KEYWORDS: &[&str] = &["let", "const", "static", "return"];
    let mut text = String::new();
    let mut open_regions = 0usize;

    for i in 0..lines {
        match rng.gen_range(0..20) {
            0 => {
                let _ = writeln!(text, "#if FEATURE_{}", rng.gen_range(0..8));
                open_regions += 1;
            }
            1 if open_regions > 0 => {
                text.push_str("#endif\n");
                open_regions -= 1;
            }
            2 => text.push('\n'),
            _ => {
                let keyword = KEYWORDS[rng.gen_range(0..KEYWORDS.len())];
                let indent = " ".repeat(4 * rng.gen_range(0..3));
                let _ = writeln!(
                    text,
                    "{indent}{keyword} value_{i} = compute({}, {});",
                    rng.gen_range(0..1000),
                    rng.gen_range(0..1000)
                );
            }
        }
    }
    for _ in 0..open_regions {
        text.push_str("#endif\n");
    }
    text
}

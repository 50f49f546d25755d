//! Size-bounded root cache using moka
//!
//! The one piece of shared memory pressure management: every recoverable
//! root registers its live root here and the cache decides which to let go.
//! Entries are keyed by owning tree and weighed by root width, so the budget
//! is roughly bytes of source text kept alive.

use crate::config::RootCacheConfig;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use rootcache_syntax::{EvictionCache, EvictionCallback, Root, TreeId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Statistics for cache monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries in cache
    pub entry_count: u64,
    /// Total weight of entries
    pub weighted_size: u64,
    /// Calls to `register`, hits included
    pub registrations: u64,
    /// Eviction callbacks delivered
    pub evictions: u64,
}

#[derive(Clone)]
struct CachedRoot {
    root: Root,
    on_evicted: EvictionCallback,
}

#[derive(Default)]
struct Counters {
    registrations: AtomicU64,
    evictions: AtomicU64,
}

/// Shared LRU cache of strongly-held roots
#[derive(Clone)]
pub struct RootCache {
    inner: Cache<TreeId, CachedRoot>,
    counters: Arc<Counters>,
    capacity: u64,
}

impl RootCache {
    /// Create cache with a weight budget in bytes of root text
    #[must_use]
    pub fn new(capacity_bytes: u64) -> Self {
        Self::build(capacity_bytes, None)
    }

    /// Create cache that also evicts roots idle for `idle`
    #[must_use]
    pub fn with_time_to_idle(capacity_bytes: u64, idle: Duration) -> Self {
        Self::build(capacity_bytes, Some(idle))
    }

    /// Create cache from configuration
    #[must_use]
    pub fn from_config(config: &RootCacheConfig) -> Self {
        Self::build(config.cache_capacity_bytes, config.time_to_idle())
    }

    fn build(capacity: u64, idle: Option<Duration>) -> Self {
        let counters = Arc::new(Counters::default());
        let listener_counters = Arc::clone(&counters);

        let mut builder = Cache::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .weigher(|_tree: &TreeId, cached: &CachedRoot| -> u32 {
                u32::try_from(cached.root.full_width())
                    .unwrap_or(u32::MAX)
                    .max(1)
            })
            .eviction_listener(
                move |tree: Arc<TreeId>, cached: CachedRoot, cause: RemovalCause| {
                    // A replacement is a recency refresh of the same tree
                    if cause == RemovalCause::Replaced {
                        return;
                    }
                    trace!(tree = %tree, ?cause, "root evicted from cache");
                    listener_counters.evictions.fetch_add(1, Ordering::Relaxed);
                    (cached.on_evicted)(cached.root);
                },
            );
        if let Some(idle) = idle {
            builder = builder.time_to_idle(idle);
        }

        Self {
            inner: builder.build(),
            counters,
            capacity,
        }
    }

    /// Weight budget
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Run pending evictions and expirations now
    pub fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks();
    }

    /// Evict the root of `tree`, delivering its callback
    pub fn invalidate(&self, tree: TreeId) {
        self.inner.invalidate(&tree);
    }

    /// Evict every root
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    /// Check if cache holds a root for `tree`
    #[inline]
    #[must_use]
    pub fn contains(&self, tree: TreeId) -> bool {
        self.inner.contains_key(&tree)
    }

    /// Get approximate entry count
    #[inline]
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Get approximate total weight
    #[inline]
    #[must_use]
    pub fn weighted_size(&self) -> u64 {
        self.inner.weighted_size()
    }

    /// Get cache statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.inner.entry_count(),
            weighted_size: self.inner.weighted_size(),
            registrations: self.counters.registrations.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}

impl EvictionCache for RootCache {
    fn register(&self, root: Root, on_evicted: EvictionCallback) {
        self.counters.registrations.fetch_add(1, Ordering::Relaxed);
        self.inner
            .insert(root.tree_id(), CachedRoot { root, on_evicted });
    }
}

impl Default for RootCache {
    /// Create cache with the default 64MB budget
    fn default() -> Self {
        Self::from_config(&RootCacheConfig::default())
    }
}

impl fmt::Debug for RootCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootCache")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

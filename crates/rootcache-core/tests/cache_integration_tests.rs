//! Trees sharing a real moka-backed cache and temporary storage

use rootcache_core::{
    RecoveryMode, RootCache, RootCacheConfig, StateKind, SyntaxTree, TemporaryStorage,
    TreeFactory,
};
use rootcache_syntax::{
    CancellationToken, ConstantTextSource, ContainingTree, EvictionCache, ParseOptions,
    RootParser, StorageService, TextSource,
};
use rootcache_test_utils::{parse_detached, sample_text, CountingParser};
use std::sync::Arc;

fn source(text: &str) -> Arc<dyn TextSource> {
    Arc::new(ConstantTextSource::new(text))
}

#[test]
fn budget_pressure_evicts_and_recovers() {
    let text = sample_text(10);
    let width = text.len() as u64;
    let parser = Arc::new(CountingParser::new());
    let cache = Arc::new(RootCache::new(width * 2 + width / 2));
    let factory = TreeFactory::new(
        Arc::clone(&parser) as Arc<dyn RootParser>,
        Arc::clone(&cache) as Arc<dyn EvictionCache>,
        RootCacheConfig::default().with_min_recoverable_length(1),
    );

    let trees: Vec<_> = (0..3)
        .map(|i| {
            let tree = factory.create_recoverable_tree(
                format!("src/file_{i}.rs"),
                ParseOptions::default(),
                source(&text),
                parse_detached(&text),
            );
            cache.run_pending_tasks();
            tree
        })
        .collect();

    assert_eq!(cache.stats().evictions, 1);
    assert!(!cache.contains(trees[0].id()));
    assert!(trees[0].try_get_root().is_none());
    assert_eq!(trees[1].state_kind(), StateKind::Strong);

    let root = trees[0].get_root(&CancellationToken::new()).unwrap();
    assert_eq!(root.tree_id(), trees[0].id());
    assert_eq!(root.text(), text);
    assert_eq!(parser.calls(), 1);

    // Coming back pushed someone else out
    cache.run_pending_tasks();
    assert!(cache.contains(trees[0].id()));
    assert!(cache.weighted_size() <= cache.capacity());
    assert_eq!(cache.stats().evictions, 2);
}

#[tokio::test]
async fn serialized_roots_come_back_from_storage() {
    let text = sample_text(30);
    let parser = Arc::new(CountingParser::new());
    let cache = Arc::new(RootCache::new(1 << 20));
    let storage = Arc::new(TemporaryStorage::new());
    let factory = TreeFactory::new(
        Arc::clone(&parser) as Arc<dyn RootParser>,
        Arc::clone(&cache) as Arc<dyn EvictionCache>,
        RootCacheConfig::default()
            .with_min_recoverable_length(1)
            .with_recovery(RecoveryMode::Serialize),
    )
    .with_storage(Arc::clone(&storage) as Arc<dyn StorageService>);

    let tree = factory
        .parse_tree(
            "src/big.rs",
            ParseOptions::default(),
            source(&text),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(parser.calls(), 1);

    cache.invalidate(tree.id());
    cache.run_pending_tasks();
    storage.flush().await;

    assert!(storage.can_retrieve(tree.id()));
    assert!(tree.try_get_root().is_none());

    let root = tree.get_root_async(&CancellationToken::new()).await.unwrap();
    assert_eq!(root.text(), text);
    assert_eq!(root.tree_id(), tree.id());
    assert_eq!(parser.calls(), 1);
    assert_eq!(storage.stats().retrievals, 1);
    assert!(cache.contains(tree.id()));
}

#[tokio::test]
async fn small_files_are_never_evicted() {
    let parser = Arc::new(CountingParser::new());
    let cache = Arc::new(RootCache::new(1 << 20));
    let factory = TreeFactory::new(
        Arc::clone(&parser) as Arc<dyn RootParser>,
        Arc::clone(&cache) as Arc<dyn EvictionCache>,
        RootCacheConfig::default().with_min_recoverable_length(1024),
    );

    let tree = factory
        .parse_tree(
            "src/tiny.rs",
            ParseOptions::default(),
            source("fn tiny() {}\n"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!tree.is_recoverable());
    cache.run_pending_tasks();
    assert_eq!(cache.entry_count(), 0);
    assert!(tree.try_get_root().is_some());
}

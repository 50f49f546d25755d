//! End-to-end simulator runs

use pretty_assertions::assert_eq;
use rootcache_core::{RecoveryMode, RootCacheConfig};
use rootcache_sim::{run_simulator, SimulatorConfig};
use std::io::Write;

fn small_config(recovery: RecoveryMode) -> SimulatorConfig {
    SimulatorConfig {
        seed: 7,
        files: 16,
        requests: 300,
        concurrency: 8,
        cache: RootCacheConfig::default()
            .with_capacity_bytes(8 * 1024)
            .with_min_recoverable_length(256)
            .with_recovery(recovery),
        ..SimulatorConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reparse_workload_has_no_violations() {
    let report = run_simulator(small_config(RecoveryMode::Reparse))
        .await
        .unwrap();

    assert!(report.passed(), "{}", report.generate_text());
    let s = &report.stats;
    assert_eq!(s.trees_created, 16);
    assert_eq!(s.recoverable_trees + s.parsed_trees, 16);
    assert_eq!(s.requests_issued, 300);
    assert_eq!(s.requests_succeeded + s.requests_cancelled, 300);
    assert_eq!(s.requests_failed, 0);
    assert!(s.evictions > 0);
    assert!(s.parser_invocations > s.trees_created);
    assert_eq!(s.storage_stores, 0);
    assert_eq!(report.strategy, "reparse");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn serialize_workload_uses_storage() {
    let report = run_simulator(small_config(RecoveryMode::Serialize))
        .await
        .unwrap();

    assert!(report.passed(), "{}", report.generate_text());
    let s = &report.stats;
    assert_eq!(report.strategy, "retrieve");
    assert!(s.evictions > 0);
    assert!(s.storage_stores > 0);
    assert!(s.storage_retrievals + s.parser_invocations > s.trees_created);
}

#[tokio::test]
async fn same_seed_builds_same_population() {
    let a = run_simulator(small_config(RecoveryMode::Reparse)).await.unwrap();
    let b = run_simulator(small_config(RecoveryMode::Reparse)).await.unwrap();
    assert_eq!(a.stats.recoverable_trees, b.stats.recoverable_trees);
    assert_eq!(a.stats.parsed_trees, b.stats.parsed_trees);
}

#[tokio::test]
async fn out_of_range_ratio_is_rejected() {
    let config = SimulatorConfig {
        cancel_ratio: 1.5,
        ..small_config(RecoveryMode::Reparse)
    };
    assert!(run_simulator(config).await.is_err());
}

#[tokio::test]
async fn config_file_drives_the_cache() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "cache_capacity_bytes = 2048").unwrap();
    writeln!(file, "min_length_for_recoverable_tree = 128").unwrap();
    writeln!(file, "recovery = \"serialize\"").unwrap();

    let cache = RootCacheConfig::load(file.path()).unwrap();
    let report = run_simulator(SimulatorConfig {
        files: 8,
        requests: 100,
        cache,
        ..SimulatorConfig::default()
    })
    .await
    .unwrap();

    assert!(report.passed());
    assert_eq!(report.cache_capacity_bytes, 2048);
    assert_eq!(report.recovery, RecoveryMode::Serialize);
    let json = report.to_json().unwrap();
    assert!(json.contains("\"strategy\": \"retrieve\""));
}

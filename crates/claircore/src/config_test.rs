use serial_test::serial;

use super::Config;

#[test]
fn test_defaults_are_sane() {
    let cfg = Config::default();
    assert!(cfg.index_concurrency >= 1);
    assert!(cfg.scan_concurrency >= 1);
    assert!(cfg.store_operation_timeout_ms > 0);
    assert!(cfg.retry_backoff_min_ms < cfg.retry_backoff_max_ms);
}

#[test]
fn test_from_default_sources_with_no_file() {
    let cfg = Config::from_default_sources(None).expect("should load defaults cleanly");
    assert_eq!(cfg, Config::default());
}

#[test]
#[serial]
fn test_env_override() {
    // SAFETY: test-local environment variable, not read by any other test
    // concurrently running in this process.
    std::env::set_var("CLAIRCORE_SCAN_CONCURRENCY", "7");
    let cfg = Config::from_default_sources(None).expect("should load with env override");
    std::env::remove_var("CLAIRCORE_SCAN_CONCURRENCY");
    assert_eq!(cfg.scan_concurrency, 7);
}

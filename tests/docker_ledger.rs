//! Integration tests against a real Docker daemon.
//!
//! Requires: a reachable Docker daemon and network access to pull images.
//!   cargo test --test docker_ledger -- --ignored

use std::time::Duration;

use ledger_harness::ledger::{
    FileAccessError, HealthCheck, HealthCheckSpec, LedgerContainerOptions, LedgerError,
    LedgerState, RawLedgerOptions, TestLedger,
};

fn redis_options() -> LedgerContainerOptions {
    LedgerContainerOptions::validate(RawLedgerOptions {
        image_name: Some("redis".to_string()),
        image_version: Some("7-alpine".to_string()),
        ports: Some(vec![6379]),
        env_vars: Some(vec!["GREETING=hello".to_string()]),
        health_check: Some(HealthCheck::Probe(HealthCheckSpec::shell(
            "test -f /tmp/ready",
        ))),
        startup_timeout: Some(Duration::from_secs(60)),
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_postgres_becomes_healthy() {
    let options = LedgerContainerOptions::postgres("postgres", "my-secret-password").unwrap();
    let ledger = TestLedger::connect(options).await.unwrap();

    let handle = ledger.start().await.unwrap();
    assert_eq!(ledger.state().await, LedgerState::RunningHealthy);

    let info = ledger.get_runtime_info().await.unwrap();
    assert_eq!(info.id, handle.id());
    assert!(info.status.contains("(healthy)"), "{}", info.status);

    let public = ledger.resolve_public_port(5432).await.unwrap();
    assert!(public >= 1024);
    assert!(!ledger.container_ip_address().await.unwrap().is_empty());

    ledger.stop().await.unwrap();
    ledger.destroy().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_health_check_timeout_reports_status() {
    let raw = RawLedgerOptions {
        startup_timeout: Some(Duration::from_secs(5)),
        ..RawLedgerOptions::from(redis_options())
    };
    let ledger = TestLedger::connect(LedgerContainerOptions::validate(raw).unwrap())
        .await
        .unwrap();

    let err = ledger.start().await.unwrap_err();
    assert!(
        matches!(err, LedgerError::HealthCheckTimeout { .. }),
        "unexpected error: {err}"
    );
    ledger.destroy().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_read_files_from_container() {
    let raw = RawLedgerOptions {
        health_check: Some(HealthCheck::Disabled),
        ..RawLedgerOptions::from(redis_options())
    };
    let ledger = TestLedger::connect(LedgerContainerOptions::validate(raw).unwrap())
        .await
        .unwrap();
    ledger.start().await.unwrap();

    let release = ledger.read_file_to_string("/etc/alpine-release").await;
    let missing = ledger.read_file("/does/not/exist").await;
    ledger.destroy().await.unwrap();

    assert!(release.unwrap().starts_with("3."));
    assert!(matches!(
        missing,
        Err(LedgerError::FileAccess(FileAccessError::FileNotFound { .. }))
    ));
}

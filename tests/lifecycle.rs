//! Lifecycle tests against the in-memory runtime.
//!
//! These drive the public `TestLedger` API end to end without a Docker daemon.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use ledger_harness::ledger::{
    FileAccessError, LedgerContainerOptions, LedgerError, LedgerState, PortMapping,
    PortMappingError, RawLedgerOptions, TestLedger,
};
use ledger_harness::testing::StubRuntime;

fn published(private_port: u16, address: &str, public_port: u16) -> PortMapping {
    PortMapping {
        private_port,
        protocol: "tcp".to_string(),
        bound_address: Some(address.to_string()),
        public_port: Some(public_port),
    }
}

fn options() -> LedgerContainerOptions {
    LedgerContainerOptions::validate(RawLedgerOptions {
        image_name: Some("x".to_string()),
        image_version: Some("1.0".to_string()),
        ports: Some(vec![50051]),
        env_vars: Some(vec!["A=1".to_string()]),
        poll_interval: Some(Duration::from_millis(10)),
        startup_timeout: Some(Duration::from_secs(5)),
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_start_query_stop_destroy() {
    let runtime = Arc::new(
        StubRuntime::new()
            .with_status_sequence(["Up 1 second (health: starting)"])
            .with_ports(vec![published(50051, "0.0.0.0", 32768)]),
    );
    let ledger = TestLedger::new(options(), runtime.clone());

    let handle = ledger.start().await.unwrap();
    assert_eq!(ledger.state().await, LedgerState::RunningHealthy);
    assert_eq!(runtime.pulled_images(), vec!["x:1.0".to_string()]);

    let info = ledger.get_runtime_info().await.unwrap();
    assert_eq!(info.id, handle.id());
    assert!(info.status.contains("(healthy)"));

    let public = ledger.resolve_public_port(50051).await.unwrap();
    assert!((1024..=65535).contains(&public));
    assert_eq!(
        ledger.rpc_endpoint().await.unwrap(),
        "http://127.0.0.1:32768"
    );

    let spec = runtime.last_spec().unwrap();
    assert_eq!(spec.image, "x:1.0");
    assert_eq!(spec.exposed_ports, vec![50051]);
    assert_eq!(spec.env, vec!["A=1".to_string()]);

    ledger.stop().await.unwrap();
    ledger.destroy().await.unwrap();
    assert_eq!(ledger.state().await, LedgerState::Destroyed);
    assert!(runtime.containers().is_empty());
}

#[tokio::test]
async fn test_second_stop_is_a_lifecycle_error() {
    let runtime = Arc::new(StubRuntime::new().with_image("x:1.0"));
    let ledger = TestLedger::new(options(), runtime);

    ledger.start().await.unwrap();
    ledger.stop().await.unwrap();

    let err = ledger.stop().await.unwrap_err();
    assert!(matches!(err, LedgerError::LifecycleState { .. }), "{err}");
}

#[tokio::test]
async fn test_loopback_binding_is_rejected() {
    let runtime = Arc::new(
        StubRuntime::new()
            .with_image("x:1.0")
            .with_ports(vec![published(50051, "127.0.0.1", 40000)]),
    );
    let ledger = TestLedger::new(options(), runtime);
    ledger.start().await.unwrap();

    let err = ledger.resolve_public_port(50051).await.unwrap_err();
    assert!(
        matches!(
            err,
            LedgerError::PortMapping(PortMappingError::PortBoundToLoopback { .. })
        ),
        "{err}"
    );

    let err = ledger.resolve_public_port(8080).await.unwrap_err();
    assert!(
        matches!(
            err,
            LedgerError::PortMapping(PortMappingError::NoPortMapping { .. })
        ),
        "{err}"
    );
}

#[tokio::test]
async fn test_missing_file_then_real_file() {
    let runtime = Arc::new(
        StubRuntime::new()
            .with_image("x:1.0")
            .with_file("/opt/iroha_data/config.docker", b"{\"torii_port\":50051}")
            .with_file("/opt/iroha_data/genesis.block", &[b'g'; 2048])
            .with_broken_archive("/opt/iroha_data/genesis.block", "connection reset"),
    );
    let ledger = TestLedger::new(options(), runtime);
    ledger.start().await.unwrap();

    for _ in 0..2 {
        let err = ledger.read_file("/does/not/exist").await.unwrap_err();
        assert!(
            matches!(
                err,
                LedgerError::FileAccess(FileAccessError::FileNotFound { .. })
            ),
            "{err}"
        );
    }

    let err = ledger
        .read_file("/opt/iroha_data/genesis.block")
        .await
        .unwrap_err();
    assert!(
        matches!(err, LedgerError::FileAccess(FileAccessError::Stream { .. })),
        "{err}"
    );

    let config = ledger
        .read_file_to_string("/opt/iroha_data/config.docker")
        .await
        .unwrap();
    assert_eq!(config, "{\"torii_port\":50051}");
}

#[tokio::test]
async fn test_never_healthy_times_out_with_last_status() {
    let runtime = Arc::new(
        StubRuntime::new()
            .with_image("x:1.0")
            .with_steady_status("Up 3 seconds (unhealthy)"),
    );
    let raw = RawLedgerOptions {
        startup_timeout: Some(Duration::ZERO),
        ..RawLedgerOptions::from(options())
    };
    let ledger = TestLedger::new(LedgerContainerOptions::validate(raw).unwrap(), runtime.clone());

    let err = ledger.start().await.unwrap_err();
    match err {
        LedgerError::HealthCheckTimeout { last_status, .. } => {
            assert_eq!(last_status.as_deref(), Some("Up 3 seconds (unhealthy)"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(ledger.state().await, LedgerState::Failed);
    assert_eq!(runtime.inspect_count(), 1);

    ledger.destroy().await.unwrap();
    assert!(runtime.containers().is_empty());
}

#[tokio::test]
async fn test_restart_replaces_previous_container() {
    let runtime = Arc::new(StubRuntime::new().with_image("x:1.0"));
    let ledger = TestLedger::new(options(), runtime.clone());

    let first = ledger.start().await.unwrap();
    let second = ledger.start().await.unwrap();

    assert_ne!(first.id(), second.id());
    assert_eq!(runtime.containers(), vec![second.id().to_string()]);
}

#[tokio::test]
async fn test_pull_failure_fails_start() {
    let runtime = Arc::new(StubRuntime::new().with_pull_error("registry unreachable"));
    let ledger = TestLedger::new(options(), runtime.clone());

    let err = ledger.start().await.unwrap_err();
    assert!(matches!(err, LedgerError::ImagePull { .. }), "{err}");
    assert_eq!(ledger.state().await, LedgerState::Failed);
    assert!(runtime.containers().is_empty());
}

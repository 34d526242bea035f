//! Waiting for a container's runtime health check to pass.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use crate::ledger::controller::ContainerHandle;
use crate::ledger::error::{LedgerError, Result};
use crate::ledger::runtime::ContainerRuntime;

/// Polls container status until it reports `(healthy)` or a timeout elapses.
///
/// Each iteration waits on a single timer; dropping the future returned by
/// [`wait_until_healthy`](Self::wait_until_healthy) cancels the loop.
#[derive(Clone)]
pub struct HealthCheckPoller {
    runtime: Arc<dyn ContainerRuntime>,
    interval: Duration,
}

/// Shortest interval between two status polls.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

impl HealthCheckPoller {
    /// Intervals below [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, interval: Duration) -> Self {
        Self {
            runtime,
            interval: interval.max(MIN_POLL_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the container reports healthy.
    ///
    /// The status is polled at least once, so a zero timeout checks exactly
    /// once and fails right away when the container is not yet healthy.
    pub async fn wait_until_healthy(
        &self,
        handle: &ContainerHandle,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_status: Option<String> = None;

        loop {
            ticker.tick().await;

            let poll = tokio::time::timeout_at(deadline, self.runtime.inspect(handle.id())).await;
            let info = match poll {
                Ok(result) => {
                    result.map_err(|e| LedgerError::runtime("health check", handle.id(), e))?
                }
                Err(_) => return Err(timed_out(handle, timeout, last_status)),
            };

            tracing::trace!(
                container = %handle.id(),
                status = %info.status,
                "Polled container status"
            );

            if info.is_healthy() {
                return Ok(());
            }
            last_status = Some(info.status);

            if Instant::now() >= deadline {
                return Err(timed_out(handle, timeout, last_status));
            }
        }
    }
}

fn timed_out(
    handle: &ContainerHandle,
    timeout: Duration,
    last_status: Option<String>,
) -> LedgerError {
    tracing::debug!(
        container = %handle.id(),
        "Health check timed out after {:?}, last status {:?}",
        timeout,
        last_status
    );
    LedgerError::HealthCheckTimeout {
        container_id: handle.id().to_string(),
        timeout,
        last_status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubRuntime;

    const STARTING: &str = "Up 1 second (health: starting)";
    const HEALTHY: &str = "Up 3 seconds (healthy)";

    async fn running(runtime: &Arc<StubRuntime>) -> ContainerHandle {
        runtime.launch_for_test("ledger-test").await
    }

    #[tokio::test]
    async fn test_becomes_healthy_after_a_few_polls() {
        let runtime =
            Arc::new(StubRuntime::new().with_status_sequence([STARTING, STARTING, HEALTHY]));
        let handle = running(&runtime).await;
        let poller = HealthCheckPoller::new(runtime.clone(), Duration::from_millis(5));

        poller
            .wait_until_healthy(&handle, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(runtime.inspect_count(), 3);
    }

    #[tokio::test]
    async fn test_zero_interval_is_clamped() {
        let runtime = Arc::new(StubRuntime::new().with_status_sequence([STARTING, HEALTHY]));
        let handle = running(&runtime).await;
        let poller = HealthCheckPoller::new(runtime.clone(), Duration::ZERO);
        assert_eq!(poller.interval(), MIN_POLL_INTERVAL);

        poller
            .wait_until_healthy(&handle, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(runtime.inspect_count(), 2);
    }

    #[tokio::test]
    async fn test_zero_timeout_fails_after_one_poll() {
        let runtime = Arc::new(StubRuntime::new().with_steady_status(STARTING));
        let handle = running(&runtime).await;
        let poller = HealthCheckPoller::new(runtime.clone(), Duration::from_secs(1));

        let err = poller
            .wait_until_healthy(&handle, Duration::ZERO)
            .await
            .unwrap_err();

        match err {
            LedgerError::HealthCheckTimeout {
                container_id,
                last_status,
                ..
            } => {
                assert_eq!(container_id, handle.id());
                assert_eq!(last_status.as_deref(), Some(STARTING));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(runtime.inspect_count(), 1);
    }

    #[tokio::test]
    async fn test_never_healthy_times_out_with_last_status() {
        let runtime =
            Arc::new(StubRuntime::new().with_steady_status("Up 9 seconds (unhealthy)"));
        let handle = running(&runtime).await;
        let poller = HealthCheckPoller::new(runtime.clone(), Duration::from_millis(5));

        let started = std::time::Instant::now();
        let err = poller
            .wait_until_healthy(&handle, Duration::from_millis(50))
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(err.to_string().contains("(unhealthy)"));
        assert!(runtime.inspect_count() > 1);
    }

    #[tokio::test]
    async fn test_vanished_container_fails_fast() {
        let runtime = Arc::new(StubRuntime::new().with_steady_status(STARTING));
        let handle = running(&runtime).await;
        runtime.kill_for_test(handle.id());
        let poller = HealthCheckPoller::new(runtime.clone(), Duration::from_millis(5));

        let err = poller
            .wait_until_healthy(&handle, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { operation: "health check", .. }));
    }

    #[tokio::test]
    async fn test_dropping_the_wait_stops_polling() {
        let runtime = Arc::new(StubRuntime::new().with_steady_status(STARTING));
        let handle = running(&runtime).await;
        let poller = HealthCheckPoller::new(runtime.clone(), Duration::from_millis(5));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(30),
            poller.wait_until_healthy(&handle, Duration::from_secs(60)),
        )
        .await;
        assert!(abandoned.is_err());

        let polls = runtime.inspect_count();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(runtime.inspect_count(), polls);
    }
}

//! Test ledger lifecycle management.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::ledger::error::{LedgerError, Result, RuntimeError};
use crate::ledger::files::ContainerFileAccessor;
use crate::ledger::health::HealthCheckPoller;
use crate::ledger::image::{ImageRef, ImageResolver};
use crate::ledger::options::{HealthCheck, LedgerContainerOptions};
use crate::ledger::ports;
use crate::ledger::runtime::{
    ContainerRuntime, ContainerSpec, DockerRuntime, MANAGED_LABEL, RuntimeInfo,
};

/// Log target for lines read from the container's stdout/stderr.
pub const CONTAINER_LOG_TARGET: &str = "ledger_harness::container";

/// Lifecycle state of a test ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerState {
    /// `start()` never called.
    Uninitialized,
    /// Pulling the image and launching the container.
    Starting,
    /// Running, health check not yet passing.
    RunningUnhealthy,
    /// Running and healthy.
    RunningHealthy,
    /// Stopped; the container still exists until `destroy()`.
    Stopped,
    /// Container removed. Terminal.
    Destroyed,
    /// The last `start()` failed.
    Failed,
}

impl LedgerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerState::Uninitialized => "not started",
            LedgerState::Starting => "starting",
            LedgerState::RunningUnhealthy => "running (unhealthy)",
            LedgerState::RunningHealthy => "running (healthy)",
            LedgerState::Stopped => "stopped",
            LedgerState::Destroyed => "destroyed",
            LedgerState::Failed => "failed",
        }
    }

    /// Whether the container process is up.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            LedgerState::RunningUnhealthy | LedgerState::RunningHealthy
        )
    }
}

impl fmt::Display for LedgerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies the container owned by one [`TestLedger`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle {
    id: String,
    name: String,
}

impl ContainerHandle {
    pub(crate) fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Runtime-assigned container ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Container name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

struct Slot {
    state: LedgerState,
    handle: Option<ContainerHandle>,
    log_follower: Option<JoinHandle<()>>,
}

impl Slot {
    fn stop_log_follower(&mut self) {
        if let Some(task) = self.log_follower.take() {
            task.abort();
        }
    }
}

/// Owns one ephemeral ledger container and drives its lifecycle.
///
/// `start()`, `stop()` and `destroy()` are serialized: a second `start()`
/// issued while one is in flight waits for it, then tears its container down
/// and starts a fresh one. Every `start()` removes any container this ledger
/// still owns before launching a new one.
///
/// Queries (`get_runtime_info()`, `resolve_public_port()`, `read_file()`)
/// require a running container and always re-fetch from the runtime.
pub struct TestLedger {
    options: LedgerContainerOptions,
    runtime: Arc<dyn ContainerRuntime>,
    images: ImageResolver,
    poller: HealthCheckPoller,
    files: ContainerFileAccessor,
    slot: RwLock<Slot>,
    lifecycle: Mutex<()>,
}

impl TestLedger {
    /// Create a test ledger on top of a shared runtime.
    pub fn new(options: LedgerContainerOptions, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            images: ImageResolver::new(runtime.clone()),
            poller: HealthCheckPoller::new(runtime.clone(), options.poll_interval()),
            files: ContainerFileAccessor::new(runtime.clone()),
            options,
            runtime,
            slot: RwLock::new(Slot {
                state: LedgerState::Uninitialized,
                handle: None,
                log_follower: None,
            }),
            lifecycle: Mutex::new(()),
        }
    }

    /// Create a test ledger talking to the local Docker daemon.
    pub async fn connect(options: LedgerContainerOptions) -> Result<Self> {
        let runtime = DockerRuntime::connect().await?;
        Ok(Self::new(options, Arc::new(runtime)))
    }

    pub fn options(&self) -> &LedgerContainerOptions {
        &self.options
    }

    /// Fully qualified image this ledger runs.
    pub fn image_ref(&self) -> ImageRef {
        self.options.image_ref()
    }

    pub async fn state(&self) -> LedgerState {
        self.slot.read().await.state
    }

    /// Handle of the container currently owned, if any.
    pub async fn handle(&self) -> Option<ContainerHandle> {
        self.slot.read().await.handle.clone()
    }

    /// Start a fresh container and wait until it is healthy.
    ///
    /// Any container this ledger already owns is force-removed first.
    pub async fn start(&self) -> Result<ContainerHandle> {
        let _lifecycle = self.lifecycle.lock().await;

        {
            let mut slot = self.slot.write().await;
            if slot.state == LedgerState::Destroyed {
                return Err(LedgerError::LifecycleState {
                    operation: "start",
                    state: slot.state,
                });
            }
            slot.stop_log_follower();
            slot.state = LedgerState::Starting;
        }

        let result = self.launch().await;

        let mut slot = self.slot.write().await;
        match result {
            Ok(handle) => {
                slot.state = LedgerState::RunningHealthy;
                tracing::info!("Test ledger {} ready ({})", handle, self.image_ref());
                Ok(handle)
            }
            Err(e) => {
                slot.state = LedgerState::Failed;
                tracing::debug!("Test ledger start failed: {}", e);
                Err(e)
            }
        }
    }

    async fn launch(&self) -> Result<ContainerHandle> {
        let previous = self.slot.read().await.handle.clone();
        if let Some(previous) = previous {
            tracing::debug!("Removing previous container {} before restart", previous);
            match self.runtime.remove(previous.id(), true).await {
                Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                Err(e) => return Err(LedgerError::runtime("restart", previous.id(), e)),
            }
            self.slot.write().await.handle = None;
        }

        let image = self.image_ref();
        tracing::debug!("Pulling container image {} ...", image);
        self.images.ensure_image(&image).await?;

        let spec = self.container_spec(&image);
        tracing::debug!("Pulled {} OK. Starting container {}...", image, spec.name);
        let id = self
            .runtime
            .create_and_run(&spec)
            .await
            .map_err(|source| LedgerError::Runtime {
                operation: "start",
                target: spec.name.clone(),
                source,
            })?;
        let handle = ContainerHandle::new(id, spec.name);

        {
            let mut slot = self.slot.write().await;
            slot.handle = Some(handle.clone());
            slot.state = LedgerState::RunningUnhealthy;
            if self.options.emit_logs() {
                slot.log_follower = Some(self.follow_logs(&handle));
            }
        }

        match self.options.health_check() {
            HealthCheck::Disabled => {
                tracing::debug!("Started container {} OK, no health check configured", handle);
            }
            HealthCheck::Probe(_) => {
                tracing::debug!("Started container {} OK. Waiting for health check...", handle);
                self.poller
                    .wait_until_healthy(&handle, self.options.startup_timeout())
                    .await?;
                tracing::debug!("Health check passing for {}", handle);
            }
        }

        Ok(handle)
    }

    fn container_spec(&self, image: &ImageRef) -> ContainerSpec {
        let health_check = match self.options.health_check() {
            HealthCheck::Disabled => None,
            HealthCheck::Probe(spec) => Some(spec.clone()),
        };

        ContainerSpec {
            name: format!("ledger-harness-{}", Uuid::new_v4().simple()),
            image: image.to_string(),
            exposed_ports: self.options.ports().to_vec(),
            env: self.options.env_vars().to_vec(),
            health_check,
            publish_all_ports: true,
            labels: HashMap::from([
                (MANAGED_LABEL.to_string(), "true".to_string()),
                ("ledger-harness.image".to_string(), image.to_string()),
            ]),
        }
    }

    fn follow_logs(&self, handle: &ContainerHandle) -> JoinHandle<()> {
        let mut lines = self.runtime.logs(handle.id());
        let name = handle.name().to_string();

        tokio::spawn(async move {
            while let Some(line) = lines.next().await {
                match line {
                    Ok(line) => {
                        tracing::debug!(
                            target: CONTAINER_LOG_TARGET,
                            container = %name,
                            "{}",
                            line.trim_end()
                        );
                    }
                    Err(e) => {
                        tracing::debug!(
                            target: CONTAINER_LOG_TARGET,
                            container = %name,
                            "Log stream closed: {}",
                            e
                        );
                        break;
                    }
                }
            }
        })
    }

    /// Gracefully stop the container. It stays around until `destroy()`.
    ///
    /// Fails with [`LedgerError::LifecycleState`] when nothing is running,
    /// including a second `stop()` in a row.
    pub async fn stop(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let handle = {
            let slot = self.slot.read().await;
            match (&slot.handle, slot.state) {
                (Some(handle), state)
                    if !matches!(state, LedgerState::Stopped | LedgerState::Destroyed) =>
                {
                    handle.clone()
                }
                (_, state) => {
                    return Err(LedgerError::LifecycleState {
                        operation: "stop",
                        state,
                    });
                }
            }
        };

        tracing::info!("Stopping test ledger container: {}", handle);
        self.runtime
            .stop(handle.id())
            .await
            .map_err(|e| LedgerError::runtime("stop", handle.id(), e))?;

        let mut slot = self.slot.write().await;
        slot.stop_log_follower();
        slot.state = LedgerState::Stopped;
        Ok(())
    }

    /// Remove the container. Running containers are killed first.
    pub async fn destroy(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let (handle, state) = {
            let slot = self.slot.read().await;
            match &slot.handle {
                Some(handle) => (handle.clone(), slot.state),
                None => {
                    return Err(LedgerError::LifecycleState {
                        operation: "destroy",
                        state: slot.state,
                    });
                }
            }
        };

        let force = state != LedgerState::Stopped;
        tracing::info!("Destroying test ledger container: {}", handle);
        self.runtime
            .remove(handle.id(), force)
            .await
            .map_err(|e| LedgerError::runtime("destroy", handle.id(), e))?;

        let mut slot = self.slot.write().await;
        slot.stop_log_follower();
        slot.handle = None;
        slot.state = LedgerState::Destroyed;
        Ok(())
    }

    /// Handle of the running container, or a lifecycle error naming `operation`.
    async fn running_handle(&self, operation: &'static str) -> Result<ContainerHandle> {
        let slot = self.slot.read().await;
        match &slot.handle {
            Some(handle) if slot.state.is_running() => Ok(handle.clone()),
            _ => Err(LedgerError::LifecycleState {
                operation,
                state: slot.state,
            }),
        }
    }

    /// Fresh runtime snapshot of the container.
    pub async fn get_runtime_info(&self) -> Result<RuntimeInfo> {
        let handle = self.running_handle("inspect").await?;
        self.runtime
            .inspect(handle.id())
            .await
            .map_err(|e| LedgerError::runtime("inspect", handle.id(), e))
    }

    /// Host port published for a container-internal port.
    pub async fn resolve_public_port(&self, private_port: u16) -> Result<u16> {
        let info = self.get_runtime_info().await?;
        Ok(ports::resolve_public_port(&info, private_port)?)
    }

    /// `http://127.0.0.1:<port>` for the primary (RPC) port.
    pub async fn rpc_endpoint(&self) -> Result<String> {
        let port = self.resolve_public_port(self.options.primary_port()).await?;
        Ok(format!("http://127.0.0.1:{port}"))
    }

    /// IP address of the container on the first network it is attached to.
    pub async fn container_ip_address(&self) -> Result<String> {
        let info = self.get_runtime_info().await?;
        info.networks
            .into_iter()
            .next()
            .map(|n| n.ip_address)
            .ok_or(LedgerError::NoNetwork {
                container_id: info.id,
            })
    }

    /// Contents of a file inside the running container.
    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let handle = self.running_handle("read file").await?;
        Ok(self.files.read_file(&handle, path).await?)
    }

    /// Contents of a UTF-8 text file inside the running container.
    pub async fn read_file_to_string(&self, path: &str) -> Result<String> {
        let handle = self.running_handle("read file").await?;
        Ok(self.files.read_to_string(&handle, path).await?)
    }
}

impl Drop for TestLedger {
    fn drop(&mut self) {
        let slot = self.slot.get_mut();
        slot.stop_log_follower();
        if let Some(handle) = &slot.handle {
            tracing::warn!(
                "TestLedger dropped without destroy(), container {} may remain",
                handle
            );
        }
    }
}

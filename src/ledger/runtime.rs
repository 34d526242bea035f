//! Container runtime boundary.
//!
//! [`ContainerRuntime`] is the small set of daemon calls the lifecycle
//! controller needs. [`DockerRuntime`] implements it over bollard; tests use
//! [`StubRuntime`](crate::testing::StubRuntime).

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, ListContainersOptions,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerSummary, HealthConfig, HostConfig};
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::ledger::error::{LedgerError, RuntimeError};
use crate::ledger::options::HealthCheckSpec;

/// Result type for raw runtime calls.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Label set on every container this crate creates.
pub const MANAGED_LABEL: &str = "ledger-harness.managed";

/// Seconds the daemon waits for a graceful stop before killing.
const STOP_GRACE_SECS: i64 = 10;

/// What to create and run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Fully qualified image reference.
    pub image: String,
    /// Container-internal TCP ports to expose and publish.
    pub exposed_ports: Vec<u16>,
    /// `KEY=VALUE` entries or bare flags.
    pub env: Vec<String>,
    /// Runtime health check, if any.
    pub health_check: Option<HealthCheckSpec>,
    /// Publish every exposed port on all host interfaces with a daemon-assigned port.
    pub publish_all_ports: bool,
    /// Container labels.
    pub labels: HashMap<String, String>,
}

/// One entry of a container's port table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortMapping {
    /// Port inside the container.
    pub private_port: u16,
    /// `tcp`, `udp` or `sctp`.
    pub protocol: String,
    /// Host address the port is bound to, absent when not published.
    pub bound_address: Option<String>,
    /// Host port, absent when not published.
    pub public_port: Option<u16>,
}

/// A network the container is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkAttachment {
    pub name: String,
    pub ip_address: String,
}

/// Point-in-time snapshot of a live container. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeInfo {
    /// Container ID.
    pub id: String,
    /// Human readable status, e.g. `Up 12 seconds (healthy)`.
    pub status: String,
    /// Machine state, e.g. `running`.
    pub state: Option<String>,
    /// Port table.
    pub ports: Vec<PortMapping>,
    /// Attached networks, sorted by name.
    pub networks: Vec<NetworkAttachment>,
}

impl RuntimeInfo {
    /// Whether the runtime health check currently passes.
    pub fn is_healthy(&self) -> bool {
        self.status.ends_with("(healthy)")
    }
}

/// One progress event while pulling an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullProgress {
    pub status: String,
    pub progress: Option<String>,
}

impl fmt::Display for PullProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.progress {
            Some(p) => write!(f, "{} {}", self.status, p),
            None => f.write_str(&self.status),
        }
    }
}

/// Daemon operations the test ledger relies on.
///
/// Implementations are shared between controllers; the daemon serializes
/// conflicting operations.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether `image` is present locally.
    async fn image_exists(&self, image: &str) -> RuntimeResult<bool>;

    /// Pull `image`, yielding progress until done.
    fn pull_image(&self, image: &str) -> BoxStream<'static, RuntimeResult<PullProgress>>;

    /// Create and start a container. Resolves once the daemon confirms it runs.
    async fn create_and_run(&self, spec: &ContainerSpec) -> RuntimeResult<String>;

    /// Fresh snapshot of a live container. `NotFound` once it stopped or vanished.
    async fn inspect(&self, id: &str) -> RuntimeResult<RuntimeInfo>;

    /// Gracefully stop a container. Stopping a stopped container succeeds.
    async fn stop(&self, id: &str) -> RuntimeResult<()>;

    /// Remove a container, killing it first when `force` is set.
    async fn remove(&self, id: &str, force: bool) -> RuntimeResult<()>;

    /// Tar archive of `path` inside the container, as a byte stream.
    fn get_archive(&self, id: &str, path: &str) -> BoxStream<'static, RuntimeResult<Bytes>>;

    /// Follow the container's stdout and stderr.
    fn logs(&self, id: &str) -> BoxStream<'static, RuntimeResult<String>>;
}

/// Connect to the local Docker daemon and check it responds.
///
/// Uses bollard's local defaults (honouring `DOCKER_HOST`) and falls back to
/// the Docker Desktop socket in the home directory and the rootless socket
/// under `XDG_RUNTIME_DIR`.
pub async fn connect_docker() -> Result<Docker, LedgerError> {
    let mut last_error = match Docker::connect_with_local_defaults() {
        Ok(docker) => match docker.ping().await {
            Ok(_) => return Ok(docker),
            Err(e) => e.to_string(),
        },
        Err(e) => e.to_string(),
    };

    for socket in fallback_sockets() {
        if !socket.exists() {
            continue;
        }
        let Some(path) = socket.to_str() else {
            continue;
        };
        match Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION) {
            Ok(docker) => match docker.ping().await {
                Ok(_) => {
                    tracing::debug!("Connected to Docker via {}", path);
                    return Ok(docker);
                }
                Err(e) => last_error = format!("{path}: {e}"),
            },
            Err(e) => last_error = format!("{path}: {e}"),
        }
    }

    Err(LedgerError::DockerNotAvailable { reason: last_error })
}

fn fallback_sockets() -> Vec<PathBuf> {
    let mut sockets = Vec::new();
    if let Some(home) = dirs::home_dir() {
        sockets.push(home.join(".docker/run/docker.sock"));
    }
    if let Some(runtime_dir) = std::env::var_os("XDG_RUNTIME_DIR") {
        sockets.push(PathBuf::from(runtime_dir).join("docker.sock"));
    }
    sockets
}

/// [`ContainerRuntime`] backed by the Docker Engine API.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect with [`connect_docker`].
    pub async fn connect() -> Result<Self, LedgerError> {
        Ok(Self::new(connect_docker().await?))
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_exists(&self, image: &str) -> RuntimeResult<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) => match RuntimeError::from(e) {
                RuntimeError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    fn pull_image(&self, image: &str) -> BoxStream<'static, RuntimeResult<PullProgress>> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        self.docker
            .create_image(Some(options), None, None)
            .map(|event| {
                let info = event.map_err(RuntimeError::from)?;
                Ok(PullProgress {
                    status: info.status.unwrap_or_default(),
                    progress: info.progress,
                })
            })
            .boxed()
    }

    async fn create_and_run(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .exposed_ports
            .iter()
            .map(|port| (format!("{port}/tcp"), HashMap::new()))
            .collect();

        let host_config = HostConfig {
            publish_all_ports: Some(spec.publish_all_ports),
            auto_remove: Some(false),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            exposed_ports: Some(exposed_ports),
            healthcheck: spec.health_check.as_ref().map(health_config),
            labels: Some(spec.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = self.docker.create_container(Some(options), config).await?;
        for warning in &response.warnings {
            tracing::warn!("Docker warning for {}: {}", spec.name, warning);
        }

        if let Err(e) = self
            .docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
        {
            // Do not leave a created-but-never-started container behind.
            if let Err(cleanup) = self
                .docker
                .remove_container(
                    &response.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await
            {
                tracing::warn!(
                    "Failed to remove container {} after start failure: {}",
                    response.id,
                    cleanup
                );
            }
            return Err(e.into());
        }

        Ok(response.id)
    }

    async fn inspect(&self, id: &str) -> RuntimeResult<RuntimeInfo> {
        let options = ListContainersOptions::<String> {
            all: false,
            filters: HashMap::from([("id".to_string(), vec![id.to_string()])]),
            ..Default::default()
        };

        self.docker
            .list_containers(Some(options))
            .await?
            .into_iter()
            .find(|c| c.id.as_deref() == Some(id))
            .map(runtime_info)
            .ok_or_else(|| RuntimeError::NotFound(format!("no live container with id {id}")))
    }

    async fn stop(&self, id: &str) -> RuntimeResult<()> {
        let options = StopContainerOptions { t: STOP_GRACE_SECS };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, id: &str, force: bool) -> RuntimeResult<()> {
        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }

    fn get_archive(&self, id: &str, path: &str) -> BoxStream<'static, RuntimeResult<Bytes>> {
        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };
        self.docker
            .download_from_container(id, Some(options))
            .map(|chunk| chunk.map_err(RuntimeError::from))
            .boxed()
    }

    fn logs(&self, id: &str) -> BoxStream<'static, RuntimeResult<String>> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        };
        self.docker
            .logs(id, Some(options))
            .map(|line| line.map(|l| l.to_string()).map_err(RuntimeError::from))
            .boxed()
    }
}

fn health_config(spec: &HealthCheckSpec) -> HealthConfig {
    let nanos = |d: std::time::Duration| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX);
    HealthConfig {
        test: if spec.command.is_empty() {
            None
        } else {
            Some(spec.command.clone())
        },
        interval: Some(nanos(spec.interval)),
        timeout: Some(nanos(spec.timeout)),
        retries: Some(i64::from(spec.retries)),
        start_period: Some(nanos(spec.start_period)),
        ..Default::default()
    }
}

fn runtime_info(summary: ContainerSummary) -> RuntimeInfo {
    let ports = summary
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|p| PortMapping {
            private_port: p.private_port,
            protocol: p
                .typ
                .map(|t| t.to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "tcp".to_string()),
            bound_address: p.ip,
            public_port: p.public_port,
        })
        .collect();

    let mut networks: Vec<NetworkAttachment> = summary
        .network_settings
        .and_then(|s| s.networks)
        .unwrap_or_default()
        .into_iter()
        .map(|(name, endpoint)| NetworkAttachment {
            name,
            ip_address: endpoint.ip_address.unwrap_or_default(),
        })
        .collect();
    networks.sort_by(|a, b| a.name.cmp(&b.name));

    RuntimeInfo {
        id: summary.id.unwrap_or_default(),
        status: summary.status.unwrap_or_default(),
        state: summary.state,
        ports,
        networks,
    }
}

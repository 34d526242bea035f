//! Test doubles for exercising test ledgers without a Docker daemon.
//!
//! Provides:
//! - [`StubRuntime`]: an in-memory [`ContainerRuntime`] with scriptable
//!   health status, port table, files and failures, recording every call
//! - [`tar_archive`]: builds the single-file archive the runtime would return
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ledger_harness::ledger::{LedgerContainerOptions, TestLedger};
//! use ledger_harness::testing::StubRuntime;
//!
//! # async fn example() -> ledger_harness::ledger::Result<()> {
//! let runtime = Arc::new(StubRuntime::new().with_file("/etc/hostname", b"node0\n"));
//! let ledger = TestLedger::new(LedgerContainerOptions::default(), runtime.clone());
//! ledger.start().await?;
//! assert_eq!(ledger.read_file_to_string("/etc/hostname").await?, "node0\n");
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::{self, BoxStream};

use crate::ledger::controller::ContainerHandle;
use crate::ledger::error::RuntimeError;
use crate::ledger::runtime::{
    ContainerRuntime, ContainerSpec, NetworkAttachment, PortMapping, PullProgress, RuntimeInfo,
    RuntimeResult,
};

/// Status reported when no sequence is scripted.
pub const HEALTHY_STATUS: &str = "Up 1 second (healthy)";

/// Chunk size used when streaming archives.
const ARCHIVE_CHUNK: usize = 512;

/// Build a tar archive holding one regular file.
pub fn tar_archive(name: &str, contents: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    builder.append_data(&mut header, name, contents)?;
    builder.into_inner()
}

#[derive(Default)]
struct StubState {
    images: HashSet<String>,
    pulled: Vec<String>,
    pull_error: Option<String>,
    status_sequence: VecDeque<String>,
    steady_status: String,
    ports: Vec<PortMapping>,
    networks: Vec<NetworkAttachment>,
    files: HashMap<String, Vec<u8>>,
    broken_archives: HashMap<String, String>,
    log_lines: Vec<String>,
    /// Container ID to whether it is running.
    containers: BTreeMap<String, bool>,
    specs: Vec<ContainerSpec>,
    calls: Vec<String>,
    inspect_count: usize,
    next_id: u64,
}

/// In-memory container runtime.
pub struct StubRuntime {
    state: Mutex<StubState>,
}

impl Default for StubRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl StubRuntime {
    /// A runtime with no images, healthy containers and no published ports.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StubState {
                steady_status: HEALTHY_STATUS.to_string(),
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark an image as already present locally.
    pub fn with_image(self, image: &str) -> Self {
        self.state().images.insert(image.to_string());
        self
    }

    /// Fail every pull with `reason`.
    pub fn with_pull_error(self, reason: &str) -> Self {
        self.state().pull_error = Some(reason.to_string());
        self
    }

    /// Statuses returned by successive inspections before the steady status.
    pub fn with_status_sequence<I, S>(self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state()
            .status_sequence
            .extend(statuses.into_iter().map(Into::into));
        self
    }

    /// Status returned once the sequence is exhausted.
    pub fn with_steady_status(self, status: &str) -> Self {
        self.state().steady_status = status.to_string();
        self
    }

    /// Port table reported for every container.
    pub fn with_ports(self, ports: Vec<PortMapping>) -> Self {
        self.state().ports = ports;
        self
    }

    /// Attach every container to a network.
    pub fn with_network(self, name: &str, ip_address: &str) -> Self {
        self.state().networks.push(NetworkAttachment {
            name: name.to_string(),
            ip_address: ip_address.to_string(),
        });
        self
    }

    /// A file present in every container.
    pub fn with_file(self, path: &str, contents: &[u8]) -> Self {
        self.state().files.insert(path.to_string(), contents.to_vec());
        self
    }

    /// Archive streams for `path` fail with `reason` after the first chunk.
    pub fn with_broken_archive(self, path: &str, reason: &str) -> Self {
        self.state()
            .broken_archives
            .insert(path.to_string(), reason.to_string());
        self
    }

    /// Lines every container writes to its output.
    pub fn with_log_lines<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state()
            .log_lines
            .extend(lines.into_iter().map(Into::into));
        self
    }

    /// Images pulled so far, in order.
    pub fn pulled_images(&self) -> Vec<String> {
        self.state().pulled.clone()
    }

    /// Number of `inspect` calls so far.
    pub fn inspect_count(&self) -> usize {
        self.state().inspect_count
    }

    /// IDs of containers that exist (running or stopped).
    pub fn containers(&self) -> Vec<String> {
        self.state().containers.keys().cloned().collect()
    }

    /// Every call except `inspect`, e.g. `stop(stub0001)`.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Spec of the most recently created container.
    pub fn last_spec(&self) -> Option<ContainerSpec> {
        self.state().specs.last().cloned()
    }

    /// Create a running container outside any controller.
    pub async fn launch_for_test(&self, name: &str) -> ContainerHandle {
        let spec = ContainerSpec {
            name: name.to_string(),
            image: "stub:latest".to_string(),
            exposed_ports: Vec::new(),
            env: Vec::new(),
            health_check: None,
            publish_all_ports: true,
            labels: HashMap::new(),
        };
        let id = match self.create_and_run(&spec).await {
            Ok(id) => id,
            Err(e) => panic!("stub create failed: {e}"),
        };
        ContainerHandle::new(id, name)
    }

    /// Simulate the container exiting on its own.
    pub fn kill_for_test(&self, id: &str) {
        if let Some(running) = self.state().containers.get_mut(id) {
            *running = false;
        }
    }
}

#[async_trait]
impl ContainerRuntime for StubRuntime {
    async fn image_exists(&self, image: &str) -> RuntimeResult<bool> {
        Ok(self.state().images.contains(image))
    }

    fn pull_image(&self, image: &str) -> BoxStream<'static, RuntimeResult<PullProgress>> {
        let mut state = self.state();
        state.calls.push(format!("pull({image})"));

        let started = Ok(PullProgress {
            status: format!("Pulling from {image}"),
            progress: None,
        });
        let events = match state.pull_error.clone() {
            Some(reason) => vec![started, Err(RuntimeError::Transport(reason))],
            None => {
                state.images.insert(image.to_string());
                state.pulled.push(image.to_string());
                vec![
                    started,
                    Ok(PullProgress {
                        status: "Download complete".to_string(),
                        progress: Some("[==================>]".to_string()),
                    }),
                ]
            }
        };
        stream::iter(events).boxed()
    }

    async fn create_and_run(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("stub{:04}", state.next_id);
        state.calls.push(format!("create_and_run({})", spec.name));
        state.containers.insert(id.clone(), true);
        state.specs.push(spec.clone());
        Ok(id)
    }

    async fn inspect(&self, id: &str) -> RuntimeResult<RuntimeInfo> {
        let mut state = self.state();
        state.inspect_count += 1;
        if state.containers.get(id) != Some(&true) {
            return Err(RuntimeError::NotFound(format!("no live container {id}")));
        }
        let status = state
            .status_sequence
            .pop_front()
            .unwrap_or_else(|| state.steady_status.clone());
        Ok(RuntimeInfo {
            id: id.to_string(),
            status,
            state: Some("running".to_string()),
            ports: state.ports.clone(),
            networks: state.networks.clone(),
        })
    }

    async fn stop(&self, id: &str) -> RuntimeResult<()> {
        let mut state = self.state();
        state.calls.push(format!("stop({id})"));
        match state.containers.get_mut(id) {
            Some(running) => {
                *running = false;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(format!("no container {id}"))),
        }
    }

    async fn remove(&self, id: &str, force: bool) -> RuntimeResult<()> {
        let mut state = self.state();
        let flag = if force { "(force)" } else { "" };
        state.calls.push(format!("remove{flag}({id})"));
        match state.containers.get(id) {
            None => Err(RuntimeError::NotFound(format!("no container {id}"))),
            Some(true) if !force => Err(RuntimeError::Daemon {
                status: 409,
                message: format!("cannot remove running container {id}"),
            }),
            Some(_) => {
                state.containers.remove(id);
                Ok(())
            }
        }
    }

    fn get_archive(&self, id: &str, path: &str) -> BoxStream<'static, RuntimeResult<Bytes>> {
        let mut state = self.state();
        state.calls.push(format!("get_archive({id}, {path})"));

        if !state.containers.contains_key(id) {
            let err = RuntimeError::NotFound(format!("no container {id}"));
            return stream::iter(vec![Err(err)]).boxed();
        }
        let Some(contents) = state.files.get(path) else {
            let err = RuntimeError::NotFound(format!("Could not find the file {path}"));
            return stream::iter(vec![Err(err)]).boxed();
        };

        let name = path.rsplit('/').next().unwrap_or(path);
        let archive = match tar_archive(name, contents) {
            Ok(archive) => archive,
            Err(e) => {
                let err = RuntimeError::Transport(e.to_string());
                return stream::iter(vec![Err(err)]).boxed();
            }
        };

        let mut chunks: Vec<RuntimeResult<Bytes>> = archive
            .chunks(ARCHIVE_CHUNK)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if let Some(reason) = state.broken_archives.get(path) {
            chunks.truncate(1);
            chunks.push(Err(RuntimeError::Transport(reason.clone())));
        }
        stream::iter(chunks).boxed()
    }

    fn logs(&self, id: &str) -> BoxStream<'static, RuntimeResult<String>> {
        let mut state = self.state();
        state.calls.push(format!("logs({id})"));
        stream::iter(state.log_lines.clone().into_iter().map(Ok)).boxed()
    }
}

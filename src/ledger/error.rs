//! Error types for test ledger management.

use std::time::Duration;

use thiserror::Error;

use crate::ledger::controller::LedgerState;

/// Result type for test ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur while managing a test ledger container.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The construction options were rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Docker is not available.
    #[error("Docker not available: {reason}")]
    DockerNotAvailable {
        /// Reason why Docker is unavailable.
        reason: String,
    },

    /// Failed to pull the image.
    #[error("Failed to pull image '{image}': {reason}")]
    ImagePull {
        /// Fully qualified image reference.
        image: String,
        /// Reason for failure.
        reason: String,
    },

    /// Container did not report a healthy status within the timeout.
    #[error(
        "Container '{container_id}' not healthy within {timeout:?} (last status: {})",
        last_status.as_deref().unwrap_or("<none observed>")
    )]
    HealthCheckTimeout {
        /// Container ID.
        container_id: String,
        /// Timeout duration.
        timeout: Duration,
        /// Last status string reported by the runtime, if any poll completed.
        last_status: Option<String>,
    },

    /// A private port could not be resolved to a usable host port.
    #[error(transparent)]
    PortMapping(#[from] PortMappingError),

    /// A file could not be copied out of the container.
    #[error(transparent)]
    FileAccess(#[from] FileAccessError),

    /// The operation is not valid in the current lifecycle state.
    #[error("Cannot {operation}: test ledger is {state}")]
    LifecycleState {
        /// Attempted operation.
        operation: &'static str,
        /// State the ledger was in.
        state: LedgerState,
    },

    /// The tracked container no longer resolves to a live container.
    #[error("Container '{container_id}' not found during {operation}")]
    NotFound {
        /// Container ID.
        container_id: String,
        /// Attempted operation.
        operation: &'static str,
    },

    /// The container is not attached to any network.
    #[error("Container '{container_id}' is not connected to any network")]
    NoNetwork {
        /// Container ID.
        container_id: String,
    },

    /// Any other container runtime failure.
    #[error("Container runtime failed during {operation} of '{target}': {source}")]
    Runtime {
        /// Attempted operation.
        operation: &'static str,
        /// Container ID, name or image the operation targeted.
        target: String,
        /// Underlying runtime error.
        #[source]
        source: RuntimeError,
    },
}

impl LedgerError {
    /// Wrap a runtime error with the operation and target it came from.
    ///
    /// `RuntimeError::NotFound` becomes [`LedgerError::NotFound`].
    pub fn runtime(
        operation: &'static str,
        target: impl Into<String>,
        source: RuntimeError,
    ) -> Self {
        match source {
            RuntimeError::NotFound(_) => LedgerError::NotFound {
                container_id: target.into(),
                operation,
            },
            source => LedgerError::Runtime {
                operation,
                target: target.into(),
                source,
            },
        }
    }
}

/// Every constraint violated by a set of ledger options.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid ledger options: {}", violations.join("; "))]
pub struct ValidationError {
    /// One human-readable message per violated constraint.
    pub violations: Vec<String>,
}

/// Why a private port has no usable public mapping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortMappingError {
    /// The runtime reports no mapping at all for the port.
    #[error("Container '{container_id}': no mapping found for port {private_port}")]
    NoPortMapping {
        container_id: String,
        private_port: u16,
    },

    /// The port is exposed but has no host port.
    #[error("Container '{container_id}': port {private_port} mapped but not published")]
    PortNotPublished {
        container_id: String,
        private_port: u16,
    },

    /// The port is published on a specific address instead of all interfaces.
    #[error(
        "Container '{container_id}': port {private_port} bound to {bound_address} instead of all interfaces"
    )]
    PortBoundToLoopback {
        container_id: String,
        private_port: u16,
        bound_address: String,
    },
}

/// Failures while copying a file out of a container.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FileAccessError {
    /// The runtime reports the path does not exist.
    #[error("File '{path}' not found in container '{container_id}'")]
    FileNotFound { container_id: String, path: String },

    /// The archive transport failed or produced an unreadable archive.
    #[error("Failed to read '{path}' from container '{container_id}': {reason}")]
    Stream {
        container_id: String,
        path: String,
        reason: String,
    },

    /// The file is not valid UTF-8.
    #[error("File '{path}' in container '{container_id}' is not valid UTF-8")]
    NotUtf8 { container_id: String, path: String },
}

/// Errors reported by a [`ContainerRuntime`](crate::ledger::ContainerRuntime).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The referenced container, image or path does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The daemon rejected the request.
    #[error("daemon returned {status}: {message}")]
    Daemon { status: u16, message: String },

    /// The connection to the daemon failed.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<bollard::errors::Error> for RuntimeError {
    fn from(e: bollard::errors::Error) -> Self {
        match e {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => RuntimeError::NotFound(message),
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => RuntimeError::Daemon {
                status: status_code,
                message,
            },
            other => RuntimeError::Transport(other.to_string()),
        }
    }
}

//! Ephemeral containerized test ledgers.
//!
//! Provisions a short-lived container running a blockchain node (or one of its
//! dependencies, such as a database), waits until the runtime reports it
//! healthy, exposes its published ports and files, and tears it down again.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                              TestLedger                                    │
//! │                                                                            │
//! │   start()                                                                  │
//! │      │                                                                     │
//! │      ▼                                                                     │
//! │   ┌──────────────┐     ┌──────────────┐     ┌──────────────────────────┐   │
//! │   │ Remove       │────▶│ ImageResolver│────▶│ Create & Run Container   │   │
//! │   │ Previous     │     │ (pull if     │     │ (ports, env, healthcheck)│   │
//! │   └──────────────┘     │  absent)     │     └──────────────────────────┘   │
//! │                        └──────────────┘                  │                 │
//! │                                                          ▼                 │
//! │                                           ┌──────────────────────────┐     │
//! │                                           │ HealthCheckPoller        │     │
//! │                                           │ (poll status, timeout)   │     │
//! │                                           └──────────────────────────┘     │
//! │                                                          │                 │
//! │                                                          ▼                 │
//! │   get_runtime_info() / resolve_public_port() / read_file()                 │
//! │      (PortMappingResolver, ContainerFileAccessor)                          │
//! │                                                          │                 │
//! │                                                          ▼                 │
//! │   stop() ──▶ destroy()                                                     │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use ledger_harness::ledger::{LedgerContainerOptions, RawLedgerOptions, TestLedger};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let options = LedgerContainerOptions::validate(RawLedgerOptions {
//!     image_name: Some("hyperledger/iroha".to_string()),
//!     image_version: Some("1.2.0".to_string()),
//!     ports: Some(vec![50051]),
//!     env_vars: Some(vec!["IROHA_NETWORK=dev".to_string()]),
//!     ..Default::default()
//! })?;
//!
//! let ledger = TestLedger::connect(options).await?;
//! ledger.start().await?;
//!
//! let torii = ledger.resolve_public_port(50051).await?;
//! println!("Torii available on 127.0.0.1:{torii}");
//!
//! ledger.stop().await?;
//! ledger.destroy().await?;
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod error;
pub mod files;
pub mod health;
pub mod image;
pub mod options;
pub mod ports;
pub mod runtime;

pub use controller::{ContainerHandle, LedgerState, TestLedger};
pub use error::{
    FileAccessError, LedgerError, PortMappingError, Result, RuntimeError, ValidationError,
};
pub use files::ContainerFileAccessor;
pub use health::HealthCheckPoller;
pub use image::{ImageRef, ImageResolver};
pub use options::{HealthCheck, HealthCheckSpec, LedgerContainerOptions, RawLedgerOptions, validate};
pub use ports::resolve_public_port;
pub use runtime::{
    ContainerRuntime, ContainerSpec, DockerRuntime, NetworkAttachment, PortMapping, PullProgress,
    RuntimeInfo, connect_docker,
};

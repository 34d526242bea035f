//! Crate-level error types that are not tied to the ledger lifecycle.

use thiserror::Error;

/// Errors raised while resolving configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable was present but could not be interpreted.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

//! Configuration resolved from the environment.
//!
//! A `.env` file in the working directory is loaded by the binary before
//! [`HarnessConfig::from_env`] runs, so both sources are honoured.

mod helpers;
mod ledger;

pub use ledger::LedgerConfig;

use crate::error::ConfigError;

/// Top-level harness configuration.
#[derive(Debug, Clone, Default)]
pub struct HarnessConfig {
    pub ledger: LedgerConfig,
}

impl HarnessConfig {
    /// Resolve all sections from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            ledger: LedgerConfig::resolve(helpers::optional_env)?,
        })
    }
}

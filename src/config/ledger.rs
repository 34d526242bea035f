use std::time::Duration;

use crate::config::helpers::{parse_bool, parse_value, split_list};
use crate::error::ConfigError;
use crate::ledger::{HealthCheck, HealthCheckSpec, RawLedgerOptions};

/// Test ledger overrides read from the environment.
///
/// Every field is optional; unset fields fall through to the option defaults
/// when the result is validated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerConfig {
    /// `LEDGER_IMAGE_NAME`
    pub image_name: Option<String>,
    /// `LEDGER_IMAGE_VERSION`
    pub image_version: Option<String>,
    /// `LEDGER_PORTS`, comma separated.
    pub ports: Option<Vec<u32>>,
    /// `LEDGER_ENV`, comma separated `KEY=VALUE` entries or flags.
    pub env_vars: Option<Vec<String>>,
    /// `LEDGER_HEALTH_CMD`, a shell command, or `none` to disable.
    pub health_check: Option<HealthCheck>,
    /// `LEDGER_HEALTH_TIMEOUT_SECS`
    pub startup_timeout_secs: Option<u64>,
    /// `LEDGER_EMIT_LOGS`
    pub emit_logs: Option<bool>,
}

impl LedgerConfig {
    pub(crate) fn resolve<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<Option<String>, ConfigError>,
    {
        let ports = lookup("LEDGER_PORTS")?
            .map(|value| {
                split_list(&value)
                    .into_iter()
                    .map(|p| parse_value::<u32>("LEDGER_PORTS", Some(p)))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .map(|ports| ports.into_iter().flatten().collect());

        let health_check = lookup("LEDGER_HEALTH_CMD")?
            .map(|cmd| cmd.trim().to_string())
            .filter(|cmd| !cmd.is_empty())
            .map(|cmd| {
                if cmd.eq_ignore_ascii_case("none") {
                    HealthCheck::Disabled
                } else {
                    HealthCheck::Probe(HealthCheckSpec::shell(cmd))
                }
            });

        Ok(Self {
            image_name: lookup("LEDGER_IMAGE_NAME")?,
            image_version: lookup("LEDGER_IMAGE_VERSION")?,
            ports,
            env_vars: lookup("LEDGER_ENV")?.map(|value| split_list(&value)),
            health_check,
            startup_timeout_secs: parse_value(
                "LEDGER_HEALTH_TIMEOUT_SECS",
                lookup("LEDGER_HEALTH_TIMEOUT_SECS")?,
            )?,
            emit_logs: parse_bool("LEDGER_EMIT_LOGS", lookup("LEDGER_EMIT_LOGS")?)?,
        })
    }

    /// Raw options carrying these overrides. Still needs validation.
    pub fn to_raw_options(&self) -> RawLedgerOptions {
        RawLedgerOptions {
            image_name: self.image_name.clone(),
            image_version: self.image_version.clone(),
            ports: self.ports.clone(),
            env_vars: self.env_vars.clone(),
            health_check: self.health_check.clone(),
            startup_timeout: self.startup_timeout_secs.map(Duration::from_secs),
            poll_interval: None,
            emit_logs: self.emit_logs,
        }
    }
}

//! Construction options for a test ledger container.
//!
//! Callers fill in a [`RawLedgerOptions`] (every field optional) and
//! [`validate`] turns it into a [`LedgerContainerOptions`], applying the
//! defaults below and reporting every violated constraint at once.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ledger::error::ValidationError;
use crate::ledger::image::ImageRef;

/// Default image repository (Hyperledger Iroha).
pub const DEFAULT_IMAGE_NAME: &str = "hyperledger/iroha";
/// Default image tag.
pub const DEFAULT_IMAGE_VERSION: &str = "1.2.0";
/// Iroha Torii RPC port inside the container.
pub const DEFAULT_RPC_TORII_PORT: u16 = 50051;
/// Environment applied when none is given.
pub const DEFAULT_ENV_VARS: &[&str] = &["IROHA_NETWORK=dev"];
/// Overall time `start()` waits for a healthy status.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(180);
/// Delay between two status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Lowest port accepted for a declared container port.
pub const MIN_PORT: u32 = 1024;
/// Highest valid TCP port.
pub const MAX_PORT: u32 = 65535;

/// Health check run by the container runtime inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    /// Docker health check test, e.g. `["CMD-SHELL", "pg_isready"]`.
    /// Empty inherits the image's own `HEALTHCHECK` instruction.
    pub command: Vec<String>,
    /// Time between two runs of the check.
    pub interval: Duration,
    /// Time a single run may take.
    pub timeout: Duration,
    /// Consecutive failures before the runtime reports `unhealthy`.
    pub retries: u32,
    /// Grace period after start during which failures are not counted.
    pub start_period: Duration,
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(3),
            retries: 299,
            start_period: Duration::from_secs(3),
        }
    }
}

impl HealthCheckSpec {
    /// A shell health check with default timings.
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            command: vec!["CMD-SHELL".to_string(), command.into()],
            ..Default::default()
        }
    }
}

/// Whether `start()` waits for the runtime to report the container healthy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthCheck {
    /// No health check; the container counts as healthy once it runs.
    Disabled,
    /// Configure the runtime health check and wait for `(healthy)`.
    Probe(HealthCheckSpec),
}

impl Default for HealthCheck {
    fn default() -> Self {
        HealthCheck::Probe(HealthCheckSpec::default())
    }
}

/// Options as supplied by the caller. Unset fields take the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLedgerOptions {
    pub image_name: Option<String>,
    pub image_version: Option<String>,
    /// Container-internal ports. Wider than `u16` so out-of-range input is
    /// reported instead of truncated.
    pub ports: Option<Vec<u32>>,
    /// `KEY=VALUE` entries or bare flags.
    pub env_vars: Option<Vec<String>>,
    pub health_check: Option<HealthCheck>,
    pub startup_timeout: Option<Duration>,
    pub poll_interval: Option<Duration>,
    /// Follow the container's output into the log.
    pub emit_logs: Option<bool>,
}

/// Validated, immutable options for one test ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerContainerOptions {
    image_name: String,
    image_version: String,
    ports: Vec<u16>,
    env_vars: Vec<String>,
    health_check: HealthCheck,
    startup_timeout: Duration,
    poll_interval: Duration,
    emit_logs: bool,
}

impl LedgerContainerOptions {
    /// Validate raw options, see [`validate`].
    pub fn validate(raw: RawLedgerOptions) -> Result<Self, ValidationError> {
        validate(raw)
    }

    /// Options for the PostgreSQL container Iroha uses as its world state store.
    pub fn postgres(user: &str, password: &str) -> Result<Self, ValidationError> {
        validate(RawLedgerOptions {
            image_name: Some("postgres".to_string()),
            image_version: Some("9.5-alpine".to_string()),
            ports: Some(vec![5432]),
            env_vars: Some(vec![
                format!("POSTGRES_USER={user}"),
                format!("POSTGRES_PASSWORD={password}"),
            ]),
            health_check: Some(HealthCheck::Probe(HealthCheckSpec::shell(format!(
                "pg_isready -U {user}"
            )))),
            ..Default::default()
        })
    }

    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    pub fn image_version(&self) -> &str {
        &self.image_version
    }

    /// Fully qualified image reference.
    pub fn image_ref(&self) -> ImageRef {
        ImageRef::new(&self.image_name, &self.image_version)
    }

    /// Declared container-internal ports, never empty.
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// First declared port (the node's RPC port).
    pub fn primary_port(&self) -> u16 {
        self.ports[0]
    }

    pub fn env_vars(&self) -> &[String] {
        &self.env_vars
    }

    pub fn health_check(&self) -> &HealthCheck {
        &self.health_check
    }

    pub fn startup_timeout(&self) -> Duration {
        self.startup_timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn emit_logs(&self) -> bool {
        self.emit_logs
    }
}

impl Default for LedgerContainerOptions {
    fn default() -> Self {
        Self {
            image_name: DEFAULT_IMAGE_NAME.to_string(),
            image_version: DEFAULT_IMAGE_VERSION.to_string(),
            ports: vec![DEFAULT_RPC_TORII_PORT],
            env_vars: DEFAULT_ENV_VARS.iter().map(|s| s.to_string()).collect(),
            health_check: HealthCheck::default(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            emit_logs: false,
        }
    }
}

impl TryFrom<RawLedgerOptions> for LedgerContainerOptions {
    type Error = ValidationError;

    fn try_from(raw: RawLedgerOptions) -> Result<Self, Self::Error> {
        validate(raw)
    }
}

impl From<LedgerContainerOptions> for RawLedgerOptions {
    fn from(o: LedgerContainerOptions) -> Self {
        Self {
            image_name: Some(o.image_name),
            image_version: Some(o.image_version),
            ports: Some(o.ports.into_iter().map(u32::from).collect()),
            env_vars: Some(o.env_vars),
            health_check: Some(o.health_check),
            startup_timeout: Some(o.startup_timeout),
            poll_interval: Some(o.poll_interval),
            emit_logs: Some(o.emit_logs),
        }
    }
}

/// Apply defaults to `raw` and check every constraint.
///
/// Pure: the same input always yields the same output, and validating an
/// already validated set of options returns it unchanged.
pub fn validate(raw: RawLedgerOptions) -> Result<LedgerContainerOptions, ValidationError> {
    let defaults = LedgerContainerOptions::default();
    let mut violations = Vec::new();

    let image_name = raw.image_name.unwrap_or(defaults.image_name);
    if image_name.trim().is_empty() {
        violations.push("imageName must not be blank".to_string());
    } else if image_name.chars().any(char::is_whitespace) {
        violations.push(format!("imageName {image_name:?} must not contain whitespace"));
    } else if image_name
        .rsplit('/')
        .next()
        .is_some_and(|last| last.contains(':') || last.contains('@'))
    {
        violations.push(format!(
            "imageName {image_name:?} must not carry a tag or digest; set imageVersion instead"
        ));
    }

    let image_version = raw.image_version.unwrap_or(defaults.image_version);
    if image_version.trim().is_empty() {
        violations.push("imageVersion must not be blank".to_string());
    } else if image_version.chars().any(char::is_whitespace) {
        violations.push(format!(
            "imageVersion {image_version:?} must not contain whitespace"
        ));
    }

    let raw_ports = raw
        .ports
        .unwrap_or_else(|| defaults.ports.iter().copied().map(u32::from).collect());
    if raw_ports.is_empty() {
        violations.push("ports must declare at least one container port".to_string());
    }
    let mut ports = Vec::with_capacity(raw_ports.len());
    for (i, port) in raw_ports.iter().copied().enumerate() {
        if !(MIN_PORT..=MAX_PORT).contains(&port) {
            violations.push(format!(
                "ports[{i}] = {port} is outside [{MIN_PORT}, {MAX_PORT}]"
            ));
            continue;
        }
        // Range checked above.
        let port = port as u16;
        if ports.contains(&port) {
            violations.push(format!("ports[{i}] = {port} is declared twice"));
            continue;
        }
        ports.push(port);
    }

    let env_vars = raw.env_vars.unwrap_or(defaults.env_vars);
    for (i, entry) in env_vars.iter().enumerate() {
        if let Some(problem) = env_entry_problem(entry) {
            violations.push(format!("envVars[{i}] {entry:?}: {problem}"));
        }
    }

    let health_check = raw.health_check.unwrap_or(defaults.health_check);
    if let HealthCheck::Probe(spec) = &health_check {
        violations.extend(health_check_problems(spec));
    }

    let startup_timeout = raw.startup_timeout.unwrap_or(defaults.startup_timeout);

    let poll_interval = raw.poll_interval.unwrap_or(defaults.poll_interval);
    if poll_interval.is_zero() {
        violations.push("pollInterval must be greater than zero".to_string());
    }

    if !violations.is_empty() {
        return Err(ValidationError { violations });
    }

    Ok(LedgerContainerOptions {
        image_name,
        image_version,
        ports,
        env_vars,
        health_check,
        startup_timeout,
        poll_interval,
        emit_logs: raw.emit_logs.unwrap_or(defaults.emit_logs),
    })
}

/// Returns why an environment entry is malformed, if it is.
fn env_entry_problem(entry: &str) -> Option<&'static str> {
    let key = entry.split_once('=').map_or(entry, |(key, _)| key);
    if key.is_empty() {
        Some("variable name is empty")
    } else if key.chars().any(|c| c.is_whitespace() || c == '\0') {
        Some("variable name contains whitespace or NUL")
    } else if entry.contains('\0') {
        Some("value contains NUL")
    } else {
        None
    }
}

fn health_check_problems(spec: &HealthCheckSpec) -> Vec<String> {
    let mut problems = Vec::new();

    match spec.command.first().map(String::as_str) {
        None => {} // inherit the image's check
        Some("CMD") | Some("CMD-SHELL") => {
            if spec.command.len() < 2 || spec.command[1..].iter().all(|s| s.trim().is_empty()) {
                problems.push(format!(
                    "healthCheck.command {:?} has no command to run",
                    spec.command[0]
                ));
            }
        }
        Some("NONE") => problems
            .push("healthCheck.command NONE never reports healthy; use HealthCheck::Disabled".into()),
        Some(other) => problems.push(format!(
            "healthCheck.command must start with CMD or CMD-SHELL, got {other:?}"
        )),
    }

    if spec.interval.is_zero() {
        problems.push("healthCheck.interval must be greater than zero".to_string());
    }
    if spec.timeout.is_zero() {
        problems.push("healthCheck.timeout must be greater than zero".to_string());
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_applied() {
        let options = validate(RawLedgerOptions::default()).unwrap();

        assert_eq!(options.image_name(), DEFAULT_IMAGE_NAME);
        assert_eq!(options.image_version(), DEFAULT_IMAGE_VERSION);
        assert_eq!(options.ports(), &[DEFAULT_RPC_TORII_PORT]);
        assert_eq!(options.env_vars(), &["IROHA_NETWORK=dev".to_string()]);
        assert_eq!(options.startup_timeout(), DEFAULT_STARTUP_TIMEOUT);
        assert!(!options.emit_logs());
        assert!(matches!(options.health_check(), HealthCheck::Probe(_)));
    }

    #[test]
    fn test_validate_is_idempotent() {
        let first = validate(RawLedgerOptions {
            image_name: Some("x".into()),
            image_version: Some("1.0".into()),
            ports: Some(vec![50051, 8080]),
            env_vars: Some(vec!["A=1".into(), "FLAG".into()]),
            emit_logs: Some(true),
            ..Default::default()
        })
        .unwrap();

        let second = validate(first.clone().into()).unwrap();
        assert_eq!(first, second);

        let postgres = LedgerContainerOptions::postgres("postgres", "secret").unwrap();
        assert_eq!(validate(postgres.clone().into()).unwrap(), postgres);
    }

    #[test]
    fn test_collects_every_violation() {
        let err = validate(RawLedgerOptions {
            image_name: Some("  ".into()),
            image_version: Some(String::new()),
            ports: Some(vec![80, 70000]),
            env_vars: Some(vec!["=value".into()]),
            ..Default::default()
        })
        .unwrap_err();

        assert_eq!(err.violations.len(), 5, "{:?}", err.violations);
        assert!(err.violations[0].contains("imageName"));
        assert!(err.violations[1].contains("imageVersion"));
        assert!(err.violations[2].contains("80"));
        assert!(err.violations[3].contains("70000"));
        assert!(err.violations[4].contains("envVars[0]"));
    }

    #[test]
    fn test_port_range_bounds() {
        for ok in [1024, 65535] {
            let raw = RawLedgerOptions {
                ports: Some(vec![ok]),
                ..Default::default()
            };
            assert!(validate(raw).is_ok(), "port {ok} should be accepted");
        }
        for bad in [0, 1023, 65536] {
            let raw = RawLedgerOptions {
                ports: Some(vec![bad]),
                ..Default::default()
            };
            assert!(validate(raw).is_err(), "port {bad} should be rejected");
        }
    }

    #[test]
    fn test_empty_and_duplicate_ports_rejected() {
        let empty = validate(RawLedgerOptions {
            ports: Some(vec![]),
            ..Default::default()
        })
        .unwrap_err();
        assert!(empty.violations[0].contains("at least one"));

        let dup = validate(RawLedgerOptions {
            ports: Some(vec![5432, 5432]),
            ..Default::default()
        })
        .unwrap_err();
        assert!(dup.violations[0].contains("declared twice"));
    }

    #[test]
    fn test_env_vars_flags_and_pairs() {
        let options = validate(RawLedgerOptions {
            env_vars: Some(vec![
                "BESU_MINER_ENABLED".into(),
                "BESU_NETWORK=dev".into(),
                "BESU_MIN_GAS_PRICE=0".into(),
                "EMPTY=".into(),
            ]),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(options.env_vars().len(), 4);

        let err = validate(RawLedgerOptions {
            env_vars: Some(vec!["BAD KEY=1".into(), "".into()]),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err.violations.len(), 2);
    }

    #[test]
    fn test_image_name_with_tag_rejected() {
        let err = validate(RawLedgerOptions {
            image_name: Some("hyperledger/iroha:1.2.0".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.violations[0].contains("imageVersion instead"));

        // A registry port is not a tag.
        let ok = validate(RawLedgerOptions {
            image_name: Some("localhost:5000/iroha".into()),
            ..Default::default()
        });
        assert!(ok.is_ok());
    }

    #[test]
    fn test_health_check_command_checked() {
        let bad = |command: Vec<&str>| RawLedgerOptions {
            health_check: Some(HealthCheck::Probe(HealthCheckSpec {
                command: command.into_iter().map(String::from).collect(),
                ..Default::default()
            })),
            ..Default::default()
        };

        assert!(validate(bad(vec!["CMD-SHELL"])).is_err());
        assert!(validate(bad(vec!["NONE"])).is_err());
        assert!(validate(bad(vec!["curl", "localhost"])).is_err());
        assert!(validate(bad(vec!["CMD", "true"])).is_ok());
        assert!(validate(bad(vec![])).is_ok());
    }

    #[test]
    fn test_postgres_preset() {
        let options = LedgerContainerOptions::postgres("postgres", "mysecretpassword").unwrap();
        assert_eq!(options.image_ref().to_string(), "postgres:9.5-alpine");
        assert_eq!(options.primary_port(), 5432);
        assert!(
            options
                .env_vars()
                .contains(&"POSTGRES_PASSWORD=mysecretpassword".to_string())
        );
    }
}

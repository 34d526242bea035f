//! CLI command handling.
//!
//! Provides subcommands for:
//! - Running a test ledger until interrupted (`up`)
//! - Checking ledger options without touching Docker (`validate`)
//! - Printing a file from a running container (`cat`)

mod ledger;

pub use ledger::{run_cat_command, run_up_command, run_validate_command};

use clap::{Args, ColorChoice, Parser, Subcommand};

use crate::ledger::{HealthCheck, HealthCheckSpec, RawLedgerOptions};

#[derive(Parser, Debug)]
#[command(name = "ledger-harness")]
#[command(about = "Ephemeral containerized ledgers for integration tests")]
#[command(
    long_about = "Starts a blockchain node in a throwaway container, waits until it is healthy and reports its published ports.\nExamples:\n  ledger-harness up  # Start the default Iroha node\n  ledger-harness validate --port 50051 --port 5432"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a test ledger and keep it running until Ctrl-C
    #[command(
        about = "Start a test ledger",
        long_about = "Starts the container, waits for it to report healthy and prints its port mappings.\nExample: ledger-harness up --logs"
    )]
    Up {
        #[command(flatten)]
        ledger: LedgerArgs,

        /// Follow the container's output into the log
        #[arg(long)]
        logs: bool,
    },

    /// Validate ledger options and print the result
    #[command(
        about = "Validate ledger options",
        long_about = "Resolves flags, environment and defaults, then prints the options or every violation.\nExample: ledger-harness validate --image hyperledger/iroha"
    )]
    Validate {
        #[command(flatten)]
        ledger: LedgerArgs,
    },

    /// Print a file from a running container
    #[command(
        about = "Print a file from a container",
        long_about = "Copies a single file out of a running container and writes it to stdout.\nExample: ledger-harness cat --id 3f2a /opt/iroha_data/genesis.block"
    )]
    Cat {
        /// Container ID or name
        #[arg(long)]
        id: String,

        /// Absolute path inside the container
        path: String,
    },
}

/// Ledger option flags. Each one overrides the matching `LEDGER_*` variable.
#[derive(Args, Debug, Clone, Default)]
pub struct LedgerArgs {
    /// Image name without a tag (e.g. "hyperledger/iroha")
    #[arg(long)]
    pub image: Option<String>,

    /// Image tag or digest
    #[arg(long = "image-version")]
    pub image_version: Option<String>,

    /// Container-internal port to publish (repeatable)
    #[arg(short, long = "port")]
    pub ports: Vec<u32>,

    /// Environment entry as KEY=VALUE (repeatable)
    #[arg(short, long = "env")]
    pub env: Vec<String>,

    /// Shell command used as the health probe, or "none"
    #[arg(long)]
    pub health_cmd: Option<String>,

    /// Seconds to wait for the container to become healthy
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl LedgerArgs {
    /// Overlay the flags that were given onto `raw`.
    pub fn apply(&self, mut raw: RawLedgerOptions) -> RawLedgerOptions {
        if let Some(ref image) = self.image {
            raw.image_name = Some(image.clone());
        }
        if let Some(ref version) = self.image_version {
            raw.image_version = Some(version.clone());
        }
        if !self.ports.is_empty() {
            raw.ports = Some(self.ports.clone());
        }
        if !self.env.is_empty() {
            raw.env_vars = Some(self.env.clone());
        }
        if let Some(ref cmd) = self.health_cmd {
            raw.health_check = Some(if cmd.trim().eq_ignore_ascii_case("none") {
                HealthCheck::Disabled
            } else {
                HealthCheck::Probe(HealthCheckSpec::shell(cmd.clone()))
            });
        }
        if let Some(secs) = self.timeout {
            raw.startup_timeout = Some(std::time::Duration::from_secs(secs));
        }
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_up_flags() {
        let cli = Cli::parse_from([
            "ledger-harness",
            "up",
            "--image",
            "hyperledger/iroha",
            "--image-version",
            "1.2.0",
            "-p",
            "50051",
            "-p",
            "5432",
            "--env",
            "IROHA_NETWORK=dev",
            "--logs",
        ]);

        let Command::Up { ledger, logs } = cli.command else {
            panic!("expected up");
        };
        assert!(logs);
        assert_eq!(ledger.ports, vec![50051, 5432]);
        assert_eq!(ledger.image_version.as_deref(), Some("1.2.0"));
    }

    #[test]
    fn test_apply_keeps_unset_fields() {
        let base = RawLedgerOptions {
            image_name: Some("from-env".to_string()),
            ports: Some(vec![7000]),
            ..Default::default()
        };
        let args = LedgerArgs {
            ports: vec![50051],
            health_cmd: Some("none".to_string()),
            timeout: Some(5),
            ..Default::default()
        };

        let raw = args.apply(base);
        assert_eq!(raw.image_name.as_deref(), Some("from-env"));
        assert_eq!(raw.ports, Some(vec![50051]));
        assert_eq!(raw.health_check, Some(HealthCheck::Disabled));
        assert_eq!(
            raw.startup_timeout,
            Some(std::time::Duration::from_secs(5))
        );
    }

    #[test]
    fn test_parse_cat() {
        let cli = Cli::parse_from(["ledger-harness", "cat", "--id", "abc", "/etc/hostname"]);
        match cli.command {
            Command::Cat { id, path } => {
                assert_eq!(id, "abc");
                assert_eq!(path, "/etc/hostname");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}

//! Handlers for the ledger subcommands.

use std::io::Write;
use std::sync::Arc;

use crate::cli::LedgerArgs;
use crate::config::HarnessConfig;
use crate::ledger::{
    ContainerFileAccessor, DockerRuntime, LedgerContainerOptions, LedgerError, TestLedger,
};

/// Resolve options from flags over environment over defaults.
fn resolve_options(
    config: &HarnessConfig,
    args: &LedgerArgs,
    logs: bool,
) -> anyhow::Result<LedgerContainerOptions> {
    let mut raw = args.apply(config.ledger.to_raw_options());
    if logs {
        raw.emit_logs = Some(true);
    }
    Ok(LedgerContainerOptions::validate(raw)?)
}

/// Start a ledger, report its ports and keep it up until Ctrl-C.
pub async fn run_up_command(
    config: &HarnessConfig,
    args: &LedgerArgs,
    logs: bool,
) -> anyhow::Result<()> {
    let options = resolve_options(config, args, logs)?;
    let ledger = TestLedger::connect(options).await?;

    let result = serve(&ledger).await;
    teardown(&ledger).await;
    result
}

async fn serve(ledger: &TestLedger) -> anyhow::Result<()> {
    println!("Starting {}...", ledger.image_ref());
    let handle = ledger.start().await?;
    println!("{}", handle.id());

    for &port in ledger.options().ports() {
        let public = ledger.resolve_public_port(port).await?;
        println!("{port} -> {public}");
    }
    println!("Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await?;
    println!("Stopping...");
    Ok(())
}

/// Stop and remove whatever the ledger left behind.
async fn teardown(ledger: &TestLedger) {
    if ledger.handle().await.is_none() {
        return;
    }
    match ledger.stop().await {
        Ok(()) | Err(LedgerError::LifecycleState { .. }) | Err(LedgerError::NotFound { .. }) => {}
        Err(e) => tracing::warn!("Failed to stop test ledger: {}", e),
    }
    if let Err(e) = ledger.destroy().await {
        tracing::warn!("Failed to remove test ledger: {}", e);
    }
}

/// Print the validated options, or every violation.
pub fn run_validate_command(config: &HarnessConfig, args: &LedgerArgs) -> anyhow::Result<()> {
    let options = resolve_options(config, args, false);
    match options {
        Ok(options) => {
            println!("{}", serde_json::to_string_pretty(&options)?);
            Ok(())
        }
        Err(e) => {
            if let Some(invalid) = e.downcast_ref::<crate::ledger::ValidationError>() {
                eprintln!("Invalid ledger options:");
                for violation in &invalid.violations {
                    eprintln!("  - {violation}");
                }
            }
            Err(e)
        }
    }
}

/// Write a file from a running container to stdout.
pub async fn run_cat_command(id: &str, path: &str) -> anyhow::Result<()> {
    let runtime = DockerRuntime::connect().await?;
    let files = ContainerFileAccessor::new(Arc::new(runtime));
    let contents = files.read_file_by_id(id, path).await?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&contents)?;
    stdout.flush()?;
    Ok(())
}

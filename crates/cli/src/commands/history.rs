//! Read-only views of the cycle database.

use crate::app::{self, ConfigArgs};
use anyhow::Result;
use autotrader_orchestrator::MAX_CYCLE_HISTORY;
use clap::Args;

/// Arguments for the memory command.
#[derive(Args, Debug, Clone)]
pub struct MemoryArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Arguments for the history command.
#[derive(Args, Debug, Clone)]
pub struct HistoryArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Number of cycles to show, newest first
    #[arg(short, long, default_value_t = 20)]
    pub limit: u32,
}

/// Prints the current memory note.
///
/// # Errors
/// Returns an error if the database cannot be opened or read.
pub async fn run_memory(args: MemoryArgs) -> Result<()> {
    let config = args.config.load()?;
    let database = app::open_database(&config.database).await?;
    let note = database.memory().await?;

    match note.updated_at {
        Some(at) => println!("Memory (updated {}):", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Memory:"),
    }
    if note.is_empty() {
        println!("  (empty)");
    } else {
        println!("{}", note.content);
    }
    Ok(())
}

/// Prints recent cycles.
///
/// # Errors
/// Returns an error if the database cannot be opened or read.
pub async fn run_history(args: HistoryArgs) -> Result<()> {
    let config = args.config.load()?;
    let database = app::open_database(&config.database).await?;
    let cycles = database
        .recent_cycles(args.limit.clamp(1, MAX_CYCLE_HISTORY))
        .await?;

    if cycles.is_empty() {
        println!("No cycles recorded yet.");
        return Ok(());
    }

    println!(
        "{:<20} {:<36} {:<9} {:<5} {:<8} {:>4} {:>4} {:<10}",
        "STARTED", "ID", "TRIGGER", "MODE", "OUTCOME", "CMDS", "FAIL", "PROVIDER"
    );
    println!("{}", "-".repeat(104));
    for cycle in &cycles {
        println!(
            "{:<20} {:<36} {:<9} {:<5} {:<8} {:>4} {:>4} {:<10}",
            cycle.started_at.format("%Y-%m-%d %H:%M:%S"),
            cycle.id,
            cycle.trigger.as_str(),
            cycle.execution_mode.as_str(),
            cycle.outcome.as_str(),
            cycle.command_count,
            cycle.failed_count,
            cycle.provider.as_deref().unwrap_or("-"),
        );
        if let (Some(phase), Some(error)) = (cycle.failed_phase, cycle.error.as_deref()) {
            println!("    failed during {phase}: {error}");
        }
    }
    Ok(())
}

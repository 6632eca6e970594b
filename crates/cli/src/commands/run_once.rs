//! One manual cycle from the command line.

use crate::app::{self, ConfigArgs};
use anyhow::{bail, Result};
use autotrader_core::ExecutionMode;
use autotrader_orchestrator::{CycleOutcome, CycleRecord, Trigger};
use autotrader_protocol::summarize_command;
use clap::Args;

/// Arguments for the run-once command.
#[derive(Args, Debug, Clone)]
pub struct RunOnceArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Override the configured execution mode (paper or live)
    #[arg(long)]
    pub mode: Option<ExecutionMode>,
}

/// Runs one cycle and prints what happened.
///
/// # Errors
/// Returns an error if startup fails or the cycle ends FAILED.
pub async fn run_once(args: RunOnceArgs) -> Result<()> {
    let config = args.config.load()?;
    let app = app::build(&config).await?;
    if let Some(mode) = args.mode {
        app.engine.set_execution_mode(mode);
    }

    let record = app.engine.run_cycle(Trigger::Manual).await?;
    print_record(&record);

    if record.outcome() == CycleOutcome::Failed {
        let phase = record
            .summary
            .failed_phase
            .map_or_else(|| "unknown phase".to_string(), |p| p.to_string());
        bail!(
            "cycle {} failed during {}: {}",
            record.id(),
            phase,
            record.summary.error.as_deref().unwrap_or("no error recorded")
        );
    }
    Ok(())
}

fn print_record(record: &CycleRecord) {
    let summary = &record.summary;

    println!();
    println!("{}", "=".repeat(80));
    println!(
        "CYCLE {} [{} / {}] -> {}",
        summary.id,
        summary.trigger,
        summary.execution_mode,
        summary.outcome.as_str().to_uppercase()
    );
    println!("{}", "=".repeat(80));

    if let Some(provider) = &summary.provider {
        println!(
            "Advisory: {} ({}) | tokens: {} | correction rounds: {}",
            provider,
            summary.model.as_deref().unwrap_or("-"),
            summary
                .tokens_used
                .map_or_else(|| "n/a".to_string(), |t| t.to_string()),
            summary.correction_rounds
        );
    }

    if !summary.reasoning.is_empty() {
        println!();
        println!("REASONING:");
        println!("{}", "-".repeat(80));
        println!("{}", summary.reasoning);
    }

    println!();
    println!("COMMANDS:");
    println!("{}", "-".repeat(80));
    if record.commands.is_empty() {
        println!("  No actions taken.");
    }
    for (i, entry) in record.commands.iter().enumerate() {
        let round = if entry.round > 0 {
            format!(" (round {})", entry.round)
        } else {
            String::new()
        };
        println!("  [{}]{} {}", i + 1, round, summarize_command(&entry.command));
        match &entry.result {
            Some(result) => {
                let detail = result.error.as_deref().unwrap_or(&result.detail);
                let marker = if result.simulated { " [paper]" } else { "" };
                println!("      -> {}{}: {}", result.status, marker, detail);
            }
            None => println!("      -> not executed"),
        }
    }

    if !summary.memory_updated && summary.outcome != CycleOutcome::Failed {
        println!();
        println!("WARNING: memory was not updated this cycle");
    }
    println!();
}

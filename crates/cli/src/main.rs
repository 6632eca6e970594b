use clap::{Parser, Subcommand};

mod app;
mod commands;

use commands::{DecodeArgs, HistoryArgs, MemoryArgs, RunArgs, RunOnceArgs};

#[derive(Parser)]
#[command(name = "autotrader")]
#[command(about = "LLM-advised decision cycle engine for USDT-margined futures", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and the operator web API
    Run(RunArgs),
    /// Run a single manual cycle and print its record
    RunOnce(RunOnceArgs),
    /// Decode a saved advisory reply without touching the network
    Decode(DecodeArgs),
    /// Print the advisory memory note
    Memory(MemoryArgs),
    /// Print recent cycles
    History(HistoryArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Decode output is meant for piping; keep stderr quiet unless asked
    let default_level = match cli.command {
        Commands::Decode(_) => "warn",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => commands::run_engine(args).await?,
        Commands::RunOnce(args) => commands::run_once(args).await?,
        Commands::Decode(args) => commands::run_decode(&args)?,
        Commands::Memory(args) => commands::run_memory(args).await?,
        Commands::History(args) => commands::run_history(args).await?,
    }

    Ok(())
}

//! Offline decoding of a saved advisory reply.

use anyhow::{Context, Result};
use autotrader_protocol::{decode_reply, summarize};
use clap::Args;
use std::io::Read;

/// Arguments for the decode command.
#[derive(Args, Debug, Clone)]
pub struct DecodeArgs {
    /// Reply file to decode, or `-` for stdin
    pub input: String,

    /// Print the decoded commands as JSON instead of a summary
    #[arg(long)]
    pub json: bool,
}

/// # Errors
/// Returns an error if the input cannot be read.
pub fn run_decode(args: &DecodeArgs) -> Result<()> {
    let reply = if args.input == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read reply from stdin")?;
        buf
    } else {
        std::fs::read_to_string(&args.input)
            .with_context(|| format!("failed to read {}", args.input))?
    };

    let decoded = decode_reply(&reply);

    if args.json {
        let json = serde_json::to_string_pretty(&decoded.commands)?;
        println!("{json}");
        return Ok(());
    }

    println!("REASONING:");
    println!("{}", "-".repeat(60));
    println!("{}", decoded.reasoning);
    println!();
    println!("COMMANDS ({}):", decoded.commands.len());
    println!("{}", "-".repeat(60));
    println!("{}", summarize(&decoded.commands));
    if !decoded.has_memory_update() {
        println!();
        println!("WARNING: reply carries no update_memory command");
    }
    Ok(())
}

//! CLI commands for the decision cycle engine.

pub mod decode;
pub mod history;
pub mod run;
pub mod run_once;

pub use decode::{run_decode, DecodeArgs};
pub use history::{run_history, run_memory, HistoryArgs, MemoryArgs};
pub use run::{run_engine, RunArgs};
pub use run_once::{run_once, RunOnceArgs};

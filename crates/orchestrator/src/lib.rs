//! Decision cycle orchestration.
//!
//! A cycle moves `IDLE -> ASSEMBLING -> ADVISING -> PARSING -> EXECUTING ->
//! LOGGED -> IDLE`, or ends early in `FAILED` when the context cannot be
//! assembled or every advisory provider fails. A single-flight lock makes
//! sure at most one cycle (or close-all) touches the venue at a time; a
//! trigger that finds it held is rejected, not queued.
//!
//! [`CycleEngine`] runs cycles directly. [`EngineActor`] wraps it with the
//! periodic scheduler and hands out cloneable [`EngineHandle`]s for
//! operator surfaces. Every cycle is written to SQLite by [`CycleDatabase`],
//! which also holds the advisory memory note.

pub mod commands;
pub mod context;
pub mod cycle;
pub mod cycle_lock;
pub mod database;
pub mod engine_actor;
pub mod engine_handle;
pub mod error;
pub mod events;
pub mod indicators;
pub mod record;

pub use commands::EngineCommand;
pub use context::{AssetContext, ContextAssembler, MarketContext};
pub use cycle::CycleEngine;
pub use cycle_lock::{CycleGuard, CycleLock};
pub use database::{CycleDatabase, MAX_CYCLE_HISTORY, MAX_EQUITY_HISTORY};
pub use engine_actor::EngineActor;
pub use engine_handle::EngineHandle;
pub use error::{CycleError, Result};
pub use events::{CycleEvent, EngineStatus, SchedulerState};
pub use indicators::{HttpIndicatorSource, NoIndicators};
pub use record::{CommandRecord, CycleOutcome, CyclePhase, CycleRecord, CycleSummary, Trigger};

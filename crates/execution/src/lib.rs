//! Execution layer for decoded advisory commands.
//!
//! [`CommandExecutor`] turns one [`autotrader_protocol::Command`] into venue
//! operations and an [`ExecutionResult`]:
//!
//! - notional below the configured (or venue) minimum is rejected before any
//!   venue write
//! - quantities and trigger prices are truncated to the symbol's step and tick
//! - exits and protective orders are reduce-only market or stop-market orders
//! - failures are captured as FAILED results and never propagate
//!
//! Paper mode wraps the venue in [`PaperVenue`], which forwards reads and
//! simulates writes so results keep the same shape.

pub mod error;
pub mod executor;
pub mod paper;
pub mod result;
pub mod venue;

pub use error::{ExecutionError, Result};
pub use executor::{CommandExecutor, DEFAULT_MIN_TRADE_NOTIONAL};
pub use paper::PaperVenue;
pub use result::{ExecutionResult, ExecutionStatus};
pub use venue::ExecutionVenue;

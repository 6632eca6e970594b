use crate::error::Result;
use crate::events::EngineStatus;
use crate::record::CycleRecord;
use autotrader_core::{ExecutionMode, TradingConfig};
use autotrader_execution::ExecutionResult;
use tokio::sync::oneshot;

#[derive(Debug)]
pub enum EngineCommand {
    /// Start the periodic scheduler; the first cycle fires immediately.
    Start,
    Stop,
    /// Manual trigger. Rejected with `Busy` while a cycle is running.
    RunOnce(oneshot::Sender<Result<CycleRecord>>),
    /// Waits for any active cycle, then flattens every position.
    CloseAll(oneshot::Sender<Vec<ExecutionResult>>),
    SetExecutionMode(ExecutionMode),
    UpdateTrading(Box<TradingConfig>),
    GetStatus(oneshot::Sender<EngineStatus>),
    Shutdown,
}

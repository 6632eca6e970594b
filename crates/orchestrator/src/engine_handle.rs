use crate::commands::EngineCommand;
use crate::error::Result;
use crate::events::{CycleEvent, EngineStatus};
use crate::record::CycleRecord;
use autotrader_core::{ExecutionMode, TradingConfig};
use autotrader_execution::ExecutionResult;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// Cloneable operator handle to a running [`crate::EngineActor`].
///
/// Every call fails with [`crate::CycleError::EngineUnavailable`] once the
/// actor has shut down.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
    events: broadcast::Sender<CycleEvent>,
    status: watch::Receiver<EngineStatus>,
}

impl EngineHandle {
    #[must_use]
    pub const fn new(
        tx: mpsc::Sender<EngineCommand>,
        events: broadcast::Sender<CycleEvent>,
        status: watch::Receiver<EngineStatus>,
    ) -> Self {
        Self { tx, events, status }
    }

    /// Starts the periodic scheduler.
    ///
    /// # Errors
    /// Returns an error if the command cannot be sent to the engine actor.
    pub async fn start(&self) -> Result<()> {
        self.tx.send(EngineCommand::Start).await?;
        Ok(())
    }

    /// Stops the periodic scheduler. A running cycle is not interrupted.
    ///
    /// # Errors
    /// Returns an error if the command cannot be sent to the engine actor.
    pub async fn stop(&self) -> Result<()> {
        self.tx.send(EngineCommand::Stop).await?;
        Ok(())
    }

    /// Runs one cycle now and waits for its record.
    ///
    /// # Errors
    /// Returns `Busy` when another cycle is in progress, or an error if the
    /// engine actor is gone.
    pub async fn run_once(&self) -> Result<CycleRecord> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(EngineCommand::RunOnce(tx)).await?;
        rx.await?
    }

    /// Closes every open position once no cycle is running.
    ///
    /// # Errors
    /// Returns an error if the engine actor is gone.
    pub async fn close_all(&self) -> Result<Vec<ExecutionResult>> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(EngineCommand::CloseAll(tx)).await?;
        Ok(rx.await?)
    }

    /// # Errors
    /// Returns an error if the command cannot be sent to the engine actor.
    pub async fn set_execution_mode(&self, mode: ExecutionMode) -> Result<()> {
        self.tx.send(EngineCommand::SetExecutionMode(mode)).await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the command cannot be sent to the engine actor.
    pub async fn update_trading(&self, trading: TradingConfig) -> Result<()> {
        self.tx
            .send(EngineCommand::UpdateTrading(Box::new(trading)))
            .await?;
        Ok(())
    }

    /// Asks the actor for a fresh status.
    ///
    /// # Errors
    /// Returns an error if the command cannot be sent or the response cannot be received.
    pub async fn status(&self) -> Result<EngineStatus> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(EngineCommand::GetStatus(tx)).await?;
        Ok(rx.await?)
    }

    /// Last published status, without a round trip to the actor.
    #[must_use]
    pub fn latest_status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<EngineStatus> {
        self.status.clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CycleEvent> {
        self.events.subscribe()
    }

    /// Shuts the actor down after any active cycle finishes.
    ///
    /// # Errors
    /// Returns an error if the command cannot be sent to the engine actor.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(EngineCommand::Shutdown).await?;
        Ok(())
    }
}

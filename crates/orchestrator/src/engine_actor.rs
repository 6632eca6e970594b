use crate::commands::EngineCommand;
use crate::cycle::CycleEngine;
use crate::engine_handle::EngineHandle;
use crate::error::CycleError;
use crate::events::{CycleEvent, EngineStatus, SchedulerState};
use crate::record::{CycleOutcome, Trigger};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

const COMMAND_BUFFER: usize = 32;
const RECENT_EVENTS: usize = 10;

/// Owns the scheduler and fans operator commands out to the [`CycleEngine`].
///
/// Cycles and close-all run on their own tasks so the actor keeps answering
/// status requests, and so a trigger arriving mid-cycle meets the lock and is
/// rejected instead of queueing behind it.
pub struct EngineActor {
    engine: Arc<CycleEngine>,
    rx: mpsc::Receiver<EngineCommand>,
    events_rx: broadcast::Receiver<CycleEvent>,
    status_tx: watch::Sender<EngineStatus>,
    scheduler: SchedulerState,
    ticker: Option<Interval>,
    started_at: Option<DateTime<Utc>>,
    last_cycle_id: Option<String>,
    last_outcome: Option<CycleOutcome>,
    last_cycle_at: Option<DateTime<Utc>>,
    cycles_run: u64,
    recent_events: VecDeque<CycleEvent>,
}

impl EngineActor {
    #[must_use]
    pub fn new(
        engine: Arc<CycleEngine>,
        rx: mpsc::Receiver<EngineCommand>,
        status_tx: watch::Sender<EngineStatus>,
    ) -> Self {
        let events_rx = engine.subscribe();
        Self {
            engine,
            rx,
            events_rx,
            status_tx,
            scheduler: SchedulerState::Stopped,
            ticker: None,
            started_at: None,
            last_cycle_id: None,
            last_outcome: None,
            last_cycle_at: None,
            cycles_run: 0,
            recent_events: VecDeque::with_capacity(RECENT_EVENTS),
        }
    }

    /// Spawns the actor and returns a handle to it.
    #[must_use]
    pub fn spawn(engine: Arc<CycleEngine>) -> (EngineHandle, JoinHandle<Result<()>>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let trading = engine.trading();
        let (status_tx, status_rx) = watch::channel(EngineStatus::stopped(
            engine.execution_mode(),
            trading.interval_minutes,
            trading.symbols,
        ));
        let handle = EngineHandle::new(tx, engine.event_sender(), status_rx);
        let actor = Self::new(engine, rx, status_tx);
        (handle, tokio::spawn(actor.run()))
    }

    fn period(&self) -> Duration {
        Duration::from_secs(self.engine.trading().interval_minutes.max(1) * 60)
    }

    fn start_scheduler(&mut self) {
        if self.scheduler == SchedulerState::Running {
            tracing::warn!("Scheduler already running, ignoring start");
            return;
        }
        let period = self.period();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);
        self.scheduler = SchedulerState::Running;
        self.started_at = Some(Utc::now());
        tracing::info!(interval_secs = period.as_secs(), "Scheduler started");
    }

    fn stop_scheduler(&mut self) {
        if self.scheduler == SchedulerState::Stopped {
            tracing::warn!("Scheduler already stopped, ignoring stop");
            return;
        }
        self.ticker = None;
        self.scheduler = SchedulerState::Stopped;
        self.started_at = None;
        tracing::info!("Scheduler stopped");
    }

    fn spawn_scheduled_cycle(&self) {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            match engine.run_cycle(Trigger::Scheduled).await {
                Ok(_) => {}
                // Already logged and announced by the engine
                Err(CycleError::Busy) => {}
                Err(e) => tracing::error!("Scheduled cycle error: {e}"),
            }
        });
    }

    fn record_event(&mut self, event: CycleEvent) {
        if let CycleEvent::CycleFinished {
            cycle_id,
            outcome,
            timestamp,
            ..
        } = &event
        {
            self.cycles_run += 1;
            self.last_cycle_id = Some(cycle_id.clone());
            self.last_outcome = Some(*outcome);
            self.last_cycle_at = Some(*timestamp);
        }

        // Keep last 10
        if self.recent_events.len() >= RECENT_EVENTS {
            self.recent_events.pop_front();
        }
        self.recent_events.push_back(event);
    }

    /// Folds in events already broadcast, so a status never lags a reply.
    fn drain_events(&mut self) {
        loop {
            match self.events_rx.try_recv() {
                Ok(event) => self.record_event(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Status missed cycle events");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    fn status(&self) -> EngineStatus {
        let trading = self.engine.trading();
        EngineStatus {
            scheduler: self.scheduler,
            execution_mode: self.engine.execution_mode(),
            cycle_active: self.engine.is_cycle_active(),
            phase: self.engine.phase(),
            interval_minutes: trading.interval_minutes,
            symbols: trading.symbols,
            started_at: self.started_at,
            last_cycle_id: self.last_cycle_id.clone(),
            last_outcome: self.last_outcome,
            last_cycle_at: self.last_cycle_at,
            cycles_run: self.cycles_run,
            recent_events: self.recent_events.iter().cloned().collect(),
        }
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(self.status());
    }

    /// Handles one command; returns `false` on shutdown.
    async fn handle(&mut self, cmd: EngineCommand) -> bool {
        match cmd {
            EngineCommand::Start => self.start_scheduler(),
            EngineCommand::Stop => self.stop_scheduler(),
            EngineCommand::RunOnce(reply) => {
                let engine = Arc::clone(&self.engine);
                tokio::spawn(async move {
                    let result = engine.run_cycle(Trigger::Manual).await;
                    let _ = reply.send(result);
                });
            }
            EngineCommand::CloseAll(reply) => {
                let engine = Arc::clone(&self.engine);
                tokio::spawn(async move {
                    let results = engine.close_all().await;
                    let _ = reply.send(results);
                });
            }
            EngineCommand::SetExecutionMode(mode) => self.engine.set_execution_mode(mode),
            EngineCommand::UpdateTrading(trading) => {
                let old_period = self.period();
                self.engine.update_trading(*trading);
                let period = self.period();
                if period != old_period && self.ticker.is_some() {
                    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    self.ticker = Some(ticker);
                    tracing::info!(interval_secs = period.as_secs(), "Scheduler interval changed");
                }
            }
            EngineCommand::GetStatus(reply) => {
                self.drain_events();
                let _ = reply.send(self.status());
            }
            EngineCommand::Shutdown => {
                tracing::info!("Engine shutting down");
                self.ticker = None;
                self.scheduler = SchedulerState::Stopped;
                self.engine.wait_idle().await;
                return false;
            }
        }
        true
    }

    /// Runs the actor's main loop until shutdown or until every handle is dropped.
    ///
    /// # Errors
    /// Currently infallible; the signature matches the other actors.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!("Engine actor started");

        loop {
            tokio::select! {
                cmd = self.rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.handle(cmd).await {
                        break;
                    }
                }
                event = self.events_rx.recv() => match event {
                    Ok(event) => self.record_event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Status missed cycle events");
                    }
                    // The engine owns the sender and outlives the actor.
                    Err(RecvError::Closed) => break,
                },
                () = next_tick(&mut self.ticker) => self.spawn_scheduled_cycle(),
            }
            self.publish_status();
        }

        self.publish_status();
        tracing::info!("Engine actor stopped");
        Ok(())
    }
}

/// Next scheduler tick, or never when the scheduler is stopped.
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

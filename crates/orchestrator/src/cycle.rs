use crate::context::{ContextAssembler, MarketContext};
use crate::cycle_lock::CycleLock;
use crate::database::CycleDatabase;
use crate::error::{CycleError, Result};
use crate::events::CycleEvent;
use crate::record::{CommandRecord, CycleOutcome, CyclePhase, CycleRecord, CycleSummary, Trigger};
use autotrader_advisory::{AdvisoryClient, AdvisoryReply, PromptBuilder};
use autotrader_core::{
    ExecutionMode, IndicatorSource, MarketSnapshot, MemoryStore, TradingConfig, VenueClient,
};
use autotrader_execution::{CommandExecutor, ExecutionResult};
use autotrader_protocol::{decode_reply, summarize, Command, CommandKind, Payload};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct EngineSettings {
    trading: TradingConfig,
    execution_mode: ExecutionMode,
}

/// Drives decision cycles end to end.
///
/// One cycle: assemble context, ask the advisory, decode the reply, execute
/// every command in reply order, then log the cycle. Only assembly and total
/// advisory failure end a cycle early; everything else is recorded as data.
pub struct CycleEngine {
    venue: Arc<dyn VenueClient>,
    advisory: AdvisoryClient,
    assembler: ContextAssembler,
    memory: Arc<dyn MemoryStore>,
    database: CycleDatabase,
    lock: CycleLock,
    settings: RwLock<EngineSettings>,
    sampling: (f32, u32),
    events: broadcast::Sender<CycleEvent>,
    phase: watch::Sender<CyclePhase>,
}

impl CycleEngine {
    #[must_use]
    pub fn new(
        venue: Arc<dyn VenueClient>,
        advisory: AdvisoryClient,
        indicators: Arc<dyn IndicatorSource>,
        database: CycleDatabase,
        trading: TradingConfig,
    ) -> Self {
        let memory: Arc<dyn MemoryStore> = Arc::new(database.clone());
        let assembler = ContextAssembler::new(Arc::clone(&venue), indicators, Arc::clone(&memory));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (phase, _) = watch::channel(CyclePhase::Idle);

        Self {
            venue,
            advisory,
            assembler,
            memory,
            database,
            lock: CycleLock::new(),
            settings: RwLock::new(EngineSettings {
                execution_mode: trading.execution_mode,
                trading,
            }),
            sampling: (0.7, 2000),
            events,
            phase,
        }
    }

    #[must_use]
    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.sampling = (temperature, max_tokens);
        self
    }

    #[must_use]
    pub fn database(&self) -> &CycleDatabase {
        &self.database
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CycleEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<CycleEvent> {
        self.events.clone()
    }

    #[must_use]
    pub fn phase(&self) -> CyclePhase {
        *self.phase.borrow()
    }

    #[must_use]
    pub fn is_cycle_active(&self) -> bool {
        self.lock.is_held()
    }

    /// Resolves once no cycle or close-all holds the lock.
    pub async fn wait_idle(&self) {
        drop(self.lock.acquire().await);
    }

    #[must_use]
    pub fn trading(&self) -> TradingConfig {
        self.read_settings().trading
    }

    #[must_use]
    pub fn execution_mode(&self) -> ExecutionMode {
        self.read_settings().execution_mode
    }

    /// Takes effect from the next command executed.
    pub fn set_execution_mode(&self, mode: ExecutionMode) {
        let mut settings = self.settings.write();
        if settings.execution_mode != mode {
            info!(from = %settings.execution_mode, to = %mode, "Execution mode changed");
            settings.execution_mode = mode;
        }
    }

    /// Applies a reloaded trading section. The execution mode is left alone:
    /// it is only switched explicitly.
    pub fn update_trading(&self, trading: TradingConfig) {
        let mut settings = self.settings.write();
        info!(
            symbols = ?trading.symbols,
            interval_minutes = trading.interval_minutes,
            min_trade_notional = %trading.min_trade_notional,
            max_correction_rounds = trading.max_correction_rounds,
            "Trading settings updated"
        );
        settings.trading = trading;
    }

    fn read_settings(&self) -> EngineSettings {
        self.settings.read().clone()
    }

    fn executor(&self, mode: ExecutionMode, trading: &TradingConfig) -> CommandExecutor {
        CommandExecutor::new(Arc::clone(&self.venue), Arc::clone(&self.memory), mode)
            .with_min_trade_notional(trading.min_trade_notional)
    }

    fn emit(&self, event: CycleEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn enter(&self, cycle_id: &str, phase: CyclePhase) {
        debug!(cycle_id, %phase, "Cycle phase");
        self.phase.send_replace(phase);
        self.emit(CycleEvent::PhaseChanged {
            cycle_id: cycle_id.to_string(),
            phase,
            timestamp: Utc::now(),
        });
    }

    /// Runs one cycle if no other cycle is in progress.
    ///
    /// Assembly and advisory failures are not errors here: the returned
    /// record carries the `failed` outcome.
    ///
    /// # Errors
    ///
    /// Returns [`CycleError::Busy`] immediately when another cycle holds the lock.
    pub async fn run_cycle(&self, trigger: Trigger) -> Result<CycleRecord> {
        let Some(_guard) = self.lock.try_acquire() else {
            warn!(%trigger, "Cycle trigger rejected, another cycle is in progress");
            self.emit(CycleEvent::TriggerRejected {
                trigger,
                reason: CycleError::Busy.to_string(),
                timestamp: Utc::now(),
            });
            return Err(CycleError::Busy);
        };

        let record = self.execute_cycle(trigger).await;

        if let Err(e) = self.database.insert_cycle(&record).await {
            error!(cycle_id = %record.id(), "Failed to persist cycle: {e:#}");
        }
        self.emit(CycleEvent::CycleFinished {
            cycle_id: record.id().to_string(),
            outcome: record.outcome(),
            commands: record.summary.command_count,
            failures: record.summary.failed_count,
            timestamp: Utc::now(),
        });
        self.phase.send_replace(CyclePhase::Idle);

        info!(
            cycle_id = %record.id(),
            outcome = %record.outcome(),
            commands = record.summary.command_count,
            failures = record.summary.failed_count,
            "Cycle finished"
        );
        Ok(record)
    }

    async fn execute_cycle(&self, trigger: Trigger) -> CycleRecord {
        let EngineSettings {
            trading,
            execution_mode,
        } = self.read_settings();
        let mut draft = CycleDraft::new(trigger, execution_mode);

        info!(cycle_id = %draft.id, %trigger, mode = %execution_mode, "Cycle started");
        self.emit(CycleEvent::CycleStarted {
            cycle_id: draft.id.clone(),
            trigger,
            timestamp: draft.started_at,
        });

        // ASSEMBLING
        self.enter(&draft.id, CyclePhase::Assembling);
        let context = match self.assemble(&trading).await {
            Ok(context) => context,
            Err(e) => return self.fail(draft, CyclePhase::Assembling, format!("{e:#}")),
        };
        draft.snapshot = Some(context.snapshot());

        // ADVISING
        self.enter(&draft.id, CyclePhase::Advising);
        let (temperature, max_tokens) = self.sampling;
        let prompt = PromptBuilder::new(trading.interval_minutes, trading.min_trade_notional)
            .with_sampling(temperature, max_tokens);
        let mut request = prompt.request(&context.render());
        let reply = match self.advisory.advise(&request).await {
            Ok(reply) => reply,
            Err(e) => return self.fail(draft, CyclePhase::Advising, e.to_string()),
        };
        draft.record_reply(&reply);

        // PARSING
        self.enter(&draft.id, CyclePhase::Parsing);
        let decoded = decode_reply(&reply.content);
        draft.reasoning = decoded.reasoning.clone();
        debug!(cycle_id = %draft.id, "Decoded commands:\n{}", summarize(&decoded.commands));

        // EXECUTING
        self.enter(&draft.id, CyclePhase::Executing);
        let executor = self.executor(execution_mode, &trading);
        let first_round = self
            .execute_round(&executor, &draft.id, 0, &decoded.commands)
            .await;
        draft.commands.extend(first_round);

        let mut latest_reply = reply.content;
        let mut round_start = 0;
        while draft.correction_rounds < trading.max_correction_rounds {
            let failures = failure_lines(&draft.commands[round_start..]);
            if failures.is_empty() {
                break;
            }

            let round = draft.correction_rounds + 1;
            info!(cycle_id = %draft.id, round, failures = failures.len(), "Requesting corrections");
            request.push_exchange(latest_reply, PromptBuilder::correction_prompt(&failures));

            let correction = match self.advisory.advise(&request).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(cycle_id = %draft.id, round, "Correction round abandoned: {e}");
                    break;
                }
            };
            draft.correction_rounds = round;
            draft.record_correction(round, &correction);

            let decoded = decode_reply(&correction.content);
            round_start = draft.commands.len();
            let records = self
                .execute_round(&executor, &draft.id, round, &decoded.commands)
                .await;
            draft.commands.extend(records);
            latest_reply = correction.content;
        }

        self.record_equity(&draft.id, &context).await;

        draft.memory_updated = draft.commands.iter().any(|c| {
            c.command.kind == CommandKind::UpdateMemory
                && c.result.as_ref().is_some_and(ExecutionResult::is_success)
        });
        if !draft.memory_updated {
            warn!(cycle_id = %draft.id, "Advisory did not update memory this cycle");
        }

        // LOGGED
        self.enter(&draft.id, CyclePhase::Logged);
        let outcome = CycleOutcome::from_commands(&draft.commands);
        draft.finish(outcome, None, None)
    }

    async fn assemble(&self, trading: &TradingConfig) -> anyhow::Result<MarketContext> {
        let instructions = self.database.custom_instructions().await?;
        self.assembler.assemble(trading, &instructions).await
    }

    fn fail(&self, draft: CycleDraft, phase: CyclePhase, error: String) -> CycleRecord {
        error!(cycle_id = %draft.id, %phase, %error, "Cycle failed");
        self.enter(&draft.id, CyclePhase::Failed);
        draft.finish(CycleOutcome::Failed, Some(phase), Some(error))
    }

    /// Executes commands strictly in order; a failure never stops the rest.
    async fn execute_round(
        &self,
        executor: &CommandExecutor,
        cycle_id: &str,
        round: u32,
        commands: &[Command],
    ) -> Vec<CommandRecord> {
        let mut records = Vec::with_capacity(commands.len());
        for command in commands {
            let result = executor.execute(command).await;
            match &result {
                Some(result) => {
                    info!(
                        cycle_id,
                        round,
                        kind = %result.kind,
                        symbol = result.symbol.as_deref().unwrap_or("-"),
                        status = %result.status,
                        "{}",
                        result.detail
                    );
                    self.emit(CycleEvent::CommandExecuted {
                        cycle_id: Some(cycle_id.to_string()),
                        kind: result.kind.clone(),
                        symbol: result.symbol.clone(),
                        status: result.status,
                        detail: result.detail.clone(),
                        timestamp: Utc::now(),
                    });
                }
                None => {
                    if let Payload::Malformed { error, .. } = &command.payload {
                        warn!(cycle_id, round, position = command.position, %error, "Malformed command block skipped");
                    }
                }
            }
            records.push(CommandRecord {
                round,
                command: command.clone(),
                result,
            });
        }
        records
    }

    async fn record_equity(&self, cycle_id: &str, context: &MarketContext) {
        let snapshot = context.equity();
        if !snapshot.is_recordable() {
            debug!(cycle_id, equity = %snapshot.total_equity, "Equity snapshot skipped");
            return;
        }
        if let Err(e) = self.database.insert_equity_snapshot(Some(cycle_id), &snapshot).await {
            warn!(cycle_id, "Failed to store equity snapshot: {e:#}");
        }
    }

    /// Closes every open position once no cycle is running.
    ///
    /// Waits for an active cycle rather than rejecting; it never preempts one.
    pub async fn close_all(&self) -> Vec<ExecutionResult> {
        let _guard = self.lock.acquire().await;
        let EngineSettings {
            trading,
            execution_mode,
        } = self.read_settings();

        info!(mode = %execution_mode, "Closing all positions");
        let results = self.executor(execution_mode, &trading).close_all_positions().await;
        for result in &results {
            self.emit(CycleEvent::CommandExecuted {
                cycle_id: None,
                kind: result.kind.clone(),
                symbol: result.symbol.clone(),
                status: result.status,
                detail: result.detail.clone(),
                timestamp: Utc::now(),
            });
        }
        results
    }
}

/// Failed commands of one round, one line each, for the correction prompt.
fn failure_lines(records: &[CommandRecord]) -> Vec<String> {
    records
        .iter()
        .filter_map(|record| {
            let command = &record.command;
            if let Payload::Malformed { error, .. } = &command.payload {
                return Some(format!("malformed command block: {error}"));
            }
            let result = record.result.as_ref().filter(|r| r.is_failed())?;
            let args = command
                .args
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ");
            let reason = result.error.as_deref().unwrap_or(&result.detail);
            Some(format!("{}({args}): {reason}", command.raw_kind))
        })
        .collect()
}

/// Mutable state of a cycle before it is logged.
struct CycleDraft {
    id: String,
    trigger: Trigger,
    execution_mode: ExecutionMode,
    started_at: DateTime<Utc>,
    snapshot: Option<MarketSnapshot>,
    provider: Option<String>,
    model: Option<String>,
    tokens_used: Option<u32>,
    raw_reply: String,
    reasoning: String,
    commands: Vec<CommandRecord>,
    correction_rounds: u32,
    memory_updated: bool,
}

impl CycleDraft {
    fn new(trigger: Trigger, execution_mode: ExecutionMode) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            trigger,
            execution_mode,
            started_at: Utc::now(),
            snapshot: None,
            provider: None,
            model: None,
            tokens_used: None,
            raw_reply: String::new(),
            reasoning: String::new(),
            commands: Vec::new(),
            correction_rounds: 0,
            memory_updated: false,
        }
    }

    fn add_tokens(&mut self, reply: &AdvisoryReply) {
        if let Some(usage) = reply.usage {
            self.tokens_used = Some(
                self.tokens_used
                    .unwrap_or(0)
                    .saturating_add(usage.total_tokens),
            );
        }
    }

    fn record_reply(&mut self, reply: &AdvisoryReply) {
        self.provider = Some(reply.provider.clone());
        self.model = Some(reply.model.clone());
        self.raw_reply.clone_from(&reply.content);
        self.add_tokens(reply);
    }

    fn record_correction(&mut self, round: u32, reply: &AdvisoryReply) {
        self.raw_reply
            .push_str(&format!("\n\n--- correction round {round} ---\n\n"));
        self.raw_reply.push_str(&reply.content);
        self.add_tokens(reply);
    }

    fn finish(
        self,
        outcome: CycleOutcome,
        failed_phase: Option<CyclePhase>,
        error: Option<String>,
    ) -> CycleRecord {
        let command_count = u32::try_from(self.commands.len()).unwrap_or(u32::MAX);
        let failed_count = u32::try_from(
            self.commands
                .iter()
                .filter(|c| c.result.as_ref().is_some_and(ExecutionResult::is_failed))
                .count(),
        )
        .unwrap_or(u32::MAX);

        CycleRecord {
            summary: CycleSummary {
                id: self.id,
                trigger: self.trigger,
                execution_mode: self.execution_mode,
                started_at: self.started_at,
                finished_at: Utc::now(),
                outcome,
                failed_phase,
                error,
                provider: self.provider,
                model: self.model,
                tokens_used: self.tokens_used,
                correction_rounds: self.correction_rounds,
                reasoning: self.reasoning,
                memory_updated: self.memory_updated,
                command_count,
                failed_count,
            },
            raw_reply: self.raw_reply,
            commands: self.commands,
            snapshot: self.snapshot,
        }
    }
}

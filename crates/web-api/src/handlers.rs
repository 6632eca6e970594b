use crate::server::AppState;
use autotrader_core::{EquitySnapshot, ExecutionMode, MemoryNote};
use autotrader_execution::ExecutionResult;
use autotrader_orchestrator::{
    CycleError, CycleRecord, CycleSummary, EngineStatus, MAX_CYCLE_HISTORY, MAX_EQUITY_HISTORY,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

type Shared = State<Arc<AppState>>;

const DEFAULT_HISTORY_LIMIT: u32 = 50;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

impl HistoryQuery {
    fn limit(&self, max: u32) -> u32 {
        self.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, max)
    }
}

#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub mode: ExecutionMode,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InstructionsBody {
    pub instructions: String,
}

#[derive(Debug, Serialize)]
pub struct CloseAllResponse {
    pub results: Vec<ExecutionResult>,
}

const fn engine_error(err: &CycleError) -> StatusCode {
    match err {
        CycleError::Busy => StatusCode::CONFLICT,
        CycleError::EngineUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        CycleError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn storage_error(err: &anyhow::Error) -> StatusCode {
    tracing::error!("Storage error: {err:#}");
    StatusCode::INTERNAL_SERVER_ERROR
}

/// Current engine status.
///
/// # Errors
/// Returns `StatusCode::SERVICE_UNAVAILABLE` if the engine actor has stopped.
pub async fn status(State(state): Shared) -> Result<Json<EngineStatus>, StatusCode> {
    let status = state.engine.status().await.map_err(|e| engine_error(&e))?;
    Ok(Json(status))
}

/// Starts the scheduler.
///
/// # Errors
/// Returns `StatusCode::SERVICE_UNAVAILABLE` if the engine actor has stopped.
pub async fn start(State(state): Shared) -> Result<StatusCode, StatusCode> {
    state.engine.start().await.map_err(|e| engine_error(&e))?;
    Ok(StatusCode::OK)
}

/// Stops the scheduler.
///
/// # Errors
/// Returns `StatusCode::SERVICE_UNAVAILABLE` if the engine actor has stopped.
pub async fn stop(State(state): Shared) -> Result<StatusCode, StatusCode> {
    state.engine.stop().await.map_err(|e| engine_error(&e))?;
    Ok(StatusCode::OK)
}

/// Runs one cycle and returns its record.
///
/// # Errors
/// Returns `StatusCode::CONFLICT` while another cycle is in progress.
pub async fn run_once(State(state): Shared) -> Result<Json<CycleRecord>, StatusCode> {
    let record = state.engine.run_once().await.map_err(|e| engine_error(&e))?;
    Ok(Json(record))
}

/// Closes every open position once no cycle is running.
///
/// # Errors
/// Returns `StatusCode::SERVICE_UNAVAILABLE` if the engine actor has stopped.
pub async fn close_all(State(state): Shared) -> Result<Json<CloseAllResponse>, StatusCode> {
    let results = state.engine.close_all().await.map_err(|e| engine_error(&e))?;
    Ok(Json(CloseAllResponse { results }))
}

/// Switches between live and paper execution.
///
/// # Errors
/// Returns `StatusCode::SERVICE_UNAVAILABLE` if the engine actor has stopped.
pub async fn set_mode(
    State(state): Shared,
    Json(req): Json<ModeRequest>,
) -> Result<StatusCode, StatusCode> {
    state
        .engine
        .set_execution_mode(req.mode)
        .await
        .map_err(|e| engine_error(&e))?;
    Ok(StatusCode::OK)
}

/// # Errors
/// Returns `StatusCode::INTERNAL_SERVER_ERROR` if the database cannot be read.
pub async fn memory(State(state): Shared) -> Result<Json<MemoryNote>, StatusCode> {
    let note = state.database.memory().await.map_err(|e| storage_error(&e))?;
    Ok(Json(note))
}

/// # Errors
/// Returns `StatusCode::INTERNAL_SERVER_ERROR` if the database cannot be read.
pub async fn instructions(State(state): Shared) -> Result<Json<InstructionsBody>, StatusCode> {
    let instructions = state
        .database
        .custom_instructions()
        .await
        .map_err(|e| storage_error(&e))?;
    Ok(Json(InstructionsBody { instructions }))
}

/// Saves custom instructions; they apply from the next cycle.
///
/// # Errors
/// Returns `StatusCode::INTERNAL_SERVER_ERROR` if the database cannot be written.
pub async fn save_instructions(
    State(state): Shared,
    Json(body): Json<InstructionsBody>,
) -> Result<StatusCode, StatusCode> {
    state
        .database
        .save_custom_instructions(&body.instructions)
        .await
        .map_err(|e| storage_error(&e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Most recent cycles, newest first.
///
/// # Errors
/// Returns `StatusCode::INTERNAL_SERVER_ERROR` if the database cannot be read.
pub async fn list_cycles(
    State(state): Shared,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<CycleSummary>>, StatusCode> {
    let cycles = state
        .database
        .recent_cycles(query.limit(MAX_CYCLE_HISTORY))
        .await
        .map_err(|e| storage_error(&e))?;
    Ok(Json(cycles))
}

/// One cycle with its commands and results.
///
/// # Errors
/// Returns `StatusCode::NOT_FOUND` if no cycle has this id.
pub async fn get_cycle(
    State(state): Shared,
    Path(cycle_id): Path<String>,
) -> Result<Json<CycleRecord>, StatusCode> {
    state
        .database
        .cycle(&cycle_id)
        .await
        .map_err(|e| storage_error(&e))?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Equity snapshots, oldest first.
///
/// # Errors
/// Returns `StatusCode::INTERNAL_SERVER_ERROR` if the database cannot be read.
pub async fn equity(
    State(state): Shared,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<EquitySnapshot>>, StatusCode> {
    let history = state
        .database
        .equity_history(query.limit(MAX_EQUITY_HISTORY))
        .await
        .map_err(|e| storage_error(&e))?;
    Ok(Json(history))
}

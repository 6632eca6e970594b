use crate::record::{CycleOutcome, CyclePhase, Trigger};
use autotrader_core::ExecutionMode;
use autotrader_execution::ExecutionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CycleEvent {
    /// Lock acquired, assembly about to begin
    CycleStarted {
        cycle_id: String,
        trigger: Trigger,
        timestamp: DateTime<Utc>,
    },

    PhaseChanged {
        cycle_id: String,
        phase: CyclePhase,
        timestamp: DateTime<Utc>,
    },

    /// One command executed; `cycle_id` is `None` for close-all
    CommandExecuted {
        cycle_id: Option<String>,
        kind: String,
        symbol: Option<String>,
        status: ExecutionStatus,
        detail: String,
        timestamp: DateTime<Utc>,
    },

    CycleFinished {
        cycle_id: String,
        outcome: CycleOutcome,
        commands: u32,
        failures: u32,
        timestamp: DateTime<Utc>,
    },

    /// A trigger arrived while another cycle held the lock
    TriggerRejected {
        trigger: Trigger,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl CycleEvent {
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::CycleStarted { timestamp, .. }
            | Self::PhaseChanged { timestamp, .. }
            | Self::CommandExecuted { timestamp, .. }
            | Self::CycleFinished { timestamp, .. }
            | Self::TriggerRejected { timestamp, .. } => *timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Running,
    #[default]
    Stopped,
}

/// Snapshot of the engine published to operators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineStatus {
    pub scheduler: SchedulerState,
    pub execution_mode: ExecutionMode,
    pub cycle_active: bool,
    pub phase: CyclePhase,
    pub interval_minutes: u64,
    pub symbols: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_cycle_id: Option<String>,
    pub last_outcome: Option<CycleOutcome>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub cycles_run: u64,

    // Recent events (last 10)
    pub recent_events: Vec<CycleEvent>,
}

impl EngineStatus {
    #[must_use]
    pub fn stopped(execution_mode: ExecutionMode, interval_minutes: u64, symbols: Vec<String>) -> Self {
        Self {
            scheduler: SchedulerState::Stopped,
            execution_mode,
            cycle_active: false,
            phase: CyclePhase::Idle,
            interval_minutes,
            symbols,
            started_at: None,
            last_cycle_id: None,
            last_outcome: None,
            last_cycle_at: None,
            cycles_run: 0,
            recent_events: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_serialize_with_type_tag() {
        let event = CycleEvent::TriggerRejected {
            trigger: Trigger::Scheduled,
            reason: "a cycle is already in progress".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "trigger_rejected");
        assert_eq!(json["trigger"], "scheduled");

        let phase = CycleEvent::PhaseChanged {
            cycle_id: "c1".to_string(),
            phase: CyclePhase::Advising,
            timestamp: Utc::now(),
        };
        assert_eq!(serde_json::to_value(&phase).unwrap()["phase"], "ADVISING");
    }
}

//! Cycle records as they are persisted and served to operators.

use autotrader_core::{ExecutionMode, MarketSnapshot};
use autotrader_execution::{ExecutionResult, ExecutionStatus};
use autotrader_protocol::Command;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Phase of the cycle state machine.
///
/// `Idle -> Assembling -> Advising -> Parsing -> Executing -> Logged -> Idle`,
/// with `Failed` reachable from `Assembling` and `Advising`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CyclePhase {
    #[default]
    Idle,
    Assembling,
    Advising,
    Parsing,
    Executing,
    Logged,
    Failed,
}

impl CyclePhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Assembling => "ASSEMBLING",
            Self::Advising => "ADVISING",
            Self::Parsing => "PARSING",
            Self::Executing => "EXECUTING",
            Self::Logged => "LOGGED",
            Self::Failed => "FAILED",
        }
    }

    /// Phases during which the cycle lock is held.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Assembling | Self::Advising | Self::Parsing | Self::Executing
        )
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CyclePhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IDLE" => Ok(Self::Idle),
            "ASSEMBLING" => Ok(Self::Assembling),
            "ADVISING" => Ok(Self::Advising),
            "PARSING" => Ok(Self::Parsing),
            "EXECUTING" => Ok(Self::Executing),
            "LOGGED" => Ok(Self::Logged),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown cycle phase: {other}")),
        }
    }
}

/// What started a cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Scheduled,
    Manual,
}

impl Trigger {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Trigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown trigger: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CycleOutcome {
    /// Every command succeeded or was skipped.
    Success,
    /// Executed, but at least one command failed or could not be decoded.
    Partial,
    /// Aborted during assembly or advising.
    Failed,
}

impl CycleOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    /// Outcome of a cycle that reached execution.
    #[must_use]
    pub fn from_commands(commands: &[CommandRecord]) -> Self {
        let degraded = commands.iter().any(|c| {
            c.command.is_malformed()
                || c.result
                    .as_ref()
                    .is_some_and(|r| r.status == ExecutionStatus::Failed)
        });
        if degraded {
            Self::Partial
        } else {
            Self::Success
        }
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CycleOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown cycle outcome: {other}")),
        }
    }
}

/// A decoded command and what executing it produced.
///
/// Malformed commands carry no result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandRecord {
    /// 0 for the first reply, then one per correction round.
    pub round: u32,
    pub command: Command,
    pub result: Option<ExecutionResult>,
}

/// Cycle metadata without its commands, for listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleSummary {
    pub id: String,
    pub trigger: Trigger,
    pub execution_mode: ExecutionMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: CycleOutcome,
    /// Phase the cycle aborted in, for failed cycles.
    pub failed_phase: Option<CyclePhase>,
    pub error: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub tokens_used: Option<u32>,
    pub correction_rounds: u32,
    pub reasoning: String,
    pub memory_updated: bool,
    pub command_count: u32,
    pub failed_count: u32,
}

/// One complete cycle. Immutable once logged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleRecord {
    #[serde(flatten)]
    pub summary: CycleSummary,
    pub raw_reply: String,
    pub commands: Vec<CommandRecord>,
    pub snapshot: Option<MarketSnapshot>,
}

impl CycleRecord {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.summary.id
    }

    #[must_use]
    pub fn outcome(&self) -> CycleOutcome {
        self.summary.outcome
    }

    /// Results in execution order.
    pub fn results(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.commands.iter().filter_map(|c| c.result.as_ref())
    }

    pub fn parsed_commands(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter().map(|c| &c.command)
    }
}

use autotrader_core::OrderSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Skipped,
}

impl ExecutionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            "SKIPPED" => Ok(Self::Skipped),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Outcome of one command, shaped identically in live and paper mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    /// Wire kind of the command that produced this result.
    pub kind: String,
    pub symbol: Option<String>,
    /// Human-readable account of what happened.
    pub detail: String,
    pub error: Option<String>,
    /// Venue-assigned (or `paper-` prefixed) order identifiers.
    pub order_ids: Vec<String>,
    pub side: Option<OrderSide>,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub simulated: bool,
}

impl ExecutionResult {
    fn base(status: ExecutionStatus, kind: &str, detail: String) -> Self {
        Self {
            status,
            kind: kind.to_string(),
            symbol: None,
            detail,
            error: None,
            order_ids: Vec::new(),
            side: None,
            quantity: None,
            price: None,
            simulated: false,
        }
    }

    #[must_use]
    pub fn success(kind: &str, detail: impl Into<String>) -> Self {
        Self::base(ExecutionStatus::Success, kind, detail.into())
    }

    #[must_use]
    pub fn failed(kind: &str, error: impl Into<String>) -> Self {
        let error = error.into();
        let mut result = Self::base(ExecutionStatus::Failed, kind, error.clone());
        result.error = Some(error);
        result
    }

    #[must_use]
    pub fn skipped(kind: &str, reason: impl Into<String>) -> Self {
        Self::base(ExecutionStatus::Skipped, kind, reason.into())
    }

    #[must_use]
    pub fn with_symbol(mut self, symbol: Option<&str>) -> Self {
        self.symbol = symbol.map(str::to_string);
        self
    }

    #[must_use]
    pub fn with_order(mut self, order_id: impl Into<String>) -> Self {
        self.order_ids.push(order_id.into());
        self
    }

    #[must_use]
    pub fn with_fill(mut self, side: OrderSide, quantity: Decimal, price: Option<Decimal>) -> Self {
        self.side = Some(side);
        self.quantity = Some(quantity);
        self.price = price;
        self
    }

    #[must_use]
    pub fn simulated(mut self, simulated: bool) -> Self {
        self.simulated = simulated;
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == ExecutionStatus::Failed
    }
}

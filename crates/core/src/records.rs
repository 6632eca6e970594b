use crate::account::{Balance, Position};
use crate::market::MarketBreadth;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The single cross-cycle note maintained by the advisory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryNote {
    pub content: String,
    /// `None` until the first replacement.
    pub updated_at: Option<DateTime<Utc>>,
}

impl MemoryNote {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Macro and price summary taken when a cycle starts assembling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarketSnapshot {
    pub taken_at: DateTime<Utc>,
    pub breadth: MarketBreadth,
    pub ad_ratio: Decimal,
    /// Last price per tracked symbol.
    pub prices: BTreeMap<String, Decimal>,
    /// 24h change per tracked symbol, in percent.
    pub changes_24h: BTreeMap<String, Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EquitySnapshot {
    pub taken_at: DateTime<Utc>,
    pub total_equity: Decimal,
    pub free_balance: Decimal,
    pub unrealized_pnl: Decimal,
    pub position_count: u32,
}

impl EquitySnapshot {
    /// Builds a snapshot from account state.
    ///
    /// Some venues report a total equal to the free balance when margin is
    /// fully released; the open positions' unrealised P&L is added in that case.
    #[must_use]
    pub fn from_account(balance: &Balance, positions: &[Position], taken_at: DateTime<Utc>) -> Self {
        let unrealized_pnl: Decimal = positions.iter().map(|p| p.unrealized_pnl).sum();
        let total_equity = if balance.total == balance.free {
            balance.free + unrealized_pnl
        } else {
            balance.total
        };
        Self {
            taken_at,
            total_equity,
            free_balance: balance.free,
            unrealized_pnl,
            position_count: u32::try_from(positions.len()).unwrap_or(u32::MAX),
        }
    }

    /// Only snapshots with positive equity are worth persisting.
    #[must_use]
    pub fn is_recordable(&self) -> bool {
        self.total_equity > Decimal::ZERO
    }
}

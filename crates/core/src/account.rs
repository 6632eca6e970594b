use crate::orders::OrderSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Balance {
    pub asset: String,
    pub total: Decimal,
    pub free: Decimal,
    pub used: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Side of the order that opens or increases this position.
    #[must_use]
    pub fn entry_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// Side of the order that reduces this position.
    #[must_use]
    pub fn exit_side(self) -> OrderSide {
        self.entry_side().opposite()
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    #[default]
    Cross,
    Isolated,
}

impl MarginMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cross => "cross",
            Self::Isolated => "isolated",
        }
    }
}

impl fmt::Display for MarginMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarginMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cross" | "crossed" => Ok(Self::Cross),
            "isolated" => Ok(Self::Isolated),
            other => Err(format!("unknown margin mode '{other}'")),
        }
    }
}

/// Open position as reported by the venue. Never cached across cycles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    /// Absolute size in base units.
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub leverage: u32,
    pub unrealized_pnl: Decimal,
    pub margin_mode: MarginMode,
}

impl Position {
    /// Unrealised P&L relative to the margin committed, in percent.
    #[must_use]
    pub fn pnl_pct(&self) -> Decimal {
        let notional = self.size * self.entry_price;
        if notional.is_zero() || self.leverage == 0 {
            return Decimal::ZERO;
        }
        let margin = notional / Decimal::from(self.leverage);
        self.unrealized_pnl / margin * Decimal::ONE_HUNDRED
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    StopLoss,
    TakeProfit,
}

impl TriggerKind {
    /// Classifies a venue order type string such as `STOP_MARKET` or `TAKE_PROFIT_MARKET`.
    #[must_use]
    pub fn from_order_type(order_type: &str) -> Option<Self> {
        let upper = order_type.to_ascii_uppercase();
        if upper.contains("TAKE_PROFIT") {
            Some(Self::TakeProfit)
        } else if upper.contains("STOP") {
            Some(Self::StopLoss)
        } else {
            None
        }
    }

    #[must_use]
    pub fn short_label(self) -> &'static str {
        match self {
            Self::StopLoss => "SL",
            Self::TakeProfit => "TP",
        }
    }
}

/// Resting order on the venue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingOrder {
    pub order_id: String,
    pub symbol: String,
    pub order_type: String,
    /// `None` for orders that are not stop or take-profit triggers.
    pub trigger: Option<TriggerKind>,
    pub side: OrderSide,
    pub trigger_price: Decimal,
    pub quantity: Decimal,
    pub reduce_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_position_sides() {
        assert_eq!(PositionSide::Long.entry_side(), OrderSide::Buy);
        assert_eq!(PositionSide::Long.exit_side(), OrderSide::Sell);
        assert_eq!(PositionSide::Short.exit_side(), OrderSide::Buy);
    }

    #[test]
    fn test_margin_mode_parsing() {
        assert_eq!("ISOLATED".parse::<MarginMode>(), Ok(MarginMode::Isolated));
        assert_eq!(" cross ".parse::<MarginMode>(), Ok(MarginMode::Cross));
        assert!("portfolio".parse::<MarginMode>().is_err());
    }

    #[test]
    fn test_trigger_kind_classification() {
        assert_eq!(TriggerKind::from_order_type("STOP_MARKET"), Some(TriggerKind::StopLoss));
        assert_eq!(
            TriggerKind::from_order_type("take_profit_market"),
            Some(TriggerKind::TakeProfit)
        );
        assert_eq!(TriggerKind::from_order_type("LIMIT"), None);
    }

    #[test]
    fn test_pnl_pct_on_margin() {
        let position = Position {
            symbol: "ETH/USDT".to_string(),
            side: PositionSide::Long,
            size: dec!(1),
            entry_price: dec!(2000),
            mark_price: dec!(2100),
            leverage: 10,
            unrealized_pnl: dec!(100),
            margin_mode: MarginMode::Cross,
        };
        assert_eq!(position.pnl_pct(), dec!(50));
    }
}

//! Raw REST payloads and their conversion into domain types.
//!
//! Numeric fields arrive as JSON strings; `rust_decimal` parses both strings
//! and numbers, so raw structs use `Decimal` directly.

use crate::symbols::canonical_symbol;
use autotrader_core::{
    Balance, BookLevel, FundingRate, MarginMode, OrderAck, OrderBook, OrderSide, PendingOrder,
    Position, PositionSide, SymbolRules, Ticker, TriggerKind,
};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

// =============================================================================
// Errors
// =============================================================================

/// Error body returned with non-success statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct RawApiError {
    pub code: i64,
    pub msg: String,
}

// =============================================================================
// Market Data
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTicker24h {
    pub symbol: String,
    pub last_price: Decimal,
    pub price_change_percent: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub quote_volume: Decimal,
    #[serde(default)]
    pub close_time: i64,
}

impl From<RawTicker24h> for Ticker {
    fn from(raw: RawTicker24h) -> Self {
        Self {
            symbol: canonical_symbol(&raw.symbol),
            last_price: raw.last_price,
            change_pct_24h: raw.price_change_percent,
            high_24h: raw.high_price,
            low_24h: raw.low_price,
            quote_volume_24h: raw.quote_volume,
            timestamp: millis_to_datetime(raw.close_time).unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDepth {
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
}

impl RawDepth {
    pub fn into_order_book(self, symbol: &str, depth: usize) -> OrderBook {
        let levels = |side: Vec<(Decimal, Decimal)>| {
            side.into_iter()
                .take(depth)
                .map(|(price, quantity)| BookLevel { price, quantity })
                .collect()
        };
        OrderBook {
            symbol: symbol.to_string(),
            bids: levels(self.bids),
            asks: levels(self.asks),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPremiumIndex {
    pub symbol: String,
    pub mark_price: Decimal,
    pub last_funding_rate: Decimal,
    #[serde(default)]
    pub next_funding_time: i64,
}

impl From<RawPremiumIndex> for FundingRate {
    fn from(raw: RawPremiumIndex) -> Self {
        Self {
            symbol: canonical_symbol(&raw.symbol),
            rate: raw.last_funding_rate,
            mark_price: raw.mark_price,
            next_funding_time: if raw.next_funding_time > 0 {
                millis_to_datetime(raw.next_funding_time)
            } else {
                None
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawServerTime {
    pub server_time: i64,
}

// =============================================================================
// Exchange Info
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RawExchangeInfo {
    pub symbols: Vec<RawSymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub filters: Vec<RawFilter>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType")]
pub enum RawFilter {
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize { step_size: Decimal, min_qty: Decimal },
    #[serde(rename = "MARKET_LOT_SIZE", rename_all = "camelCase")]
    MarketLotSize { step_size: Decimal, min_qty: Decimal },
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    PriceFilter { tick_size: Decimal },
    #[serde(rename = "MIN_NOTIONAL")]
    MinNotional { notional: Decimal },
    #[serde(other)]
    Other,
}

/// Venue maximum when no leverage bracket is available.
pub const DEFAULT_MAX_LEVERAGE: u32 = 125;

impl RawSymbolInfo {
    /// Market orders are bounded by `MARKET_LOT_SIZE` when present.
    pub fn to_rules(&self, max_leverage: u32) -> SymbolRules {
        let mut rules = SymbolRules {
            symbol: canonical_symbol(&self.symbol),
            step_size: Decimal::ZERO,
            tick_size: Decimal::ZERO,
            min_quantity: Decimal::ZERO,
            min_notional: Decimal::ZERO,
            min_leverage: 1,
            max_leverage,
        };
        let mut market_lot = None;
        for filter in &self.filters {
            match filter {
                RawFilter::LotSize { step_size, min_qty } => {
                    rules.step_size = *step_size;
                    rules.min_quantity = *min_qty;
                }
                RawFilter::MarketLotSize { step_size, min_qty } => {
                    market_lot = Some((*step_size, *min_qty));
                }
                RawFilter::PriceFilter { tick_size } => rules.tick_size = *tick_size,
                RawFilter::MinNotional { notional } => rules.min_notional = *notional,
                RawFilter::Other => {}
            }
        }
        if let Some((step, min_qty)) = market_lot.filter(|(step, _)| *step > Decimal::ZERO) {
            rules.step_size = step;
            rules.min_quantity = min_qty;
        }
        rules
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawLeverageBracket {
    pub symbol: String,
    pub brackets: Vec<RawBracket>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBracket {
    pub initial_leverage: u32,
}

impl RawLeverageBracket {
    pub fn max_leverage(&self) -> u32 {
        self.brackets
            .iter()
            .map(|b| b.initial_leverage)
            .max()
            .unwrap_or(DEFAULT_MAX_LEVERAGE)
    }
}

// =============================================================================
// Account
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBalance {
    pub asset: String,
    pub balance: Decimal,
    pub available_balance: Decimal,
}

impl From<RawBalance> for Balance {
    fn from(raw: RawBalance) -> Self {
        Self {
            asset: raw.asset,
            total: raw.balance,
            free: raw.available_balance,
            used: (raw.balance - raw.available_balance).max(Decimal::ZERO),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPositionRisk {
    pub symbol: String,
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub un_realized_profit: Decimal,
    pub leverage: Decimal,
    #[serde(default)]
    pub margin_type: String,
}

impl RawPositionRisk {
    /// Flat entries (zero amount) are not positions.
    pub fn into_position(self) -> Option<Position> {
        if self.position_amt.is_zero() {
            return None;
        }
        let side = if self.position_amt.is_sign_negative() {
            PositionSide::Short
        } else {
            PositionSide::Long
        };
        let leverage = self.leverage.trunc().to_u32().unwrap_or(1);
        Some(Position {
            symbol: canonical_symbol(&self.symbol),
            side,
            size: self.position_amt.abs(),
            entry_price: self.entry_price,
            mark_price: self.mark_price,
            leverage,
            unrealized_pnl: self.un_realized_profit,
            margin_mode: self.margin_type.parse().unwrap_or_default(),
        })
    }
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrder {
    pub order_id: i64,
    pub symbol: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "type", default)]
    pub order_type: String,
    pub side: String,
    #[serde(default)]
    pub stop_price: Decimal,
    #[serde(default)]
    pub orig_qty: Decimal,
    #[serde(default)]
    pub executed_qty: Decimal,
    #[serde(default)]
    pub avg_price: Decimal,
    #[serde(default)]
    pub reduce_only: bool,
}

impl RawOrder {
    fn order_side(&self) -> OrderSide {
        if self.side.eq_ignore_ascii_case("SELL") {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        }
    }
}

impl From<RawOrder> for OrderAck {
    fn from(raw: RawOrder) -> Self {
        Self {
            order_id: raw.order_id.to_string(),
            symbol: canonical_symbol(&raw.symbol),
            average_price: (raw.avg_price > Decimal::ZERO).then_some(raw.avg_price),
            executed_quantity: raw.executed_qty,
            status: raw.status,
        }
    }
}

impl From<RawOrder> for PendingOrder {
    fn from(raw: RawOrder) -> Self {
        Self {
            order_id: raw.order_id.to_string(),
            symbol: canonical_symbol(&raw.symbol),
            trigger: TriggerKind::from_order_type(&raw.order_type),
            side: raw.order_side(),
            trigger_price: raw.stop_price,
            quantity: raw.orig_qty,
            reduce_only: raw.reduce_only,
            order_type: raw.order_type,
        }
    }
}

/// Wire value for the margin type endpoint.
pub fn margin_type_param(mode: MarginMode) -> &'static str {
    match mode {
        MarginMode::Cross => "CROSSED",
        MarginMode::Isolated => "ISOLATED",
    }
}

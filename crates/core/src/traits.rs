use crate::account::{Balance, MarginMode, PendingOrder, Position};
use crate::error::VenueResult;
use crate::market::{FundingRate, IndicatorSet, MarketBreadth, OrderBook, SymbolRules, Ticker};
use crate::orders::{MarketOrderRequest, OrderAck, TriggerOrderRequest};
use crate::records::MemoryNote;
use anyhow::Result;
use async_trait::async_trait;

/// Capability set of a derivatives venue.
///
/// Symbols are passed in their canonical `BASE/QUOTE` form; implementations
/// translate to the venue's own notation.
#[async_trait]
pub trait VenueClient: Send + Sync {
    fn name(&self) -> &str;

    async fn ticker(&self, symbol: &str) -> VenueResult<Ticker>;

    async fn order_book(&self, symbol: &str, depth: usize) -> VenueResult<OrderBook>;

    async fn funding_rate(&self, symbol: &str) -> VenueResult<FundingRate>;

    /// Advance/decline counts over the `sample` most active pairs.
    async fn market_breadth(&self, sample: usize) -> VenueResult<MarketBreadth>;

    async fn symbol_rules(&self, symbol: &str) -> VenueResult<SymbolRules>;

    async fn balance(&self) -> VenueResult<Balance>;

    async fn positions(&self) -> VenueResult<Vec<Position>>;

    async fn position(&self, symbol: &str) -> VenueResult<Option<Position>> {
        let positions = self.positions().await?;
        Ok(positions.into_iter().find(|p| p.symbol == symbol))
    }

    /// Resting orders, optionally restricted to one symbol.
    async fn open_orders(&self, symbol: Option<&str>) -> VenueResult<Vec<PendingOrder>>;

    async fn place_market_order(&self, request: &MarketOrderRequest) -> VenueResult<OrderAck>;

    async fn place_trigger_order(&self, request: &TriggerOrderRequest) -> VenueResult<OrderAck>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> VenueResult<()>;

    async fn cancel_all_orders(&self, symbol: &str) -> VenueResult<()>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> VenueResult<()>;

    /// Succeeds when the symbol is already in the requested mode.
    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> VenueResult<()>;
}

/// Single-row store for the cross-cycle memory note.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Returns an empty note when nothing was ever written.
    async fn read_memory(&self) -> Result<MemoryNote>;

    /// Replaces content and timestamp in full.
    async fn replace_memory(&self, content: &str) -> Result<MemoryNote>;
}

/// Source of precomputed indicator sets.
#[async_trait]
pub trait IndicatorSource: Send + Sync {
    async fn indicators(&self, symbol: &str) -> Result<Vec<IndicatorSet>>;
}

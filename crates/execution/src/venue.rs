use crate::paper::PaperVenue;
use async_trait::async_trait;
use autotrader_core::{
    Balance, ExecutionMode, FundingRate, MarginMode, MarketBreadth, MarketOrderRequest, OrderAck,
    OrderBook, PendingOrder, Position, SymbolRules, Ticker, TriggerOrderRequest, VenueClient,
    VenueResult,
};
use std::sync::Arc;

/// Venue used for command execution, either live or paper.
///
/// The variant is fixed at construction, so a paper executor can only ever
/// hold a [`PaperVenue`] and never issue a real write.
pub enum ExecutionVenue {
    /// Writes go to the venue.
    Live(Arc<dyn VenueClient>),
    /// Writes are simulated; reads go to the venue.
    Paper(PaperVenue),
}

impl ExecutionVenue {
    #[must_use]
    pub fn new(mode: ExecutionMode, venue: Arc<dyn VenueClient>) -> Self {
        match mode {
            ExecutionMode::Live => Self::Live(venue),
            ExecutionMode::Paper => Self::Paper(PaperVenue::new(venue)),
        }
    }

    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        match self {
            Self::Live(_) => ExecutionMode::Live,
            Self::Paper(_) => ExecutionMode::Paper,
        }
    }

    #[must_use]
    pub fn is_simulated(&self) -> bool {
        matches!(self, Self::Paper(_))
    }

    fn client(&self) -> &dyn VenueClient {
        match self {
            Self::Live(venue) => venue.as_ref(),
            Self::Paper(paper) => paper,
        }
    }
}

#[async_trait]
impl VenueClient for ExecutionVenue {
    fn name(&self) -> &str {
        self.client().name()
    }

    async fn ticker(&self, symbol: &str) -> VenueResult<Ticker> {
        self.client().ticker(symbol).await
    }

    async fn order_book(&self, symbol: &str, depth: usize) -> VenueResult<OrderBook> {
        self.client().order_book(symbol, depth).await
    }

    async fn funding_rate(&self, symbol: &str) -> VenueResult<FundingRate> {
        self.client().funding_rate(symbol).await
    }

    async fn market_breadth(&self, sample: usize) -> VenueResult<MarketBreadth> {
        self.client().market_breadth(sample).await
    }

    async fn symbol_rules(&self, symbol: &str) -> VenueResult<SymbolRules> {
        self.client().symbol_rules(symbol).await
    }

    async fn balance(&self) -> VenueResult<Balance> {
        self.client().balance().await
    }

    async fn positions(&self) -> VenueResult<Vec<Position>> {
        self.client().positions().await
    }

    async fn open_orders(&self, symbol: Option<&str>) -> VenueResult<Vec<PendingOrder>> {
        self.client().open_orders(symbol).await
    }

    async fn place_market_order(&self, request: &MarketOrderRequest) -> VenueResult<OrderAck> {
        self.client().place_market_order(request).await
    }

    async fn place_trigger_order(&self, request: &TriggerOrderRequest) -> VenueResult<OrderAck> {
        self.client().place_trigger_order(request).await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> VenueResult<()> {
        self.client().cancel_order(symbol, order_id).await
    }

    async fn cancel_all_orders(&self, symbol: &str) -> VenueResult<()> {
        self.client().cancel_all_orders(symbol).await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> VenueResult<()> {
        self.client().set_leverage(symbol, leverage).await
    }

    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> VenueResult<()> {
        self.client().set_margin_mode(symbol, mode).await
    }
}

//! Simulated writes over a real venue.
//!
//! Reads pass through so quantities are computed from live prices and
//! positions. Writes never leave the process: they are logged with a
//! `[paper]` marker and acknowledged with `paper-` identifiers.

use async_trait::async_trait;
use autotrader_core::{
    Balance, FundingRate, MarginMode, MarketBreadth, MarketOrderRequest, OrderAck, OrderBook,
    PendingOrder, Position, SymbolRules, Ticker, TriggerOrderRequest, VenueClient, VenueError, VenueResult,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct PaperVenue {
    inner: Arc<dyn VenueClient>,
}

impl PaperVenue {
    #[must_use]
    pub fn new(inner: Arc<dyn VenueClient>) -> Self {
        Self { inner }
    }

    fn order_id() -> String {
        format!("paper-{}", Uuid::new_v4())
    }
}

#[async_trait]
impl VenueClient for PaperVenue {
    fn name(&self) -> &str {
        "paper"
    }

    async fn ticker(&self, symbol: &str) -> VenueResult<Ticker> {
        self.inner.ticker(symbol).await
    }

    async fn order_book(&self, symbol: &str, depth: usize) -> VenueResult<OrderBook> {
        self.inner.order_book(symbol, depth).await
    }

    async fn funding_rate(&self, symbol: &str) -> VenueResult<FundingRate> {
        self.inner.funding_rate(symbol).await
    }

    async fn market_breadth(&self, sample: usize) -> VenueResult<MarketBreadth> {
        self.inner.market_breadth(sample).await
    }

    async fn symbol_rules(&self, symbol: &str) -> VenueResult<SymbolRules> {
        self.inner.symbol_rules(symbol).await
    }

    async fn balance(&self) -> VenueResult<Balance> {
        self.inner.balance().await
    }

    async fn positions(&self) -> VenueResult<Vec<Position>> {
        self.inner.positions().await
    }

    async fn open_orders(&self, symbol: Option<&str>) -> VenueResult<Vec<PendingOrder>> {
        self.inner.open_orders(symbol).await
    }

    /// Fills at the current last price.
    async fn place_market_order(&self, request: &MarketOrderRequest) -> VenueResult<OrderAck> {
        let price = self.inner.ticker(&request.symbol).await?.last_price;
        let order_id = Self::order_id();
        info!(
            order_id = %order_id,
            symbol = %request.symbol,
            side = %request.side,
            quantity = %request.quantity,
            price = %price,
            reduce_only = request.reduce_only,
            "[paper] market order"
        );
        Ok(OrderAck {
            order_id,
            symbol: request.symbol.clone(),
            status: "FILLED".to_string(),
            executed_quantity: request.quantity,
            average_price: Some(price),
        })
    }

    async fn place_trigger_order(&self, request: &TriggerOrderRequest) -> VenueResult<OrderAck> {
        let order_id = Self::order_id();
        info!(
            order_id = %order_id,
            symbol = %request.symbol,
            kind = request.kind.short_label(),
            side = %request.side,
            trigger_price = %request.trigger_price,
            quantity = %request.quantity,
            "[paper] trigger order"
        );
        Ok(OrderAck {
            order_id,
            symbol: request.symbol.clone(),
            status: "NEW".to_string(),
            executed_quantity: Decimal::ZERO,
            average_price: None,
        })
    }

    /// Succeeds only for an order the venue actually holds.
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> VenueResult<()> {
        let resting = self.inner.open_orders(Some(symbol)).await?;
        if !resting.iter().any(|o| o.order_id == order_id) {
            return Err(VenueError::order_not_found(order_id));
        }
        info!(symbol, order_id, "[paper] cancel order");
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &str) -> VenueResult<()> {
        info!(symbol, "[paper] cancel all orders");
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> VenueResult<()> {
        info!(symbol, leverage, "[paper] set leverage");
        Ok(())
    }

    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> VenueResult<()> {
        info!(symbol, %mode, "[paper] set margin mode");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autotrader_core::test_util::MockVenue;
    use autotrader_core::{OrderSide, TriggerKind};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_writes_never_reach_inner_venue() {
        let mock = Arc::new(MockVenue::new().with_market("BTC/USDT", dec!(60000)));
        let paper = PaperVenue::new(mock.clone());

        let ack = paper
            .place_market_order(&MarketOrderRequest {
                symbol: "BTC/USDT".to_string(),
                side: OrderSide::Buy,
                quantity: dec!(0.01),
                reduce_only: false,
            })
            .await
            .unwrap();
        paper.set_leverage("BTC/USDT", 10).await.unwrap();
        paper.cancel_all_orders("BTC/USDT").await.unwrap();

        assert!(ack.order_id.starts_with("paper-"));
        assert_eq!(ack.average_price, Some(dec!(60000)));
        assert!(mock.calls().is_empty());
        assert!(mock.current_positions().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_checks_order_exists() {
        let mock = Arc::new(MockVenue::new().with_order(PendingOrder {
            order_id: "7".to_string(),
            symbol: "BTC/USDT".to_string(),
            order_type: "STOP_MARKET".to_string(),
            trigger: Some(TriggerKind::StopLoss),
            side: OrderSide::Sell,
            trigger_price: dec!(58000),
            quantity: dec!(0.01),
            reduce_only: true,
        }));
        let paper = PaperVenue::new(mock.clone());

        paper.cancel_order("BTC/USDT", "7").await.unwrap();
        let err = paper.cancel_order("BTC/USDT", "404").await.unwrap_err();

        assert_eq!(err.to_string(), "order not found: 404");
        assert!(mock.calls().is_empty());
        assert_eq!(mock.resting_orders().len(), 1);
    }

    #[tokio::test]
    async fn test_reads_pass_through() {
        let mock = Arc::new(MockVenue::new().with_balance(dec!(500), dec!(400)));
        let paper = PaperVenue::new(mock.clone());
        assert_eq!(paper.balance().await.unwrap().free, dec!(400));
        assert_eq!(mock.read_count(), 1);
    }
}

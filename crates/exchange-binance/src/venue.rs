use crate::client::{BinanceClient, CODE_NO_NEED_TO_CHANGE_MARGIN_TYPE};
use crate::symbols::venue_symbol;
use crate::types::{
    margin_type_param, RawBalance, RawDepth, RawExchangeInfo, RawLeverageBracket, RawOrder,
    RawPositionRisk, RawPremiumIndex, RawTicker24h, DEFAULT_MAX_LEVERAGE,
};
use async_trait::async_trait;
use autotrader_core::{
    Balance, FundingRate, MarginMode, MarketBreadth, MarketOrderRequest, OrderAck, OrderBook,
    PendingOrder, Position, SymbolRules, Ticker, TriggerKind, TriggerOrderRequest, VenueClient,
    VenueError, VenueResult,
};
use reqwest::Method;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info};

/// Depth limits accepted by the order book endpoint.
const DEPTH_LIMITS: [usize; 7] = [5, 10, 20, 50, 100, 500, 1000];

const SETTLEMENT_ASSET: &str = "USDT";

fn depth_limit(depth: usize) -> usize {
    DEPTH_LIMITS
        .iter()
        .copied()
        .find(|&limit| limit >= depth)
        .unwrap_or(1000)
}

fn decimal_param(value: Decimal) -> String {
    value.normalize().to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BracketResponse {
    Many(Vec<RawLeverageBracket>),
    One(RawLeverageBracket),
}

impl BinanceClient {
    async fn load_exchange_info(&self) -> VenueResult<()> {
        let info: RawExchangeInfo = self.public_get("/fapi/v1/exchangeInfo", &[]).await?;
        let mut cache = self.symbol_info.write().await;
        cache.clear();
        for symbol in info.symbols {
            cache.insert(symbol.symbol.clone(), symbol);
        }
        info!(symbols = cache.len(), "Loaded exchange info");
        Ok(())
    }

    /// Unsigned clients fall back to the venue-wide maximum.
    async fn max_leverage_for(&self, venue: &str) -> VenueResult<u32> {
        if let Some(max) = self.max_leverage.read().await.get(venue) {
            return Ok(*max);
        }
        if !self.is_signed() {
            return Ok(DEFAULT_MAX_LEVERAGE);
        }
        let response: BracketResponse = self
            .signed(Method::GET, "/fapi/v1/leverageBracket", &[("symbol", venue.to_string())])
            .await?;
        let max = match response {
            BracketResponse::Many(brackets) => brackets
                .iter()
                .find(|b| b.symbol == venue)
                .map_or(DEFAULT_MAX_LEVERAGE, RawLeverageBracket::max_leverage),
            BracketResponse::One(bracket) => bracket.max_leverage(),
        };
        self.max_leverage.write().await.insert(venue.to_string(), max);
        Ok(max)
    }
}

#[async_trait]
impl VenueClient for BinanceClient {
    fn name(&self) -> &str {
        "binance-futures"
    }

    async fn ticker(&self, symbol: &str) -> VenueResult<Ticker> {
        let raw: RawTicker24h = self
            .public_get("/fapi/v1/ticker/24hr", &[("symbol", venue_symbol(symbol))])
            .await?;
        Ok(raw.into())
    }

    async fn order_book(&self, symbol: &str, depth: usize) -> VenueResult<OrderBook> {
        let raw: RawDepth = self
            .public_get(
                "/fapi/v1/depth",
                &[
                    ("symbol", venue_symbol(symbol)),
                    ("limit", depth_limit(depth).to_string()),
                ],
            )
            .await?;
        Ok(raw.into_order_book(symbol, depth))
    }

    async fn funding_rate(&self, symbol: &str) -> VenueResult<FundingRate> {
        let raw: RawPremiumIndex = self
            .public_get("/fapi/v1/premiumIndex", &[("symbol", venue_symbol(symbol))])
            .await?;
        Ok(raw.into())
    }

    async fn market_breadth(&self, sample: usize) -> VenueResult<MarketBreadth> {
        let mut tickers: Vec<RawTicker24h> = self.public_get("/fapi/v1/ticker/24hr", &[]).await?;
        tickers.retain(|t| t.symbol.ends_with(SETTLEMENT_ASSET));
        tickers.sort_by(|a, b| b.quote_volume.cmp(&a.quote_volume));
        tickers.truncate(sample);

        let advancing = tickers.iter().filter(|t| t.price_change_percent > Decimal::ZERO).count();
        let declining = tickers.iter().filter(|t| t.price_change_percent < Decimal::ZERO).count();
        let to_u32 = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);
        Ok(MarketBreadth {
            advancing: to_u32(advancing),
            declining: to_u32(declining),
            sample_size: to_u32(tickers.len()),
        })
    }

    async fn symbol_rules(&self, symbol: &str) -> VenueResult<SymbolRules> {
        let venue = venue_symbol(symbol);
        if !self.symbol_info.read().await.contains_key(&venue) {
            self.load_exchange_info().await?;
        }
        let info = self
            .symbol_info
            .read()
            .await
            .get(&venue)
            .cloned()
            .ok_or_else(|| VenueError::unknown_symbol(symbol))?;
        let max_leverage = self.max_leverage_for(&venue).await?;
        Ok(info.to_rules(max_leverage))
    }

    async fn balance(&self) -> VenueResult<Balance> {
        let balances: Vec<RawBalance> = self.signed(Method::GET, "/fapi/v2/balance", &[]).await?;
        Ok(balances
            .into_iter()
            .find(|b| b.asset == SETTLEMENT_ASSET)
            .map_or_else(
                || Balance {
                    asset: SETTLEMENT_ASSET.to_string(),
                    total: Decimal::ZERO,
                    free: Decimal::ZERO,
                    used: Decimal::ZERO,
                },
                Balance::from,
            ))
    }

    async fn positions(&self) -> VenueResult<Vec<Position>> {
        let raw: Vec<RawPositionRisk> = self.signed(Method::GET, "/fapi/v2/positionRisk", &[]).await?;
        Ok(raw.into_iter().filter_map(RawPositionRisk::into_position).collect())
    }

    async fn open_orders(&self, symbol: Option<&str>) -> VenueResult<Vec<PendingOrder>> {
        let params: Vec<(&str, String)> = symbol
            .map(|s| vec![("symbol", venue_symbol(s))])
            .unwrap_or_default();
        let raw: Vec<RawOrder> = self.signed(Method::GET, "/fapi/v1/openOrders", &params).await?;
        Ok(raw.into_iter().map(PendingOrder::from).collect())
    }

    async fn place_market_order(&self, request: &MarketOrderRequest) -> VenueResult<OrderAck> {
        let mut params = vec![
            ("symbol", venue_symbol(&request.symbol)),
            ("side", request.side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", decimal_param(request.quantity)),
            ("newOrderRespType", "RESULT".to_string()),
        ];
        if request.reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }
        let raw: RawOrder = self.signed(Method::POST, "/fapi/v1/order", &params).await?;
        debug!(order_id = raw.order_id, symbol = %request.symbol, "Market order accepted");
        Ok(raw.into())
    }

    async fn place_trigger_order(&self, request: &TriggerOrderRequest) -> VenueResult<OrderAck> {
        let order_type = match request.kind {
            TriggerKind::StopLoss => "STOP_MARKET",
            TriggerKind::TakeProfit => "TAKE_PROFIT_MARKET",
        };
        let params = [
            ("symbol", venue_symbol(&request.symbol)),
            ("side", request.side.as_str().to_string()),
            ("type", order_type.to_string()),
            ("stopPrice", decimal_param(request.trigger_price)),
            ("quantity", decimal_param(request.quantity)),
            ("reduceOnly", "true".to_string()),
            ("workingType", "MARK_PRICE".to_string()),
        ];
        let raw: RawOrder = self.signed(Method::POST, "/fapi/v1/order", &params).await?;
        debug!(order_id = raw.order_id, symbol = %request.symbol, order_type, "Trigger order accepted");
        Ok(raw.into())
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> VenueResult<()> {
        let _: RawOrder = self
            .signed(
                Method::DELETE,
                "/fapi/v1/order",
                &[("symbol", venue_symbol(symbol)), ("orderId", order_id.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &str) -> VenueResult<()> {
        let _: serde_json::Value = self
            .signed(
                Method::DELETE,
                "/fapi/v1/allOpenOrders",
                &[("symbol", venue_symbol(symbol))],
            )
            .await?;
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> VenueResult<()> {
        let _: serde_json::Value = self
            .signed(
                Method::POST,
                "/fapi/v1/leverage",
                &[("symbol", venue_symbol(symbol)), ("leverage", leverage.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> VenueResult<()> {
        let result: VenueResult<serde_json::Value> = self
            .signed(
                Method::POST,
                "/fapi/v1/marginType",
                &[
                    ("symbol", venue_symbol(symbol)),
                    ("marginType", margin_type_param(mode).to_string()),
                ],
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(VenueError::Api { code, .. }) if code == CODE_NO_NEED_TO_CHANGE_MARGIN_TYPE => {
                debug!(symbol, %mode, "Margin mode already set");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BinanceClientConfig;
    use autotrader_core::{OrderSide, PositionSide};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> BinanceClient {
        BinanceClient::new(
            BinanceClientConfig::default()
                .with_base_url(server.uri())
                .with_credentials("test-key", "test-secret"),
        )
        .unwrap()
    }

    fn ticker_json(symbol: &str, change: &str, volume: &str) -> serde_json::Value {
        json!({
            "symbol": symbol,
            "lastPrice": "1.0",
            "priceChangePercent": change,
            "highPrice": "1.1",
            "lowPrice": "0.9",
            "quoteVolume": volume,
            "closeTime": 1_700_000_000_000_i64
        })
    }

    #[test]
    fn test_depth_limit_rounds_up() {
        assert_eq!(depth_limit(1), 5);
        assert_eq!(depth_limit(10), 10);
        assert_eq!(depth_limit(15), 20);
        assert_eq!(depth_limit(5000), 1000);
    }

    // ==================== Market Data Tests ====================

    #[tokio::test]
    async fn test_ticker_uses_venue_symbol() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/ticker/24hr"))
            .and(query_param("symbol", "ETHUSDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ticker_json("ETHUSDT", "2.5", "100")))
            .expect(1)
            .mount(&server)
            .await;

        let ticker = client(&server).ticker("ETH/USDT").await.unwrap();
        assert_eq!(ticker.symbol, "ETH/USDT");
        assert_eq!(ticker.change_pct_24h, dec!(2.5));
    }

    #[tokio::test]
    async fn test_transient_read_failure_is_retried_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/ticker/24hr"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .up_to_n_times(1)
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/ticker/24hr"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ticker_json("BTCUSDT", "1.0", "100")))
            .expect(1)
            .mount(&server)
            .await;

        let ticker = client(&server).ticker("BTC/USDT").await.unwrap();
        assert_eq!(ticker.symbol, "BTC/USDT");
    }

    #[tokio::test]
    async fn test_client_error_read_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/ticker/24hr"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"code": -1121, "msg": "Invalid symbol."})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).ticker("FOO/USDT").await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_breadth_over_most_active_usdt_pairs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/ticker/24hr"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                ticker_json("BTCUSDT", "1.2", "9000"),
                ticker_json("ETHUSDT", "-0.5", "8000"),
                ticker_json("SOLUSDT", "3.0", "7000"),
                ticker_json("ETHBTC", "-9.0", "99999"),
                ticker_json("DOGEUSDT", "0.0", "6000"),
                ticker_json("XRPUSDT", "-2.0", "10")
            ])))
            .mount(&server)
            .await;

        let breadth = client(&server).market_breadth(4).await.unwrap();
        assert_eq!(breadth.sample_size, 4);
        assert_eq!(breadth.advancing, 2);
        assert_eq!(breadth.declining, 1);
    }

    #[tokio::test]
    async fn test_symbol_rules_cached_with_bracket() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/exchangeInfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "symbols": [{
                    "symbol": "BTCUSDT",
                    "status": "TRADING",
                    "filters": [
                        {"filterType": "PRICE_FILTER", "tickSize": "0.10"},
                        {"filterType": "LOT_SIZE", "stepSize": "0.001", "minQty": "0.001"},
                        {"filterType": "MIN_NOTIONAL", "notional": "100"}
                    ]
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/leverageBracket"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"symbol": "BTCUSDT", "brackets": [{"bracket": 1, "initialLeverage": 75}]}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let rules = client.symbol_rules("BTC/USDT").await.unwrap();
        assert_eq!(rules.step_size, dec!(0.001));
        assert_eq!(rules.tick_size, dec!(0.10));
        assert_eq!(rules.max_leverage, 75);
        // Second lookup is served from cache.
        client.symbol_rules("BTC/USDT").await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_symbol_rules() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/exchangeInfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"symbols": []})))
            .mount(&server)
            .await;

        let err = client(&server).symbol_rules("NOPE/USDT").await.unwrap_err();
        assert!(matches!(err, VenueError::UnknownSymbol { .. }));
    }

    // ==================== Account Tests ====================

    #[tokio::test]
    async fn test_balance_and_positions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/balance"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"asset": "BNB", "balance": "1.0", "availableBalance": "1.0"},
                {"asset": "USDT", "balance": "1500.5", "availableBalance": "1200.5"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/positionRisk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"symbol": "BTCUSDT", "positionAmt": "0.010", "entryPrice": "60000", "markPrice": "61000",
                 "unRealizedProfit": "10", "leverage": "5", "marginType": "cross"},
                {"symbol": "ETHUSDT", "positionAmt": "0", "entryPrice": "0", "markPrice": "3000",
                 "unRealizedProfit": "0", "leverage": "20", "marginType": "cross"}
            ])))
            .mount(&server)
            .await;

        let client = client(&server);
        let balance = client.balance().await.unwrap();
        assert_eq!(balance.total, dec!(1500.5));
        assert_eq!(balance.used, dec!(300));

        let positions = client.positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].side, PositionSide::Long);
        assert_eq!(client.position("BTC/USDT").await.unwrap().unwrap().leverage, 5);
        assert!(client.position("ETH/USDT").await.unwrap().is_none());
    }

    // ==================== Order Tests ====================

    #[tokio::test]
    async fn test_market_order_parameters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fapi/v1/order"))
            .and(query_param("type", "MARKET"))
            .and(query_param("quantity", "0.015"))
            .and(query_param("reduceOnly", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "orderId": 777, "symbol": "BTCUSDT", "status": "FILLED", "type": "MARKET",
                "side": "SELL", "origQty": "0.015", "executedQty": "0.015", "avgPrice": "61000.5"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ack = client(&server)
            .place_market_order(&MarketOrderRequest {
                symbol: "BTC/USDT".to_string(),
                side: OrderSide::Sell,
                quantity: dec!(0.0150),
                reduce_only: true,
            })
            .await
            .unwrap();
        assert_eq!(ack.order_id, "777");
        assert_eq!(ack.average_price, Some(dec!(61000.5)));
    }

    #[tokio::test]
    async fn test_trigger_order_is_reduce_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fapi/v1/order"))
            .and(query_param("type", "STOP_MARKET"))
            .and(query_param("stopPrice", "58000"))
            .and(query_param("reduceOnly", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "orderId": 778, "symbol": "BTCUSDT", "status": "NEW", "type": "STOP_MARKET",
                "side": "SELL", "stopPrice": "58000", "origQty": "0.015"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ack = client(&server)
            .place_trigger_order(&TriggerOrderRequest {
                symbol: "BTC/USDT".to_string(),
                side: OrderSide::Sell,
                kind: TriggerKind::StopLoss,
                trigger_price: dec!(58000.00),
                quantity: dec!(0.015),
            })
            .await
            .unwrap();
        assert_eq!(ack.status, "NEW");
    }

    #[tokio::test]
    async fn test_margin_mode_already_set_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fapi/v1/marginType"))
            .and(query_param("marginType", "ISOLATED"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": -4046, "msg": "No need to change margin type."
            })))
            .mount(&server)
            .await;

        client(&server)
            .set_margin_mode("BTC/USDT", MarginMode::Isolated)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_unknown_order() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/fapi/v1/order"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": -2011, "msg": "Unknown order sent."
            })))
            .mount(&server)
            .await;

        let err = client(&server).cancel_order("BTC/USDT", "123").await.unwrap_err();
        assert!(matches!(err, VenueError::OrderNotFound { .. }));
    }
}

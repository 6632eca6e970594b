//! In-memory venue and memory store for tests.
//!
//! `MockVenue` keeps a tiny account model: market orders fill instantly at
//! the configured price and update positions, trigger orders rest until
//! cancelled. Every write is recorded so tests can assert on what reached
//! the venue.

use crate::account::{Balance, MarginMode, PendingOrder, Position, PositionSide, TriggerKind};
use crate::error::{VenueError, VenueResult};
use crate::market::{BookLevel, FundingRate, MarketBreadth, OrderBook, SymbolRules, Ticker};
use crate::orders::{MarketOrderRequest, OrderAck, OrderSide, TriggerOrderRequest};
use crate::records::MemoryNote;
use crate::traits::{MemoryStore, VenueClient};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;

/// A write that reached the mock venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VenueCall {
    MarketOrder(MarketOrderRequest),
    TriggerOrder(TriggerOrderRequest),
    CancelOrder { symbol: String, order_id: String },
    CancelAll { symbol: String },
    SetLeverage { symbol: String, leverage: u32 },
    SetMarginMode { symbol: String, mode: MarginMode },
}

#[derive(Debug)]
struct MockState {
    prices: HashMap<String, Decimal>,
    rules: HashMap<String, SymbolRules>,
    leverage: HashMap<String, u32>,
    balance: Balance,
    positions: Vec<Position>,
    orders: Vec<PendingOrder>,
    breadth: MarketBreadth,
    funding_rate: Decimal,
    failures: HashMap<&'static str, VenueError>,
    trigger_rejections: HashMap<TriggerKind, VenueError>,
    cancel_rejections: HashMap<String, VenueError>,
    calls: Vec<VenueCall>,
    reads: u64,
    next_order_id: u64,
}

#[derive(Debug)]
pub struct MockVenue {
    state: Mutex<MockState>,
}

impl Default for MockVenue {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVenue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                prices: HashMap::new(),
                rules: HashMap::new(),
                leverage: HashMap::new(),
                balance: Balance {
                    asset: "USDT".to_string(),
                    total: Decimal::from(1000),
                    free: Decimal::from(1000),
                    used: Decimal::ZERO,
                },
                positions: Vec::new(),
                orders: Vec::new(),
                breadth: MarketBreadth {
                    advancing: 30,
                    declining: 20,
                    sample_size: 50,
                },
                funding_rate: Decimal::new(1, 4),
                failures: HashMap::new(),
                trigger_rejections: HashMap::new(),
                cancel_rejections: HashMap::new(),
                calls: Vec::new(),
                reads: 0,
                next_order_id: 1000,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock()
    }

    /// Lists `symbol` at `price` with step 0.001, tick 0.01, min notional 5, leverage 1..=125.
    #[must_use]
    pub fn with_market(self, symbol: &str, price: Decimal) -> Self {
        let rules = SymbolRules {
            symbol: symbol.to_string(),
            step_size: Decimal::new(1, 3),
            tick_size: Decimal::new(1, 2),
            min_quantity: Decimal::new(1, 3),
            min_notional: Decimal::from(5),
            min_leverage: 1,
            max_leverage: 125,
        };
        self.with_rules(rules).with_price(symbol, price)
    }

    #[must_use]
    pub fn with_rules(self, rules: SymbolRules) -> Self {
        self.lock().rules.insert(rules.symbol.clone(), rules);
        self
    }

    #[must_use]
    pub fn with_price(self, symbol: &str, price: Decimal) -> Self {
        self.set_price(symbol, price);
        self
    }

    #[must_use]
    pub fn with_balance(self, total: Decimal, free: Decimal) -> Self {
        self.lock().balance = Balance {
            asset: "USDT".to_string(),
            total,
            free,
            used: total - free,
        };
        self
    }

    #[must_use]
    pub fn with_position(self, position: Position) -> Self {
        self.lock().positions.push(position);
        self
    }

    #[must_use]
    pub fn with_order(self, order: PendingOrder) -> Self {
        self.lock().orders.push(order);
        self
    }

    #[must_use]
    pub fn with_breadth(self, breadth: MarketBreadth) -> Self {
        self.lock().breadth = breadth;
        self
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.lock().prices.insert(symbol.to_string(), price);
    }

    /// Makes every call of `operation` fail with `error` until cleared.
    ///
    /// Operation names match the trait methods, e.g. `"place_trigger_order"`.
    pub fn fail(&self, operation: &'static str, error: VenueError) {
        self.lock().failures.insert(operation, error);
    }

    pub fn clear_failure(&self, operation: &'static str) {
        self.lock().failures.remove(operation);
    }

    /// Rejects trigger orders of `kind` only; the other kind is still accepted.
    pub fn reject_trigger(&self, kind: TriggerKind, error: VenueError) {
        self.lock().trigger_rejections.insert(kind, error);
    }

    /// Makes cancelling `order_id` fail with `error`.
    pub fn reject_cancel(&self, order_id: &str, error: VenueError) {
        self.lock().cancel_rejections.insert(order_id.to_string(), error);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<VenueCall> {
        self.lock().calls.clone()
    }

    #[must_use]
    pub fn read_count(&self) -> u64 {
        self.lock().reads
    }

    #[must_use]
    pub fn current_positions(&self) -> Vec<Position> {
        self.lock().positions.clone()
    }

    #[must_use]
    pub fn resting_orders(&self) -> Vec<PendingOrder> {
        self.lock().orders.clone()
    }

    #[must_use]
    pub fn leverage_of(&self, symbol: &str) -> Option<u32> {
        self.lock().leverage.get(symbol).copied()
    }

    fn check(state: &MockState, operation: &'static str) -> VenueResult<()> {
        match state.failures.get(operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn read(&self, operation: &'static str) -> VenueResult<MutexGuard<'_, MockState>> {
        let mut state = self.lock();
        state.reads += 1;
        Self::check(&state, operation)?;
        Ok(state)
    }

    fn price_of(state: &MockState, symbol: &str) -> VenueResult<Decimal> {
        state
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| VenueError::unknown_symbol(symbol))
    }

    fn next_id(state: &mut MockState) -> String {
        state.next_order_id += 1;
        state.next_order_id.to_string()
    }

    fn fill(state: &mut MockState, request: &MarketOrderRequest, price: Decimal) -> VenueResult<()> {
        let index = state.positions.iter().position(|p| p.symbol == request.symbol);
        match index {
            Some(i) if state.positions[i].side.entry_side() == request.side => {
                if request.reduce_only {
                    return Err(VenueError::OrderRejected(
                        "ReduceOnly Order is rejected.".to_string(),
                    ));
                }
                let position = &mut state.positions[i];
                let old_notional = position.size * position.entry_price;
                position.size += request.quantity;
                position.entry_price = (old_notional + request.quantity * price) / position.size;
            }
            Some(i) => {
                let position = &mut state.positions[i];
                if request.quantity > position.size {
                    return Err(VenueError::OrderRejected(
                        "ReduceOnly Order is rejected.".to_string(),
                    ));
                }
                position.size -= request.quantity;
                if position.size.is_zero() {
                    state.positions.remove(i);
                }
            }
            None => {
                if request.reduce_only {
                    return Err(VenueError::OrderRejected(
                        "ReduceOnly Order is rejected.".to_string(),
                    ));
                }
                let side = match request.side {
                    OrderSide::Buy => PositionSide::Long,
                    OrderSide::Sell => PositionSide::Short,
                };
                let leverage = state.leverage.get(&request.symbol).copied().unwrap_or(1);
                state.positions.push(Position {
                    symbol: request.symbol.clone(),
                    side,
                    size: request.quantity,
                    entry_price: price,
                    mark_price: price,
                    leverage,
                    unrealized_pnl: Decimal::ZERO,
                    margin_mode: MarginMode::Cross,
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VenueClient for MockVenue {
    fn name(&self) -> &str {
        "mock"
    }

    async fn ticker(&self, symbol: &str) -> VenueResult<Ticker> {
        let state = self.read("ticker")?;
        let price = Self::price_of(&state, symbol)?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            last_price: price,
            change_pct_24h: Decimal::ONE,
            high_24h: price,
            low_24h: price,
            quote_volume_24h: Decimal::from(1_000_000),
            timestamp: Utc::now(),
        })
    }

    async fn order_book(&self, symbol: &str, _depth: usize) -> VenueResult<OrderBook> {
        let state = self.read("order_book")?;
        let price = Self::price_of(&state, symbol)?;
        let tick = state
            .rules
            .get(symbol)
            .map_or(Decimal::new(1, 2), |r| r.tick_size);
        Ok(OrderBook {
            symbol: symbol.to_string(),
            bids: vec![BookLevel { price: price - tick, quantity: Decimal::from(3) }],
            asks: vec![BookLevel { price: price + tick, quantity: Decimal::from(2) }],
        })
    }

    async fn funding_rate(&self, symbol: &str) -> VenueResult<FundingRate> {
        let state = self.read("funding_rate")?;
        let price = Self::price_of(&state, symbol)?;
        Ok(FundingRate {
            symbol: symbol.to_string(),
            rate: state.funding_rate,
            mark_price: price,
            next_funding_time: None,
        })
    }

    async fn market_breadth(&self, _sample: usize) -> VenueResult<MarketBreadth> {
        let state = self.read("market_breadth")?;
        Ok(state.breadth)
    }

    async fn symbol_rules(&self, symbol: &str) -> VenueResult<SymbolRules> {
        let state = self.read("symbol_rules")?;
        state
            .rules
            .get(symbol)
            .cloned()
            .ok_or_else(|| VenueError::unknown_symbol(symbol))
    }

    async fn balance(&self) -> VenueResult<Balance> {
        let state = self.read("balance")?;
        Ok(state.balance.clone())
    }

    async fn positions(&self) -> VenueResult<Vec<Position>> {
        let state = self.read("positions")?;
        Ok(state.positions.clone())
    }

    async fn open_orders(&self, symbol: Option<&str>) -> VenueResult<Vec<PendingOrder>> {
        let state = self.read("open_orders")?;
        Ok(state
            .orders
            .iter()
            .filter(|o| symbol.map_or(true, |s| o.symbol == s))
            .cloned()
            .collect())
    }

    async fn place_market_order(&self, request: &MarketOrderRequest) -> VenueResult<OrderAck> {
        let mut state = self.lock();
        state.calls.push(VenueCall::MarketOrder(request.clone()));
        Self::check(&state, "place_market_order")?;
        let price = Self::price_of(&state, &request.symbol)?;
        Self::fill(&mut state, request, price)?;
        Ok(OrderAck {
            order_id: Self::next_id(&mut state),
            symbol: request.symbol.clone(),
            status: "FILLED".to_string(),
            executed_quantity: request.quantity,
            average_price: Some(price),
        })
    }

    async fn place_trigger_order(&self, request: &TriggerOrderRequest) -> VenueResult<OrderAck> {
        let mut state = self.lock();
        state.calls.push(VenueCall::TriggerOrder(request.clone()));
        Self::check(&state, "place_trigger_order")?;
        if let Some(err) = state.trigger_rejections.get(&request.kind) {
            return Err(err.clone());
        }
        let order_id = Self::next_id(&mut state);
        let order_type = match request.kind {
            TriggerKind::StopLoss => "STOP_MARKET",
            TriggerKind::TakeProfit => "TAKE_PROFIT_MARKET",
        };
        state.orders.push(PendingOrder {
            order_id: order_id.clone(),
            symbol: request.symbol.clone(),
            order_type: order_type.to_string(),
            trigger: Some(request.kind),
            side: request.side,
            trigger_price: request.trigger_price,
            quantity: request.quantity,
            reduce_only: true,
        });
        Ok(OrderAck {
            order_id,
            symbol: request.symbol.clone(),
            status: "NEW".to_string(),
            executed_quantity: Decimal::ZERO,
            average_price: None,
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> VenueResult<()> {
        let mut state = self.lock();
        state.calls.push(VenueCall::CancelOrder {
            symbol: symbol.to_string(),
            order_id: order_id.to_string(),
        });
        Self::check(&state, "cancel_order")?;
        if let Some(err) = state.cancel_rejections.get(order_id) {
            return Err(err.clone());
        }
        let before = state.orders.len();
        state
            .orders
            .retain(|o| !(o.symbol == symbol && o.order_id == order_id));
        if state.orders.len() == before {
            return Err(VenueError::order_not_found(order_id));
        }
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &str) -> VenueResult<()> {
        let mut state = self.lock();
        state.calls.push(VenueCall::CancelAll {
            symbol: symbol.to_string(),
        });
        Self::check(&state, "cancel_all_orders")?;
        state.orders.retain(|o| o.symbol != symbol);
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> VenueResult<()> {
        let mut state = self.lock();
        state.calls.push(VenueCall::SetLeverage {
            symbol: symbol.to_string(),
            leverage,
        });
        Self::check(&state, "set_leverage")?;
        state.leverage.insert(symbol.to_string(), leverage);
        for position in state.positions.iter_mut().filter(|p| p.symbol == symbol) {
            position.leverage = leverage;
        }
        Ok(())
    }

    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> VenueResult<()> {
        let mut state = self.lock();
        state.calls.push(VenueCall::SetMarginMode {
            symbol: symbol.to_string(),
            mode,
        });
        Self::check(&state, "set_margin_mode")?;
        Ok(())
    }
}

/// Memory store backed by a mutex-guarded note.
#[derive(Debug, Default)]
pub struct InMemoryMemoryStore {
    note: tokio::sync::Mutex<MemoryNote>,
}

impl InMemoryMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn read_memory(&self) -> anyhow::Result<MemoryNote> {
        Ok(self.note.lock().await.clone())
    }

    async fn replace_memory(&self, content: &str) -> anyhow::Result<MemoryNote> {
        let mut note = self.note.lock().await;
        *note = MemoryNote {
            content: content.to_string(),
            updated_at: Some(Utc::now()),
        };
        Ok(note.clone())
    }
}

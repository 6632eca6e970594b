//! Applies decoded commands to the venue.
//!
//! Each handler re-reads the venue state it depends on (rules, price,
//! balance, position, open orders) right before acting, so later commands
//! in a reply observe the effects of earlier ones.

use crate::error::{ExecutionError, Result};
use crate::result::ExecutionResult;
use crate::venue::ExecutionVenue;
use autotrader_core::{
    truncate_to_step, ExecutionMode, MarketOrderRequest, MemoryStore, OrderAck, OrderSide,
    Position, SymbolRules, TriggerKind, TriggerOrderRequest, VenueClient,
};
use autotrader_protocol::{
    CancelOrder, CancelOrders, ClosePosition, Command, Instruction, ModifyProtection,
    OpenPosition, Payload, SetLeverage, SetMarginMode, UpdateMemory,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

/// Default minimum notional for position-opening commands, in USDT.
pub const DEFAULT_MIN_TRADE_NOTIONAL: Decimal = Decimal::TEN;

const CLOSE_ALL_KIND: &str = "close_all";

pub struct CommandExecutor {
    venue: ExecutionVenue,
    memory: Arc<dyn MemoryStore>,
    min_trade_notional: Decimal,
}

impl CommandExecutor {
    #[must_use]
    pub fn new(venue: Arc<dyn VenueClient>, memory: Arc<dyn MemoryStore>, mode: ExecutionMode) -> Self {
        Self {
            venue: ExecutionVenue::new(mode, venue),
            memory,
            min_trade_notional: DEFAULT_MIN_TRADE_NOTIONAL,
        }
    }

    #[must_use]
    pub fn with_min_trade_notional(mut self, minimum: Decimal) -> Self {
        self.min_trade_notional = minimum;
        self
    }

    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.venue.mode()
    }

    /// Executes one decoded command.
    ///
    /// Returns `None` only for malformed blocks, which carry no intent to
    /// execute. Every other command yields a result; failures are captured in
    /// it rather than returned as errors.
    pub async fn execute(&self, command: &Command) -> Option<ExecutionResult> {
        match &command.payload {
            Payload::Malformed { error, .. } => {
                warn!(position = command.position, %error, "Skipping malformed command block");
                None
            }
            Payload::Unrecognized => {
                warn!(kind = %command.raw_kind, "Unrecognized command kind");
                Some(
                    ExecutionResult::skipped(
                        &command.raw_kind,
                        format!("unrecognized command kind '{}'", command.raw_kind),
                    )
                    .with_symbol(command.symbol()),
                )
            }
            Payload::Invalid { reason } => {
                warn!(kind = %command.kind, %reason, "Command failed validation");
                Some(
                    ExecutionResult::failed(command.kind.as_str(), format!("invalid arguments: {reason}"))
                        .with_symbol(command.symbol()),
                )
            }
            Payload::Decoded(instruction) => Some(self.apply(instruction).await),
        }
    }

    /// Applies a validated instruction, never failing past this boundary.
    pub async fn apply(&self, instruction: &Instruction) -> ExecutionResult {
        let kind = instruction.kind().as_str();
        let outcome = match instruction {
            Instruction::OpenPosition(order) => self.open_position(order).await,
            Instruction::ClosePosition(order) => self.close_position(order).await,
            Instruction::SetLeverage(order) => self.set_leverage(order).await,
            Instruction::SetMarginMode(order) => self.set_margin_mode(order).await,
            Instruction::ModifyProtection(order) => self.modify_protection(order).await,
            Instruction::CancelOrders(order) => self.cancel_orders(order).await,
            Instruction::CancelOrder(order) => self.cancel_order(order).await,
            Instruction::UpdateMemory(update) => self.update_memory(update).await,
        };

        // Memory is local state, written for real in both modes.
        let simulated =
            self.venue.is_simulated() && !matches!(instruction, Instruction::UpdateMemory(_));

        let result = match outcome {
            Ok(result) => {
                info!(kind, symbol = ?instruction.symbol(), detail = %result.detail, simulated, "Command executed");
                result
            }
            Err(error) => {
                warn!(kind, symbol = ?instruction.symbol(), %error, "Command failed");
                ExecutionResult::failed(kind, error.to_string())
            }
        };
        result.with_symbol(instruction.symbol()).simulated(simulated)
    }

    /// Flattens every open position with a reduce-only market order after
    /// cancelling the symbol's resting orders. One result per position.
    pub async fn close_all_positions(&self) -> Vec<ExecutionResult> {
        let simulated = self.venue.is_simulated();
        let positions = match self.venue.positions().await {
            Ok(positions) => positions,
            Err(error) => {
                warn!(%error, "Close-all could not read positions");
                return vec![ExecutionResult::failed(CLOSE_ALL_KIND, error.to_string()).simulated(simulated)];
            }
        };

        info!(count = positions.len(), "Closing all positions");
        let mut results = Vec::with_capacity(positions.len());
        for position in positions.iter().filter(|p| p.size > Decimal::ZERO) {
            if let Err(error) = self.venue.cancel_all_orders(&position.symbol).await {
                warn!(symbol = %position.symbol, %error, "Failed to cancel orders before close-all");
            }
            let result = match self.flatten(position, position.size).await {
                Ok(ack) => ExecutionResult::success(
                    CLOSE_ALL_KIND,
                    format!("closed {} {} {}", position.side, position.size, position.symbol),
                )
                .with_order(ack.order_id.clone())
                .with_fill(position.side.exit_side(), position.size, ack.average_price),
                Err(error) => {
                    warn!(symbol = %position.symbol, %error, "Close-all failed for position");
                    ExecutionResult::failed(CLOSE_ALL_KIND, error.to_string())
                }
            };
            results.push(result.with_symbol(Some(&position.symbol)).simulated(simulated));
        }
        results
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    async fn open_position(&self, order: &OpenPosition) -> Result<ExecutionResult> {
        // Configured minimum is checked before any venue call.
        if order.notional < self.min_trade_notional {
            return Err(ExecutionError::below_minimum(order.notional, self.min_trade_notional));
        }

        let rules = self.venue.symbol_rules(&order.symbol).await?;
        let minimum = self.min_trade_notional.max(rules.min_notional);
        if order.notional < minimum {
            return Err(ExecutionError::below_minimum(order.notional, minimum));
        }

        let balance = self.venue.balance().await?;
        if order.notional > balance.free {
            return Err(ExecutionError::InsufficientBalance {
                requested: order.notional,
                available: balance.free,
            });
        }

        if let Some(leverage) = order.leverage {
            self.apply_leverage(&order.symbol, leverage, &rules).await?;
        }

        let price = self.venue.ticker(&order.symbol).await?.last_price;
        if price <= Decimal::ZERO {
            return Err(ExecutionError::InvalidCommand(format!(
                "no usable price for {}",
                order.symbol
            )));
        }
        let quantity = truncate_to_step(order.notional / price, rules.step_size);
        check_quantity(&order.symbol, quantity, &rules)?;

        let side = order.side.entry_side();
        let ack = self
            .venue
            .place_market_order(&MarketOrderRequest {
                symbol: order.symbol.clone(),
                side,
                quantity,
                reduce_only: false,
            })
            .await?;
        let filled = if ack.executed_quantity > Decimal::ZERO {
            ack.executed_quantity
        } else {
            quantity
        };
        let fill_price = ack.average_price.unwrap_or(price);

        let mut detail = format!("{} {} {} @ {}", order.side, filled, order.symbol, fill_price);
        let mut order_ids = vec![ack.order_id];

        for (kind, trigger) in [
            (TriggerKind::StopLoss, order.stop_loss),
            (TriggerKind::TakeProfit, order.take_profit),
        ] {
            let Some(trigger) = trigger else { continue };
            match self
                .place_protection(&order.symbol, side.opposite(), kind, trigger, filled, &rules)
                .await
            {
                Ok(ack) => {
                    detail.push_str(&format!("; {} @ {}", kind.short_label(), tick_price(trigger, &rules)));
                    order_ids.push(ack.order_id);
                }
                Err(error) => {
                    // The entry stands; only the protective leg is reported.
                    warn!(symbol = %order.symbol, leg = kind.short_label(), %error, "Protective order failed");
                    detail.push_str(&format!("; {} failed: {error}", kind.short_label()));
                }
            }
        }

        let result = order_ids
            .into_iter()
            .fold(ExecutionResult::success("trade_in", detail), ExecutionResult::with_order);
        Ok(result.with_fill(side, filled, Some(fill_price)))
    }

    async fn close_position(&self, order: &ClosePosition) -> Result<ExecutionResult> {
        let position = self.open_position_on(&order.symbol).await?;
        let rules = self.venue.symbol_rules(&order.symbol).await?;

        let requested = position.size * Decimal::from(order.percentage) / Decimal::ONE_HUNDRED;
        let quantity = truncate_to_step(requested, rules.step_size).min(position.size);
        if quantity <= Decimal::ZERO {
            return Err(ExecutionError::ZeroQuantity {
                symbol: order.symbol.clone(),
                step: rules.step_size,
            });
        }

        let ack = self.flatten(&position, quantity).await?;
        let mut detail = format!(
            "closed {}% of {} {}: {} {}",
            order.percentage,
            position.side,
            order.symbol,
            position.side.exit_side(),
            quantity
        );

        if order.percentage == 100 {
            if let Err(error) = self.venue.cancel_all_orders(&order.symbol).await {
                warn!(symbol = %order.symbol, %error, "Failed to cancel remaining orders after full close");
                detail.push_str(&format!("; order cleanup failed: {error}"));
            }
        }
        if let Some(reason) = &order.reason {
            info!(symbol = %order.symbol, %reason, "Close reason");
        }

        Ok(ExecutionResult::success("close_position", detail)
            .with_order(ack.order_id.clone())
            .with_fill(position.side.exit_side(), quantity, ack.average_price))
    }

    async fn set_leverage(&self, order: &SetLeverage) -> Result<ExecutionResult> {
        let rules = self.venue.symbol_rules(&order.symbol).await?;
        self.apply_leverage(&order.symbol, order.leverage, &rules).await?;
        Ok(ExecutionResult::success(
            "set_leverage",
            format!("{} leverage set to {}x", order.symbol, order.leverage),
        ))
    }

    async fn set_margin_mode(&self, order: &SetMarginMode) -> Result<ExecutionResult> {
        self.venue.set_margin_mode(&order.symbol, order.mode).await?;
        Ok(ExecutionResult::success(
            "set_margin_mode",
            format!("{} margin mode set to {}", order.symbol, order.mode),
        ))
    }

    /// Replaces each requested protective leg independently. A kind's old
    /// orders are cancelled only once its replacement has been accepted, so a
    /// rejected leg leaves the existing protection in place.
    async fn modify_protection(&self, order: &ModifyProtection) -> Result<ExecutionResult> {
        let position = self.open_position_on(&order.symbol).await?;
        let rules = self.venue.symbol_rules(&order.symbol).await?;
        let resting = self.venue.open_orders(Some(&order.symbol)).await?;

        let legs = [
            (TriggerKind::StopLoss, order.stop_loss),
            (TriggerKind::TakeProfit, order.take_profit),
        ];

        let mut placed = Vec::new();
        let mut rejected = Vec::new();
        let mut notes = Vec::new();
        let mut order_ids = Vec::new();
        for (kind, trigger) in legs
            .into_iter()
            .filter_map(|(kind, price)| price.map(|p| (kind, p)))
        {
            let ack = match self
                .place_protection(
                    &order.symbol,
                    position.side.exit_side(),
                    kind,
                    trigger,
                    position.size,
                    &rules,
                )
                .await
            {
                Ok(ack) => ack,
                Err(error) => {
                    warn!(symbol = %order.symbol, leg = kind.short_label(), %error, "Replacement protective order rejected, keeping existing");
                    rejected.push(format!("{} rejected: {error}", kind.short_label()));
                    continue;
                }
            };

            let mut cancelled = 0;
            for existing in resting.iter().filter(|o| o.trigger == Some(kind)) {
                match self.venue.cancel_order(&order.symbol, &existing.order_id).await {
                    Ok(()) => cancelled += 1,
                    Err(error) => {
                        warn!(symbol = %order.symbol, order_id = %existing.order_id, %error, "Failed to cancel replaced protective order");
                        notes.push(format!("old {} {} not cancelled: {error}", kind.short_label(), existing.order_id));
                    }
                }
            }
            placed.push(format!(
                "{} @ {} (replaced {})",
                kind.short_label(),
                tick_price(trigger, &rules),
                cancelled
            ));
            order_ids.push(ack.order_id);
        }

        let mut parts = Vec::new();
        if !placed.is_empty() {
            parts.push(format!("placed {}", placed.join(", ")));
        }
        parts.extend(notes);

        let mut result = if rejected.is_empty() {
            ExecutionResult::success("modify_position", String::new())
        } else {
            let error = rejected.join("; ");
            parts.insert(0, error.clone());
            ExecutionResult::failed("modify_position", error)
        };
        result.detail = format!("{}: {}", order.symbol, parts.join("; "));
        for id in order_ids {
            result = result.with_order(id);
        }
        Ok(result)
    }

    async fn cancel_orders(&self, order: &CancelOrders) -> Result<ExecutionResult> {
        let resting = self.venue.open_orders(Some(&order.symbol)).await?;
        let matching: Vec<_> = resting
            .iter()
            .filter(|o| order.filter.matches(o.trigger))
            .collect();

        if matching.is_empty() {
            return Ok(ExecutionResult::success(
                "cancel_orders",
                format!("no {} orders outstanding on {}", order.filter.as_str(), order.symbol),
            ));
        }

        let mut cancelled = Vec::new();
        for pending in &matching {
            if let Err(error) = self.venue.cancel_order(&order.symbol, &pending.order_id).await {
                warn!(symbol = %order.symbol, order_id = %pending.order_id, %error, "Cancel interrupted");
                let cancelled_list = if cancelled.is_empty() {
                    "none".to_string()
                } else {
                    cancelled.join(", ")
                };
                let mut result = ExecutionResult::failed(
                    "cancel_orders",
                    format!("failed to cancel {}: {error}", pending.order_id),
                );
                result.detail = format!(
                    "{}; already cancelled on {}: {}",
                    result.detail, order.symbol, cancelled_list
                );
                for id in cancelled {
                    result = result.with_order(id);
                }
                return Ok(result);
            }
            cancelled.push(pending.order_id.clone());
        }

        let mut result = ExecutionResult::success(
            "cancel_orders",
            format!(
                "cancelled {} {} order(s) on {}",
                matching.len(),
                order.filter.as_str(),
                order.symbol
            ),
        );
        for id in cancelled {
            result = result.with_order(id);
        }
        Ok(result)
    }

    async fn cancel_order(&self, order: &CancelOrder) -> Result<ExecutionResult> {
        self.venue.cancel_order(&order.symbol, &order.order_id).await?;
        Ok(ExecutionResult::success(
            "cancel_order",
            format!("cancelled order {} on {}", order.order_id, order.symbol),
        )
        .with_order(order.order_id.clone()))
    }

    async fn update_memory(&self, update: &UpdateMemory) -> Result<ExecutionResult> {
        let note = self
            .memory
            .replace_memory(&update.content)
            .await
            .map_err(|e| ExecutionError::Memory(format!("{e:#}")))?;
        Ok(ExecutionResult::success(
            "update_memory",
            format!("memory replaced ({} chars)", note.content.chars().count()),
        ))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn open_position_on(&self, symbol: &str) -> Result<Position> {
        self.venue
            .position(symbol)
            .await?
            .filter(|p| p.size > Decimal::ZERO)
            .ok_or_else(|| ExecutionError::no_position(symbol))
    }

    async fn apply_leverage(&self, symbol: &str, leverage: u32, rules: &SymbolRules) -> Result<()> {
        if !rules.leverage_allowed(leverage) {
            return Err(ExecutionError::LeverageOutOfRange {
                symbol: symbol.to_string(),
                requested: leverage,
                min: rules.min_leverage,
                max: rules.max_leverage,
            });
        }
        self.venue.set_leverage(symbol, leverage).await?;
        Ok(())
    }

    async fn flatten(&self, position: &Position, quantity: Decimal) -> Result<OrderAck> {
        let ack = self
            .venue
            .place_market_order(&MarketOrderRequest {
                symbol: position.symbol.clone(),
                side: position.side.exit_side(),
                quantity,
                reduce_only: true,
            })
            .await?;
        Ok(ack)
    }

    async fn place_protection(
        &self,
        symbol: &str,
        side: OrderSide,
        kind: TriggerKind,
        trigger: Decimal,
        quantity: Decimal,
        rules: &SymbolRules,
    ) -> Result<OrderAck> {
        let trigger_price = tick_price(trigger, rules);
        if trigger_price <= Decimal::ZERO {
            return Err(ExecutionError::InvalidCommand(format!(
                "{} price {trigger} truncates to zero at tick {}",
                kind.short_label(),
                rules.tick_size
            )));
        }
        let ack = self
            .venue
            .place_trigger_order(&TriggerOrderRequest {
                symbol: symbol.to_string(),
                side,
                kind,
                trigger_price,
                quantity,
            })
            .await?;
        Ok(ack)
    }
}

fn tick_price(trigger: Decimal, rules: &SymbolRules) -> Decimal {
    truncate_to_step(trigger, rules.tick_size)
}

fn check_quantity(symbol: &str, quantity: Decimal, rules: &SymbolRules) -> Result<()> {
    if quantity <= Decimal::ZERO {
        return Err(ExecutionError::ZeroQuantity {
            symbol: symbol.to_string(),
            step: rules.step_size,
        });
    }
    if quantity < rules.min_quantity {
        return Err(ExecutionError::BelowMinimumQuantity {
            symbol: symbol.to_string(),
            quantity,
            minimum: rules.min_quantity,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ExecutionStatus;
    use autotrader_core::test_util::{InMemoryMemoryStore, MockVenue, VenueCall};
    use autotrader_core::{MarginMode, PendingOrder, PositionSide, VenueError};
    use autotrader_protocol::{decode_reply, CancelFilter};
    use rust_decimal_macros::dec;

    fn venue() -> Arc<MockVenue> {
        Arc::new(
            MockVenue::new()
                .with_market("BTC/USDT", dec!(60000))
                .with_market("ETH/USDT", dec!(3000))
                .with_market("SOL/USDT", dec!(150)),
        )
    }

    fn executor(venue: &Arc<MockVenue>, mode: ExecutionMode) -> CommandExecutor {
        CommandExecutor::new(venue.clone(), Arc::new(InMemoryMemoryStore::new()), mode)
    }

    fn long(symbol: &str, size: Decimal, entry: Decimal) -> Position {
        Position {
            symbol: symbol.to_string(),
            side: PositionSide::Long,
            size,
            entry_price: entry,
            mark_price: entry,
            leverage: 5,
            unrealized_pnl: Decimal::ZERO,
            margin_mode: MarginMode::Cross,
        }
    }

    fn trigger_order(id: &str, symbol: &str, kind: TriggerKind) -> PendingOrder {
        PendingOrder {
            order_id: id.to_string(),
            symbol: symbol.to_string(),
            order_type: match kind {
                TriggerKind::StopLoss => "STOP_MARKET".to_string(),
                TriggerKind::TakeProfit => "TAKE_PROFIT_MARKET".to_string(),
            },
            trigger: Some(kind),
            side: OrderSide::Sell,
            trigger_price: dec!(50000),
            quantity: dec!(0.1),
            reduce_only: true,
        }
    }

    fn open(symbol: &str, notional: Decimal) -> OpenPosition {
        OpenPosition {
            symbol: symbol.to_string(),
            side: PositionSide::Long,
            notional,
            leverage: None,
            stop_loss: None,
            take_profit: None,
        }
    }

    // ==================== Open Position Tests ====================

    #[tokio::test]
    async fn test_open_below_minimum_issues_no_venue_call() {
        let venue = venue();
        let result = executor(&venue, ExecutionMode::Live)
            .apply(&Instruction::OpenPosition(open("BTC/USDT", dec!(5))))
            .await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.error.unwrap().contains("below the minimum of 10"));
        assert!(venue.calls().is_empty());
        assert_eq!(venue.read_count(), 0);
    }

    #[tokio::test]
    async fn test_open_truncates_quantity_to_step() {
        let venue = venue();
        let result = executor(&venue, ExecutionMode::Live)
            .apply(&Instruction::OpenPosition(open("ETH/USDT", dec!(100))))
            .await;

        // 100 / 3000 = 0.0333.. truncated to 0.033
        assert!(result.is_success());
        assert_eq!(result.quantity, Some(dec!(0.033)));
        assert_eq!(result.side, Some(OrderSide::Buy));
        assert!(!result.simulated);
        match &venue.calls()[0] {
            VenueCall::MarketOrder(order) => {
                assert_eq!(order.quantity, dec!(0.033));
                assert!(!order.reduce_only);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_rejects_insufficient_balance() {
        let venue = Arc::new(
            MockVenue::new()
                .with_market("BTC/USDT", dec!(60000))
                .with_balance(dec!(100), dec!(40)),
        );
        let result = executor(&venue, ExecutionMode::Live)
            .apply(&Instruction::OpenPosition(open("BTC/USDT", dec!(50))))
            .await;

        assert!(result.is_failed());
        assert!(result.error.unwrap().contains("insufficient balance"));
        assert!(venue.calls().is_empty());
    }

    #[tokio::test]
    async fn test_open_respects_venue_min_notional() {
        let venue = Arc::new(MockVenue::new().with_rules(SymbolRules {
            symbol: "BTC/USDT".to_string(),
            step_size: dec!(0.001),
            tick_size: dec!(0.1),
            min_quantity: dec!(0.001),
            min_notional: dec!(100),
            min_leverage: 1,
            max_leverage: 125,
        }));
        let result = executor(&venue, ExecutionMode::Live)
            .apply(&Instruction::OpenPosition(open("BTC/USDT", dec!(50))))
            .await;
        assert!(result.error.unwrap().contains("minimum of 100"));
    }

    #[tokio::test]
    async fn test_open_with_leverage_and_protection() {
        let venue = venue();
        let order = OpenPosition {
            leverage: Some(10),
            stop_loss: Some(dec!(57000.129)),
            take_profit: Some(dec!(66000)),
            ..open("BTC/USDT", dec!(600))
        };
        let result = executor(&venue, ExecutionMode::Live)
            .apply(&Instruction::OpenPosition(order))
            .await;

        assert!(result.is_success(), "{result:?}");
        assert_eq!(result.order_ids.len(), 3);
        assert_eq!(venue.leverage_of("BTC/USDT"), Some(10));

        let calls = venue.calls();
        assert!(matches!(calls[0], VenueCall::SetLeverage { leverage: 10, .. }));
        match &calls[2] {
            VenueCall::TriggerOrder(stop) => {
                assert_eq!(stop.kind, TriggerKind::StopLoss);
                assert_eq!(stop.side, OrderSide::Sell);
                assert_eq!(stop.trigger_price, dec!(57000.12));
                assert_eq!(stop.quantity, dec!(0.01));
            }
            other => panic!("unexpected call {other:?}"),
        }
        assert_eq!(venue.resting_orders().len(), 2);
    }

    #[tokio::test]
    async fn test_open_leverage_out_of_bounds_fails_before_order() {
        let venue = venue();
        let order = OpenPosition {
            leverage: Some(200),
            ..open("BTC/USDT", dec!(600))
        };
        let result = executor(&venue, ExecutionMode::Live)
            .apply(&Instruction::OpenPosition(order))
            .await;
        assert!(result.error.unwrap().contains("outside venue bounds"));
        assert!(venue.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_protective_leg_keeps_success() {
        let venue = venue();
        venue.fail(
            "place_trigger_order",
            VenueError::OrderRejected("Order would immediately trigger.".to_string()),
        );
        let order = OpenPosition {
            stop_loss: Some(dec!(61000)),
            ..open("BTC/USDT", dec!(600))
        };
        let result = executor(&venue, ExecutionMode::Live)
            .apply(&Instruction::OpenPosition(order))
            .await;

        assert!(result.is_success());
        assert_eq!(result.order_ids.len(), 1);
        assert!(result.detail.contains("SL failed"));
        assert_eq!(venue.current_positions().len(), 1);
    }

    // ==================== Close Position Tests ====================

    #[tokio::test]
    async fn test_full_close_uses_position_size_and_cancels_orders() {
        let venue = Arc::new(
            MockVenue::new()
                .with_market("SOL/USDT", dec!(150))
                .with_position(long("SOL/USDT", dec!(12.345), dec!(140)))
                .with_order(trigger_order("9", "SOL/USDT", TriggerKind::StopLoss)),
        );
        let result = executor(&venue, ExecutionMode::Live)
            .apply(&Instruction::ClosePosition(ClosePosition {
                symbol: "SOL/USDT".to_string(),
                percentage: 100,
                reason: None,
            }))
            .await;

        assert!(result.is_success());
        assert_eq!(result.quantity, Some(dec!(12.345)));
        assert_eq!(result.side, Some(OrderSide::Sell));
        assert!(venue.current_positions().is_empty());
        assert!(venue.resting_orders().is_empty());
    }

    #[tokio::test]
    async fn test_partial_close_truncates() {
        let venue = Arc::new(
            MockVenue::new()
                .with_market("SOL/USDT", dec!(150))
                .with_position(long("SOL/USDT", dec!(1.001), dec!(140))),
        );
        let result = executor(&venue, ExecutionMode::Live)
            .apply(&Instruction::ClosePosition(ClosePosition {
                symbol: "SOL/USDT".to_string(),
                percentage: 50,
                reason: Some("take some profit".to_string()),
            }))
            .await;

        // 1.001 * 0.5 = 0.5005 truncated to 0.5
        assert_eq!(result.quantity, Some(dec!(0.5)));
        assert_eq!(venue.current_positions()[0].size, dec!(0.501));
    }

    #[tokio::test]
    async fn test_close_without_position_fails() {
        let venue = venue();
        let result = executor(&venue, ExecutionMode::Live)
            .apply(&Instruction::ClosePosition(ClosePosition {
                symbol: "BTC/USDT".to_string(),
                percentage: 100,
                reason: None,
            }))
            .await;
        assert_eq!(result.error.as_deref(), Some("no open position on BTC/USDT"));
        assert!(venue.calls().is_empty());
    }

    #[tokio::test]
    async fn test_open_then_partial_close_twice_sees_fresh_state() {
        let venue = venue();
        let executor = executor(&venue, ExecutionMode::Live);
        let reply = r#"
<tooluse>{"kind": "trade_in", "info": "enter", "args": {"target": "ETH/USDT", "side": "LONG", "count_usdt": 300}}</tooluse>
<tooluse>{"kind": "close_position", "info": "trim", "args": {"target": "ETH/USDT", "percentage": 50}}</tooluse>
<tooluse>{"kind": "close_position", "info": "trim again", "args": {"target": "ETH/USDT", "percentage": 50}}</tooluse>
"#;
        let decoded = decode_reply(reply);
        let mut quantities = Vec::new();
        for command in &decoded.commands {
            let result = executor.execute(command).await.unwrap();
            assert!(result.is_success(), "{result:?}");
            quantities.push(result.quantity.unwrap());
        }
        assert_eq!(quantities, vec![dec!(0.1), dec!(0.05), dec!(0.025)]);
    }

    // ==================== Leverage / Margin Tests ====================

    #[tokio::test]
    async fn test_set_leverage_bounds() {
        let venue = venue();
        let executor = executor(&venue, ExecutionMode::Live);
        let ok = executor
            .apply(&Instruction::SetLeverage(SetLeverage {
                symbol: "ETH/USDT".to_string(),
                leverage: 20,
            }))
            .await;
        let too_high = executor
            .apply(&Instruction::SetLeverage(SetLeverage {
                symbol: "ETH/USDT".to_string(),
                leverage: 150,
            }))
            .await;

        assert!(ok.is_success());
        assert!(too_high.is_failed());
        assert_eq!(venue.leverage_of("ETH/USDT"), Some(20));
    }

    #[tokio::test]
    async fn test_set_margin_mode() {
        let venue = venue();
        let result = executor(&venue, ExecutionMode::Live)
            .apply(&Instruction::SetMarginMode(SetMarginMode {
                symbol: "BTC/USDT".to_string(),
                mode: MarginMode::Isolated,
            }))
            .await;
        assert!(result.is_success());
        assert!(matches!(
            venue.calls()[0],
            VenueCall::SetMarginMode { mode: MarginMode::Isolated, .. }
        ));
    }

    // ==================== Protective Order Tests ====================

    #[tokio::test]
    async fn test_modify_replaces_only_requested_kind() {
        let venue = Arc::new(
            MockVenue::new()
                .with_market("BTC/USDT", dec!(60000))
                .with_position(long("BTC/USDT", dec!(0.1), dec!(58000)))
                .with_order(trigger_order("1", "BTC/USDT", TriggerKind::StopLoss))
                .with_order(trigger_order("2", "BTC/USDT", TriggerKind::TakeProfit)),
        );
        let result = executor(&venue, ExecutionMode::Live)
            .apply(&Instruction::ModifyProtection(ModifyProtection {
                symbol: "BTC/USDT".to_string(),
                stop_loss: Some(dec!(59000)),
                take_profit: None,
            }))
            .await;

        assert!(result.is_success(), "{result:?}");
        let resting = venue.resting_orders();
        assert_eq!(resting.len(), 2);
        assert!(resting.iter().any(|o| o.order_id == "2"));
        let stop = resting.iter().find(|o| o.trigger == Some(TriggerKind::StopLoss)).unwrap();
        assert_eq!(stop.trigger_price, dec!(59000));
        assert_eq!(stop.quantity, dec!(0.1));
    }

    #[tokio::test]
    async fn test_modify_rejected_replacement_fails() {
        let venue = Arc::new(
            MockVenue::new()
                .with_market("BTC/USDT", dec!(60000))
                .with_position(long("BTC/USDT", dec!(0.1), dec!(58000))),
        );
        venue.fail(
            "place_trigger_order",
            VenueError::OrderRejected("Order would immediately trigger.".to_string()),
        );
        let result = executor(&venue, ExecutionMode::Live)
            .apply(&Instruction::ModifyProtection(ModifyProtection {
                symbol: "BTC/USDT".to_string(),
                stop_loss: Some(dec!(61000)),
                take_profit: None,
            }))
            .await;
        assert!(result.is_failed());
        assert!(result.error.unwrap().contains("immediately trigger"));
    }

    #[tokio::test]
    async fn test_modify_rejected_stop_keeps_old_stop_and_places_take_profit() {
        let venue = Arc::new(
            MockVenue::new()
                .with_market("BTC/USDT", dec!(60000))
                .with_position(long("BTC/USDT", dec!(0.1), dec!(58000)))
                .with_order(trigger_order("sl-1", "BTC/USDT", TriggerKind::StopLoss))
                .with_order(trigger_order("tp-1", "BTC/USDT", TriggerKind::TakeProfit)),
        );
        venue.reject_trigger(
            TriggerKind::StopLoss,
            VenueError::OrderRejected("Order would immediately trigger.".to_string()),
        );
        let result = executor(&venue, ExecutionMode::Live)
            .apply(&Instruction::ModifyProtection(ModifyProtection {
                symbol: "BTC/USDT".to_string(),
                stop_loss: Some(dec!(61000)),
                take_profit: Some(dec!(70000)),
            }))
            .await;

        assert!(result.is_failed());
        let error = result.error.clone().unwrap();
        assert!(error.starts_with("SL rejected"), "{error}");
        assert!(!error.contains("TP"));
        assert_eq!(result.order_ids.len(), 1);

        let resting = venue.resting_orders();
        assert_eq!(resting.len(), 2);
        assert!(resting.iter().any(|o| o.order_id == "sl-1"));
        assert!(!resting.iter().any(|o| o.order_id == "tp-1"));
        let take_profit = resting
            .iter()
            .find(|o| o.trigger == Some(TriggerKind::TakeProfit))
            .unwrap();
        assert_eq!(take_profit.order_id, result.order_ids[0]);
        assert_eq!(take_profit.trigger_price, dec!(70000));
    }

    #[tokio::test]
    async fn test_cancel_orders_failure_reports_already_cancelled() {
        let venue = Arc::new(
            MockVenue::new()
                .with_market("BTC/USDT", dec!(60000))
                .with_order(trigger_order("1", "BTC/USDT", TriggerKind::StopLoss))
                .with_order(trigger_order("2", "BTC/USDT", TriggerKind::TakeProfit)),
        );
        venue.reject_cancel("2", VenueError::OrderRejected("busy".to_string()));
        let result = executor(&venue, ExecutionMode::Live)
            .apply(&Instruction::CancelOrders(CancelOrders {
                symbol: "BTC/USDT".to_string(),
                filter: CancelFilter::All,
            }))
            .await;

        assert!(result.is_failed());
        assert_eq!(result.order_ids, vec!["1".to_string()]);
        assert!(result.error.unwrap().contains("failed to cancel 2"));
        assert!(result.detail.contains("already cancelled on BTC/USDT: 1"));
        assert_eq!(venue.resting_orders().len(), 1);
    }

    #[tokio::test]
    async fn test_paper_cancel_unknown_order_id_fails() {
        let venue = venue();
        let result = executor(&venue, ExecutionMode::Paper)
            .apply(&Instruction::CancelOrder(CancelOrder {
                symbol: "BTC/USDT".to_string(),
                order_id: "404".to_string(),
            }))
            .await;
        assert!(result.is_failed());
        assert!(result.simulated);
        assert_eq!(result.error.as_deref(), Some("order not found: 404"));
        assert!(venue.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_orders_none_outstanding_is_noop_success() {
        let venue = venue();
        let result = executor(&venue, ExecutionMode::Live)
            .apply(&Instruction::CancelOrders(CancelOrders {
                symbol: "BTC/USDT".to_string(),
                filter: CancelFilter::All,
            }))
            .await;
        assert!(result.is_success());
        assert!(venue.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_orders_by_filter() {
        let venue = Arc::new(
            MockVenue::new()
                .with_market("BTC/USDT", dec!(60000))
                .with_order(trigger_order("1", "BTC/USDT", TriggerKind::StopLoss))
                .with_order(trigger_order("2", "BTC/USDT", TriggerKind::TakeProfit)),
        );
        let result = executor(&venue, ExecutionMode::Live)
            .apply(&Instruction::CancelOrders(CancelOrders {
                symbol: "BTC/USDT".to_string(),
                filter: CancelFilter::TakeProfit,
            }))
            .await;
        assert_eq!(result.order_ids, vec!["2".to_string()]);
        assert_eq!(venue.resting_orders()[0].order_id, "1");
    }

    #[tokio::test]
    async fn test_cancel_unknown_order_id_fails() {
        let venue = venue();
        let result = executor(&venue, ExecutionMode::Live)
            .apply(&Instruction::CancelOrder(CancelOrder {
                symbol: "BTC/USDT".to_string(),
                order_id: "404".to_string(),
            }))
            .await;
        assert!(result.is_failed());
        assert_eq!(result.error.as_deref(), Some("order not found: 404"));
    }

    // ==================== Memory Tests ====================

    #[tokio::test]
    async fn test_update_memory_replaces_note_in_paper_mode() {
        let venue = venue();
        let memory = Arc::new(InMemoryMemoryStore::new());
        let executor = CommandExecutor::new(venue.clone(), memory.clone(), ExecutionMode::Paper);

        for content in ["first thesis", "second thesis"] {
            let result = executor
                .apply(&Instruction::UpdateMemory(UpdateMemory {
                    content: content.to_string(),
                }))
                .await;
            assert!(result.is_success());
            assert!(!result.simulated);
        }
        assert_eq!(memory.read_memory().await.unwrap().content, "second thesis");
    }

    // ==================== Dispatch Tests ====================

    #[tokio::test]
    async fn test_execute_maps_payload_states() {
        let venue = venue();
        let executor = executor(&venue, ExecutionMode::Live);
        let decoded = decode_reply(
            r#"<tooluse>{"kind": "hedge_everything", "info": "?", "args": {}}</tooluse>
<tooluse>{"kind": "close_position", "info": "bad", "args": {"target": "BTC/USDT", "percentage": 150}}</tooluse>
<tooluse>{"kind": "trade_in", "info": </tooluse>"#,
        );
        assert_eq!(decoded.commands.len(), 3);

        let skipped = executor.execute(&decoded.commands[0]).await.unwrap();
        assert_eq!(skipped.status, ExecutionStatus::Skipped);
        assert_eq!(skipped.kind, "hedge_everything");

        let invalid = executor.execute(&decoded.commands[1]).await.unwrap();
        assert_eq!(invalid.status, ExecutionStatus::Failed);
        assert!(invalid.error.unwrap().starts_with("invalid arguments"));

        assert!(executor.execute(&decoded.commands[2]).await.is_none());
        assert!(venue.calls().is_empty());
    }

    // ==================== Paper Mode Tests ====================

    #[tokio::test]
    async fn test_paper_mode_same_shape_no_writes() {
        let venue = venue();
        let result = executor(&venue, ExecutionMode::Paper)
            .apply(&Instruction::OpenPosition(OpenPosition {
                stop_loss: Some(dec!(2800)),
                ..open("ETH/USDT", dec!(300))
            }))
            .await;

        assert!(result.is_success());
        assert!(result.simulated);
        assert_eq!(result.quantity, Some(dec!(0.1)));
        assert_eq!(result.order_ids.len(), 2);
        assert!(result.order_ids.iter().all(|id| id.starts_with("paper-")));
        assert!(venue.calls().is_empty());
    }

    // ==================== Close All Tests ====================

    #[tokio::test]
    async fn test_close_all_positions() {
        let venue = Arc::new(
            MockVenue::new()
                .with_market("BTC/USDT", dec!(60000))
                .with_market("SOL/USDT", dec!(150))
                .with_position(long("BTC/USDT", dec!(0.1), dec!(58000)))
                .with_position(long("SOL/USDT", dec!(3), dec!(140)))
                .with_order(trigger_order("1", "BTC/USDT", TriggerKind::StopLoss)),
        );
        let results = executor(&venue, ExecutionMode::Live).close_all_positions().await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(ExecutionResult::is_success));
        assert!(venue.current_positions().is_empty());
        assert!(venue.resting_orders().is_empty());
    }
}

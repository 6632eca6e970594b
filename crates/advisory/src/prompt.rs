use crate::provider::AdvisoryRequest;
use rust_decimal::Decimal;

/// Heading placed above the context document in the user message.
pub const CONTEXT_HEADING: &str = "# Current market data and account state";

/// Builds the conversation sent to the advisory each cycle.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    interval_minutes: u64,
    min_trade_notional: Decimal,
    temperature: f32,
    max_tokens: u32,
}

impl PromptBuilder {
    #[must_use]
    pub fn new(interval_minutes: u64, min_trade_notional: Decimal) -> Self {
        Self {
            interval_minutes,
            min_trade_notional,
            temperature: 0.7,
            max_tokens: 2000,
        }
    }

    #[must_use]
    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// Role, execution policy and the command block format.
    #[must_use]
    pub fn system_prompt(&self) -> String {
        format!(
            r#"You manage a USDT-margined perpetual futures account. You are consulted every {interval} minutes with fresh market, account and memory data, and you decide what, if anything, to do.

Execution policy:
- Every entry and exit is a market order. There are no limit orders.
- Stop-loss and take-profit orders are reduce-only trigger orders.
- Opening orders below {min} USDT notional are rejected.
- Quantities are truncated to the venue's step size.
- Commands run strictly in the order you write them, so set leverage before opening.

Write your analysis in plain prose. To act, embed one command block per action:

<tooluse>
{{"kind": "<command>", "info": "<short summary>", "args": {{...}}}}
</tooluse>

Commands and their args:
- trade_in: target (symbol, e.g. "BTC/USDT"), side ("LONG" or "SHORT"), count_usdt (notional in USDT), optional leverage, stop_loss_price, take_profit_price
- close_position: target, percentage (1-100), optional reason
- set_leverage: target, leverage
- set_margin_mode: target, mode ("cross" or "isolated")
- modify_position: target, stop_loss_price and/or take_profit_price (replaces existing protection)
- cancel_orders: target, optional order_type ("stop_loss", "take_profit" or "all")
- cancel_order: target, order_id
- update_memory: content (replaces the memory whiteboard in full)

The memory whiteboard is the only thing you remember between cycles. Emit exactly one update_memory command every cycle with everything your next self needs: open theses, levels you are watching, and why you hold what you hold. If no trade is warranted, say so and still update memory."#,
            interval = self.interval_minutes,
            min = self.min_trade_notional,
        )
    }

    #[must_use]
    pub fn user_prompt(&self, context: &str) -> String {
        format!("{CONTEXT_HEADING}\n\n{context}")
    }

    /// Request for one cycle's context document.
    #[must_use]
    pub fn request(&self, context: &str) -> AdvisoryRequest {
        AdvisoryRequest::new(self.system_prompt(), self.user_prompt(context))
            .with_sampling(self.temperature, self.max_tokens)
    }

    /// Follow-up asking the advisory to address failed commands.
    ///
    /// Each entry of `failures` is one already formatted line.
    #[must_use]
    pub fn correction_prompt(failures: &[String]) -> String {
        let mut message = String::from(
            "Some of your commands failed. Each line below names the command, its arguments and the reason:\n\n",
        );
        for line in failures {
            message.push_str("- ");
            message.push_str(line);
            message.push('\n');
        }
        message.push_str(
            "\nCommands that succeeded have already been applied; do not repeat them. \
             Reply with corrected command blocks only for what still needs doing, or none.",
        );
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Role;

    #[test]
    fn test_system_prompt_mentions_interval_and_minimum() {
        let prompt = PromptBuilder::new(5, Decimal::TEN).system_prompt();
        assert!(prompt.contains("every 5 minutes"));
        assert!(prompt.contains("below 10 USDT"));
        assert!(prompt.contains("<tooluse>"));
        assert!(prompt.contains("update_memory"));
    }

    #[test]
    fn test_request_layout() {
        let request = PromptBuilder::new(3, Decimal::TEN)
            .with_sampling(0.2, 800)
            .request("[ACCOUNT]\nBalance: 100 USDT");
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[1].role, Role::User);
        assert!(request.messages[1].content.starts_with(CONTEXT_HEADING));
        assert!(request.messages[1].content.ends_with("Balance: 100 USDT"));
        assert_eq!(request.max_tokens, 800);
    }

    #[test]
    fn test_correction_prompt_lists_failures() {
        let prompt = PromptBuilder::correction_prompt(&[
            "trade_in {count_usdt=5, side=LONG, target=BTC/USDT}: below minimum notional".to_string(),
        ]);
        assert!(prompt.contains("- trade_in {count_usdt=5"));
        assert!(prompt.contains("do not repeat them"));
    }
}

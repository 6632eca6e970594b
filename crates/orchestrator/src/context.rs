//! Context assembly.
//!
//! Pulls market, account and memory state into one [`MarketContext`] and
//! renders it as the document the advisory reads. Any unreachable source
//! aborts assembly: the advisory never sees a partial picture.

use anyhow::{Context, Result};
use autotrader_core::{
    Balance, EquitySnapshot, FundingRate, IndicatorSet, IndicatorSource, MarketBreadth,
    MarketSnapshot, MemoryNote, MemoryStore, OrderBook, PendingOrder, Position, Ticker,
    TradingConfig, VenueClient,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

const SECTION_RULE_WIDTH: usize = 10;
const INSTRUCTIONS_RULE_WIDTH: usize = 60;

#[derive(Debug, Clone)]
pub struct AssetContext {
    pub ticker: Ticker,
    pub order_book: OrderBook,
    pub funding: FundingRate,
    pub indicators: Vec<IndicatorSet>,
}

/// Everything one cycle knows before asking the advisory.
#[derive(Debug, Clone)]
pub struct MarketContext {
    pub taken_at: DateTime<Utc>,
    pub breadth: MarketBreadth,
    pub assets: Vec<AssetContext>,
    pub balance: Balance,
    pub positions: Vec<Position>,
    pub pending_orders: Vec<PendingOrder>,
    pub memory: MemoryNote,
    pub custom_instructions: String,
}

impl MarketContext {
    #[must_use]
    pub fn snapshot(&self) -> MarketSnapshot {
        MarketSnapshot {
            taken_at: self.taken_at,
            breadth: self.breadth,
            ad_ratio: self.breadth.ad_ratio(),
            prices: self
                .assets
                .iter()
                .map(|a| (a.ticker.symbol.clone(), a.ticker.last_price))
                .collect(),
            changes_24h: self
                .assets
                .iter()
                .map(|a| (a.ticker.symbol.clone(), a.ticker.change_pct_24h))
                .collect(),
        }
    }

    #[must_use]
    pub fn equity(&self) -> EquitySnapshot {
        EquitySnapshot::from_account(&self.balance, &self.positions, self.taken_at)
    }

    /// Renders the document in fixed section order: market, assets, account,
    /// memory (when non-empty), custom instructions (when non-empty).
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();

        push_heading(&mut out, "[MARKET CONTEXT]", SECTION_RULE_WIDTH);
        let _ = writeln!(
            out,
            "Market breadth: {} advancing / {} declining across the top {} USDT pairs by 24h volume",
            self.breadth.advancing, self.breadth.declining, self.breadth.sample_size
        );
        let _ = writeln!(
            out,
            "A/D ratio: {} - {}",
            self.breadth.display_ratio(),
            self.breadth.assessment()
        );

        out.push('\n');
        push_heading(&mut out, "[ASSETS ANALYSIS]", SECTION_RULE_WIDTH);
        for asset in &self.assets {
            out.push('\n');
            render_asset(&mut out, asset);
        }

        out.push('\n');
        push_heading(&mut out, "[ACCOUNT]", SECTION_RULE_WIDTH);
        self.render_account(&mut out);

        if !self.memory.is_empty() {
            out.push('\n');
            push_heading(&mut out, "[MEMORY WHITEBOARD]", SECTION_RULE_WIDTH);
            out.push_str(self.memory.content.trim());
            out.push('\n');
        }

        let instructions = self.custom_instructions.trim();
        if !instructions.is_empty() {
            out.push('\n');
            push_heading(&mut out, "[USER CUSTOM INSTRUCTIONS]", INSTRUCTIONS_RULE_WIDTH);
            out.push_str(instructions);
            out.push('\n');
        }

        out.trim_end().to_string()
    }

    fn render_account(&self, out: &mut String) {
        let _ = writeln!(
            out,
            "Balance: {:.2} USDT (Free: {:.2})",
            self.balance.total, self.balance.free
        );

        if self.positions.is_empty() {
            out.push_str("No open positions.\n");
        } else {
            out.push_str("Open Positions:\n");
            for p in &self.positions {
                let _ = writeln!(
                    out,
                    "  - {}: {} {} @ {:.2} | UPNL: {} ({}%) | {}x",
                    p.symbol,
                    p.side,
                    p.size,
                    p.entry_price,
                    signed(p.unrealized_pnl),
                    signed(p.pnl_pct()),
                    p.leverage
                );
            }
        }

        let protective: Vec<_> = self
            .pending_orders
            .iter()
            .filter_map(|o| o.trigger.map(|kind| (kind, o)))
            .collect();
        if !protective.is_empty() {
            out.push_str("\nPending Orders (SL/TP):\n");
            for (kind, order) in protective {
                let _ = writeln!(
                    out,
                    "  - {}: {} {} @ {} (ID: {})",
                    order.symbol,
                    kind.short_label(),
                    order.side,
                    order.trigger_price,
                    order.order_id
                );
            }
        }
    }
}

fn push_heading(out: &mut String, title: &str, width: usize) {
    let rule = "=".repeat(width);
    let _ = writeln!(out, "{rule}\n{title}\n{rule}");
}

fn render_asset(out: &mut String, asset: &AssetContext) {
    let t = &asset.ticker;
    let _ = writeln!(out, "{}", t.symbol);
    let _ = writeln!(
        out,
        "  Price: {} | 24h: {}% | High: {} | Low: {} | Volume: {:.0} USDT",
        t.last_price,
        signed(t.change_pct_24h),
        t.high_24h,
        t.low_24h,
        t.quote_volume_24h
    );

    let spread = asset
        .order_book
        .spread()
        .map_or_else(|| "n/a".to_string(), |s| s.normalize().to_string());
    let _ = writeln!(
        out,
        "  OrderBook: Imbalance {} | Spread {}",
        signed(asset.order_book.imbalance()),
        spread
    );
    let _ = writeln!(
        out,
        "  Funding: {} ({}% annualized)",
        asset.funding.rate.normalize(),
        signed(asset.funding.annualized_pct())
    );

    for set in &asset.indicators {
        render_indicators(out, set);
    }
}

fn render_indicators(out: &mut String, set: &IndicatorSet) {
    let _ = write!(out, "  [{}]", set.timeframe);
    if let Some(trend) = &set.trend {
        let _ = write!(out, " Trend: {trend}");
    }
    if let Some(volatility) = &set.volatility {
        let _ = write!(out, " | Volatility: {volatility}");
    }
    out.push('\n');

    if !set.support.is_empty() || !set.resistance.is_empty() {
        let _ = writeln!(
            out,
            "    Support: {} | Resistance: {}",
            join_levels(&set.support),
            join_levels(&set.resistance)
        );
    }
    if !set.divergences.is_empty() {
        let _ = writeln!(out, "    Divergences: {}", set.divergences.join(", "));
    }
    if !set.values.is_empty() {
        let values: Vec<String> = set
            .values
            .iter()
            .map(|(name, value)| format!("{name}={}", value.normalize()))
            .collect();
        let _ = writeln!(out, "    {}", values.join(", "));
    }
}

fn join_levels(levels: &[Decimal]) -> String {
    if levels.is_empty() {
        return "-".to_string();
    }
    levels
        .iter()
        .map(|l| l.normalize().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Two decimals with an explicit sign.
fn signed(value: Decimal) -> String {
    let rounded = value.round_dp(2);
    if rounded.is_sign_negative() && !rounded.is_zero() {
        format!("{rounded:.2}")
    } else {
        format!("+{:.2}", rounded.abs())
    }
}

/// Gathers a [`MarketContext`] from the venue, indicator source and memory store.
#[derive(Clone)]
pub struct ContextAssembler {
    venue: Arc<dyn VenueClient>,
    indicators: Arc<dyn IndicatorSource>,
    memory: Arc<dyn MemoryStore>,
}

impl ContextAssembler {
    #[must_use]
    pub fn new(
        venue: Arc<dyn VenueClient>,
        indicators: Arc<dyn IndicatorSource>,
        memory: Arc<dyn MemoryStore>,
    ) -> Self {
        Self {
            venue,
            indicators,
            memory,
        }
    }

    /// # Errors
    ///
    /// Returns the first source failure; no partial context is produced.
    pub async fn assemble(
        &self,
        trading: &TradingConfig,
        custom_instructions: &str,
    ) -> Result<MarketContext> {
        let taken_at = Utc::now();

        let breadth = self
            .venue
            .market_breadth(trading.breadth_sample)
            .await
            .context("market breadth unavailable")?;

        let mut assets = Vec::with_capacity(trading.symbols.len());
        for symbol in &trading.symbols {
            assets.push(self.asset(symbol, trading.order_book_depth).await?);
        }

        let (balance, positions, pending_orders) = tokio::try_join!(
            async { self.venue.balance().await.context("balance unavailable") },
            async { self.venue.positions().await.context("positions unavailable") },
            async { self.venue.open_orders(None).await.context("open orders unavailable") },
        )?;

        let memory = self
            .memory
            .read_memory()
            .await
            .context("memory note unavailable")?;

        debug!(
            symbols = assets.len(),
            positions = positions.len(),
            pending_orders = pending_orders.len(),
            "Context assembled"
        );

        Ok(MarketContext {
            taken_at,
            breadth,
            assets,
            balance,
            positions,
            pending_orders,
            memory,
            custom_instructions: custom_instructions.to_string(),
        })
    }

    async fn asset(&self, symbol: &str, depth: usize) -> Result<AssetContext> {
        let (ticker, order_book, funding) = tokio::try_join!(
            self.venue.ticker(symbol),
            self.venue.order_book(symbol, depth),
            self.venue.funding_rate(symbol),
        )
        .with_context(|| format!("market data for {symbol} unavailable"))?;

        let indicators = self
            .indicators
            .indicators(symbol)
            .await
            .with_context(|| format!("indicators for {symbol} unavailable"))?;

        Ok(AssetContext {
            ticker,
            order_book,
            funding,
            indicators,
        })
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Ratio reported when every sampled pair advanced.
pub const AD_RATIO_CEILING: Decimal = Decimal::from_parts(9999, 0, 0, false, 0);

/// Funding settles three times a day on the supported venues.
const FUNDING_PERIODS_PER_DAY: Decimal = Decimal::from_parts(3, 0, 0, false, 0);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: Decimal,
    pub change_pct_24h: Decimal,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
    pub quote_volume_24h: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderBook {
    pub symbol: String,
    /// Best bid first.
    pub bids: Vec<BookLevel>,
    /// Best ask first.
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    /// Volume imbalance in `[-1, 1]`: positive when bids outweigh asks.
    #[must_use]
    pub fn imbalance(&self) -> Decimal {
        let bid_volume: Decimal = self.bids.iter().map(|l| l.quantity).sum();
        let ask_volume: Decimal = self.asks.iter().map(|l| l.quantity).sum();
        let total = bid_volume + ask_volume;
        if total.is_zero() {
            return Decimal::ZERO;
        }
        (bid_volume - ask_volume) / total
    }

    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        match (self.bids.first(), self.asks.first()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FundingRate {
    pub symbol: String,
    /// Rate for a single funding period, as a fraction.
    pub rate: Decimal,
    pub mark_price: Decimal,
    pub next_funding_time: Option<DateTime<Utc>>,
}

impl FundingRate {
    /// Annualised funding in percent (`rate * 3 * 365 * 100`).
    #[must_use]
    pub fn annualized_pct(&self) -> Decimal {
        self.rate * FUNDING_PERIODS_PER_DAY * Decimal::from(365) * Decimal::ONE_HUNDRED
    }
}

/// Advance/decline breadth over the most active quote-currency pairs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarketBreadth {
    pub advancing: u32,
    pub declining: u32,
    pub sample_size: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BreadthAssessment {
    Strong,
    Healthy,
    Weak,
    VeryWeak,
}

impl fmt::Display for BreadthAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Strong => "Strong (broad rally)",
            Self::Healthy => "Healthy",
            Self::Weak => "Weak (large caps leading)",
            Self::VeryWeak => "Very weak (broad selloff)",
        };
        f.write_str(text)
    }
}

impl MarketBreadth {
    /// Advancers over decliners, capped at [`AD_RATIO_CEILING`] when nothing declined.
    #[must_use]
    pub fn ad_ratio(&self) -> Decimal {
        if self.declining == 0 {
            return if self.advancing > 0 {
                AD_RATIO_CEILING
            } else {
                Decimal::ONE
            };
        }
        (Decimal::from(self.advancing) / Decimal::from(self.declining)).min(AD_RATIO_CEILING)
    }

    #[must_use]
    pub fn assessment(&self) -> BreadthAssessment {
        let ratio = self.ad_ratio();
        if ratio > Decimal::new(15, 1) {
            BreadthAssessment::Strong
        } else if ratio > Decimal::ONE {
            BreadthAssessment::Healthy
        } else if ratio > Decimal::new(5, 1) {
            BreadthAssessment::Weak
        } else {
            BreadthAssessment::VeryWeak
        }
    }

    /// Ratio rendered for the context document.
    #[must_use]
    pub fn display_ratio(&self) -> String {
        let ratio = self.ad_ratio();
        if ratio >= AD_RATIO_CEILING {
            "9999+".to_string()
        } else {
            format!("{:.2}", ratio)
        }
    }
}

/// Per-symbol trading rules advertised by the venue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SymbolRules {
    pub symbol: String,
    /// Quantity increment.
    pub step_size: Decimal,
    /// Price increment.
    pub tick_size: Decimal,
    pub min_quantity: Decimal,
    pub min_notional: Decimal,
    pub min_leverage: u32,
    pub max_leverage: u32,
}

impl SymbolRules {
    #[must_use]
    pub fn leverage_allowed(&self, leverage: u32) -> bool {
        (self.min_leverage..=self.max_leverage).contains(&leverage)
    }
}

/// Precomputed indicators for one symbol on one timeframe.
///
/// Produced by an external indicator service; the engine only renders it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IndicatorSet {
    pub timeframe: String,
    #[serde(default)]
    pub trend: Option<String>,
    #[serde(default)]
    pub volatility: Option<String>,
    #[serde(default)]
    pub support: Vec<Decimal>,
    #[serde(default)]
    pub resistance: Vec<Decimal>,
    #[serde(default)]
    pub divergences: Vec<String>,
    #[serde(default)]
    pub values: BTreeMap<String, Decimal>,
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub venue: VenueConfig,
    pub advisory: AdvisoryConfig,
    pub trading: TradingConfig,
    pub indicators: IndicatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/autotrader.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Futures venue connection.
///
/// Credentials may be left out of the file and supplied through
/// `VENUE_API_KEY` / `VENUE_API_SECRET` instead.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VenueConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    #[serde(skip_serializing)]
    pub api_secret: String,
    pub recv_window_ms: u64,
    pub timeout_secs: u64,
    pub requests_per_second: u32,
}

impl VenueConfig {
    /// Fills empty credentials from the environment.
    #[must_use]
    pub fn with_env_credentials(mut self) -> Self {
        if self.api_key.is_empty() {
            if let Ok(key) = std::env::var("VENUE_API_KEY") {
                self.api_key = key;
            }
        }
        if self.api_secret.is_empty() {
            if let Ok(secret) = std::env::var("VENUE_API_SECRET") {
                self.api_secret = secret;
            }
        }
        self
    }

    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            base_url: "https://fapi.binance.com".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            recv_window_ms: 5000,
            timeout_secs: 10,
            requests_per_second: 10,
        }
    }
}

impl fmt::Debug for VenueConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VenueConfig")
            .field("base_url", &self.base_url)
            .field("recv_window_ms", &self.recv_window_ms)
            .field("timeout_secs", &self.timeout_secs)
            .field("requests_per_second", &self.requests_per_second)
            .finish_non_exhaustive()
    }
}

/// One OpenAI-compatible chat endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    pub model: String,
}

impl ProviderConfig {
    /// `deepseek-chat` reads its key from `ADVISORY_DEEPSEEK_CHAT_API_KEY`.
    #[must_use]
    pub fn key_variable(&self) -> String {
        let name: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("ADVISORY_{name}_API_KEY")
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisoryConfig {
    /// Tried in order; the first usable reply wins.
    pub providers: Vec<ProviderConfig>,
    pub attempt_timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 2000;

impl AdvisoryConfig {
    /// Replaces out-of-range sampling parameters with their defaults.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        if !(0.0..=2.0).contains(&self.temperature) {
            tracing::warn!(
                temperature = self.temperature,
                "temperature outside 0.0..=2.0, using {}",
                DEFAULT_TEMPERATURE
            );
            self.temperature = DEFAULT_TEMPERATURE;
        }
        if self.max_tokens == 0 {
            tracing::warn!("max_tokens must be positive, using {}", DEFAULT_MAX_TOKENS);
            self.max_tokens = DEFAULT_MAX_TOKENS;
        }
        self
    }

    /// Fills empty provider keys from `ADVISORY_<NAME>_API_KEY`.
    #[must_use]
    pub fn with_env_keys(mut self) -> Self {
        for provider in &mut self.providers {
            if provider.api_key.is_empty() {
                if let Ok(key) = std::env::var(provider.key_variable()) {
                    provider.api_key = key;
                }
            }
        }
        self
    }
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            attempt_timeout_secs: 60,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Whether commands reach the venue or are simulated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Orders are sent to the venue.
    Live,
    /// Reads hit the venue, writes are simulated locally.
    #[default]
    Paper,
}

impl ExecutionMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Paper => "paper",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "paper" => Ok(Self::Paper),
            other => Err(format!("unknown execution mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TradingConfig {
    pub symbols: Vec<String>,
    pub interval_minutes: u64,
    /// Smallest notional, in quote currency, an opening order may carry.
    pub min_trade_notional: Decimal,
    pub execution_mode: ExecutionMode,
    pub order_book_depth: usize,
    pub breadth_sample: usize,
    /// Extra advisory rounds fed back with failed results. Zero disables.
    pub max_correction_rounds: u32,
    pub autostart: bool,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbols: ["BTC/USDT", "ETH/USDT", "BNB/USDT", "SOL/USDT", "DOGE/USDT"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            interval_minutes: 3,
            min_trade_notional: Decimal::TEN,
            execution_mode: ExecutionMode::Paper,
            order_book_depth: 10,
            breadth_sample: 50,
            max_correction_rounds: 0,
            autostart: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// Base URL of the indicator service. Indicators are omitted when unset.
    pub url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_paper_mode() {
        let config = AppConfig::default();
        assert_eq!(config.trading.execution_mode, ExecutionMode::Paper);
        assert_eq!(config.trading.interval_minutes, 3);
        assert_eq!(config.trading.min_trade_notional, Decimal::TEN);
        assert_eq!(config.trading.symbols.len(), 5);
    }

    #[test]
    fn test_sanitize_resets_out_of_range_values() {
        let config = AdvisoryConfig {
            temperature: 3.5,
            max_tokens: 0,
            ..AdvisoryConfig::default()
        }
        .sanitized();
        assert!((config.temperature - DEFAULT_TEMPERATURE).abs() < f32::EPSILON);
        assert_eq!(config.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_sanitize_keeps_valid_values() {
        let config = AdvisoryConfig {
            temperature: 0.2,
            max_tokens: 512,
            ..AdvisoryConfig::default()
        }
        .sanitized();
        assert!((config.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.max_tokens, 512);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let venue = VenueConfig {
            api_key: "key-123".to_string(),
            api_secret: "secret-456".to_string(),
            ..VenueConfig::default()
        };
        let debug = format!("{venue:?}");
        assert!(!debug.contains("key-123"));
        assert!(!debug.contains("secret-456"));

        let provider = ProviderConfig {
            name: "primary".to_string(),
            base_url: "https://api.example.com/v1".to_string(),
            api_key: "sk-live".to_string(),
            model: "chat-large".to_string(),
        };
        assert!(!format!("{provider:?}").contains("sk-live"));
    }

    #[test]
    fn test_provider_key_variable() {
        let provider = ProviderConfig {
            name: "deepseek-chat".to_string(),
            base_url: String::new(),
            api_key: String::new(),
            model: String::new(),
        };
        assert_eq!(provider.key_variable(), "ADVISORY_DEEPSEEK_CHAT_API_KEY");
    }

    #[test]
    fn test_execution_mode_parsing() {
        assert_eq!("LIVE".parse::<ExecutionMode>(), Ok(ExecutionMode::Live));
        assert_eq!("paper".parse::<ExecutionMode>(), Ok(ExecutionMode::Paper));
        assert!("demo".parse::<ExecutionMode>().is_err());
    }
}

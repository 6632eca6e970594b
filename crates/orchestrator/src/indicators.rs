//! Indicator sets come from an external service; the engine only reads them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use autotrader_core::{IndicatorConfig, IndicatorSet, IndicatorSource};
use std::time::Duration;
use tracing::debug;

/// Fetches `GET {base_url}/indicators?symbol=BTC/USDT` as a JSON array of indicator sets.
#[derive(Debug, Clone)]
pub struct HttpIndicatorSource {
    http: reqwest::Client,
    base_url: String,
}

impl HttpIndicatorSource {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build indicator HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl IndicatorSource for HttpIndicatorSource {
    async fn indicators(&self, symbol: &str) -> Result<Vec<IndicatorSet>> {
        let url = format!("{}/indicators", self.base_url);
        debug!(%url, symbol, "Fetching indicators");

        let sets = self
            .http
            .get(&url)
            .query(&[("symbol", symbol)])
            .send()
            .await
            .with_context(|| format!("indicator request for {symbol} failed"))?
            .error_for_status()
            .with_context(|| format!("indicator service rejected {symbol}"))?
            .json::<Vec<IndicatorSet>>()
            .await
            .with_context(|| format!("invalid indicator payload for {symbol}"))?;
        Ok(sets)
    }
}

/// Used when no indicator service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIndicators;

#[async_trait]
impl IndicatorSource for NoIndicators {
    async fn indicators(&self, _symbol: &str) -> Result<Vec<IndicatorSet>> {
        Ok(Vec::new())
    }
}

/// Builds the configured source, falling back to [`NoIndicators`].
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub fn from_config(config: &IndicatorConfig) -> Result<Box<dyn IndicatorSource>> {
    match config.url.as_deref().filter(|url| !url.trim().is_empty()) {
        Some(url) => Ok(Box::new(HttpIndicatorSource::new(
            url,
            Duration::from_secs(config.timeout_secs.max(1)),
        )?)),
        None => Ok(Box::new(NoIndicators)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetches_indicator_sets_for_symbol() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/indicators"))
            .and(query_param("symbol", "BTC/USDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "timeframe": "1h",
                    "trend": "up",
                    "volatility": "normal",
                    "support": ["58000", "57250.5"],
                    "resistance": ["61000"],
                    "divergences": ["bearish RSI"],
                    "values": {"rsi": "63.2"}
                },
                {"timeframe": "1d"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let source = HttpIndicatorSource::new(server.uri(), Duration::from_secs(5)).unwrap();
        let sets = source.indicators("BTC/USDT").await.unwrap();

        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].trend.as_deref(), Some("up"));
        assert_eq!(sets[0].support, vec![dec!(58000), dec!(57250.5)]);
        assert_eq!(sets[0].values["rsi"], dec!(63.2));
        assert!(sets[1].divergences.is_empty());
    }

    #[tokio::test]
    async fn test_error_status_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/indicators"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = HttpIndicatorSource::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = source.indicators("ETH/USDT").await.unwrap_err();
        assert!(err.to_string().contains("ETH/USDT"));
    }

    #[tokio::test]
    async fn test_unconfigured_source_is_empty() {
        let source = from_config(&IndicatorConfig::default()).unwrap();
        assert!(source.indicators("BTC/USDT").await.unwrap().is_empty());
    }
}

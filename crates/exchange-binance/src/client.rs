//! Signed REST client for the USDT-margined futures API.
//!
//! # Example
//!
//! ```ignore
//! use autotrader_binance::{BinanceClient, BinanceClientConfig};
//! use autotrader_core::{VenueClient, VenueConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BinanceClientConfig::from(&VenueConfig::default().with_env_credentials());
//!     let client = BinanceClient::new(config)?;
//!     client.sync_time().await?;
//!
//!     let ticker = client.ticker("BTC/USDT").await?;
//!     println!("BTC last: {}", ticker.last_price);
//!     Ok(())
//! }
//! ```

use crate::signing::{RequestSigner, API_KEY_HEADER};
use crate::types::{RawApiError, RawServerTime, RawSymbolInfo};
use autotrader_core::{VenueConfig, VenueError, VenueResult};
use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::form_urlencoded;

// =============================================================================
// Constants
// =============================================================================

/// Production futures API base URL.
pub const BINANCE_FUTURES_URL: &str = "https://fapi.binance.com";

/// Futures testnet base URL.
pub const BINANCE_TESTNET_URL: &str = "https://testnet.binancefuture.com";

/// Timestamp outside of the receive window.
const PUBLIC_GET_ATTEMPTS: u32 = 2;
const PUBLIC_GET_RETRY_DELAY: Duration = Duration::from_millis(200);

const CODE_TIMESTAMP_OUTSIDE_WINDOW: i64 = -1021;
const CODE_UNKNOWN_SYMBOL: i64 = -1121;
const CODE_CANCEL_REJECTED: i64 = -2011;
const CODE_NO_SUCH_ORDER: i64 = -2013;
const CODE_BAD_API_KEY_FORMAT: i64 = -2014;
const CODE_REJECTED_API_KEY: i64 = -2015;
/// Margin type change requested for a symbol already in that mode.
pub(crate) const CODE_NO_NEED_TO_CHANGE_MARGIN_TYPE: i64 = -4046;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for [`BinanceClient`].
#[derive(Clone)]
pub struct BinanceClientConfig {
    /// Base URL for the API.
    pub base_url: String,

    pub api_key: String,

    pub api_secret: String,

    /// Validity window of signed requests, in milliseconds.
    pub recv_window_ms: u64,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Requests per second limit.
    pub requests_per_second: NonZeroU32,
}

impl std::fmt::Debug for BinanceClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClientConfig")
            .field("base_url", &self.base_url)
            .field("recv_window_ms", &self.recv_window_ms)
            .field("timeout_secs", &self.timeout_secs)
            .field("requests_per_second", &self.requests_per_second)
            .finish_non_exhaustive()
    }
}

impl Default for BinanceClientConfig {
    fn default() -> Self {
        Self {
            base_url: BINANCE_FUTURES_URL.to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            recv_window_ms: 5000,
            timeout_secs: 10,
            requests_per_second: nonzero!(10u32),
        }
    }
}

impl From<&VenueConfig> for BinanceClientConfig {
    fn from(config: &VenueConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            recv_window_ms: config.recv_window_ms,
            timeout_secs: config.timeout_secs,
            requests_per_second: NonZeroU32::new(config.requests_per_second)
                .unwrap_or(nonzero!(10u32)),
        }
    }
}

impl BinanceClientConfig {
    /// Creates a configuration for the futures testnet.
    #[must_use]
    pub fn testnet() -> Self {
        Self {
            base_url: BINANCE_TESTNET_URL.to_string(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self.api_secret = api_secret.into();
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, requests_per_second: NonZeroU32) -> Self {
        self.requests_per_second = requests_per_second;
        self
    }

    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Maps an HTTP status and venue error payload onto [`VenueError`].
pub(crate) fn map_api_error(status: u16, code: i64, message: String) -> VenueError {
    match (status, code) {
        (429 | 418, _) => VenueError::rate_limited(60),
        (401, _) | (_, CODE_BAD_API_KEY_FORMAT | CODE_REJECTED_API_KEY) => {
            VenueError::Authentication(message)
        }
        (_, CODE_CANCEL_REJECTED | CODE_NO_SUCH_ORDER) => VenueError::order_not_found(message),
        (_, CODE_UNKNOWN_SYMBOL) => VenueError::unknown_symbol(message),
        (_, CODE_NO_NEED_TO_CHANGE_MARGIN_TYPE) => VenueError::api(status, code, message),
        (400, c) if c <= -2000 => VenueError::OrderRejected(format!("{code}: {message}")),
        _ => VenueError::api(status, code, message),
    }
}

fn transport_error(error: reqwest::Error) -> VenueError {
    if error.is_timeout() {
        VenueError::Timeout(error.to_string())
    } else if error.is_decode() {
        VenueError::Serialization(error.to_string())
    } else {
        VenueError::Network(error.to_string())
    }
}

// =============================================================================
// BinanceClient
// =============================================================================

/// Futures REST client.
///
/// All requests share one rate limiter. Signed requests carry a timestamp
/// corrected by the last measured server clock offset.
pub struct BinanceClient {
    config: BinanceClientConfig,

    http: Client,

    rate_limiter: Arc<DefaultDirectRateLimiter>,

    /// Absent when no credentials are configured; signed calls then fail.
    signer: Option<RequestSigner>,

    /// Server time minus local time, in milliseconds.
    time_offset_ms: AtomicI64,

    /// Exchange info keyed by venue symbol, loaded on first use.
    pub(crate) symbol_info: RwLock<HashMap<String, RawSymbolInfo>>,

    /// Max leverage keyed by venue symbol.
    pub(crate) max_leverage: RwLock<HashMap<String, u32>>,
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("base_url", &self.config.base_url)
            .field("signed", &self.signer.is_some())
            .field("time_offset_ms", &self.time_offset_ms.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl BinanceClient {
    /// Creates a new client.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: BinanceClientConfig) -> VenueResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| VenueError::Configuration(format!("failed to build HTTP client: {e}")))?;

        let signer = (!config.api_key.is_empty() && !config.api_secret.is_empty())
            .then(|| RequestSigner::new(config.api_key.clone(), config.api_secret.clone()));

        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(
            config.requests_per_second,
        )));

        Ok(Self {
            config,
            http,
            rate_limiter,
            signer,
            time_offset_ms: AtomicI64::new(0),
            symbol_info: RwLock::new(HashMap::new()),
            max_leverage: RwLock::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.signer.is_some()
    }

    #[must_use]
    pub fn time_offset_ms(&self) -> i64 {
        self.time_offset_ms.load(Ordering::Relaxed)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn timestamp_ms(&self) -> i64 {
        Utc::now().timestamp_millis() + self.time_offset_ms.load(Ordering::Relaxed)
    }

    /// Measures the offset between the venue clock and the local clock.
    ///
    /// # Errors
    /// Returns error if the server time cannot be fetched.
    pub async fn sync_time(&self) -> VenueResult<i64> {
        let before = Utc::now().timestamp_millis();
        let server: RawServerTime = self.public_get("/fapi/v1/time", &[]).await?;
        let after = Utc::now().timestamp_millis();
        let offset = server.server_time - (before + after) / 2;
        self.time_offset_ms.store(offset, Ordering::Relaxed);
        info!(offset_ms = offset, "Synchronized venue clock");
        Ok(offset)
    }

    // =========================================================================
    // Transport
    // =========================================================================

    /// Unsigned GET.
    ///
    /// Reads are idempotent, so one transient failure is retried after a
    /// short pause. Rate limiting is returned as is.
    pub(crate) async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> VenueResult<T> {
        let url = self.url(path);
        let mut attempt = 1;
        loop {
            self.rate_limiter.until_ready().await;
            debug!("GET {}", url);

            let outcome = match self.http.get(&url).query(params).send().await {
                Ok(response) => self.handle_response(response).await,
                Err(e) => Err(transport_error(e)),
            };
            match outcome {
                Err(error)
                    if attempt < PUBLIC_GET_ATTEMPTS
                        && error.is_retryable()
                        && !matches!(error, VenueError::RateLimited { .. }) =>
                {
                    warn!(path, attempt, %error, "Transient venue read failure, retrying");
                    attempt += 1;
                    tokio::time::sleep(PUBLIC_GET_RETRY_DELAY).await;
                }
                other => return other,
            }
        }
    }

    /// Signed request with parameters in the query string.
    ///
    /// A timestamp rejection triggers one clock resync and retry.
    pub(crate) async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> VenueResult<T> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            VenueError::Authentication("API key and secret are required".to_string())
        })?;

        let mut resynced = false;
        loop {
            let query = self.signed_query(signer, params)?;
            self.rate_limiter.until_ready().await;

            let url = format!("{}?{}", self.url(path), query);
            debug!("{} {}", method, path);

            let response = self
                .http
                .request(method.clone(), &url)
                .header(API_KEY_HEADER, signer.api_key())
                .send()
                .await
                .map_err(transport_error)?;

            match self.handle_response(response).await {
                Err(VenueError::Api { code, .. })
                    if code == CODE_TIMESTAMP_OUTSIDE_WINDOW && !resynced =>
                {
                    warn!("Signed request outside receive window, resyncing clock");
                    resynced = true;
                    self.sync_time().await?;
                }
                other => return other,
            }
        }
    }

    fn signed_query(&self, signer: &RequestSigner, params: &[(&str, String)]) -> VenueResult<String> {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in params {
            serializer.append_pair(key, value);
        }
        serializer.append_pair("recvWindow", &self.config.recv_window_ms.to_string());
        serializer.append_pair("timestamp", &self.timestamp_ms().to_string());
        let query = serializer.finish();
        let signature = signer.sign(&query)?;
        Ok(format!("{query}&signature={signature}"))
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> VenueResult<T> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return Err(VenueError::rate_limited(retry_after));
        }

        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<RawApiError>(&text) {
                Ok(body) => map_api_error(status.as_u16(), body.code, body.msg),
                Err(_) => map_api_error(status.as_u16(), 0, text),
            });
        }

        serde_json::from_str(&text).map_err(|e| VenueError::Serialization(format!("{e}: {text}")))
    }
}

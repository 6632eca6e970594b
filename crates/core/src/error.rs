//! Typed errors reported by venue clients.
//!
//! Every read and write against the trading venue resolves to a
//! [`VenueError`] on failure so callers can classify rejections without
//! string matching.

use thiserror::Error;

/// Errors that can occur when talking to the trading venue.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VenueError {
    /// The venue answered with an error payload.
    #[error("venue error {status}/{code}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Venue-specific error code, 0 when absent.
        code: i64,
        /// Error message reported by the venue.
        message: String,
    },

    /// Credentials were missing or rejected.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Request could not reach the venue.
    #[error("network error: {0}")]
    Network(String),

    /// Request exceeded its deadline.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds to wait before retry.
        retry_after_secs: u64,
    },

    /// Order was rejected (precision, price already triggered, margin).
    #[error("order rejected: {0}")]
    OrderRejected(String),

    /// The referenced order does not exist.
    #[error("order not found: {order_id}")]
    OrderNotFound {
        /// The order id that was not found.
        order_id: String,
    },

    /// The symbol is not listed on the venue.
    #[error("unknown symbol: {symbol}")]
    UnknownSymbol {
        /// The symbol as requested.
        symbol: String,
    },

    /// Response could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Client was configured incorrectly.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl VenueError {
    /// Creates an API error from status, venue code and message.
    pub fn api(status: u16, code: i64, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            code,
            message: message.into(),
        }
    }

    /// Creates a rate limit error.
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    /// Creates an order not found error.
    pub fn order_not_found(order_id: impl Into<String>) -> Self {
        Self::OrderNotFound {
            order_id: order_id.into(),
        }
    }

    /// Creates an unknown symbol error.
    pub fn unknown_symbol(symbol: impl Into<String>) -> Self {
        Self::UnknownSymbol {
            symbol: symbol.into(),
        }
    }

    /// Returns true if the failure is transient and the call may succeed later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias for venue operations.
pub type VenueResult<T> = std::result::Result<T, VenueError>;

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Error Construction Tests ====================

    #[test]
    fn test_api_error_display_carries_code_and_message() {
        let err = VenueError::api(400, -2019, "Margin is insufficient.");
        let display = err.to_string();
        assert!(display.contains("-2019"));
        assert!(display.contains("Margin is insufficient."));
    }

    #[test]
    fn test_order_not_found_error() {
        let err = VenueError::order_not_found("8389765");
        assert!(err.to_string().contains("8389765"));
    }

    #[test]
    fn test_unknown_symbol_error() {
        let err = VenueError::unknown_symbol("FOO/USDT");
        assert!(err.to_string().contains("FOO/USDT"));
    }

    // ==================== Retryable Tests ====================

    #[test]
    fn test_transport_errors_are_retryable() {
        assert!(VenueError::Network("refused".to_string()).is_retryable());
        assert!(VenueError::Timeout("10s".to_string()).is_retryable());
        assert!(VenueError::rate_limited(30).is_retryable());
    }

    #[test]
    fn test_server_error_is_retryable() {
        assert!(VenueError::api(503, 0, "unavailable").is_retryable());
    }

    #[test]
    fn test_rejections_are_not_retryable() {
        assert!(!VenueError::api(400, -1111, "precision").is_retryable());
        assert!(!VenueError::OrderRejected("would trigger immediately".to_string()).is_retryable());
        assert!(!VenueError::Authentication("bad key".to_string()).is_retryable());
        assert!(!VenueError::order_not_found("1").is_retryable());
    }
}

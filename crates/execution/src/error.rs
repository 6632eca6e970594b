//! Error types for command execution.
//!
//! These never escape [`crate::CommandExecutor::execute`]; they are rendered
//! into the `error` field of a FAILED [`crate::ExecutionResult`].

use autotrader_core::VenueError;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutionError {
    #[error("notional {requested} USDT is below the minimum of {minimum} USDT")]
    BelowMinimumNotional { requested: Decimal, minimum: Decimal },

    #[error("insufficient balance: requested {requested} USDT, free {available} USDT")]
    InsufficientBalance { requested: Decimal, available: Decimal },

    #[error("computed quantity for {symbol} is zero after truncation to step {step}")]
    ZeroQuantity { symbol: String, step: Decimal },

    #[error("quantity {quantity} for {symbol} is below the venue minimum of {minimum}")]
    BelowMinimumQuantity {
        symbol: String,
        quantity: Decimal,
        minimum: Decimal,
    },

    #[error("no open position on {symbol}")]
    NoPosition { symbol: String },

    #[error("leverage {requested}x outside venue bounds {min}x..={max}x for {symbol}")]
    LeverageOutOfRange {
        symbol: String,
        requested: u32,
        min: u32,
        max: u32,
    },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("memory store unavailable: {0}")]
    Memory(String),

    #[error(transparent)]
    Venue(#[from] VenueError),
}

impl ExecutionError {
    pub fn below_minimum(requested: Decimal, minimum: Decimal) -> Self {
        Self::BelowMinimumNotional { requested, minimum }
    }

    pub fn no_position(symbol: impl Into<String>) -> Self {
        Self::NoPosition {
            symbol: symbol.into(),
        }
    }

    /// True when the venue itself rejected or failed the call.
    #[must_use]
    pub fn is_venue_error(&self) -> bool {
        matches!(self, Self::Venue(_))
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_minimum_notional_message() {
        let err = ExecutionError::below_minimum(dec!(5), dec!(10));
        assert_eq!(
            err.to_string(),
            "notional 5 USDT is below the minimum of 10 USDT"
        );
    }

    #[test]
    fn test_venue_error_is_transparent() {
        let err = ExecutionError::from(VenueError::order_not_found("42"));
        assert!(err.is_venue_error());
        assert_eq!(err.to_string(), "order not found: 42");
    }
}

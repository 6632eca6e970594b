use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

/// Why a block's arguments do not satisfy its kind's schema.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("missing required argument '{0}'")]
    Missing(&'static str),

    #[error("argument '{key}' has invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Constraint(String),
}

impl ArgumentError {
    fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Typed accessors over a block's string-valued argument map.
pub(crate) struct ArgReader<'a> {
    args: &'a BTreeMap<String, String>,
}

impl<'a> ArgReader<'a> {
    pub(crate) fn new(args: &'a BTreeMap<String, String>) -> Self {
        Self { args }
    }

    /// Value of `key`, treating blank strings as absent.
    pub(crate) fn optional(&self, key: &'static str) -> Option<&'a str> {
        self.args
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub(crate) fn required(&self, key: &'static str) -> Result<&'a str, ArgumentError> {
        self.optional(key).ok_or(ArgumentError::Missing(key))
    }

    /// Trading pair, upper-cased (`eth/usdt` becomes `ETH/USDT`).
    pub(crate) fn symbol(&self) -> Result<String, ArgumentError> {
        let value = self.required("target")?;
        if value.chars().any(char::is_whitespace) {
            return Err(ArgumentError::invalid("target", value, "symbol contains whitespace"));
        }
        Ok(value.to_ascii_uppercase())
    }

    pub(crate) fn optional_positive_decimal(
        &self,
        key: &'static str,
    ) -> Result<Option<Decimal>, ArgumentError> {
        let Some(value) = self.optional(key) else {
            return Ok(None);
        };
        let parsed = parse_decimal(value)
            .ok_or_else(|| ArgumentError::invalid(key, value, "not a number"))?;
        if parsed <= Decimal::ZERO {
            return Err(ArgumentError::invalid(key, value, "must be greater than zero"));
        }
        Ok(Some(parsed))
    }

    pub(crate) fn positive_decimal(&self, key: &'static str) -> Result<Decimal, ArgumentError> {
        self.optional_positive_decimal(key)?
            .ok_or(ArgumentError::Missing(key))
    }

    /// Whole number; fractional input such as `"10.0"` or `50.5` is truncated.
    pub(crate) fn optional_whole(&self, key: &'static str) -> Result<Option<u32>, ArgumentError> {
        let Some(value) = self.optional(key) else {
            return Ok(None);
        };
        let parsed = parse_decimal(value)
            .ok_or_else(|| ArgumentError::invalid(key, value, "not a number"))?;
        if parsed.is_sign_negative() {
            return Err(ArgumentError::invalid(key, value, "must not be negative"));
        }
        let whole = parsed
            .trunc()
            .to_u32()
            .ok_or_else(|| ArgumentError::invalid(key, value, "out of range"))?;
        Ok(Some(whole))
    }

    pub(crate) fn whole(&self, key: &'static str) -> Result<u32, ArgumentError> {
        self.optional_whole(key)?.ok_or(ArgumentError::Missing(key))
    }
}

/// Parses plain or scientific notation (`0.5`, `5e-1`).
pub(crate) fn parse_decimal(value: &str) -> Option<Decimal> {
    let value = value.trim();
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .ok()
}

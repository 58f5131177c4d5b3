//! Money Value Object
//!
//! Transfer amounts are fixed-point `rust_decimal::Decimal` values at currency
//! scale. Floating point never touches an amount.
//!
//! ## Usage
//! ```rust
//! use std::str::FromStr;
//! use transfer_authz::money::Amount;
//!
//! let amount = Amount::from_str("150.5").unwrap();
//! assert_eq!(amount.to_string(), "150.50");
//! assert!(Amount::from_str("0.001").is_err());
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Minor-unit digits for every supported currency
pub const CURRENCY_SCALE: u32 = 2;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Positive amount at [`CURRENCY_SCALE`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    /// Validate and rescale. Trailing zeros beyond the scale are tolerated,
    /// significant digits beyond it are rejected (no silent truncation).
    pub fn new(value: Decimal) -> Result<Self, MoneyError> {
        if value.is_sign_negative() || value.is_zero() {
            return Err(MoneyError::InvalidAmount);
        }

        let normalized = value.normalize();
        if normalized.scale() > CURRENCY_SCALE {
            return Err(MoneyError::PrecisionOverflow {
                provided: normalized.scale(),
                max: CURRENCY_SCALE,
            });
        }

        let mut scaled = normalized;
        scaled.rescale(CURRENCY_SCALE);
        Ok(Self(scaled))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = MoneyError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl FromStr for Amount {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(MoneyError::InvalidFormat("empty string".into()));
        }
        // Exponent notation would let scale slip past the precision check
        if s.contains(['e', 'E']) {
            return Err(MoneyError::InvalidFormat(format!("exponent not allowed: {}", s)));
        }
        let decimal =
            Decimal::from_str(s).map_err(|e| MoneyError::InvalidFormat(e.to_string()))?;
        Self::new(decimal)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

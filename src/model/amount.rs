//! Amount type for signed transaction values with two fractional digits.
//!
//! Bank exports write money in many shapes: `-50.00`, `$1,234.56`, `(12.00)`, `-$3.10`. The
//! `Amount` type parses all of those and always holds its value rounded to cents, so that two
//! amounts that print the same also compare the same.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;

/// Number of fractional digits every `Amount` is rounded to.
const SCALE: u32 = 2;

/// Represents a signed dollar amount, rounded to two decimal places.
///
/// # Examples
///
/// Parsing with dollar sign and commas:
/// ```
/// # use ledger_ingest::model::Amount;
/// # use std::str::FromStr;
/// let amount = Amount::from_str("-$1,050.5").unwrap();
/// assert_eq!(amount.to_string(), "-1050.50");
/// ```
///
/// Accounting-style negatives:
/// ```
/// # use ledger_ingest::model::Amount;
/// # use std::str::FromStr;
/// let amount = Amount::from_str("(12.00)").unwrap();
/// assert!(amount.is_negative());
/// ```
///
/// Lenient coercion for dirty data:
/// ```
/// # use ledger_ingest::model::Amount;
/// assert!(Amount::coerce("n/a").is_zero());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount {
    /// The parsed numerical value, always at `SCALE`.
    value: Decimal,
}

impl Amount {
    pub const ZERO: Amount = Amount {
        value: Decimal::ZERO,
    };

    /// Creates a new Amount from a Decimal value, rounding it to cents.
    pub fn new(value: Decimal) -> Self {
        let mut value = value.round_dp(SCALE);
        value.rescale(SCALE);
        Self { value }
    }

    /// Creates an Amount from a float, e.g. a numeric spreadsheet cell. Returns `None` for NaN or
    /// infinite values.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        Decimal::from_f64(value).map(Self::new)
    }

    /// Parses `s`, treating anything unparseable as zero. Dirty cells in a bank export must not
    /// stop ingestion.
    pub fn coerce(s: &str) -> Self {
        Self::from_str(s).unwrap_or_default()
    }

    /// Returns the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.value
    }

    /// Returns the value as a float for writing into a spreadsheet cell.
    pub fn to_f64(&self) -> f64 {
        self.value.to_f64().unwrap_or_default()
    }

    /// Returns the absolute value.
    pub fn abs(&self) -> Self {
        Self::new(self.value.abs())
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.value().is_zero()
    }

    /// Returns true if the amount is positive.
    pub fn is_positive(&self) -> bool {
        !self.is_zero() && self.value().is_sign_positive()
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.value().is_sign_negative()
    }

    /// Adds `rhs`, returning `None` on overflow.
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.value.checked_add(rhs.value).map(Self::new)
    }

    /// Subtracts `rhs`, returning `None` on overflow.
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.value.checked_sub(rhs.value).map(Self::new)
    }
}

/// An error that can occur when parsing strings into `Amount` values.
pub struct AmountError(rust_decimal::Error);

impl Debug for AmountError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Display for AmountError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl std::error::Error for AmountError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();

        // Handle empty string
        if trimmed.is_empty() {
            return Ok(Amount::default());
        }

        // Accounting negatives: "(50.00)"
        let (negative, body) = match trimmed
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Some(inner) => (true, inner.trim()),
            None => (false, trimmed),
        };

        // Drop currency symbols, thousands separators and inner whitespace: "-$ 1,000.00"
        let cleaned: String = body
            .chars()
            .filter(|c| !matches!(c, '$' | ',' | ' ' | '\u{a0}'))
            .collect();
        let cleaned = cleaned.strip_prefix('+').unwrap_or(&cleaned);

        let value = match Decimal::from_str(cleaned) {
            Ok(value) => value,
            Err(e) => match Decimal::from_scientific(cleaned) {
                Ok(value) => value,
                Err(_) => return Err(AmountError(e)),
            },
        };
        let value = if negative { -value.abs() } else { value };
        Ok(Amount::new(value))
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            // Avoid printing "-0.00"
            return write!(f, "0.00");
        }
        write!(f, "{:.2}", self.value)
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Self::Output {
        Amount::new(-self.value)
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Self) -> Self::Output {
        Amount::new(self.value + rhs.value)
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, rhs: Self) -> Self::Output {
        Amount::new(self.value - rhs.value)
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Amount::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Amount::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.value()
    }
}

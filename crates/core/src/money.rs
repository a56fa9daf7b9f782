//! Money value object (integer minor units + ISO currency code).

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Marker trait for value objects: immutable, compared by value.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// Three-letter, upper-case ISO 4217 currency code.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode([u8; 3]);

/// Currency all purchase-order payments and finance totals are reconciled in.
pub const BASE_CURRENCY: CurrencyCode = CurrencyCode(*b"TZS");

impl CurrencyCode {
    pub fn as_str(&self) -> &str {
        // Only ASCII upper-case letters are ever stored.
        core::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl FromStr for CurrencyCode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let bytes = trimmed.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_alphabetic()) {
            return Err(DomainError::validation(format!(
                "currency must be a 3-letter ISO code, got '{trimmed}'"
            )));
        }
        let mut code = [0u8; 3];
        for (dst, src) in code.iter_mut().zip(bytes) {
            *dst = src.to_ascii_uppercase();
        }
        Ok(Self(code))
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CurrencyCode> for String {
    fn from(value: CurrencyCode) -> Self {
        value.as_str().to_string()
    }
}

impl core::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An amount of money in the smallest unit of its currency.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    pub amount_minor: i64,
    pub currency: CurrencyCode,
}

impl ValueObject for Money {}
impl ValueObject for CurrencyCode {}

impl Money {
    pub fn new(amount_minor: i64, currency: CurrencyCode) -> Self {
        Self {
            amount_minor,
            currency,
        }
    }

    pub fn zero(currency: CurrencyCode) -> Self {
        Self::new(0, currency)
    }

    pub fn is_positive(&self) -> bool {
        self.amount_minor > 0
    }

    pub fn checked_add(self, other: Money) -> Result<Money, DomainError> {
        self.ensure_same_currency(&other)?;
        self.amount_minor
            .checked_add(other.amount_minor)
            .map(|amount| Money::new(amount, self.currency))
            .ok_or_else(|| DomainError::invariant("money overflow"))
    }

    pub fn checked_sub(self, other: Money) -> Result<Money, DomainError> {
        self.ensure_same_currency(&other)?;
        self.amount_minor
            .checked_sub(other.amount_minor)
            .map(|amount| Money::new(amount, self.currency))
            .ok_or_else(|| DomainError::invariant("money overflow"))
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), DomainError> {
        if self.currency != other.currency {
            return Err(DomainError::validation(format!(
                "currency mismatch: {} vs {}",
                self.currency, other.currency
            )));
        }
        Ok(())
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.currency, self.amount_minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn usd() -> CurrencyCode {
        "usd".parse().unwrap()
    }

    #[test]
    fn currency_is_normalized_to_upper_case() {
        assert_eq!(usd().as_str(), "USD");
        assert_eq!(BASE_CURRENCY.as_str(), "TZS");
    }

    #[test]
    fn currency_rejects_uuid_like_values() {
        assert!("3f2a9c1e-0000-0000-0000-000000000000".parse::<CurrencyCode>().is_err());
        assert!("TZ".parse::<CurrencyCode>().is_err());
        assert!("T1S".parse::<CurrencyCode>().is_err());
    }

    #[test]
    fn arithmetic_refuses_mixed_currencies() {
        let a = Money::new(100, BASE_CURRENCY);
        let b = Money::new(100, usd());
        assert!(matches!(a.checked_add(b), Err(DomainError::Validation(_))));
        assert_eq!(a.checked_sub(Money::new(40, BASE_CURRENCY)).unwrap().amount_minor, 60);
    }

    #[test]
    fn currency_round_trips_through_json_as_a_string() {
        let json = serde_json::to_string(&Money::new(5, usd())).unwrap();
        assert_eq!(json, r#"{"amount_minor":5,"currency":"USD"}"#);
    }

    proptest! {
        #[test]
        fn add_then_sub_restores_amount(a in -1_000_000_000i64..1_000_000_000, b in -1_000_000_000i64..1_000_000_000) {
            let x = Money::new(a, BASE_CURRENCY);
            let y = Money::new(b, BASE_CURRENCY);
            prop_assert_eq!(x.checked_add(y).and_then(|s| s.checked_sub(y)).unwrap(), x);
        }

        #[test]
        fn overflow_is_an_error_not_a_wrap(a in 1i64..=i64::MAX) {
            let max = Money::new(i64::MAX, BASE_CURRENCY);
            prop_assert!(max.checked_add(Money::new(a, BASE_CURRENCY)).is_err());
        }
    }
}

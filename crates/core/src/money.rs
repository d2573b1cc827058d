//! Minor-unit money primitives.
//!
//! All monetary amounts in this codebase are `u64` minor units (cents for
//! USD-like currencies). Arithmetic on amounts is always checked; overflow
//! is an invariant violation, never a wrap.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// ISO-4217-shaped currency code (three ASCII letters, stored uppercase).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Parse and normalize a currency code.
    pub fn new(code: impl AsRef<str>) -> DomainResult<Self> {
        let code = code.as_ref();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::validation(format!(
                "currency must be a 3-letter code, got '{code}'"
            )));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for Currency {}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Checked sum of minor-unit amounts.
///
/// Returns an invariant error on overflow so schedule/ledger math can use
/// `?` instead of silently saturating.
pub fn checked_sum(amounts: impl IntoIterator<Item = u64>) -> DomainResult<u64> {
    let mut total: u64 = 0;
    for a in amounts {
        total = total
            .checked_add(a)
            .ok_or_else(|| DomainError::invariant("amount sum overflow"))?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_normalizes_to_uppercase() {
        let c = Currency::new("usd").unwrap();
        assert_eq!(c.as_str(), "USD");
        assert_eq!(c, Currency::usd());
    }

    #[test]
    fn currency_rejects_malformed_codes() {
        assert!(Currency::new("us").is_err());
        assert!(Currency::new("USDA").is_err());
        assert!(Currency::new("U$D").is_err());
    }

    #[test]
    fn checked_sum_detects_overflow() {
        assert_eq!(checked_sum([1, 2, 3]).unwrap(), 6);
        assert!(checked_sum([u64::MAX, 1]).is_err());
    }
}

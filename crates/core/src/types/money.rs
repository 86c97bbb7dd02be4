//! Type-safe money representation using decimal arithmetic.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// A monetary amount with currency information.
///
/// Amounts are carried as `Decimal` in the currency's standard unit
/// (e.g. rupees, not paise). All client-side totals are advisory; the
/// backend recomputes them authoritatively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Amount in the currency's standard unit.
    pub amount: Decimal,
    /// ISO 4217 currency code.
    pub currency: CurrencyCode,
}

impl Money {
    /// Create a new amount.
    #[must_use]
    pub const fn new(amount: Decimal, currency: CurrencyCode) -> Self {
        Self { amount, currency }
    }

    /// Zero in the given currency.
    #[must_use]
    pub const fn zero(currency: CurrencyCode) -> Self {
        Self {
            amount: Decimal::ZERO,
            currency,
        }
    }

    /// The integer amount the payment backend charges for this total.
    ///
    /// The checkout backend accepts charge amounts as whole currency units;
    /// fractional tax amounts are rounded half-away-from-zero. Returns
    /// `None` if the amount does not fit in an `i64` (never the case for
    /// real order totals).
    #[must_use]
    pub fn charge_amount(&self) -> Option<i64> {
        self.amount
            .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {:.2}", self.currency.code(), self.amount)
    }
}

/// ISO 4217 currency codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    #[default]
    INR,
    USD,
    EUR,
    GBP,
    AED,
}

impl CurrencyCode {
    /// The ISO 4217 code as a string.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::INR => "INR",
            Self::USD => "USD",
            Self::EUR => "EUR",
            Self::GBP => "GBP",
            Self::AED => "AED",
        }
    }
}

/// Error parsing a [`CurrencyCode`] from its ISO 4217 string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unsupported currency code: {0}")]
pub struct UnknownCurrency(String);

impl std::str::FromStr for CurrencyCode {
    type Err = UnknownCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INR" => Ok(Self::INR),
            "USD" => Ok(Self::USD),
            "EUR" => Ok(Self::EUR),
            "GBP" => Ok(Self::GBP),
            "AED" => Ok(Self::AED),
            other => Err(UnknownCurrency(other.to_owned())),
        }
    }
}

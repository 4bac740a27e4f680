use std::fmt;
use std::iter::Sum;
use std::ops::Add;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MINOR_UNITS: i64 = 100;
const BASIS_POINTS_PER_UNIT: i128 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("amount would be negative ({0} minor units)")]
    Negative(i64),
    #[error("amount overflow")]
    Overflow,
    #[error("amount {0} has more precision than one minor unit")]
    Unrepresentable(String),
    #[error("invalid rate {0}: expected a decimal between 0 and 1 with at most 4 decimal places")]
    InvalidRate(String),
}

/// A non-negative currency amount held as an integer count of minor units
/// (cents). All order, payment and commission arithmetic goes through this
/// type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_cents(cents: i64) -> Result<Self, MoneyError> {
        if cents < 0 {
            return Err(MoneyError::Negative(cents));
        }
        Ok(Self(cents))
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Money) -> Result<Money, MoneyError> {
        self.0.checked_add(other.0).map(Money).ok_or(MoneyError::Overflow)
    }

    /// Fails with [`MoneyError::Negative`] when `other` is larger than `self`.
    pub fn checked_sub(self, other: Money) -> Result<Money, MoneyError> {
        let diff = self.0 - other.0;
        if diff < 0 {
            return Err(MoneyError::Negative(diff));
        }
        Ok(Money(diff))
    }

    pub fn times(self, quantity: u32) -> Result<Money, MoneyError> {
        self.0
            .checked_mul(i64::from(quantity))
            .map(Money)
            .ok_or(MoneyError::Overflow)
    }

    /// Applies `rate` and rounds half-up to the nearest minor unit.
    pub fn percentage_of(self, rate: Rate) -> Money {
        let scaled = i128::from(self.0) * i128::from(rate.basis_points());
        let rounded = (scaled + BASIS_POINTS_PER_UNIT / 2) / BASIS_POINTS_PER_UNIT;
        // rate <= 1, so the result never exceeds self
        Money(rounded as i64)
    }

    pub fn to_display_string(self) -> String {
        format!("{}.{:02}", self.0 / MINOR_UNITS, self.0 % MINOR_UNITS)
    }

    pub fn from_decimal(value: &BigDecimal) -> Result<Self, MoneyError> {
        let scaled = value.clone() * BigDecimal::from(MINOR_UNITS);
        if !scaled.is_integer() {
            return Err(MoneyError::Unrepresentable(value.to_string()));
        }
        let cents = scaled.to_i64().ok_or(MoneyError::Overflow)?;
        Money::from_cents(cents)
    }

    pub fn to_decimal(self) -> BigDecimal {
        (BigDecimal::from(self.0) / BigDecimal::from(MINOR_UNITS)).with_scale(2)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.copied().sum()
    }
}

impl TryFrom<i64> for Money {
    type Error = MoneyError;

    fn try_from(cents: i64) -> Result<Self, Self::Error> {
        Money::from_cents(cents)
    }
}

impl From<Money> for i64 {
    fn from(money: Money) -> i64 {
        money.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

/// A fraction between 0 and 1 with a resolution of one basis point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rate(u32);

impl Rate {
    pub const fn from_basis_points(basis_points: u32) -> Self {
        Self(basis_points)
    }

    pub const fn basis_points(self) -> u32 {
        self.0
    }
}

impl FromStr for Rate {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MoneyError::InvalidRate(s.to_string());
        let value = BigDecimal::from_str(s.trim()).map_err(|_| invalid())?;
        if value < BigDecimal::zero() || value > BigDecimal::from(1) {
            return Err(invalid());
        }
        let scaled = value * BigDecimal::from(BASIS_POINTS_PER_UNIT as i64);
        if !scaled.is_integer() {
            return Err(invalid());
        }
        scaled.to_u32().map(Rate).ok_or_else(invalid)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:04}", self.0 / 10_000, self.0 % 10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cents(value: i64) -> Money {
        Money::from_cents(value).unwrap()
    }

    #[test]
    fn rejects_negative_amounts() {
        assert_eq!(Money::from_cents(-1), Err(MoneyError::Negative(-1)));
        assert_eq!(cents(100).checked_sub(cents(150)), Err(MoneyError::Negative(-50)));
        assert_eq!(cents(150).checked_sub(cents(100)), Ok(cents(50)));
    }

    #[test]
    fn multiplies_by_quantity() {
        assert_eq!(cents(850).times(2).unwrap(), cents(1700));
        assert_eq!(cents(i64::MAX).times(2), Err(MoneyError::Overflow));
    }

    #[test]
    fn percentage_rounds_half_up() {
        let three_percent = Rate::from_basis_points(300);
        assert_eq!(cents(1000).percentage_of(three_percent), cents(30));
        assert_eq!(cents(333).percentage_of(three_percent), cents(10));
        // 50 * 0.03 = 1.5 -> 2
        assert_eq!(cents(50).percentage_of(three_percent), cents(2));
        // 49 * 0.03 = 1.47 -> 1
        assert_eq!(cents(49).percentage_of(three_percent), cents(1));
    }

    #[test]
    fn repeated_partial_sums_do_not_drift() {
        let total: Money = std::iter::repeat(cents(10)).take(1000).sum();
        assert_eq!(total, cents(10_000));
    }

    #[test]
    fn displays_with_two_decimals() {
        assert_eq!(cents(3050).to_display_string(), "30.50");
        assert_eq!(cents(5).to_string(), "0.05");
        assert_eq!(Money::ZERO.to_string(), "0.00");
    }

    #[test]
    fn converts_from_and_to_decimal_columns() {
        let price = BigDecimal::from_str("13.50").unwrap();
        assert_eq!(Money::from_decimal(&price).unwrap(), cents(1350));
        assert_eq!(cents(1350).to_decimal(), price);

        let too_precise = BigDecimal::from_str("1.005").unwrap();
        assert!(matches!(Money::from_decimal(&too_precise), Err(MoneyError::Unrepresentable(_))));
    }

    #[test]
    fn parses_rates() {
        assert_eq!("0.03".parse::<Rate>().unwrap(), Rate::from_basis_points(300));
        assert_eq!("1".parse::<Rate>().unwrap(), Rate::from_basis_points(10_000));
        assert!("1.5".parse::<Rate>().is_err());
        assert!("-0.01".parse::<Rate>().is_err());
        assert!("0.00001".parse::<Rate>().is_err());
        assert!("three percent".parse::<Rate>().is_err());
        assert_eq!(Rate::from_basis_points(300).to_string(), "0.0300");
    }

    #[test]
    fn serializes_as_minor_units() {
        assert_eq!(serde_json::to_string(&cents(3050)).unwrap(), "3050");
        assert_eq!(serde_json::from_str::<Money>("1700").unwrap(), cents(1700));
        assert!(serde_json::from_str::<Money>("-1").is_err());
    }
}

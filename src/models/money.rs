use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Mul, Sub};

/// Monetary amount in the tenant's currency, two decimal places.
///
/// All arithmetic is exact (`rust_decimal`); rounding only happens through
/// [`Money::round_cents`] and [`Money::floor_cents`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Whole currency units, e.g. `Money::from_major(150)` is 150.00.
    pub fn from_major(units: i64) -> Self {
        Self(Decimal::from(units))
    }

    /// Amount given in cents, e.g. `Money::from_cents(9200)` is 92.00.
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, 2))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Rounds half away from zero to two decimals.
    pub fn round_cents(self) -> Self {
        Self(self.0.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }

    /// Truncates towards zero to two decimals.
    pub fn floor_cents(self) -> Self {
        Self(self.0.round_dp_with_strategy(2, RoundingStrategy::ToZero))
    }

    /// Multiplies by `(1 + percent / 100)`.
    pub fn apply_percent(self, percent: Decimal) -> Self {
        Self(self.0 * (Decimal::ONE + percent / Decimal::ONE_HUNDRED))
    }

    pub fn scale(self, factor: Decimal) -> Self {
        Self(self.0 * factor)
    }

    pub fn abs_diff(self, other: Money) -> Money {
        Self((self.0 - other.0).abs())
    }

    /// Splits `self` by `parts`, truncated to cents.
    pub fn split_floor(self, parts: u32) -> Money {
        if parts == 0 {
            return self;
        }
        Self(self.0 / Decimal::from(parts)).floor_cents()
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Mul<u32> for Money {
    type Output = Money;

    fn mul(self, rhs: u32) -> Money {
        Money(self.0 * Decimal::from(rhs))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + *m)
    }
}

impl From<Decimal> for Money {
    fn from(d: Decimal) -> Self {
        Money(d)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_half_away_from_zero() {
        let m = Money::new(Decimal::new(12345, 3)); // 12.345
        assert_eq!(m.round_cents(), Money::from_cents(1235));
        assert_eq!(m.floor_cents(), Money::from_cents(1234));
    }

    #[test]
    fn percent_compounds_on_running_value() {
        let base = Money::from_major(100);
        let discounted = base.apply_percent(Decimal::from(-20));
        assert_eq!(discounted.round_cents(), Money::from_major(80));
        let surcharged = discounted.apply_percent(Decimal::from(15));
        assert_eq!(surcharged.round_cents(), Money::from_cents(9200));
    }

    #[test]
    fn split_floor_truncates() {
        assert_eq!(Money::from_major(100).split_floor(3), Money::from_cents(3333));
        assert_eq!(Money::from_major(150).split_floor(3), Money::from_major(50));
    }

    #[test]
    fn displays_two_decimals() {
        assert_eq!(Money::from_major(92).to_string(), "92.00");
    }
}

//! Hour quantity with decimal precision.
//!
//! CRITICAL: Never use floating-point for hour calculations.
//! The ledger invariants are exact equalities, so this type wraps
//! `rust_decimal::Decimal` and only ever adds and subtracts.

use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Number of decimal places used when hours are persisted or rendered.
pub const HOURS_SCALE: u32 = 2;

/// A quantity of support hours.
///
/// Negative values only appear in derived figures (balances, carry-overs);
/// stored credit and expenditure amounts are always non-negative.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Hours(Decimal);

impl Hours {
    /// Zero hours.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Creates an hour quantity from a decimal.
    #[must_use]
    pub const fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Creates an hour quantity from whole hours.
    #[must_use]
    pub fn from_whole(hours: i64) -> Self {
        Self(Decimal::from(hours))
    }

    /// Returns the inner decimal value.
    #[must_use]
    pub const fn value(self) -> Decimal {
        self.0
    }

    /// Returns true if the quantity is zero.
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the quantity is strictly greater than zero.
    #[must_use]
    pub fn is_positive(self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Returns true if the quantity is strictly less than zero.
    #[must_use]
    pub fn is_negative(self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Clamps negative quantities to zero.
    #[must_use]
    pub fn max_zero(self) -> Self {
        self.max(Self::ZERO)
    }

    /// Clamps positive quantities to zero.
    #[must_use]
    pub fn min_zero(self) -> Self {
        self.min(Self::ZERO)
    }

    /// Rounds to the persisted scale using banker's rounding.
    #[must_use]
    pub fn rounded(self) -> Self {
        Self(self.0.round_dp(HOURS_SCALE))
    }
}

impl From<Decimal> for Hours {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl From<Hours> for Decimal {
    fn from(hours: Hours) -> Self {
        hours.0
    }
}

impl Add for Hours {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Hours {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Hours {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Hours {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for Hours {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl Sum for Hours {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Hours> for Hours {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// Renders with exactly two decimals, the way invoices show hour quantities.
impl std::fmt::Display for Hours {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.rounded().0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[test]
    fn test_hours_arithmetic() {
        let mut hours = Hours::new(dec!(10));
        hours -= Hours::new(dec!(2.5));
        assert_eq!(hours, Hours::new(dec!(7.5)));
        hours += Hours::new(dec!(0.25));
        assert_eq!(hours.value(), dec!(7.75));
        assert_eq!(-hours, Hours::new(dec!(-7.75)));
    }

    #[test]
    fn test_hours_sum() {
        let items = [Hours::new(dec!(1.5)), Hours::new(dec!(2)), Hours::new(dec!(0.5))];
        assert_eq!(items.iter().sum::<Hours>(), Hours::from_whole(4));
        assert_eq!(Vec::<Hours>::new().into_iter().sum::<Hours>(), Hours::ZERO);
    }

    #[test]
    fn test_hours_sign_helpers() {
        assert!(Hours::from_whole(1).is_positive());
        assert!(Hours::from_whole(-1).is_negative());
        assert!(Hours::ZERO.is_zero());
        assert!(!Hours::ZERO.is_positive());
        assert_eq!(Hours::from_whole(-3).max_zero(), Hours::ZERO);
        assert_eq!(Hours::from_whole(3).min_zero(), Hours::ZERO);
        assert_eq!(Hours::from_whole(-3).min_zero(), Hours::from_whole(-3));
    }

    #[rstest]
    #[case(dec!(6), "6.00")]
    #[case(dec!(0), "0.00")]
    #[case(dec!(-2), "-2.00")]
    #[case(dec!(1.5), "1.50")]
    #[case(dec!(0.125), "0.12")]
    fn test_hours_display_two_decimals(#[case] value: Decimal, #[case] expected: &str) {
        assert_eq!(Hours::new(value).to_string(), expected);
    }
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;

/// Money type with euro-cent precision (2 decimal places)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);
    pub const CENT: Money = Money(Decimal::from_parts(1, 0, 0, false, 2));

    /// create from decimal
    pub fn from_decimal(d: Decimal) -> Self {
        Money(d.round_dp(2))
    }

    /// create from string with exact parsing
    pub fn from_str_exact(s: &str) -> Result<Self, rust_decimal::Error> {
        Ok(Money(Decimal::from_str(s.trim())?.round_dp(2)))
    }

    /// create from whole currency units (euros)
    pub fn from_major(amount: i64) -> Self {
        Money(Decimal::from(amount))
    }

    /// create from cents
    pub fn from_minor(cents: i64) -> Self {
        Money(Decimal::from(cents) / Decimal::from(100))
    }

    /// get underlying decimal
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// check if zero
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// check if positive
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// check if negative
    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative()
    }

    /// absolute value
    pub fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// minimum of two values
    pub fn min(self, other: Self) -> Self {
        Money(self.0.min(other.0))
    }

    /// maximum of two values
    pub fn max(self, other: Self) -> Self {
        Money(self.0.max(other.0))
    }

    /// tolerance-aware equality: |self - other| <= tolerance
    ///
    /// Every monetary comparison in reconciliation goes through this; the
    /// tolerance absorbs bank rounding, never business adjustments.
    pub fn approx_eq(&self, other: Money, tolerance: Money) -> bool {
        (*self - other).abs() <= tolerance
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::from_str_exact(s)
    }
}

impl From<Decimal> for Money {
    fn from(d: Decimal) -> Self {
        Money::from_decimal(d)
    }
}

impl From<i32> for Money {
    fn from(i: i32) -> Self {
        Money::from_major(i as i64)
    }
}

impl From<u32> for Money {
    fn from(i: u32) -> Self {
        Money::from_major(i as i64)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, other: Money) -> Money {
        Money((self.0 + other.0).round_dp(2))
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, other: Money) {
        self.0 = (self.0 + other.0).round_dp(2);
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, other: Money) -> Money {
        Money((self.0 - other.0).round_dp(2))
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, other: Money) {
        self.0 = (self.0 - other.0).round_dp(2);
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_precision() {
        let m = Money::from_str_exact("100.129").unwrap();
        assert_eq!(m.to_string(), "100.13"); // rounded to cents
    }

    #[test]
    fn test_cent_arithmetic() {
        let a = Money::from_minor(7500); // 75.00
        let b = Money::from_major(75);
        assert_eq!(a, b);

        let c = a - Money::from_minor(1);
        assert_eq!(c.to_string(), "74.99");
    }

    #[test]
    fn test_approx_eq_boundary() {
        let tol = Money::from_str_exact("0.02").unwrap();
        let a = Money::from_major(30);

        assert!(a.approx_eq(Money::from_str_exact("30.02").unwrap(), tol));
        assert!(a.approx_eq(Money::from_str_exact("29.98").unwrap(), tol));
        assert!(!a.approx_eq(Money::from_str_exact("30.03").unwrap(), tol));
    }

    #[test]
    fn test_sum() {
        let total: Money = vec![
            Money::from_major(25),
            Money::from_major(30),
            Money::from_major(20),
        ]
        .into_iter()
        .sum();
        assert_eq!(total, Money::from_major(75));
    }
}

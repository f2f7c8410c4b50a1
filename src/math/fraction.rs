//! Exact rational arithmetic backing every amount and price in the crate.
//!
//! Fractions are never reduced: mixing denominators cross-multiplies, which
//! keeps the hot path in the route search free of GCD work. Comparison is
//! always done by cross-multiplication so no precision is lost to floats.

use std::cmp::Ordering;
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, Result};

/// Rounding applied when a fraction is rendered as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rounding {
    RoundDown,
    #[default]
    RoundHalfUp,
    RoundUp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fraction {
    pub numerator: BigInt,
    pub denominator: BigInt,
}

/// `10^exp` as a big integer.
pub fn pow10(exp: u32) -> BigInt {
    BigInt::from(10u32).pow(exp)
}

impl Fraction {
    pub fn new(numerator: impl Into<BigInt>, denominator: impl Into<BigInt>) -> Self {
        let denominator = denominator.into();
        debug_assert!(!denominator.is_zero(), "fraction denominator is zero");
        Self {
            numerator: numerator.into(),
            denominator,
        }
    }

    pub fn from_integer(value: impl Into<BigInt>) -> Self {
        Self::new(value, 1u32)
    }

    pub fn zero() -> Self {
        Self::from_integer(0u32)
    }

    pub fn one() -> Self {
        Self::from_integer(1u32)
    }

    /// Parse an exact decimal string such as `"0.0015"` or `"1200"`.
    ///
    /// Negative values are rejected: every user-facing price in the engine
    /// is a non-negative quantity.
    pub fn from_decimal_str(input: &str) -> Result<Self> {
        let parsed = BigDecimal::from_str(input.trim())
            .map_err(|e| AppError::PriceParseFailure(format!("{input:?}: {e}")))?;
        let (digits, scale) = parsed.as_bigint_and_exponent();
        if digits.is_negative() {
            return Err(AppError::PriceParseFailure(format!(
                "{input:?}: negative value"
            )));
        }
        let exp = u32::try_from(scale.unsigned_abs())
            .map_err(|_| AppError::PriceParseFailure(format!("{input:?}: exponent too large")))?;
        if scale >= 0 {
            Ok(Self::new(digits, pow10(exp)))
        } else {
            Ok(Self::from_integer(digits * pow10(exp)))
        }
    }

    pub fn is_zero(&self) -> bool {
        self.numerator.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        !self.numerator.is_zero() && self.numerator.is_negative() != self.denominator.is_negative()
    }

    /// Integer part, truncated toward zero.
    pub fn quotient(&self) -> BigInt {
        &self.numerator / &self.denominator
    }

    /// Smallest integer not below the value, for non-negative fractions.
    pub fn ceil(&self) -> BigInt {
        let q = self.quotient();
        if (&self.numerator % &self.denominator).is_zero() || self.is_negative() {
            q
        } else {
            q + 1
        }
    }

    pub fn remainder(&self) -> Fraction {
        Fraction::new(
            &self.numerator % &self.denominator,
            self.denominator.clone(),
        )
    }

    pub fn invert(&self) -> Fraction {
        Fraction::new(self.denominator.clone(), self.numerator.clone())
    }

    /// Render with `significant_digits` significant figures.
    ///
    /// Leading zeros of values below one do not count, so `1/300` at two
    /// digits is `0.0033`. Trailing fractional zeros are trimmed.
    pub fn to_significant(&self, significant_digits: u32, rounding: Rounding) -> String {
        debug_assert!(significant_digits > 0, "significant digits must be positive");
        let significant_digits = i64::from(significant_digits.max(1));
        let n = self.numerator.abs();
        let d = self.denominator.abs();
        if n.is_zero() {
            return "0".to_string();
        }

        let exponent = leading_exponent(&n, &d);
        let decimals = significant_digits - 1 - exponent;
        let body = if decimals >= 0 {
            let scaled = round_div(&(&n * pow10(decimals as u32)), &d, rounding);
            trim_fraction(format_scaled(&scaled, decimals as usize))
        } else {
            let factor = pow10((-decimals) as u32);
            let rounded = round_div(&n, &(&d * &factor), rounding);
            (rounded * factor).to_string()
        };

        if self.is_negative() {
            format!("-{body}")
        } else {
            body
        }
    }

    /// Render with exactly `decimal_places` fractional digits.
    pub fn to_fixed(&self, decimal_places: u32, rounding: Rounding) -> String {
        let n = self.numerator.abs();
        let d = self.denominator.abs();
        let scaled = round_div(&(&n * pow10(decimal_places)), &d, rounding);
        let body = format_scaled(&scaled, decimal_places as usize);
        if self.is_negative() && !scaled.is_zero() {
            format!("-{body}")
        } else {
            body
        }
    }

    fn add_ref(&self, other: &Fraction) -> Fraction {
        if self.denominator == other.denominator {
            return Fraction::new(
                &self.numerator + &other.numerator,
                self.denominator.clone(),
            );
        }
        Fraction::new(
            &self.numerator * &other.denominator + &other.numerator * &self.denominator,
            &self.denominator * &other.denominator,
        )
    }

    fn sub_ref(&self, other: &Fraction) -> Fraction {
        if self.denominator == other.denominator {
            return Fraction::new(
                &self.numerator - &other.numerator,
                self.denominator.clone(),
            );
        }
        Fraction::new(
            &self.numerator * &other.denominator - &other.numerator * &self.denominator,
            &self.denominator * &other.denominator,
        )
    }

    fn mul_ref(&self, other: &Fraction) -> Fraction {
        Fraction::new(
            &self.numerator * &other.numerator,
            &self.denominator * &other.denominator,
        )
    }

    fn div_ref(&self, other: &Fraction) -> Fraction {
        Fraction::new(
            &self.numerator * &other.denominator,
            &self.denominator * &other.numerator,
        )
    }
}

/// Power of ten of the leading digit of `n / d` (both positive).
fn leading_exponent(n: &BigInt, d: &BigInt) -> i64 {
    let int_part = n / d;
    if !int_part.is_zero() {
        return int_part.to_string().len() as i64 - 1;
    }
    let mut shifted = n.clone();
    let mut k = 0i64;
    while &shifted < d {
        shifted *= 10u32;
        k += 1;
    }
    -k
}

/// Non-negative integer division with explicit rounding.
fn round_div(num: &BigInt, den: &BigInt, rounding: Rounding) -> BigInt {
    let q = num / den;
    let r = num % den;
    if r.is_zero() {
        return q;
    }
    match rounding {
        Rounding::RoundDown => q,
        Rounding::RoundUp => q + 1,
        Rounding::RoundHalfUp => {
            if &r * 2u32 >= *den {
                q + 1
            } else {
                q
            }
        }
    }
}

fn format_scaled(value: &BigInt, decimals: usize) -> String {
    let digits = value.to_string();
    if decimals == 0 {
        return digits;
    }
    let padded = format!("{digits:0>width$}", width = decimals + 1);
    let split = padded.len() - decimals;
    format!("{}.{}", &padded[..split], &padded[split..])
}

fn trim_fraction(s: String) -> String {
    if !s.contains('.') {
        return s;
    }
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

impl PartialEq for Fraction {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Fraction {}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = &self.numerator * &other.denominator;
        let rhs = &other.numerator * &self.denominator;
        let ordering = lhs.cmp(&rhs);
        if self.denominator.is_negative() != other.denominator.is_negative() {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

impl From<BigInt> for Fraction {
    fn from(value: BigInt) -> Self {
        Fraction::from_integer(value)
    }
}

impl From<u64> for Fraction {
    fn from(value: u64) -> Self {
        Fraction::from_integer(value)
    }
}

impl Default for Fraction {
    fn default() -> Self {
        Fraction::zero()
    }
}

macro_rules! forward_binop {
    ($imp:ident, $method:ident, $inner:ident) => {
        impl $imp<&Fraction> for &Fraction {
            type Output = Fraction;
            fn $method(self, rhs: &Fraction) -> Fraction {
                self.$inner(rhs)
            }
        }

        impl $imp<&Fraction> for Fraction {
            type Output = Fraction;
            fn $method(self, rhs: &Fraction) -> Fraction {
                (&self).$inner(rhs)
            }
        }

        impl $imp<Fraction> for Fraction {
            type Output = Fraction;
            fn $method(self, rhs: Fraction) -> Fraction {
                (&self).$inner(&rhs)
            }
        }
    };
}

forward_binop!(Add, add, add_ref);
forward_binop!(Sub, sub, sub_ref);
forward_binop!(Mul, mul, mul_ref);
forward_binop!(Div, div, div_ref);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_cross_multiplies_without_reducing() {
        let a = Fraction::new(1, 10);
        let b = Fraction::new(4, 12);
        let sum = &a + &b;
        assert_eq!(sum.numerator, BigInt::from(52));
        assert_eq!(sum.denominator, BigInt::from(120));
        assert_eq!(&b - &a, Fraction::new(28, 120));
        assert_eq!(&a * &b, Fraction::new(4, 120));
        assert_eq!(&a / &b, Fraction::new(12, 40));
    }

    #[test]
    fn same_denominator_keeps_denominator() {
        let sum = Fraction::new(1, 7) + Fraction::new(3, 7);
        assert_eq!(sum.denominator, BigInt::from(7));
        assert_eq!(sum.numerator, BigInt::from(4));
    }

    #[test]
    fn comparison_is_exact() {
        assert!(Fraction::new(1, 3) < Fraction::new(334, 1000));
        assert!(Fraction::new(2, 4) == Fraction::new(1, 2));
        assert!(Fraction::new(5, 4) > Fraction::one());
        // negative denominators from inverting a negative value
        assert!(Fraction::new(1, -2) < Fraction::zero());
        assert!(Fraction::new(-1, -2) == Fraction::new(1, 2));
    }

    #[test]
    fn quotient_truncates_and_ceil_rounds_up() {
        assert_eq!(Fraction::new(8, 3).quotient(), BigInt::from(2));
        assert_eq!(Fraction::new(12, 4).quotient(), BigInt::from(3));
        assert_eq!(Fraction::new(8, 3).ceil(), BigInt::from(3));
        assert_eq!(Fraction::new(12, 4).ceil(), BigInt::from(3));
        assert_eq!(Fraction::new(8, 3).remainder(), Fraction::new(2, 3));
    }

    #[test]
    fn invert_swaps_terms() {
        let inv = Fraction::new(5, 12).invert();
        assert_eq!(inv.numerator, BigInt::from(12));
        assert_eq!(inv.denominator, BigInt::from(5));
    }

    #[test]
    fn to_significant_counts_after_leading_zeros() {
        assert_eq!(Fraction::new(1, 3).to_significant(3, Rounding::RoundHalfUp), "0.333");
        assert_eq!(Fraction::new(2, 3).to_significant(3, Rounding::RoundHalfUp), "0.667");
        assert_eq!(Fraction::new(2, 3).to_significant(3, Rounding::RoundDown), "0.666");
        assert_eq!(Fraction::new(1, 300).to_significant(2, Rounding::RoundHalfUp), "0.0033");
        assert_eq!(Fraction::new(12345, 1).to_significant(3, Rounding::RoundHalfUp), "12300");
        assert_eq!(Fraction::new(3, 2).to_significant(4, Rounding::RoundHalfUp), "1.5");
        assert_eq!(Fraction::new(9996, 1000).to_significant(3, Rounding::RoundHalfUp), "10");
        assert_eq!(Fraction::zero().to_significant(5, Rounding::RoundHalfUp), "0");
        assert_eq!(Fraction::new(-1, 4).to_significant(2, Rounding::RoundHalfUp), "-0.25");
    }

    #[test]
    fn to_fixed_pads_and_rounds() {
        assert_eq!(Fraction::new(1, 8).to_fixed(2, Rounding::RoundHalfUp), "0.13");
        assert_eq!(Fraction::new(1, 8).to_fixed(2, Rounding::RoundDown), "0.12");
        assert_eq!(Fraction::new(5, 1).to_fixed(3, Rounding::RoundHalfUp), "5.000");
        assert_eq!(Fraction::new(7, 2).to_fixed(0, Rounding::RoundHalfUp), "4");
    }

    #[test]
    fn parses_decimal_strings_exactly() {
        assert_eq!(Fraction::from_decimal_str("0.0015").unwrap(), Fraction::new(15, 10_000));
        assert_eq!(Fraction::from_decimal_str(" 1200 ").unwrap(), Fraction::from_integer(1200));
        assert_eq!(Fraction::from_decimal_str("1e3").unwrap(), Fraction::from_integer(1000));
        assert!(matches!(
            Fraction::from_decimal_str("abc"),
            Err(AppError::PriceParseFailure(_))
        ));
        assert!(matches!(
            Fraction::from_decimal_str("-1"),
            Err(AppError::PriceParseFailure(_))
        ));
    }
}

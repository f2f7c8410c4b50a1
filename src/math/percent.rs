use std::fmt;

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use super::fraction::{Fraction, Rounding};
use crate::errors::Result;

/// A ratio rendered as a percentage (`1/100` displays as `1`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Percent(Fraction);

impl Percent {
    pub fn new(numerator: impl Into<BigInt>, denominator: impl Into<BigInt>) -> Self {
        Self(Fraction::new(numerator, denominator))
    }

    /// Basis points out of 10_000, e.g. `100` is 1%.
    pub fn from_bps(bps: u32) -> Self {
        Self::new(bps, 10_000u32)
    }

    /// Parse a human percentage such as `"1.5"` (meaning 1.5%).
    pub fn from_decimal_str(input: &str) -> Result<Self> {
        let value = Fraction::from_decimal_str(input)?;
        Ok(Self(value / Fraction::from_integer(100u32)))
    }

    pub fn from_fraction(fraction: Fraction) -> Self {
        Self(fraction)
    }

    pub fn as_fraction(&self) -> &Fraction {
        &self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    /// Share of `amount` this percentage represents, rounded down.
    pub fn of(&self, amount: &BigInt) -> BigInt {
        (&self.0 * &Fraction::from_integer(amount.clone())).quotient()
    }

    pub fn to_significant(&self, significant_digits: u32, rounding: Rounding) -> String {
        self.scaled().to_significant(significant_digits, rounding)
    }

    pub fn to_fixed(&self, decimal_places: u32, rounding: Rounding) -> String {
        self.scaled().to_fixed(decimal_places, rounding)
    }

    fn scaled(&self) -> Fraction {
        &self.0 * &Fraction::from_integer(100u32)
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.to_significant(4, Rounding::RoundHalfUp))
    }
}

use std::fmt;

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use super::token::{Token, TokenAmount};
use crate::errors::{AppError, Result};
use crate::math::{Fraction, Rounding};

/// Quote tokens per base token, held on raw (smallest-unit) amounts.
///
/// The decimals scalar is applied by [`Price::adjusted`] only; composing
/// prices always works on the raw ratio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub base: Token,
    pub quote: Token,
    fraction: Fraction,
    scalar: Fraction,
}

impl Price {
    /// `numerator` quote units for every `denominator` base units.
    pub fn new(
        base: Token,
        quote: Token,
        denominator: impl Into<BigInt>,
        numerator: impl Into<BigInt>,
    ) -> Self {
        let scalar = Fraction::new(base.one_unit(), quote.one_unit());
        Self {
            base,
            quote,
            fraction: Fraction::new(numerator, denominator),
            scalar,
        }
    }

    pub fn from_fraction(base: Token, quote: Token, fraction: Fraction) -> Self {
        Self::new(base, quote, fraction.denominator, fraction.numerator)
    }

    pub fn raw(&self) -> &Fraction {
        &self.fraction
    }

    /// Human price: whole quote tokens per whole base token.
    pub fn adjusted(&self) -> Fraction {
        &self.fraction * &self.scalar
    }

    pub fn invert(&self) -> Price {
        Price::new(
            self.quote.clone(),
            self.base.clone(),
            self.fraction.numerator.clone(),
            self.fraction.denominator.clone(),
        )
    }

    /// Chain `self` (A→B) with `other` (B→C) into A→C.
    pub fn multiply(&self, other: &Price) -> Result<Price> {
        if self.quote != other.base {
            return Err(AppError::InvalidCurrency(format!(
                "cannot chain {}/{} with {}/{}",
                self.base, self.quote, other.base, other.quote
            )));
        }
        let fraction = &self.fraction * &other.fraction;
        Ok(Price::from_fraction(
            self.base.clone(),
            other.quote.clone(),
            fraction,
        ))
    }

    /// Convert an amount of the base token into the quote token.
    pub fn quote(&self, amount: &TokenAmount) -> Result<TokenAmount> {
        if amount.token != self.base {
            return Err(AppError::DiffToken {
                expected: self.base.address,
                actual: amount.token.address,
            });
        }
        let value = &self.fraction * &Fraction::from_integer(amount.raw.clone());
        Ok(TokenAmount::new(self.quote.clone(), value.quotient()))
    }

    pub fn to_significant(&self, significant_digits: u32) -> String {
        self.adjusted()
            .to_significant(significant_digits, Rounding::RoundHalfUp)
    }

    pub fn to_fixed(&self, decimal_places: u32) -> String {
        self.adjusted().to_fixed(decimal_places, Rounding::RoundHalfUp)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{}",
            self.to_significant(6),
            self.quote.symbol,
            self.base.symbol
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Address;

    fn token(n: u64, decimals: u8) -> Token {
        Token::new(Address::from_low_u64_be(n), decimals, format!("T{n}"), format!("Token {n}"))
    }

    #[test]
    fn adjusted_applies_decimals_only_at_render() {
        // 2000 USDC (6 dp) per 1 WETH (18 dp)
        let weth = token(1, 18);
        let usdc = token(2, 6);
        let p = Price::new(weth, usdc, BigInt::from(10u64).pow(18), 2_000_000_000u64);
        assert_eq!(p.adjusted(), Fraction::from_integer(2000));
        assert_eq!(p.raw(), &Fraction::new(2_000_000_000u64, BigInt::from(10u64).pow(18)));
        assert_eq!(p.to_significant(4), "2000");
        assert_eq!(p.invert().to_significant(2), "0.0005");
    }

    #[test]
    fn multiply_chains_matching_tokens() {
        let a = token(1, 18);
        let b = token(2, 18);
        let c = token(3, 18);
        let ab = Price::new(a.clone(), b.clone(), 1, 2);
        let bc = Price::new(b.clone(), c.clone(), 4, 3);
        let ac = ab.multiply(&bc).unwrap();
        assert_eq!(ac.base, a);
        assert_eq!(ac.quote, c);
        assert_eq!(ac.raw(), &Fraction::new(6, 4));
        assert!(matches!(bc.multiply(&ab), Err(AppError::InvalidCurrency(_))));
    }

    #[test]
    fn quote_converts_base_amounts() {
        let a = token(1, 18);
        let b = token(2, 18);
        let p = Price::new(a.clone(), b.clone(), 3, 7);
        let out = p.quote(&TokenAmount::new(a, 10)).unwrap();
        assert_eq!(out.token, b);
        assert_eq!(out.raw, BigInt::from(23));
        assert!(p.quote(&TokenAmount::new(b, 1)).is_err());
    }
}

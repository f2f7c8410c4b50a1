use std::fmt;
use std::hash::{Hash, Hasher};

use ethers::types::Address;
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, Result};
use crate::math::{Fraction, Rounding, pow10};

/// ERC-20 token (or the chain's native coin, addressed by its wrapped
/// contract). Identity is the address alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub address: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    /// Native coin routed through its wrapped contract (e.g. ETH via WETH).
    #[serde(default)]
    pub is_native: bool,
}

impl Token {
    pub fn new(
        address: Address,
        decimals: u8,
        symbol: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            address,
            symbol: symbol.into(),
            name: name.into(),
            decimals,
            is_native: false,
        }
    }

    pub fn native(
        wrapped: Address,
        decimals: u8,
        symbol: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            is_native: true,
            ..Self::new(wrapped, decimals, symbol, name)
        }
    }

    /// Canonical pair ordering: lower address is token0.
    pub fn sorts_before(&self, other: &Token) -> bool {
        self.address < other.address
    }

    /// Raw amount of one whole token.
    pub fn one_unit(&self) -> BigInt {
        pow10(u32::from(self.decimals))
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol)
    }
}

/// Amount of a token in its smallest unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    pub token: Token,
    pub raw: BigInt,
}

impl TokenAmount {
    pub fn new(token: Token, raw: impl Into<BigInt>) -> Self {
        Self {
            token,
            raw: raw.into(),
        }
    }

    /// Parse a human amount (`"1.5"`), truncating below the token's
    /// smallest unit.
    pub fn from_decimal_str(token: Token, input: &str) -> Result<Self> {
        let value = Fraction::from_decimal_str(input)?;
        let raw = (&value * &Fraction::from_integer(token.one_unit())).quotient();
        Ok(Self::new(token, raw))
    }

    /// `raw / 10^decimals`.
    pub fn as_fraction(&self) -> Fraction {
        Fraction::new(self.raw.clone(), self.token.one_unit())
    }

    pub fn is_zero(&self) -> bool {
        self.raw.is_zero()
    }

    pub fn add(&self, other: &TokenAmount) -> Result<TokenAmount> {
        self.ensure_same_token(other)?;
        Ok(TokenAmount::new(self.token.clone(), &self.raw + &other.raw))
    }

    pub fn subtract(&self, other: &TokenAmount) -> Result<TokenAmount> {
        self.ensure_same_token(other)?;
        let raw = &self.raw - &other.raw;
        if raw.is_negative() {
            return Err(AppError::InsufficientInputAmount);
        }
        Ok(TokenAmount::new(self.token.clone(), raw))
    }

    pub fn to_significant(&self, significant_digits: u32) -> String {
        self.as_fraction()
            .to_significant(significant_digits, Rounding::RoundDown)
    }

    /// Full precision decimal rendering.
    pub fn to_exact(&self) -> String {
        self.as_fraction()
            .to_fixed(u32::from(self.token.decimals), Rounding::RoundDown)
    }

    fn ensure_same_token(&self, other: &TokenAmount) -> Result<()> {
        if self.token != other.token {
            return Err(AppError::InvalidCurrency(format!(
                "{} vs {}",
                self.token, other.token
            )));
        }
        Ok(())
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_significant(6), self.token.symbol)
    }
}

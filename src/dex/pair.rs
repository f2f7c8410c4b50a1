use ethers::types::{Address, H256};
use ethers::utils::{get_create2_address_from_hash, keccak256};
use num_bigint::BigInt;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use super::calc::{get_amount_in, get_amount_out};
use super::price::Price;
use super::token::{Token, TokenAmount};
use crate::errors::{AppError, Result};

/// Snapshot of a constant-product pool's reserves.
///
/// Reserves are kept in canonical order: `reserves[0]` holds the token with
/// the lower address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    pub liquidity_token: Token,
    reserves: [TokenAmount; 2],
}

impl Pair {
    pub fn new(address: Address, amount_a: TokenAmount, amount_b: TokenAmount) -> Result<Self> {
        if amount_a.token == amount_b.token {
            return Err(AppError::InvalidPairs(format!(
                "pair {address:?} holds {} on both sides",
                amount_a.token
            )));
        }
        let reserves = if amount_a.token.sorts_before(&amount_b.token) {
            [amount_a, amount_b]
        } else {
            [amount_b, amount_a]
        };
        let symbol = format!("{}-{}", reserves[0].token.symbol, reserves[1].token.symbol);
        Ok(Self {
            liquidity_token: Token::new(address, 18, "UNI-V2", symbol),
            reserves,
        })
    }

    /// CREATE2 address of the pool for two tokens on a factory.
    pub fn compute_address(
        factory: Address,
        init_code_hash: H256,
        token_a: &Token,
        token_b: &Token,
    ) -> Address {
        let (t0, t1) = if token_a.sorts_before(token_b) {
            (token_a, token_b)
        } else {
            (token_b, token_a)
        };
        let mut packed = Vec::with_capacity(40);
        packed.extend_from_slice(t0.address.as_bytes());
        packed.extend_from_slice(t1.address.as_bytes());
        get_create2_address_from_hash(factory, keccak256(packed), init_code_hash)
    }

    pub fn address(&self) -> Address {
        self.liquidity_token.address
    }

    pub fn token0(&self) -> &Token {
        &self.reserves[0].token
    }

    pub fn token1(&self) -> &Token {
        &self.reserves[1].token
    }

    pub fn reserve0(&self) -> &TokenAmount {
        &self.reserves[0]
    }

    pub fn reserve1(&self) -> &TokenAmount {
        &self.reserves[1]
    }

    pub fn involves_token(&self, token: &Token) -> bool {
        token == self.token0() || token == self.token1()
    }

    pub fn has_empty_reserve(&self) -> bool {
        self.reserves[0].raw.is_zero() || self.reserves[1].raw.is_zero()
    }

    pub fn reserve_of(&self, token: &Token) -> Result<&TokenAmount> {
        Ok(&self.reserves[self.index_of(token)?])
    }

    /// The token on the other side of `token`.
    pub fn other_token(&self, token: &Token) -> Result<&Token> {
        Ok(&self.reserves[1 - self.index_of(token)?].token)
    }

    /// Spot price of token0 in terms of token1.
    pub fn token0_price(&self) -> Price {
        Price::new(
            self.token0().clone(),
            self.token1().clone(),
            self.reserves[0].raw.clone(),
            self.reserves[1].raw.clone(),
        )
    }

    /// Spot price of token1 in terms of token0.
    pub fn token1_price(&self) -> Price {
        Price::new(
            self.token1().clone(),
            self.token0().clone(),
            self.reserves[1].raw.clone(),
            self.reserves[0].raw.clone(),
        )
    }

    pub fn price_of(&self, token: &Token) -> Result<Price> {
        match self.index_of(token)? {
            0 => Ok(self.token0_price()),
            _ => Ok(self.token1_price()),
        }
    }

    /// Swap an exact input through the pool.
    ///
    /// Returns the output and the pool as it would look after the swap.
    pub fn get_output_amount(
        &self,
        input: &TokenAmount,
        fee_retained_bps: u32,
    ) -> Result<(TokenAmount, Pair)> {
        let idx_in = self.index_of(&input.token)?;
        let reserve_in = &self.reserves[idx_in];
        let reserve_out = &self.reserves[1 - idx_in];
        if reserve_in.is_zero() || reserve_out.is_zero() {
            return Err(AppError::InsufficientReserves);
        }
        let raw_out = get_amount_out(&input.raw, &reserve_in.raw, &reserve_out.raw, fee_retained_bps)?;
        let output = TokenAmount::new(reserve_out.token.clone(), raw_out);
        let next = self.with_reserves(
            TokenAmount::new(reserve_in.token.clone(), &reserve_in.raw + &input.raw),
            TokenAmount::new(reserve_out.token.clone(), &reserve_out.raw - &output.raw),
        );
        Ok((output, next))
    }

    /// Input needed to take an exact output out of the pool.
    pub fn get_input_amount(
        &self,
        output: &TokenAmount,
        fee_retained_bps: u32,
    ) -> Result<(TokenAmount, Pair)> {
        let idx_out = self.index_of(&output.token)?;
        let reserve_out = &self.reserves[idx_out];
        let reserve_in = &self.reserves[1 - idx_out];
        let raw_in = get_amount_in(&output.raw, &reserve_in.raw, &reserve_out.raw, fee_retained_bps)?;
        let input = TokenAmount::new(reserve_in.token.clone(), raw_in);
        let next = self.with_reserves(
            TokenAmount::new(reserve_in.token.clone(), &reserve_in.raw + &input.raw),
            TokenAmount::new(reserve_out.token.clone(), &reserve_out.raw - &output.raw),
        );
        Ok((input, next))
    }

    /// Constant-product invariant `reserve0 * reserve1`.
    pub fn k(&self) -> BigInt {
        &self.reserves[0].raw * &self.reserves[1].raw
    }

    fn with_reserves(&self, a: TokenAmount, b: TokenAmount) -> Pair {
        let reserves = if a.token.sorts_before(&b.token) { [a, b] } else { [b, a] };
        Pair {
            liquidity_token: self.liquidity_token.clone(),
            reserves,
        }
    }

    fn index_of(&self, token: &Token) -> Result<usize> {
        if token == self.token0() {
            Ok(0)
        } else if token == self.token1() {
            Ok(1)
        } else {
            Err(AppError::InvalidCurrency(format!(
                "{token} is not part of pair {:?}",
                self.address()
            )))
        }
    }
}

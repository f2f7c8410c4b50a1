use serde::{Deserialize, Serialize};

use super::pair::Pair;
use super::price::Price;
use super::route::Route;
use super::token::TokenAmount;
use crate::errors::{AppError, Result};
use crate::math::{Fraction, Percent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeType {
    ExactIn,
    ExactOut,
}

/// A swap over a route, priced against the route's current reserves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub route: Route,
    pub kind: TradeType,
    pub input_amount: TokenAmount,
    pub output_amount: TokenAmount,
    pub execution_price: Price,
    pub next_mid_price: Price,
    pub price_impact: Percent,
}

impl Trade {
    pub fn exact_in(route: Route, amount_in: TokenAmount, fee_retained_bps: u32) -> Result<Self> {
        Self::new(route, amount_in, TradeType::ExactIn, fee_retained_bps)
    }

    pub fn exact_out(route: Route, amount_out: TokenAmount, fee_retained_bps: u32) -> Result<Self> {
        Self::new(route, amount_out, TradeType::ExactOut, fee_retained_bps)
    }

    pub fn new(
        route: Route,
        amount: TokenAmount,
        kind: TradeType,
        fee_retained_bps: u32,
    ) -> Result<Self> {
        let hops = route.pairs.len();
        let mut amounts: Vec<Option<TokenAmount>> = vec![None; hops + 1];
        let mut next_pairs: Vec<Option<Pair>> = vec![None; hops];

        match kind {
            TradeType::ExactIn => {
                if amount.token != route.input {
                    return Err(AppError::DiffToken {
                        expected: route.input.address,
                        actual: amount.token.address,
                    });
                }
                let mut current = amount.clone();
                amounts[0] = Some(amount);
                for (i, pair) in route.pairs.iter().enumerate() {
                    let (out, next) = pair.get_output_amount(&current, fee_retained_bps)?;
                    next_pairs[i] = Some(next);
                    amounts[i + 1] = Some(out.clone());
                    current = out;
                }
            }
            TradeType::ExactOut => {
                if amount.token != route.output {
                    return Err(AppError::DiffToken {
                        expected: route.output.address,
                        actual: amount.token.address,
                    });
                }
                let mut current = amount.clone();
                amounts[hops] = Some(amount);
                for (i, pair) in route.pairs.iter().enumerate().rev() {
                    let (input, next) = pair.get_input_amount(&current, fee_retained_bps)?;
                    next_pairs[i] = Some(next);
                    amounts[i] = Some(input.clone());
                    current = input;
                }
            }
        }

        let input_amount = amounts[0]
            .take()
            .ok_or_else(|| AppError::Other("trade walk left input unset".into()))?;
        let output_amount = amounts[hops]
            .take()
            .ok_or_else(|| AppError::Other("trade walk left output unset".into()))?;
        let next_pairs: Vec<Pair> = next_pairs.into_iter().flatten().collect();

        let execution_price = Price::new(
            input_amount.token.clone(),
            output_amount.token.clone(),
            input_amount.raw.clone(),
            output_amount.raw.clone(),
        );
        let next_mid_price = Route::new(
            next_pairs,
            route.input.clone(),
            Some(route.output.clone()),
        )?
        .mid_price;
        let price_impact = compute_price_impact(&route.mid_price, &input_amount, &output_amount)?;

        Ok(Self {
            route,
            kind,
            input_amount,
            output_amount,
            execution_price,
            next_mid_price,
            price_impact,
        })
    }

    /// Least output acceptable under `tolerance`.
    pub fn minimum_amount_out(&self, tolerance: &Percent) -> Result<TokenAmount> {
        if tolerance.is_negative() {
            return Err(AppError::InvalidSlippageTolerance);
        }
        match self.kind {
            TradeType::ExactOut => Ok(self.output_amount.clone()),
            TradeType::ExactIn => {
                let factor = (Fraction::one() + tolerance.as_fraction()).invert();
                let raw = (&factor * &Fraction::from_integer(self.output_amount.raw.clone())).quotient();
                Ok(TokenAmount::new(self.output_amount.token.clone(), raw))
            }
        }
    }

    /// Most input spendable under `tolerance`, rounded up.
    pub fn maximum_amount_in(&self, tolerance: &Percent) -> Result<TokenAmount> {
        if tolerance.is_negative() {
            return Err(AppError::InvalidSlippageTolerance);
        }
        match self.kind {
            TradeType::ExactIn => Ok(self.input_amount.clone()),
            TradeType::ExactOut => {
                let factor = Fraction::one() + tolerance.as_fraction();
                let raw = (&factor * &Fraction::from_integer(self.input_amount.raw.clone())).ceil();
                Ok(TokenAmount::new(self.input_amount.token.clone(), raw))
            }
        }
    }

    /// Execution price of the slippage-bounded amounts.
    pub fn worst_execution_price(&self, tolerance: &Percent) -> Result<Price> {
        let input = self.maximum_amount_in(tolerance)?;
        let output = self.minimum_amount_out(tolerance)?;
        Ok(Price::new(input.token, output.token, input.raw, output.raw))
    }

    pub fn hops(&self) -> usize {
        self.route.hops()
    }
}

/// `(mid * input - output) / (mid * input)`.
fn compute_price_impact(
    mid_price: &Price,
    input: &TokenAmount,
    output: &TokenAmount,
) -> Result<Percent> {
    let exact_quote = mid_price.raw() * &Fraction::from_integer(input.raw.clone());
    if exact_quote.is_zero() {
        return Err(AppError::InsufficientReserves);
    }
    let output = Fraction::from_integer(output.raw.clone());
    let impact = (&exact_quote - &output) / exact_quote;
    Ok(Percent::from_fraction(impact))
}

//! Constant-product (x * y = k) swap formulas on raw reserves.
//!
//! Fees are expressed as the share of the input the pool keeps working
//! with, in basis points out of [`FEE_DENOMINATOR`] (9970 = 0.30% fee).

use num_bigint::BigInt;
use num_traits::{Signed, Zero};

use crate::errors::{AppError, Result};

pub const FEE_DENOMINATOR: u32 = 10_000;

/// Default UniswapV2-style fee: 0.30%.
pub const DEFAULT_FEE_RETAINED_BPS: u32 = 9_970;

/// Output for an exact input, rounded down.
///
/// `floor(in * fee * reserve_out / (reserve_in * 10000 + in * fee))`
pub fn get_amount_out(
    amount_in: &BigInt,
    reserve_in: &BigInt,
    reserve_out: &BigInt,
    fee_retained_bps: u32,
) -> Result<BigInt> {
    if reserve_in.is_zero() || reserve_out.is_zero() {
        return Err(AppError::InsufficientReserves);
    }
    if !amount_in.is_positive() {
        return Err(AppError::InsufficientInputAmount);
    }
    let input_with_fee = amount_in * fee_retained_bps;
    let numerator = &input_with_fee * reserve_out;
    let denominator = reserve_in * FEE_DENOMINATOR + &input_with_fee;
    let amount_out = numerator / denominator;
    if amount_out.is_zero() {
        return Err(AppError::InsufficientInputAmount);
    }
    Ok(amount_out)
}

/// Input required for an exact output, rounded up so the output is
/// always reachable.
///
/// `reserve_in * out * 10000 / ((reserve_out - out) * fee) + 1`
pub fn get_amount_in(
    amount_out: &BigInt,
    reserve_in: &BigInt,
    reserve_out: &BigInt,
    fee_retained_bps: u32,
) -> Result<BigInt> {
    if reserve_in.is_zero() || reserve_out.is_zero() || amount_out >= reserve_out {
        return Err(AppError::InsufficientReserves);
    }
    if !amount_out.is_positive() {
        return Err(AppError::InsufficientInputAmount);
    }
    let numerator = reserve_in * amount_out * FEE_DENOMINATOR;
    let denominator = (reserve_out - amount_out) * fee_retained_bps;
    Ok(numerator / denominator + 1u32)
}

//! Standing buy and sell conditions and their trigger rules.
//!
//! Prices are always token0 per token1, decimals-adjusted, so a buy target
//! and a sell target on the same session compare against the same scale.

use ethers::types::{Address, TxHash};
use num_bigint::BigInt;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::dex::{Route, Trade, TradeType, TokenAmount};
use crate::errors::{AppError, Result};
use crate::math::{Fraction, Percent};

/// Default slippage tolerance, 1.00%.
pub const DEFAULT_SLIPPAGE_BPS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    /// Spend token0, receive token1.
    Buy,
    /// Spend token1, receive token0.
    Sell,
}

/// Which side of the swap the target's amount fixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AmountMode {
    #[default]
    In,
    Out,
}

impl AmountMode {
    pub fn trade_type(self) -> TradeType {
        match self {
            AmountMode::In => TradeType::ExactIn,
            AmountMode::Out => TradeType::ExactOut,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetAmount {
    /// Raw units of the token the amount mode points at.
    Exact(BigInt),
    /// Share of the wallet's balance of the input token.
    PercentOfBalance(Percent),
    /// Share of everything bought so far in the session (sells only).
    PercentOfBought(Percent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TargetState {
    #[default]
    Pending,
    Hit,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasSettings {
    /// Wei per gas; `None` lets the client decide.
    pub gas_price: Option<BigInt>,
    pub gas_limit: Option<BigInt>,
    /// Seconds the router accepts the swap after submission.
    pub deadline_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub kind: TargetKind,
    /// Trigger price; zero fires on the first tick.
    pub price: Fraction,
    /// Offset from the average buy price. When set, `price` is derived by
    /// rebalancing and the target stays idle until it has been.
    #[serde(default)]
    pub price_percent: Option<Percent>,
    pub amount: TargetAmount,
    #[serde(default)]
    pub amount_mode: AmountMode,
    pub slippage_bps: u32,
    #[serde(default)]
    pub stop_loss: bool,
    #[serde(default)]
    pub gas: GasSettings,
    #[serde(default)]
    pub state: TargetState,

    // filled when the target fires
    #[serde(default)]
    pub resolved_amount: Option<BigInt>,
    /// Minimum output (exact in) or maximum input (exact out).
    #[serde(default)]
    pub amount_min_max: Option<BigInt>,
    #[serde(default)]
    pub execution_price: Option<Fraction>,
    #[serde(default)]
    pub path: Vec<Address>,
    #[serde(default)]
    pub tx_hash: Option<TxHash>,
}

impl Target {
    pub fn buy(price: Fraction, amount: TargetAmount) -> Self {
        Self::new(TargetKind::Buy, price, amount)
    }

    pub fn sell(price: Fraction, amount: TargetAmount) -> Self {
        Self::new(TargetKind::Sell, price, amount)
    }

    fn new(kind: TargetKind, price: Fraction, amount: TargetAmount) -> Self {
        Self {
            kind,
            price,
            price_percent: None,
            amount,
            amount_mode: AmountMode::In,
            slippage_bps: DEFAULT_SLIPPAGE_BPS,
            stop_loss: false,
            gas: GasSettings {
                deadline_secs: 1200,
                ..GasSettings::default()
            },
            state: TargetState::Pending,
            resolved_amount: None,
            amount_min_max: None,
            execution_price: None,
            path: Vec::new(),
            tx_hash: None,
        }
    }

    pub fn with_price_percent(mut self, percent: Percent) -> Self {
        self.price_percent = Some(percent);
        self.price = Fraction::zero();
        self
    }

    pub fn with_amount_mode(mut self, mode: AmountMode) -> Self {
        self.amount_mode = mode;
        self
    }

    pub fn with_slippage_bps(mut self, bps: u32) -> Self {
        self.slippage_bps = bps;
        self
    }

    pub fn with_stop_loss(mut self) -> Self {
        self.stop_loss = true;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.state == TargetState::Pending
    }

    /// An offset target has no price until the first rebalance.
    pub fn is_armed(&self) -> bool {
        self.price_percent.is_none() || !self.price.is_zero()
    }

    pub fn slippage(&self) -> Percent {
        Percent::from_bps(self.slippage_bps)
    }

    /// Quote the target along `route` and record the trigger-time fields.
    ///
    /// `route` must lead from the target's input token to its output token.
    pub fn fill_from_route(
        &mut self,
        route: &Route,
        amount: BigInt,
        fee_retained_bps: u32,
    ) -> Result<Trade> {
        if amount.is_zero() {
            return Err(AppError::NilAmount);
        }
        let kind = self.amount_mode.trade_type();
        let token = match kind {
            TradeType::ExactIn => route.input.clone(),
            TradeType::ExactOut => route.output.clone(),
        };
        let trade = Trade::new(
            route.clone(),
            TokenAmount::new(token, amount.clone()),
            kind,
            fee_retained_bps,
        )?;
        let bound = match kind {
            TradeType::ExactIn => trade.minimum_amount_out(&self.slippage())?,
            TradeType::ExactOut => trade.maximum_amount_in(&self.slippage())?,
        };
        let price = match self.kind {
            TargetKind::Buy => trade.execution_price.invert().adjusted(),
            TargetKind::Sell => trade.execution_price.adjusted(),
        };

        self.resolved_amount = Some(amount);
        self.amount_min_max = Some(bound.raw);
        self.execution_price = Some(price);
        self.path = route.path.iter().map(|t| t.address).collect();
        Ok(trade)
    }

    /// Back to `Pending`, dropping anything recorded when it fired.
    pub fn reset(&mut self) {
        self.state = TargetState::Pending;
        self.amount_min_max = None;
        self.execution_price = None;
        self.path.clear();
        self.tx_hash = None;
    }
}

/// Buy on the dip: fires at or below the target price.
pub fn evaluate_buy(target: &Target, current_price: &Fraction) -> bool {
    target.price.is_zero() || *current_price <= target.price
}

/// Take profit at or above the target price; a stop-loss fires at or below.
pub fn evaluate_sell(target: &Target, current_price: &Fraction, is_stop_loss: bool) -> bool {
    if target.price.is_zero() {
        return true;
    }
    if is_stop_loss {
        *current_price <= target.price
    } else {
        *current_price >= target.price
    }
}

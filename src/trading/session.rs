use ethers::types::{Address, TxHash};
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use serde::{Deserialize, Serialize};

use super::feed::FeedAmount;
use super::swap::Settlement;
use super::target::{AmountMode, Target, TargetAmount, TargetKind, TargetState};
use crate::dex::Token;
use crate::errors::{AppError, Result};
use crate::math::Fraction;
use crate::models::{Dex, Network};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionPhase {
    #[default]
    AwaitingInitialPrice,
    Active,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetId {
    pub kind: TargetKind,
    pub index: usize,
}

impl TargetId {
    pub fn buy(index: usize) -> Self {
        Self {
            kind: TargetKind::Buy,
            index,
        }
    }

    pub fn sell(index: usize) -> Self {
        Self {
            kind: TargetKind::Sell,
            index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionReason {
    StopLoss,
    BuysFilled,
    SellsFilled,
}

/// One trading session over the token0/token1 market.
///
/// Buys spend token0 for token1; sells spend token1 for token0. The
/// accumulators change only when a swap confirms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeSession {
    pub token0: Token,
    pub token1: Token,
    pub dex: Dex,
    pub network: Network,
    pub wallet: Address,
    pub buy_targets: Vec<Target>,
    pub sell_targets: Vec<Target>,
    /// token1 currently held from this session's buys.
    pub amount_in_trade: BigInt,
    /// token1 received over all buys.
    pub total_bought: BigInt,
    /// token0 spent over all buys.
    pub total_spent: BigInt,
    /// token0 received over all sells.
    #[serde(default)]
    pub total_received: BigInt,
    pub buy_hit_count: u32,
    pub sell_hit_count: u32,
    pub init_price: Option<Fraction>,
    #[serde(default)]
    pub phase: SessionPhase,
}

impl TradeSession {
    pub fn new(
        token0: Token,
        token1: Token,
        dex: Dex,
        network: Network,
        wallet: Address,
        buy_targets: Vec<Target>,
        sell_targets: Vec<Target>,
    ) -> Result<Self> {
        let session = Self {
            token0,
            token1,
            dex,
            network,
            wallet,
            buy_targets,
            sell_targets,
            amount_in_trade: BigInt::zero(),
            total_bought: BigInt::zero(),
            total_spent: BigInt::zero(),
            total_received: BigInt::zero(),
            buy_hit_count: 0,
            sell_hit_count: 0,
            init_price: None,
            phase: SessionPhase::AwaitingInitialPrice,
        };
        session.validate()?;
        Ok(session)
    }

    pub fn validate(&self) -> Result<()> {
        if self.token0 == self.token1 {
            return Err(AppError::InvalidOption("token0 and token1 must differ".into()));
        }
        if self.buy_targets.is_empty() && self.sell_targets.is_empty() {
            return Err(AppError::InvalidOption("session has no targets".into()));
        }
        let all = self
            .buy_targets
            .iter()
            .map(|t| (TargetKind::Buy, t))
            .chain(self.sell_targets.iter().map(|t| (TargetKind::Sell, t)));
        for (kind, target) in all {
            if target.kind != kind {
                return Err(AppError::InvalidOption(format!(
                    "{:?} target listed with {kind:?} targets",
                    target.kind
                )));
            }
            if target.price.is_negative() {
                return Err(AppError::InvalidOption("target price is negative".into()));
            }
            match &target.amount {
                TargetAmount::Exact(raw) if !raw.is_positive() => {
                    return Err(AppError::NilAmount);
                }
                TargetAmount::PercentOfBought(_) if kind == TargetKind::Buy => {
                    return Err(AppError::InvalidOption(
                        "buys cannot size from the amount bought".into(),
                    ));
                }
                TargetAmount::PercentOfBalance(_) | TargetAmount::PercentOfBought(_)
                    if target.amount_mode != AmountMode::In =>
                {
                    return Err(AppError::InvalidOption(
                        "percentage amounts size the input side".into(),
                    ));
                }
                _ => {}
            }
            if target.stop_loss && kind == TargetKind::Buy {
                return Err(AppError::InvalidOption("only sells can be stop-losses".into()));
            }
            if let Some(offset) = &target.price_percent {
                if kind == TargetKind::Buy {
                    return Err(AppError::InvalidOption(
                        "only sells can be priced from the average buy".into(),
                    ));
                }
                if offset.is_negative() {
                    return Err(AppError::InvalidOption("price offset is negative".into()));
                }
                if target.stop_loss && *offset.as_fraction() >= Fraction::one() {
                    return Err(AppError::InvalidOption(
                        "stop-loss offset must stay below 100%".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn targets(&self, kind: TargetKind) -> &[Target] {
        match kind {
            TargetKind::Buy => &self.buy_targets,
            TargetKind::Sell => &self.sell_targets,
        }
    }

    pub fn targets_mut(&mut self, kind: TargetKind) -> &mut Vec<Target> {
        match kind {
            TargetKind::Buy => &mut self.buy_targets,
            TargetKind::Sell => &mut self.sell_targets,
        }
    }

    pub fn target(&self, id: TargetId) -> Result<&Target> {
        self.targets(id.kind)
            .get(id.index)
            .ok_or_else(|| AppError::Other(format!("no {:?} target #{}", id.kind, id.index)))
    }

    pub fn target_mut(&mut self, id: TargetId) -> Result<&mut Target> {
        self.targets_mut(id.kind)
            .get_mut(id.index)
            .ok_or_else(|| AppError::Other(format!("no {:?} target #{}", id.kind, id.index)))
    }

    /// Token spent and token received by a target of `kind`.
    pub fn sides(&self, kind: TargetKind) -> (&Token, &Token) {
        match kind {
            TargetKind::Buy => (&self.token0, &self.token1),
            TargetKind::Sell => (&self.token1, &self.token0),
        }
    }

    pub fn mark_hit(&mut self, id: TargetId) -> Result<()> {
        self.target_mut(id)?.state = TargetState::Hit;
        match id.kind {
            TargetKind::Buy => self.buy_hit_count += 1,
            TargetKind::Sell => self.sell_hit_count += 1,
        }
        Ok(())
    }

    /// Undo [`TradeSession::mark_hit`] for a target that could not be filled.
    pub fn unmark_hit(&mut self, id: TargetId) -> Result<()> {
        self.target_mut(id)?.reset();
        let count = match id.kind {
            TargetKind::Buy => &mut self.buy_hit_count,
            TargetKind::Sell => &mut self.sell_hit_count,
        };
        *count = count.saturating_sub(1);
        Ok(())
    }

    pub fn has_unconfirmed_buy(&self) -> bool {
        self.buy_targets.iter().any(|t| t.state == TargetState::Hit)
    }

    /// Raw token1 a percent-of-bought sell would spend, or `None` while
    /// the bought total is unknown or empty.
    pub fn bought_share(&self, amount: &TargetAmount) -> Option<BigInt> {
        let TargetAmount::PercentOfBought(percent) = amount else {
            return None;
        };
        if self.has_unconfirmed_buy() || !self.total_bought.is_positive() {
            return None;
        }
        Some(percent.of(&self.total_bought))
    }

    /// Mean quoted price of the buys that have fired, token0 per token1.
    pub fn average_buy_price(&self) -> Option<Fraction> {
        let prices: Vec<&Fraction> = self
            .buy_targets
            .iter()
            .filter(|t| matches!(t.state, TargetState::Hit | TargetState::Confirmed))
            .filter_map(|t| t.execution_price.as_ref())
            .collect();
        if prices.is_empty() {
            return None;
        }
        let count = prices.len();
        let sum = prices
            .into_iter()
            .fold(Fraction::zero(), |acc, price| acc + price);
        Some(sum / Fraction::from(count as u64))
    }

    /// Re-derive offset prices and bought-share amounts of pending sells.
    pub fn rebalance_sell_targets(&mut self) {
        let average = self.average_buy_price();
        let total_bought = self.total_bought.clone();
        for target in self.sell_targets.iter_mut().filter(|t| t.is_pending()) {
            if let (Some(offset), Some(average)) = (&target.price_percent, &average) {
                let factor = if target.stop_loss {
                    Fraction::one() - offset.as_fraction()
                } else {
                    Fraction::one() + offset.as_fraction()
                };
                target.price = average * &factor;
            }
            if let TargetAmount::PercentOfBought(percent) = &target.amount {
                target.resolved_amount = Some(percent.of(&total_bought));
            }
        }
    }

    /// Book a confirmed swap into the accumulators.
    pub fn apply_settlement(&mut self, id: TargetId, settlement: &Settlement) -> Result<()> {
        let target = self.target_mut(id)?;
        target.state = TargetState::Confirmed;
        target.tx_hash = Some(settlement.tx_hash);
        match id.kind {
            TargetKind::Buy => {
                self.total_spent += &settlement.amount_in;
                self.total_bought += &settlement.amount_out;
                self.amount_in_trade += &settlement.amount_out;
            }
            TargetKind::Sell => {
                let remaining = &self.amount_in_trade - &settlement.amount_in;
                self.amount_in_trade = if remaining.is_negative() {
                    BigInt::zero()
                } else {
                    remaining
                };
                self.total_received += &settlement.amount_out;
            }
        }
        Ok(())
    }

    pub fn completion(&self) -> Option<CompletionReason> {
        let confirmed = |t: &Target| t.state == TargetState::Confirmed;
        if self.sell_targets.iter().any(|t| t.stop_loss && confirmed(t)) {
            return Some(CompletionReason::StopLoss);
        }
        if self.sell_targets.is_empty()
            && !self.buy_targets.is_empty()
            && self.buy_targets.iter().all(confirmed)
        {
            return Some(CompletionReason::BuysFilled);
        }
        let mut required = self.sell_targets.iter().filter(|t| !t.stop_loss).peekable();
        if required.peek().is_some() && required.all(confirmed) {
            return Some(CompletionReason::SellsFilled);
        }
        None
    }

    /// Amount the feed should quote for the next pending target of `kind`.
    pub fn next_feed_amount(&self, kind: TargetKind) -> Option<FeedAmount> {
        let target = self.targets(kind).iter().find(|t| t.is_pending())?;
        let raw = match &target.amount {
            TargetAmount::Exact(raw) => raw.clone(),
            TargetAmount::PercentOfBought(_) | TargetAmount::PercentOfBalance(_) => {
                target.resolved_amount.clone()?
            }
        };
        Some(FeedAmount {
            kind: target.amount_mode.trade_type(),
            raw,
        })
    }

    /// Prepare a reloaded session: fired targets that never reached the
    /// chain go back to pending, submitted ones are returned for receipt
    /// polling.
    pub fn prepare_resume(&mut self) -> Vec<(TargetId, TxHash)> {
        let mut resumed = Vec::new();
        let mut reset = Vec::new();
        for kind in [TargetKind::Buy, TargetKind::Sell] {
            for (index, target) in self.targets(kind).iter().enumerate() {
                if target.state != TargetState::Hit {
                    continue;
                }
                let id = TargetId { kind, index };
                match target.tx_hash {
                    Some(hash) => resumed.push((id, hash)),
                    None => reset.push(id),
                }
            }
        }
        for id in reset {
            // ids were collected from this session
            let _ = self.unmark_hit(id);
        }
        resumed
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dex::TradeType;
    use crate::math::Percent;
    use ethers::types::H256;

    pub(crate) fn dex() -> Dex {
        Dex {
            name: "TestSwap".into(),
            factory: Address::from_low_u64_be(0xfac),
            router: Address::from_low_u64_be(0x707),
            init_code_hash: H256::from_low_u64_be(0x1234),
            fee_retained_bps: 9970,
        }
    }

    pub(crate) fn network() -> Network {
        Network {
            name: "testnet".into(),
            chain_id: 31337,
            native_symbol: "ETH".into(),
        }
    }

    pub(crate) fn tokens() -> (Token, Token) {
        (
            Token::new(Address::from_low_u64_be(0xa), 6, "USDC", "USD Coin"),
            Token::new(Address::from_low_u64_be(0xb), 6, "TKN", "Token"),
        )
    }

    pub(crate) fn session(buys: Vec<Target>, sells: Vec<Target>) -> TradeSession {
        let (t0, t1) = tokens();
        TradeSession::new(t0, t1, dex(), network(), Address::from_low_u64_be(0xeee), buys, sells)
            .unwrap()
    }

    fn exact(raw: u64) -> TargetAmount {
        TargetAmount::Exact(BigInt::from(raw))
    }

    fn settled(amount_in: u64, amount_out: u64) -> Settlement {
        Settlement {
            tx_hash: H256::from_low_u64_be(1),
            amount_in: BigInt::from(amount_in),
            amount_out: BigInt::from(amount_out),
            gas_cost: BigInt::zero(),
        }
    }

    #[test]
    fn construction_rejects_inconsistent_targets() {
        let (t0, t1) = tokens();
        let build = |buys: Vec<Target>, sells: Vec<Target>| {
            TradeSession::new(t0.clone(), t1.clone(), dex(), network(), Address::zero(), buys, sells)
        };
        assert!(build(vec![], vec![]).is_err());
        assert!(build(vec![Target::sell(Fraction::zero(), exact(1))], vec![]).is_err());
        assert!(build(vec![Target::buy(Fraction::zero(), exact(0))], vec![]).is_err());
        assert!(build(
            vec![Target::buy(Fraction::zero(), TargetAmount::PercentOfBought(Percent::from_bps(100)))],
            vec![]
        )
        .is_err());
        assert!(build(
            vec![],
            vec![Target::sell(Fraction::zero(), TargetAmount::PercentOfBalance(Percent::from_bps(100)))
                .with_amount_mode(AmountMode::Out)]
        )
        .is_err());
        assert!(build(
            vec![],
            vec![Target::sell(Fraction::zero(), exact(1))
                .with_stop_loss()
                .with_price_percent(Percent::from_bps(10_000))]
        )
        .is_err());
        assert!(build(vec![Target::buy(Fraction::zero(), exact(1))], vec![]).is_ok());
    }

    #[test]
    fn buys_cannot_use_offset_prices() {
        let (t0, t1) = tokens();
        let offset_buy = Target::buy(Fraction::zero(), exact(1))
            .with_price_percent(Percent::from_bps(500));
        let result = TradeSession::new(
            t0,
            t1,
            dex(),
            network(),
            Address::zero(),
            vec![offset_buy],
            vec![Target::sell(Fraction::zero(), exact(1))],
        );
        assert!(matches!(result, Err(AppError::InvalidOption(_))));
    }

    #[test]
    fn hit_counting_and_undo() {
        let mut s = session(vec![Target::buy(Fraction::zero(), exact(10))], vec![]);
        s.mark_hit(TargetId::buy(0)).unwrap();
        assert_eq!(s.buy_hit_count, 1);
        assert!(s.has_unconfirmed_buy());
        s.unmark_hit(TargetId::buy(0)).unwrap();
        assert_eq!(s.buy_hit_count, 0);
        assert!(s.buy_targets[0].is_pending());
        assert!(s.mark_hit(TargetId::buy(3)).is_err());
    }

    #[test]
    fn average_buy_price_uses_fired_buys() {
        let mut s = session(
            vec![
                Target::buy(Fraction::zero(), exact(10)),
                Target::buy(Fraction::zero(), exact(10)),
                Target::buy(Fraction::zero(), exact(10)),
            ],
            vec![],
        );
        assert!(s.average_buy_price().is_none());
        s.buy_targets[0].state = TargetState::Confirmed;
        s.buy_targets[0].execution_price = Some(Fraction::from_integer(2));
        s.buy_targets[1].state = TargetState::Hit;
        s.buy_targets[1].execution_price = Some(Fraction::from_integer(4));
        // pending buys never count
        s.buy_targets[2].execution_price = Some(Fraction::from_integer(100));
        assert_eq!(s.average_buy_price(), Some(Fraction::from_integer(3)));
    }

    #[test]
    fn rebalance_sets_offset_prices_and_bought_shares() {
        let mut s = session(
            vec![Target::buy(Fraction::zero(), exact(1000))],
            vec![
                Target::sell(Fraction::zero(), TargetAmount::PercentOfBought(Percent::from_bps(5000)))
                    .with_price_percent(Percent::from_bps(1000)),
                Target::sell(Fraction::zero(), TargetAmount::PercentOfBought(Percent::from_bps(10_000)))
                    .with_price_percent(Percent::from_bps(2000))
                    .with_stop_loss(),
            ],
        );
        assert!(!s.sell_targets[0].is_armed());
        s.buy_targets[0].state = TargetState::Hit;
        s.buy_targets[0].execution_price = Some(Fraction::from_integer(100));
        s.buy_hit_count = 1;
        s.apply_settlement(TargetId::buy(0), &settled(1000, 10)).unwrap();
        s.rebalance_sell_targets();

        assert_eq!(s.sell_targets[0].price, Fraction::from_integer(110));
        assert_eq!(s.sell_targets[1].price, Fraction::from_integer(80));
        assert_eq!(s.sell_targets[0].resolved_amount, Some(BigInt::from(5)));
        assert_eq!(s.sell_targets[1].resolved_amount, Some(BigInt::from(10)));
        assert!(s.sell_targets.iter().all(Target::is_armed));
        assert_eq!(
            s.next_feed_amount(TargetKind::Sell),
            Some(FeedAmount {
                kind: TradeType::ExactIn,
                raw: BigInt::from(5)
            })
        );
    }

    #[test]
    fn bought_share_waits_for_confirmation() {
        let mut s = session(
            vec![Target::buy(Fraction::zero(), exact(1000))],
            vec![Target::sell(Fraction::zero(), TargetAmount::PercentOfBought(Percent::from_bps(5000)))],
        );
        let amount = s.sell_targets[0].amount.clone();
        assert_eq!(s.bought_share(&amount), None);
        s.mark_hit(TargetId::buy(0)).unwrap();
        assert_eq!(s.bought_share(&amount), None);
        s.apply_settlement(TargetId::buy(0), &settled(1000, 40)).unwrap();
        assert_eq!(s.bought_share(&amount), Some(BigInt::from(20)));
    }

    #[test]
    fn accumulators_follow_settlements() {
        let mut s = session(
            vec![Target::buy(Fraction::zero(), exact(1000))],
            vec![Target::sell(Fraction::zero(), exact(30))],
        );
        s.apply_settlement(TargetId::buy(0), &settled(1000, 40)).unwrap();
        assert_eq!(s.total_spent, BigInt::from(1000));
        assert_eq!(s.total_bought, BigInt::from(40));
        assert_eq!(s.amount_in_trade, BigInt::from(40));
        s.apply_settlement(TargetId::sell(0), &settled(30, 700)).unwrap();
        assert_eq!(s.amount_in_trade, BigInt::from(10));
        assert_eq!(s.total_received, BigInt::from(700));
        assert_eq!(s.total_bought, BigInt::from(40));
    }

    #[test]
    fn completion_rules() {
        let mut buys_only = session(vec![Target::buy(Fraction::zero(), exact(1))], vec![]);
        assert_eq!(buys_only.completion(), None);
        buys_only.buy_targets[0].state = TargetState::Confirmed;
        assert_eq!(buys_only.completion(), Some(CompletionReason::BuysFilled));

        let mut with_sells = session(
            vec![Target::buy(Fraction::zero(), exact(1))],
            vec![
                Target::sell(Fraction::zero(), exact(1)),
                Target::sell(Fraction::from_integer(1), exact(1)).with_stop_loss(),
            ],
        );
        with_sells.buy_targets[0].state = TargetState::Confirmed;
        assert_eq!(with_sells.completion(), None);
        with_sells.sell_targets[0].state = TargetState::Confirmed;
        assert_eq!(with_sells.completion(), Some(CompletionReason::SellsFilled));

        with_sells.sell_targets[0].state = TargetState::Pending;
        with_sells.sell_targets[1].state = TargetState::Confirmed;
        assert_eq!(with_sells.completion(), Some(CompletionReason::StopLoss));

        let stop_only = session(
            vec![Target::buy(Fraction::zero(), exact(1))],
            vec![Target::sell(Fraction::from_integer(1), exact(1)).with_stop_loss()],
        );
        assert_eq!(stop_only.completion(), None);
    }

    #[test]
    fn resume_resets_unsubmitted_hits() {
        let mut s = session(
            vec![
                Target::buy(Fraction::zero(), exact(1)),
                Target::buy(Fraction::zero(), exact(1)),
            ],
            vec![],
        );
        s.mark_hit(TargetId::buy(0)).unwrap();
        s.mark_hit(TargetId::buy(1)).unwrap();
        s.buy_targets[1].tx_hash = Some(H256::from_low_u64_be(7));

        let resumed = s.prepare_resume();
        assert_eq!(resumed, vec![(TargetId::buy(1), H256::from_low_u64_be(7))]);
        assert!(s.buy_targets[0].is_pending());
        assert_eq!(s.buy_targets[1].state, TargetState::Hit);
        assert_eq!(s.buy_hit_count, 1);
    }
}

//! The session driver: evaluates targets on every feed heartbeat, fires
//! swaps as detached tasks and books their outcomes.
//!
//! All session mutations happen on the dispatcher task. Swap tasks only
//! report back over a channel, so confirmations are applied one at a time
//! and a rebalance always sees the accumulators of the buy that caused it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ethers::types::TxHash;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::feed::{FeedHandle, FeedSnapshot};
use super::session::{CompletionReason, SessionPhase, TargetId, TradeSession};
use super::swap::{self, SwapEvent, SwapOrder};
use super::target::{Target, TargetAmount, TargetKind, TargetState, evaluate_buy, evaluate_sell};
use crate::chain::{ChainClient, SessionStore};
use crate::config::DispatchConfig;
use crate::dex::{Route, TradeType};
use crate::errors::{AppError, Result};
use crate::math::Rounding;
use crate::models::SwapRequest;
use crate::utils::{CancelToken, unix_now};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed(CompletionReason),
    Cancelled,
}

pub struct TradeDispatcher {
    session: Arc<Mutex<TradeSession>>,
    feed: FeedHandle,
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn SessionStore>,
    config: DispatchConfig,
    cancel: CancelToken,
    sell_block_warned: AtomicBool,
}

/// Drive `session` until it completes, fails or `cancel` fires.
pub async fn run_dispatcher(
    session: TradeSession,
    feed: FeedHandle,
    heartbeats: mpsc::Receiver<()>,
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn SessionStore>,
    config: DispatchConfig,
    cancel: CancelToken,
) -> Result<SessionOutcome> {
    TradeDispatcher::new(session, feed, chain, store, config, cancel)
        .run(heartbeats)
        .await
}

impl TradeDispatcher {
    pub fn new(
        session: TradeSession,
        feed: FeedHandle,
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn SessionStore>,
        config: DispatchConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            feed,
            chain,
            store,
            config,
            cancel,
            sell_block_warned: AtomicBool::new(false),
        }
    }

    /// Shared view of the session for readers; clone out of the lock.
    pub fn session(&self) -> Arc<Mutex<TradeSession>> {
        Arc::clone(&self.session)
    }

    /// Run to the end of the session. The final state is persisted and the
    /// feed stopped whatever the outcome.
    pub async fn run(self, mut heartbeats: mpsc::Receiver<()>) -> Result<SessionOutcome> {
        let result = self.drive(&mut heartbeats).await;
        let terminal = !matches!(result, Ok(SessionOutcome::Cancelled));
        let persisted = self.shutdown(terminal);
        match result {
            Ok(outcome) => {
                persisted?;
                info!(?outcome, "[DISPATCH] session finished");
                Ok(outcome)
            }
            Err(e) => {
                if let Err(persist_error) = persisted {
                    warn!(error = %persist_error, "[DISPATCH] could not persist final state");
                }
                error!(error = %e, "[DISPATCH] session failed");
                Err(e)
            }
        }
    }

    async fn drive(&self, heartbeats: &mut mpsc::Receiver<()>) -> Result<SessionOutcome> {
        let (events_tx, mut events) = mpsc::unbounded_channel();

        let (resumed, needs_price) = {
            let mut s = self.session.lock();
            if s.phase == SessionPhase::Terminated {
                return Err(AppError::InvalidOption("session already terminated".into()));
            }
            let resumed = s.prepare_resume();
            let orders = resumed
                .into_iter()
                .map(|(id, tx_hash)| build_order(&s, id).map(|order| (order, tx_hash)))
                .collect::<Result<Vec<_>>>()?;
            (orders, s.init_price.is_none())
        };
        for (order, tx_hash) in resumed {
            self.spawn_resume(order, tx_hash, &events_tx);
        }

        if needs_price && !self.await_initial_price(heartbeats).await? {
            return Ok(SessionOutcome::Cancelled);
        }
        self.session.lock().phase = SessionPhase::Active;
        self.sync_feed_amounts();

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(SessionOutcome::Cancelled),
                Some(event) = events.recv() => {
                    if let Some(outcome) = self.apply_event(event)? {
                        return Ok(outcome);
                    }
                }
                beat = heartbeats.recv() => match beat {
                    Some(()) => {
                        for order in self.tick().await? {
                            self.spawn_swap(order, &events_tx);
                        }
                    }
                    None => return Err(AppError::Other("price feed stopped".into())),
                },
            }
        }
    }

    /// Wait for the first usable quote. `false` when cancelled first.
    async fn await_initial_price(&self, heartbeats: &mut mpsc::Receiver<()>) -> Result<bool> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(false),
                beat = heartbeats.recv() => {
                    if beat.is_none() {
                        return Err(AppError::Other("price feed stopped".into()));
                    }
                    let snapshot = self.feed.snapshot();
                    let Some(price) = snapshot.buy_price().or_else(|| snapshot.sell_price()) else {
                        if let Some(e) = &snapshot.last_error {
                            debug!(error = %e, "[DISPATCH] no initial price yet");
                        }
                        continue;
                    };
                    {
                        let mut s = self.session.lock();
                        info!(price = %price.to_significant(6, Rounding::RoundHalfUp), "[DISPATCH] initial price {}/{}", s.token0, s.token1);
                        s.init_price = Some(price);
                        s.phase = SessionPhase::Active;
                    }
                    self.persist()?;
                    return Ok(true);
                }
            }
        }
    }

    /// One evaluation round over the latest quotes.
    async fn tick(&self) -> Result<Vec<SwapOrder>> {
        let snapshot = self.feed.snapshot();
        if !snapshot.has_price() {
            if let Some(e) = &snapshot.last_error {
                debug!(error = %e, "[DISPATCH] skipping tick without quotes");
            }
            return Ok(Vec::new());
        }
        let (buys, sells) = tokio::join!(
            self.evaluate(TargetKind::Buy, &snapshot),
            self.evaluate(TargetKind::Sell, &snapshot),
        );
        let mut orders = buys?;
        orders.extend(sells?);
        if !orders.is_empty() {
            self.persist()?;
        }
        Ok(orders)
    }

    /// Fire every pending target of `kind` whose condition holds.
    async fn evaluate(&self, kind: TargetKind, snapshot: &FeedSnapshot) -> Result<Vec<SwapOrder>> {
        let (trade, price) = match kind {
            TargetKind::Buy => (snapshot.buy.as_ref(), snapshot.buy_price()),
            TargetKind::Sell => (snapshot.sell.as_ref(), snapshot.sell_price()),
        };
        let (Some(trade), Some(price)) = (trade, price) else {
            return Ok(Vec::new());
        };
        let candidates: Vec<(usize, Target)> = {
            let s = self.session.lock();
            s.targets(kind)
                .iter()
                .enumerate()
                .filter(|(_, t)| t.is_pending() && t.is_armed())
                .map(|(i, t)| (i, t.clone()))
                .collect()
        };

        let mut orders = Vec::new();
        for (index, target) in candidates {
            let fires = match kind {
                TargetKind::Buy => evaluate_buy(&target, &price),
                TargetKind::Sell => evaluate_sell(&target, &price, target.stop_loss),
            };
            if !fires {
                continue;
            }
            let id = TargetId { kind, index };
            {
                let mut s = self.session.lock();
                if kind == TargetKind::Sell && s.buy_hit_count == 0 {
                    if !self.sell_block_warned.swap(true, Ordering::Relaxed) {
                        warn!("[DISPATCH] sell target reached before any buy fired; holding it");
                    }
                    continue;
                }
                if !s.target(id)?.is_pending() {
                    continue;
                }
                s.mark_hit(id)?;
            }
            info!(?id, price = %price.to_significant(6, Rounding::RoundHalfUp), "[DISPATCH] target hit");

            match self.fill(id, &target, &trade.route).await {
                Ok(Some(order)) => orders.push(order),
                Ok(None) => {
                    debug!(?id, "[DISPATCH] amount depends on an unsettled buy, retrying");
                    self.session.lock().unmark_hit(id)?;
                }
                Err(e) if e.is_transient_quote() => {
                    debug!(?id, error = %e, "[DISPATCH] could not quote target, retrying");
                    self.session.lock().unmark_hit(id)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(orders)
    }

    /// Resolve the target's amount and quote it along `route`. `None` when
    /// the amount is not known yet.
    async fn fill(&self, id: TargetId, target: &Target, route: &Route) -> Result<Option<SwapOrder>> {
        let amount = match &target.amount {
            TargetAmount::Exact(raw) => raw.clone(),
            TargetAmount::PercentOfBalance(percent) => {
                let (wallet, input) = {
                    let s = self.session.lock();
                    (s.wallet, s.sides(id.kind).0.clone())
                };
                let balance = self.chain.fetch_balance(wallet, &input).await?;
                percent.of(&balance)
            }
            TargetAmount::PercentOfBought(_) => {
                let share = self.session.lock().bought_share(&target.amount);
                match share {
                    Some(amount) => amount,
                    None => return Ok(None),
                }
            }
        };

        let mut s = self.session.lock();
        let fee = s.dex.fee_retained_bps;
        let trade = s.target_mut(id)?.fill_from_route(route, amount, fee)?;
        debug!(
            ?id,
            input = %trade.input_amount,
            output = %trade.output_amount,
            impact = %trade.price_impact,
            "[DISPATCH] target quoted"
        );
        build_order(&s, id).map(Some)
    }

    fn apply_event(&self, event: SwapEvent) -> Result<Option<SessionOutcome>> {
        match event {
            SwapEvent::Submitted { id, tx_hash } => {
                self.session.lock().target_mut(id)?.tx_hash = Some(tx_hash);
                self.persist()?;
                Ok(None)
            }
            SwapEvent::Confirmed { id, settlement } => {
                let completion = {
                    let mut s = self.session.lock();
                    s.apply_settlement(id, &settlement)?;
                    if id.kind == TargetKind::Buy {
                        s.rebalance_sell_targets();
                    }
                    info!(
                        ?id,
                        total_bought = %s.total_bought,
                        total_spent = %s.total_spent,
                        amount_in_trade = %s.amount_in_trade,
                        "[DISPATCH] swap confirmed"
                    );
                    s.completion()
                };
                self.sync_feed_amounts();
                self.persist()?;
                Ok(completion.map(SessionOutcome::Completed))
            }
            SwapEvent::Failed { id, error } => {
                if matches!(error, AppError::Cancelled) {
                    return Ok(Some(SessionOutcome::Cancelled));
                }
                self.session.lock().target_mut(id)?.state = TargetState::Failed;
                Err(error)
            }
        }
    }

    /// Point the feed at the next pending target on each side.
    fn sync_feed_amounts(&self) {
        let (buy, sell) = {
            let s = self.session.lock();
            (
                s.next_feed_amount(TargetKind::Buy),
                s.next_feed_amount(TargetKind::Sell),
            )
        };
        if let Some(amount) = buy {
            self.feed.set_buy_amount(amount);
        }
        if let Some(amount) = sell {
            self.feed.set_sell_amount(amount);
        }
    }

    fn spawn_swap(&self, order: SwapOrder, events: &mpsc::UnboundedSender<SwapEvent>) {
        let chain = Arc::clone(&self.chain);
        let config = self.config.clone();
        let cancel = self.cancel.clone();
        let events = events.clone();
        tokio::spawn(async move {
            swap::run_swap(chain.as_ref(), order, &config, &cancel, &events).await;
        });
    }

    fn spawn_resume(
        &self,
        order: SwapOrder,
        tx_hash: TxHash,
        events: &mpsc::UnboundedSender<SwapEvent>,
    ) {
        let chain = Arc::clone(&self.chain);
        let config = self.config.clone();
        let cancel = self.cancel.clone();
        let events = events.clone();
        tokio::spawn(async move {
            let id = order.id;
            let event = match swap::resume_swap(chain.as_ref(), &order, tx_hash, &config, &cancel).await {
                Ok(settlement) => SwapEvent::Confirmed { id, settlement },
                Err(error) => SwapEvent::Failed { id, error },
            };
            let _ = events.send(event);
        });
    }

    fn persist(&self) -> Result<()> {
        let snapshot = self.session.lock().clone();
        self.store.persist_session(&snapshot)
    }

    /// Idempotent: cancel everything, stop the feed and save.
    fn shutdown(&self, terminal: bool) -> Result<()> {
        self.cancel.cancel();
        self.feed.stop();
        if terminal {
            self.session.lock().phase = SessionPhase::Terminated;
        }
        self.persist()
    }
}

/// Router call for a target that has been quoted.
fn build_order(session: &TradeSession, id: TargetId) -> Result<SwapOrder> {
    let target = session.target(id)?;
    let kind = target.amount_mode.trade_type();
    let resolved = target.resolved_amount.clone().ok_or(AppError::NilAmount)?;
    let bound = target.amount_min_max.clone().ok_or(AppError::NilAmount)?;
    let (amount_in, amount_out) = match kind {
        TradeType::ExactIn => (resolved, bound),
        TradeType::ExactOut => (bound, resolved),
    };
    let native = session.token0.is_native;
    let request = SwapRequest {
        kind,
        path: target.path.clone(),
        amount_in,
        amount_out,
        native_in: native && id.kind == TargetKind::Buy,
        native_out: native && id.kind == TargetKind::Sell,
        recipient: session.wallet,
        deadline: unix_now() + target.gas.deadline_secs,
        gas_price: target.gas.gas_price.clone(),
        gas_limit: target.gas.gas_limit.clone(),
    };
    Ok(SwapOrder {
        id,
        request,
        token0: session.token0.clone(),
        token1: session.token1.clone(),
        wallet: session.wallet,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use ethers::types::H256;
    use num_bigint::BigInt;
    use num_traits::Zero;

    use super::*;
    use crate::chain::mock::{MemoryStore, MockChain};
    use crate::dex::BestTradeOptions;
    use crate::math::{Fraction, Percent};
    use crate::trading::feed::tests::pool;
    use crate::trading::feed::{FeedAmount, FeedConfig, start_price_feed};
    use crate::trading::session::tests::{dex, session, tokens};

    const RESERVE: u64 = 1_000_000_000_000;
    const ONE: u64 = 1_000_000;

    struct Harness {
        chain: Arc<MockChain>,
        store: Arc<MemoryStore>,
        cancel: CancelToken,
    }

    impl Harness {
        fn new() -> Self {
            let chain = Arc::new(MockChain::default());
            let (t0, t1) = tokens();
            pool(&chain, &t0, &t1, RESERVE, RESERVE);
            chain.set_balance(t0.address, RESERVE);
            Self {
                chain,
                store: Arc::new(MemoryStore::default()),
                cancel: CancelToken::new(),
            }
        }

        async fn run(&self, session: TradeSession) -> Result<SessionOutcome> {
            let (t0, t1) = tokens();
            let config = FeedConfig {
                token0: t0,
                token1: t1,
                dex: dex(),
                connectors: vec![],
                interval: Duration::from_millis(5),
                options: BestTradeOptions::default(),
                buy_amount: FeedAmount::exact_in(ONE),
                sell_amount: FeedAmount::default(),
            };
            let (feed, heartbeats) = start_price_feed(self.chain.clone(), config, self.cancel.clone());
            let dispatch = DispatchConfig {
                submit_attempts: 3,
                submit_backoff: Duration::from_millis(1),
                receipt_interval: Duration::from_millis(1),
                receipt_attempts: 50,
            };
            let run = run_dispatcher(
                session,
                feed.clone(),
                heartbeats,
                self.chain.clone(),
                self.store.clone(),
                dispatch,
                self.cancel.clone(),
            );
            let outcome = tokio::time::timeout(Duration::from_secs(10), run)
                .await
                .expect("dispatcher did not finish");
            assert!(!feed.is_running());
            outcome
        }

        fn cancel_after(&self, delay: Duration) {
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                cancel.cancel();
            });
        }

        fn saved(&self) -> TradeSession {
            self.store.saved.lock().clone().expect("session was never persisted")
        }
    }

    fn exact(raw: u64) -> TargetAmount {
        TargetAmount::Exact(BigInt::from(raw))
    }

    #[tokio::test]
    async fn buy_then_sell_everything_bought() {
        let h = Harness::new();
        let s = session(
            vec![Target::buy(Fraction::zero(), exact(ONE))],
            vec![Target::sell(
                Fraction::zero(),
                TargetAmount::PercentOfBought(Percent::from_bps(10_000)),
            )],
        );

        let outcome = h.run(s).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Completed(CompletionReason::SellsFilled));

        let saved = h.saved();
        assert_eq!(saved.phase, SessionPhase::Terminated);
        assert!(saved.init_price.is_some());
        assert_eq!(saved.buy_targets[0].state, TargetState::Confirmed);
        assert_eq!(saved.sell_targets[0].state, TargetState::Confirmed);
        assert_eq!(saved.total_spent, BigInt::from(ONE));
        assert!(saved.total_bought > BigInt::zero());
        assert_eq!(saved.amount_in_trade, BigInt::zero());
        assert!(saved.total_received > BigInt::zero());
        assert_eq!(saved.buy_hit_count, 1);
        assert_eq!(saved.sell_hit_count, 1);

        let submitted = h.chain.submitted.lock().clone();
        assert_eq!(submitted.len(), 2);
        // the sell spends exactly what the buy delivered
        assert_eq!(submitted[1].amount_in, saved.total_bought);
        assert!(h.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn exhausted_submission_fails_the_session() {
        let h = Harness::new();
        h.chain.submit_failures.store(3, Ordering::SeqCst);
        let s = session(vec![Target::buy(Fraction::zero(), exact(ONE))], vec![]);

        let result = h.run(s).await;
        assert!(matches!(result, Err(AppError::SubmitExhausted { attempts: 3, .. })));
        assert_eq!(h.chain.submit_calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.chain.poll_calls.load(Ordering::SeqCst), 0);
        assert!(h.cancel.is_cancelled());

        let saved = h.saved();
        assert_eq!(saved.buy_targets[0].state, TargetState::Failed);
        assert_eq!(saved.phase, SessionPhase::Terminated);
    }

    #[tokio::test]
    async fn sells_wait_for_a_buy() {
        let h = Harness::new();
        h.chain.set_balance(tokens().1.address, RESERVE);
        let s = session(vec![], vec![Target::sell(Fraction::zero(), exact(ONE))]);
        h.cancel_after(Duration::from_millis(100));

        let outcome = h.run(s).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert_eq!(h.chain.submit_calls.load(Ordering::SeqCst), 0);
        let saved = h.saved();
        assert!(saved.sell_targets[0].is_pending());
        // cancellation leaves the session resumable
        assert_eq!(saved.phase, SessionPhase::Active);
    }

    #[tokio::test]
    async fn confirmed_buys_rebalance_offset_sells() {
        let h = Harness::new();
        let s = session(
            vec![Target::buy(Fraction::zero(), exact(ONE))],
            vec![
                Target::sell(Fraction::zero(), TargetAmount::PercentOfBought(Percent::from_bps(5_000)))
                    .with_price_percent(Percent::from_bps(5_000)),
                Target::sell(Fraction::zero(), TargetAmount::PercentOfBought(Percent::from_bps(10_000)))
                    .with_price_percent(Percent::from_bps(5_000))
                    .with_stop_loss(),
            ],
        );
        h.cancel_after(Duration::from_millis(200));

        let outcome = h.run(s).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Cancelled);
        let saved = h.saved();
        assert_eq!(saved.buy_targets[0].state, TargetState::Confirmed);

        let average = saved.average_buy_price().unwrap();
        let take_profit = &saved.sell_targets[0];
        let stop_loss = &saved.sell_targets[1];
        assert_eq!(take_profit.price, &average * &Fraction::new(3, 2));
        assert_eq!(stop_loss.price, &average * &Fraction::new(1, 2));
        // neither level is reachable around the initial price
        assert!(take_profit.is_pending() && stop_loss.is_pending());
        assert_eq!(take_profit.resolved_amount, Some(saved.total_bought.clone() / 2u32));
        assert_eq!(h.chain.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn balance_read_failure_is_fatal() {
        let h = Harness::new();
        *h.chain.fail_balances.lock() = true;
        let s = session(
            vec![Target::buy(
                Fraction::zero(),
                TargetAmount::PercentOfBalance(Percent::from_bps(1_000)),
            )],
            vec![],
        );
        let result = h.run(s).await;
        assert!(matches!(result, Err(AppError::Other(_))));
        assert_eq!(h.chain.submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn submitted_swaps_resume_after_restart() {
        let h = Harness::new();
        let (t0, t1) = tokens();
        let mut s = session(vec![Target::buy(Fraction::zero(), exact(ONE))], vec![]);
        s.init_price = Some(Fraction::one());
        s.phase = SessionPhase::Active;
        s.mark_hit(TargetId::buy(0)).unwrap();
        {
            let target = &mut s.buy_targets[0];
            target.resolved_amount = Some(BigInt::from(ONE));
            target.amount_min_max = Some(BigInt::from(990_000));
            target.execution_price = Some(Fraction::one());
            target.path = vec![t0.address, t1.address];
            target.tx_hash = Some(H256::from_low_u64_be(77));
        }

        let outcome = h.run(s).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Completed(CompletionReason::BuysFilled));
        assert_eq!(h.chain.submit_calls.load(Ordering::SeqCst), 0);
        let saved = h.saved();
        assert_eq!(saved.total_bought, BigInt::from(990_000));
        assert_eq!(saved.buy_targets[0].tx_hash, Some(H256::from_low_u64_be(77)));
    }

    /// A session that already has its initial price, so every tick trades.
    fn active(mut s: TradeSession) -> TradeSession {
        s.init_price = Some(Fraction::one());
        s.phase = SessionPhase::Active;
        s
    }

    #[tokio::test]
    async fn reserve_fetch_errors_skip_ticks_and_trading_resumes() {
        let h = Harness::new();
        h.chain.reserve_failures.store(10, Ordering::SeqCst);
        let s = active(session(vec![Target::buy(Fraction::zero(), exact(ONE))], vec![]));

        let outcome = h.run(s).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Completed(CompletionReason::BuysFilled));
        assert_eq!(h.chain.reserve_failures.load(Ordering::SeqCst), 0);
        assert_eq!(h.chain.submit_calls.load(Ordering::SeqCst), 1);
        let saved = h.saved();
        assert_eq!(saved.buy_targets[0].state, TargetState::Confirmed);
        assert_eq!(saved.buy_hit_count, 1);
    }

    #[tokio::test]
    async fn buys_fire_once_a_missing_pool_returns() {
        let h = Harness::new();
        let info = h
            .chain
            .pairs
            .lock()
            .drain()
            .map(|(_, info)| info)
            .next()
            .expect("harness pool");
        {
            let chain = h.chain.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                chain.set_pair(info);
            });
        }
        let s = active(session(vec![Target::buy(Fraction::zero(), exact(ONE))], vec![]));

        let outcome = h.run(s).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Completed(CompletionReason::BuysFilled));
        assert_eq!(h.chain.submit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.saved().buy_targets[0].state, TargetState::Confirmed);
    }

    #[tokio::test]
    async fn unfillable_buys_do_not_hold_back_sells() {
        let h = Harness::new();
        let (t0, t1) = tokens();
        // nothing left to spend on buys, token1 on hand from an earlier buy
        h.chain.set_balance(t0.address, 0u32);
        h.chain.set_balance(t1.address, RESERVE);

        let mut done = Target::buy(Fraction::zero(), exact(ONE));
        done.state = TargetState::Confirmed;
        done.execution_price = Some(Fraction::one());
        let mut s = active(session(
            vec![
                done,
                Target::buy(Fraction::zero(), TargetAmount::PercentOfBalance(Percent::from_bps(1_000))),
            ],
            vec![Target::sell(Fraction::zero(), exact(ONE))],
        ));
        s.buy_hit_count = 1;
        s.total_bought = BigInt::from(ONE);
        s.amount_in_trade = BigInt::from(ONE);

        let outcome = h.run(s).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Completed(CompletionReason::SellsFilled));
        let submitted = h.chain.submitted.lock().clone();
        assert_eq!(submitted[0].path.first(), Some(&t1.address));
        assert_eq!(submitted[0].amount_in, BigInt::from(ONE));
        let saved = h.saved();
        assert_eq!(saved.sell_targets[0].state, TargetState::Confirmed);
        assert!(saved.total_received > BigInt::zero());
    }

    #[tokio::test]
    async fn terminated_sessions_do_not_restart() {
        let h = Harness::new();
        let mut s = session(vec![Target::buy(Fraction::zero(), exact(ONE))], vec![]);
        s.phase = SessionPhase::Terminated;
        assert!(matches!(h.run(s).await, Err(AppError::InvalidOption(_))));
        assert_eq!(h.chain.submit_calls.load(Ordering::SeqCst), 0);
    }
}

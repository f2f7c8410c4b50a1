//! Periodic best-route quoting for one session's market.
//!
//! Each tick fetches the reserves of every candidate pool among the
//! session tokens and connectors in one batch, then quotes the buy side
//! and the sell side concurrently on blocking threads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::Address;
use num_bigint::BigInt;
use num_traits::Zero;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::chain::ChainClient;
use crate::dex::{
    BestTradeOptions, Pair, Token, TokenAmount, Trade, TradeType, best_trade_exact_in,
    best_trade_exact_out,
};
use crate::errors::{AppError, Result};
use crate::math::Fraction;
use crate::models::Dex;
use crate::utils::CancelToken;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Size the feed quotes one side at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedAmount {
    pub kind: TradeType,
    /// Zero quotes one whole unit of the fixed token.
    pub raw: BigInt,
}

impl FeedAmount {
    pub fn exact_in(raw: impl Into<BigInt>) -> Self {
        Self {
            kind: TradeType::ExactIn,
            raw: raw.into(),
        }
    }
}

impl Default for FeedAmount {
    fn default() -> Self {
        Self::exact_in(BigInt::zero())
    }
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub token0: Token,
    pub token1: Token,
    pub dex: Dex,
    pub connectors: Vec<Token>,
    pub interval: Duration,
    pub options: BestTradeOptions,
    pub buy_amount: FeedAmount,
    pub sell_amount: FeedAmount,
}

/// Latest quotes. Either side is `None` when its search failed this tick.
#[derive(Debug, Clone, Default)]
pub struct FeedSnapshot {
    /// token0 → token1.
    pub buy: Option<Trade>,
    /// token1 → token0.
    pub sell: Option<Trade>,
    pub last_error: Option<Arc<AppError>>,
    pub ticks: u64,
}

impl FeedSnapshot {
    /// Buy execution price as token0 per token1.
    pub fn buy_price(&self) -> Option<Fraction> {
        self.buy
            .as_ref()
            .map(|t| t.execution_price.invert().adjusted())
    }

    /// Sell execution price as token0 per token1.
    pub fn sell_price(&self) -> Option<Fraction> {
        self.sell.as_ref().map(|t| t.execution_price.adjusted())
    }

    pub fn has_price(&self) -> bool {
        self.buy.is_some() || self.sell.is_some()
    }
}

#[derive(Debug)]
struct FeedState {
    snapshot: FeedSnapshot,
    buy_amount: FeedAmount,
    sell_amount: FeedAmount,
    running: bool,
}

/// Owner's handle on a running feed.
#[derive(Clone)]
pub struct FeedHandle {
    state: Arc<Mutex<FeedState>>,
    stop: CancelToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl FeedHandle {
    pub fn snapshot(&self) -> FeedSnapshot {
        self.state.lock().snapshot.clone()
    }

    pub fn set_buy_amount(&self, amount: FeedAmount) {
        self.state.lock().buy_amount = amount;
    }

    pub fn set_sell_amount(&self, amount: FeedAmount) {
        self.state.lock().sell_amount = amount;
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Stop polling. Safe to call any number of times.
    pub fn stop(&self) {
        self.stop.cancel();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.state.lock().running = false;
    }
}

/// Spawn the polling task.
///
/// The receiver yields one best-effort heartbeat per completed tick and
/// closes when the feed stops.
pub fn start_price_feed(
    chain: Arc<dyn ChainClient>,
    config: FeedConfig,
    cancel: CancelToken,
) -> (FeedHandle, mpsc::Receiver<()>) {
    let (heartbeat_tx, heartbeat_rx) = mpsc::channel(1);
    let state = Arc::new(Mutex::new(FeedState {
        snapshot: FeedSnapshot::default(),
        buy_amount: config.buy_amount.clone(),
        sell_amount: config.sell_amount.clone(),
        running: true,
    }));
    let stop = CancelToken::new();
    let candidates = candidate_pairs(&config);
    info!(
        candidates = candidates.len(),
        interval_ms = config.interval.as_millis() as u64,
        "[FEED] starting {}/{} on {}",
        config.token0,
        config.token1,
        config.dex.name
    );

    let task = {
        let state = Arc::clone(&state);
        let stop = stop.clone();
        tokio::spawn(async move {
            // a zero period would panic the task
            let mut ticker = tokio::time::interval(config.interval.max(MIN_INTERVAL));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let (buy_amount, sell_amount) = {
                    let s = state.lock();
                    (s.buy_amount.clone(), s.sell_amount.clone())
                };
                let tick = tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = stop.cancelled() => break,
                    tick = refresh(chain.as_ref(), &config, &candidates, buy_amount, sell_amount) => tick,
                };
                {
                    let mut s = state.lock();
                    s.snapshot.ticks += 1;
                    match tick {
                        Ok(quotes) => {
                            s.snapshot.last_error = quotes.error.map(Arc::new);
                            s.snapshot.buy = quotes.buy;
                            s.snapshot.sell = quotes.sell;
                        }
                        Err(e) => {
                            warn!(error = %e, "[FEED] reserve fetch failed");
                            s.snapshot.buy = None;
                            s.snapshot.sell = None;
                            s.snapshot.last_error = Some(Arc::new(e));
                        }
                    }
                }
                // a full channel means the consumer has not caught up yet
                let _ = heartbeat_tx.try_send(());
            }
            state.lock().running = false;
            debug!("[FEED] stopped");
        })
    };

    let handle = FeedHandle {
        state,
        stop,
        task: Arc::new(Mutex::new(Some(task))),
    };
    (handle, heartbeat_rx)
}

/// Every pool address the route search may use, with its two tokens.
fn candidate_pairs(config: &FeedConfig) -> HashMap<Address, (Token, Token)> {
    let mut tokens: Vec<Token> = Vec::with_capacity(config.connectors.len() + 2);
    for token in [&config.token0, &config.token1]
        .into_iter()
        .chain(config.connectors.iter())
    {
        if !tokens.contains(token) {
            tokens.push(token.clone());
        }
    }
    let mut pairs = HashMap::new();
    for (i, a) in tokens.iter().enumerate() {
        for b in &tokens[i + 1..] {
            let address =
                Pair::compute_address(config.dex.factory, config.dex.init_code_hash, a, b);
            pairs.insert(address, (a.clone(), b.clone()));
        }
    }
    pairs
}

struct Quotes {
    buy: Option<Trade>,
    sell: Option<Trade>,
    error: Option<AppError>,
}

async fn refresh(
    chain: &dyn ChainClient,
    config: &FeedConfig,
    candidates: &HashMap<Address, (Token, Token)>,
    buy_amount: FeedAmount,
    sell_amount: FeedAmount,
) -> Result<Quotes> {
    let addresses: Vec<Address> = candidates.keys().copied().collect();
    let reserves = chain.fetch_pair_reserves(&addresses).await?;

    let mut pairs = Vec::with_capacity(reserves.len());
    for (address, info) in reserves {
        let Some((a, b)) = candidates.get(&address) else {
            continue;
        };
        let (t0, t1) = if a.address == info.token0 { (a, b) } else { (b, a) };
        if t0.address != info.token0 || t1.address != info.token1 {
            warn!(?address, "[FEED] pool tokens do not match the derived pair");
            continue;
        }
        pairs.push(Pair::new(
            address,
            TokenAmount::new(t0.clone(), info.reserve0),
            TokenAmount::new(t1.clone(), info.reserve1),
        )?);
    }
    // stable ordering keeps tie-breaks deterministic across ticks
    pairs.sort_by_key(Pair::address);
    let pairs = Arc::new(pairs);

    let buy = {
        let pairs = Arc::clone(&pairs);
        let (input, output) = (config.token0.clone(), config.token1.clone());
        let options = config.options;
        tokio::task::spawn_blocking(move || best_trade(&pairs, &input, &output, &buy_amount, &options))
    };
    let sell = {
        let pairs = Arc::clone(&pairs);
        let (input, output) = (config.token1.clone(), config.token0.clone());
        let options = config.options;
        tokio::task::spawn_blocking(move || best_trade(&pairs, &input, &output, &sell_amount, &options))
    };
    let (buy, sell) = tokio::join!(buy, sell);
    let buy = buy.map_err(|e| AppError::Other(format!("buy quote task: {e}")))?;
    let sell = sell.map_err(|e| AppError::Other(format!("sell quote task: {e}")))?;

    let (buy, buy_error) = split(buy);
    let (sell, sell_error) = split(sell);
    Ok(Quotes {
        buy,
        sell,
        error: buy_error.or(sell_error),
    })
}

fn split(quote: Result<Trade>) -> (Option<Trade>, Option<AppError>) {
    match quote {
        Ok(trade) => (Some(trade), None),
        Err(e) => {
            debug!(error = %e, "[FEED] no quote");
            (None, Some(e))
        }
    }
}

/// Best trade from `input` to `output` at `amount`.
fn best_trade(
    pairs: &[Pair],
    input: &Token,
    output: &Token,
    amount: &FeedAmount,
    options: &BestTradeOptions,
) -> Result<Trade> {
    let fixed = match amount.kind {
        TradeType::ExactIn => input,
        TradeType::ExactOut => output,
    };
    let raw = if amount.raw.is_zero() {
        fixed.one_unit()
    } else {
        amount.raw.clone()
    };
    let trades = match amount.kind {
        TradeType::ExactIn => {
            best_trade_exact_in(pairs, &TokenAmount::new(input.clone(), raw), output, options)?
        }
        TradeType::ExactOut => {
            best_trade_exact_out(pairs, input, &TokenAmount::new(output.clone(), raw), options)?
        }
    };
    trades.into_iter().next().ok_or(AppError::NoTradeFound)
}

//! Best-trade search over a set of candidate pools.
//!
//! Explores every acyclic pool chain up to `max_hops` from the input token
//! and keeps the `max_results` best trades ranked by [`trade_comparator`].
//! The search is exponential in `max_hops`, so callers keep the hop budget
//! small and the pool set limited to the relevant connector tokens.

use std::cmp::Ordering;

use super::calc::DEFAULT_FEE_RETAINED_BPS;
use super::pair::Pair;
use super::route::Route;
use super::token::{Token, TokenAmount};
use super::trade::Trade;
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BestTradeOptions {
    pub max_results: usize,
    pub max_hops: usize,
    pub fee_retained_bps: u32,
}

impl Default for BestTradeOptions {
    fn default() -> Self {
        Self {
            max_results: 3,
            max_hops: 3,
            fee_retained_bps: DEFAULT_FEE_RETAINED_BPS,
        }
    }
}

/// Ranks trades best first: more output, then less input, then lower price
/// impact, then fewer hops.
pub fn trade_comparator(a: &Trade, b: &Trade) -> Ordering {
    b.output_amount
        .raw
        .cmp(&a.output_amount.raw)
        .then_with(|| a.input_amount.raw.cmp(&b.input_amount.raw))
        .then_with(|| a.price_impact.cmp(&b.price_impact))
        .then_with(|| a.hops().cmp(&b.hops()))
}

/// Insert into a sorted list capped at `max_size`.
///
/// Equal elements keep insertion order. Returns whatever fell off the end,
/// which is `add` itself when it ranks no better than a full list's tail.
pub fn sorted_insert<T, F>(items: &mut Vec<T>, add: T, max_size: usize, comparator: F) -> Option<T>
where
    F: Fn(&T, &T) -> Ordering,
{
    if max_size == 0 {
        return Some(add);
    }
    debug_assert!(items.len() <= max_size, "list already over capacity");
    if items.len() == max_size {
        if let Some(last) = items.last() {
            if comparator(last, &add) != Ordering::Greater {
                return Some(add);
            }
        }
    }
    let position = items.partition_point(|existing| comparator(existing, &add) != Ordering::Greater);
    items.insert(position, add);
    if items.len() > max_size {
        items.pop()
    } else {
        None
    }
}

/// Best trades spending exactly `amount_in`, ending in `token_out`.
pub fn best_trade_exact_in(
    pairs: &[Pair],
    amount_in: &TokenAmount,
    token_out: &Token,
    options: &BestTradeOptions,
) -> Result<Vec<Trade>> {
    validate(pairs, options)?;
    let mut search = Search {
        pairs,
        excluded: vec![false; pairs.len()],
        remaining: pairs.len(),
        options,
        current: Vec::with_capacity(options.max_hops),
        best: Vec::with_capacity(options.max_results),
    };
    search.exact_in(amount_in, amount_in, token_out, options.max_hops)?;
    finish(search.best)
}

/// Best trades receiving exactly `amount_out`, starting from `token_in`.
pub fn best_trade_exact_out(
    pairs: &[Pair],
    token_in: &Token,
    amount_out: &TokenAmount,
    options: &BestTradeOptions,
) -> Result<Vec<Trade>> {
    validate(pairs, options)?;
    let mut search = Search {
        pairs,
        excluded: vec![false; pairs.len()],
        remaining: pairs.len(),
        options,
        current: Vec::with_capacity(options.max_hops),
        best: Vec::with_capacity(options.max_results),
    };
    search.exact_out(token_in, amount_out, amount_out, options.max_hops)?;
    finish(search.best)
}

fn validate(pairs: &[Pair], options: &BestTradeOptions) -> Result<()> {
    if pairs.is_empty() {
        return Err(AppError::NoPairsFound);
    }
    if options.max_hops == 0 {
        return Err(AppError::InvalidOption("max_hops must be positive".into()));
    }
    if options.max_results == 0 {
        return Err(AppError::InvalidOption("max_results must be positive".into()));
    }
    Ok(())
}

fn finish(best: Vec<Trade>) -> Result<Vec<Trade>> {
    if best.is_empty() {
        return Err(AppError::NoTradeFound);
    }
    Ok(best)
}

/// Recursion state: the pool slice stays immutable and pools already on
/// the current path are masked out by index.
struct Search<'a> {
    pairs: &'a [Pair],
    excluded: Vec<bool>,
    remaining: usize,
    options: &'a BestTradeOptions,
    current: Vec<Pair>,
    best: Vec<Trade>,
}

impl Search<'_> {
    fn exact_in(
        &mut self,
        original: &TokenAmount,
        amount_in: &TokenAmount,
        token_out: &Token,
        max_hops: usize,
    ) -> Result<()> {
        let pairs = self.pairs;
        let fee = self.options.fee_retained_bps;
        for (i, pair) in pairs.iter().enumerate() {
            if self.excluded[i] {
                continue;
            }
            if !pair.involves_token(&amount_in.token) || pair.has_empty_reserve() {
                continue;
            }
            let amount_out = match pair.get_output_amount(amount_in, fee) {
                Ok((out, _)) => out,
                Err(AppError::InsufficientInputAmount) => continue,
                Err(e) => return Err(e),
            };

            if amount_out.token == *token_out {
                let mut route_pairs = self.current.clone();
                route_pairs.push(pair.clone());
                let route = Route::new(route_pairs, original.token.clone(), Some(token_out.clone()))?;
                let trade = Trade::exact_in(route, original.clone(), fee)?;
                sorted_insert(&mut self.best, trade, self.options.max_results, trade_comparator);
            } else if max_hops > 1 && self.remaining > 1 {
                self.enter(i);
                let result = self.exact_in(original, &amount_out, token_out, max_hops - 1);
                self.leave(i);
                result?;
            }
        }
        Ok(())
    }

    fn exact_out(
        &mut self,
        token_in: &Token,
        amount_out: &TokenAmount,
        original: &TokenAmount,
        max_hops: usize,
    ) -> Result<()> {
        let pairs = self.pairs;
        let fee = self.options.fee_retained_bps;
        for (i, pair) in pairs.iter().enumerate() {
            if self.excluded[i] {
                continue;
            }
            if !pair.involves_token(&amount_out.token) || pair.has_empty_reserve() {
                continue;
            }
            let amount_in = match pair.get_input_amount(amount_out, fee) {
                Ok((input, _)) => input,
                Err(AppError::InsufficientReserves) => continue,
                Err(e) => return Err(e),
            };

            if amount_in.token == *token_in {
                let mut route_pairs = Vec::with_capacity(self.current.len() + 1);
                route_pairs.push(pair.clone());
                route_pairs.extend(self.current.iter().rev().cloned());
                let route = Route::new(route_pairs, token_in.clone(), Some(original.token.clone()))?;
                let trade = Trade::exact_out(route, original.clone(), fee)?;
                sorted_insert(&mut self.best, trade, self.options.max_results, trade_comparator);
            } else if max_hops > 1 && self.remaining > 1 {
                self.enter(i);
                let result = self.exact_out(token_in, &amount_in, original, max_hops - 1);
                self.leave(i);
                result?;
            }
        }
        Ok(())
    }

    // `current` holds the path in walk order: forward for exact-in,
    // output-to-input for exact-out.
    fn enter(&mut self, index: usize) {
        self.excluded[index] = true;
        self.remaining -= 1;
        self.current.push(self.pairs[index].clone());
    }

    fn leave(&mut self, index: usize) {
        self.current.pop();
        self.remaining += 1;
        self.excluded[index] = false;
    }
}

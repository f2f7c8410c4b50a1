//! Submitting a fired target's swap and waiting for it to settle.

use ethers::types::{Address, TxHash};
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::session::TargetId;
use super::target::TargetKind;
use crate::chain::ChainClient;
use crate::config::DispatchConfig;
use crate::dex::Token;
use crate::errors::{AppError, Result};
use crate::models::{Receipt, SwapRequest};
use crate::utils::{CancelToken, retry};

#[derive(Debug, Clone)]
pub struct SwapOrder {
    pub id: TargetId,
    pub request: SwapRequest,
    pub token0: Token,
    pub token1: Token,
    pub wallet: Address,
}

/// Realized amounts of a confirmed swap, in the order's input and output
/// tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub tx_hash: TxHash,
    pub amount_in: BigInt,
    pub amount_out: BigInt,
    pub gas_cost: BigInt,
}

#[derive(Debug)]
pub enum SwapEvent {
    Submitted { id: TargetId, tx_hash: TxHash },
    Confirmed { id: TargetId, settlement: Settlement },
    Failed { id: TargetId, error: AppError },
}

/// Run a swap to completion and report the outcome on `events`.
pub async fn run_swap(
    chain: &dyn ChainClient,
    order: SwapOrder,
    config: &DispatchConfig,
    cancel: &CancelToken,
    events: &mpsc::UnboundedSender<SwapEvent>,
) {
    let id = order.id;
    let event = match dispatch_swap(chain, &order, config, cancel, events).await {
        Ok(settlement) => SwapEvent::Confirmed { id, settlement },
        Err(error) => SwapEvent::Failed { id, error },
    };
    // the dispatcher may already be gone after cancellation
    let _ = events.send(event);
}

/// Submit, confirm and measure one swap.
pub async fn dispatch_swap(
    chain: &dyn ChainClient,
    order: &SwapOrder,
    config: &DispatchConfig,
    cancel: &CancelToken,
    events: &mpsc::UnboundedSender<SwapEvent>,
) -> Result<Settlement> {
    let before = balances(chain, order).await?;

    let request = &order.request;
    let tx_hash = retry(
        config.submit_attempts,
        config.submit_backoff,
        cancel,
        |attempt| async move {
            chain
                .submit_swap(request)
                .await
                .inspect_err(|e| warn!(attempt, error = %e, "[SWAP] submission failed"))
        },
    )
    .await
    .map_err(|e| match e {
        AppError::Cancelled => e,
        other => AppError::SubmitExhausted {
            attempts: config.submit_attempts.max(1),
            source: Box::new(other),
        },
    })?;
    info!(?tx_hash, id = ?order.id, "[SWAP] submitted");
    let _ = events.send(SwapEvent::Submitted {
        id: order.id,
        tx_hash,
    });

    let receipt = wait_for_receipt(chain, tx_hash, config, cancel).await?;
    let gas_cost = gas_cost(&receipt, request);
    let after = balances(chain, order).await?;
    let settlement = realized_settlement(order, tx_hash, before, after, gas_cost);
    info!(
        ?tx_hash,
        amount_in = %settlement.amount_in,
        amount_out = %settlement.amount_out,
        gas_cost = %settlement.gas_cost,
        "[SWAP] confirmed"
    );
    Ok(settlement)
}

/// Finish a swap submitted before a restart. Balances from before the
/// submission are gone, so it settles at its quoted bounds.
pub async fn resume_swap(
    chain: &dyn ChainClient,
    order: &SwapOrder,
    tx_hash: TxHash,
    config: &DispatchConfig,
    cancel: &CancelToken,
) -> Result<Settlement> {
    info!(?tx_hash, id = ?order.id, "[SWAP] resuming receipt polling");
    let receipt = wait_for_receipt(chain, tx_hash, config, cancel).await?;
    Ok(Settlement {
        tx_hash,
        amount_in: order.request.amount_in.clone(),
        amount_out: order.request.amount_out.clone(),
        gas_cost: gas_cost(&receipt, &order.request),
    })
}

/// Poll until mined; a reverted receipt is a failure, not a retry.
pub async fn wait_for_receipt(
    chain: &dyn ChainClient,
    tx_hash: TxHash,
    config: &DispatchConfig,
    cancel: &CancelToken,
) -> Result<Receipt> {
    for attempt in 1..=config.receipt_attempts {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        match chain.poll_receipt(tx_hash).await {
            Ok(Some(receipt)) if receipt.success => return Ok(receipt),
            Ok(Some(_)) => {
                warn!(?tx_hash, "[SWAP] transaction reverted");
                return Err(AppError::TxFailed(tx_hash));
            }
            Ok(None) => debug!(?tx_hash, attempt, "[SWAP] receipt not available yet"),
            Err(e) => warn!(?tx_hash, attempt, error = %e, "[SWAP] receipt poll failed"),
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            _ = tokio::time::sleep(config.receipt_interval) => {}
        }
    }
    Err(AppError::TxTimeout(tx_hash))
}

async fn balances(chain: &dyn ChainClient, order: &SwapOrder) -> Result<(BigInt, BigInt)> {
    tokio::try_join!(
        chain.fetch_balance(order.wallet, &order.token0),
        chain.fetch_balance(order.wallet, &order.token1),
    )
}

fn gas_cost(receipt: &Receipt, request: &SwapRequest) -> BigInt {
    let price = receipt
        .effective_gas_price
        .clone()
        .or_else(|| request.gas_price.clone())
        .unwrap_or_default();
    price * &receipt.gas_used
}

/// Balance deltas of the swap. Gas paid in the native token0 is taken
/// back out so only the swap itself is booked.
fn realized_settlement(
    order: &SwapOrder,
    tx_hash: TxHash,
    (before0, before1): (BigInt, BigInt),
    (after0, after1): (BigInt, BigInt),
    gas_cost: BigInt,
) -> Settlement {
    let native_gas = if order.token0.is_native {
        gas_cost.clone()
    } else {
        BigInt::zero()
    };
    let (amount_in, amount_out) = match order.id.kind {
        TargetKind::Buy => (before0 - after0 - native_gas, after1 - before1),
        TargetKind::Sell => (before1 - after1, after0 - before0 + native_gas),
    };
    Settlement {
        tx_hash,
        amount_in: non_negative(amount_in),
        amount_out: non_negative(amount_out),
        gas_cost,
    }
}

fn non_negative(value: BigInt) -> BigInt {
    if value.is_negative() {
        BigInt::zero()
    } else {
        value
    }
}

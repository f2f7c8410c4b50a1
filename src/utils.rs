//! Miscellaneous helper utilities.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::U256;
use num_bigint::{BigInt, Sign};
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt};

use crate::errors::{AppError, Result};

/// Initialize `tracing` subscriber with env-based filter.
///
/// If `RUST_LOG` is not set, defaults to `info` level.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

/// Cooperative cancellation shared by the feed, the dispatcher and swap
/// tasks. Cancelling is a one-way, idempotent transition.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives as long as `self`, so this only returns on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `op` up to `attempts` times, sleeping `backoff` between failures.
///
/// Returns the last error once attempts run out, or `Cancelled` if the
/// token fires first.
pub async fn retry<T, F, Fut>(
    attempts: u32,
    backoff: Duration,
    cancel: &CancelToken,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                tracing::debug!(attempt, error = %e, "retrying");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(AppError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
                attempt += 1;
            }
        }
    }
}

pub fn u256_to_bigint(value: U256) -> BigInt {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    BigInt::from_bytes_be(Sign::Plus, &bytes)
}

pub fn bigint_to_u256(value: &BigInt) -> Result<U256> {
    let (sign, bytes) = value.to_bytes_be();
    if sign == Sign::Minus {
        return Err(AppError::Other(format!("negative amount {value}")));
    }
    if bytes.len() > 32 {
        return Err(AppError::Other(format!("amount {value} overflows uint256")));
    }
    Ok(U256::from_big_endian(&bytes))
}

/// Seconds since the unix epoch.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

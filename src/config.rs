//! Configuration loader and application settings.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ethers::types::Address;
use url::Url;

use crate::errors::{AppError, Result};

/// Swap submission and confirmation policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub submit_attempts: u32,
    pub submit_backoff: Duration,
    pub receipt_interval: Duration,
    /// With the default interval this bounds confirmation at six minutes.
    pub receipt_attempts: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            submit_attempts: 3,
            submit_backoff: Duration::from_millis(50),
            receipt_interval: Duration::from_millis(500),
            receipt_attempts: 720,
        }
    }
}

/// Consolidated application configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// RPC endpoint for the Ethereum-compatible node.
    pub rpc_url: Url,
    /// Hex private key of the trading wallet.
    pub private_key: String,
    /// Overrides the router recorded in the session.
    pub router_address: Option<Address>,
    /// JSON file the session is loaded from and persisted to.
    pub session_file: PathBuf,
    pub poll_interval: Duration,
    pub max_hops: usize,
    pub max_results: usize,
    /// Extra tokens the route search may hop through.
    pub connectors: Vec<Address>,
    pub dispatch: DispatchConfig,
}

impl EngineConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns `None` for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rpc_url = Url::parse(&required(&lookup, "RPC_URL")?)?;
        let private_key = required(&lookup, "PRIVATE_KEY")?;
        let router_address = lookup("ROUTER_ADDRESS")
            .map(|raw| parse_address("ROUTER_ADDRESS", &raw))
            .transpose()?;
        let session_file = lookup("SESSION_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("session.json"));

        let poll_interval = Duration::from_millis(positive(&lookup, "POLL_INTERVAL_MS", 200)?);
        let max_hops = parsed(&lookup, "MAX_HOPS", 3)?;
        let max_results = parsed(&lookup, "MAX_RESULTS", 3)?;
        if max_hops == 0 || max_results == 0 {
            return Err(AppError::Config(
                "MAX_HOPS and MAX_RESULTS must be positive".into(),
            ));
        }

        let defaults = DispatchConfig::default();
        let dispatch = DispatchConfig {
            submit_attempts: parsed(&lookup, "SUBMIT_ATTEMPTS", defaults.submit_attempts)?,
            submit_backoff: Duration::from_millis(parsed(&lookup, "SUBMIT_BACKOFF_MS", 50)?),
            receipt_interval: Duration::from_millis(positive(&lookup, "RECEIPT_INTERVAL_MS", 500)?),
            receipt_attempts: positive(&lookup, "RECEIPT_ATTEMPTS", defaults.receipt_attempts)?,
        };

        let connectors = match lookup("CONNECTORS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_address("CONNECTORS", s))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            rpc_url,
            private_key,
            router_address,
            session_file,
            poll_interval,
            max_hops,
            max_results,
            connectors,
            dispatch,
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::Config(format!("Set {key} env var")))
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} must be a number, got {raw:?}"))),
        None => Ok(default),
    }
}

/// Like [`parsed`], but zero is rejected. Intervals feed `tokio::time::interval`,
/// which panics on a zero period.
fn positive<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialEq + From<u8>,
{
    let value = parsed(lookup, key, default)?;
    if value == T::from(0u8) {
        return Err(AppError::Config(format!("{key} must be positive")));
    }
    Ok(value)
}

fn parse_address(key: &str, raw: &str) -> Result<Address> {
    raw.parse()
        .map_err(|_| AppError::Config(format!("{key}: invalid address {raw:?}")))
}

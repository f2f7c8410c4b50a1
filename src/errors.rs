use ethers::types::{Address, TxHash};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Insufficient reserves")]
    InsufficientReserves,

    #[error("Insufficient input amount")]
    InsufficientInputAmount,

    #[error("Invalid slippage tolerance: must not be negative")]
    InvalidSlippageTolerance,

    #[error("Token mismatch: expected {expected:?}, got {actual:?}")]
    DiffToken { expected: Address, actual: Address },

    #[error("Invalid currency: {0}")]
    InvalidCurrency(String),

    #[error("Invalid pairs: {0}")]
    InvalidPairs(String),

    #[error("No pairs found")]
    NoPairsFound,

    #[error("No trade found")]
    NoTradeFound,

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Transaction {0:?} not confirmed in time")]
    TxTimeout(TxHash),

    #[error("Transaction {0:?} reverted")]
    TxFailed(TxHash),

    #[error("Swap submission failed after {attempts} attempts: {source}")]
    SubmitExhausted {
        attempts: u32,
        #[source]
        source: Box<AppError>,
    },

    #[error("Price parse failure: {0}")]
    PriceParseFailure(String),

    #[error("Amount resolved to zero")]
    NilAmount,

    #[error("Unknown token {0:?}")]
    NilToken(Address),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Provider error: {0}")]
    Provider(#[from] ethers::providers::ProviderError),

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Other: {0}")]
    Other(String),
}

impl AppError {
    /// Errors raised while quoting a target against the current pool state.
    /// They describe the market at this tick, not a broken session, so the
    /// dispatcher un-hits the target and tries again later.
    pub fn is_transient_quote(&self) -> bool {
        matches!(
            self,
            AppError::InsufficientReserves
                | AppError::InsufficientInputAmount
                | AppError::NoTradeFound
                | AppError::NilAmount
        )
    }
}

//! Values exchanged with the chain client and the session store.
//!
//! Amounts are raw integers in the token's smallest unit; decimals travel
//! alongside in [`TokenInfo`].

use ethers::types::{Address, H256, TxHash};
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::dex::{DEFAULT_FEE_RETAINED_BPS, Token, TradeType};

/// Reserves of one pool as read from chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairInfo {
    pub address: Address,
    pub token0: Address,
    pub token1: Address,
    pub reserve0: BigInt,
    pub reserve1: BigInt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
}

impl TokenInfo {
    pub fn into_token(self) -> Token {
        Token::new(self.address, self.decimals, self.symbol, self.name)
    }
}

/// Mined transaction outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub success: bool,
    pub gas_used: BigInt,
    pub effective_gas_price: Option<BigInt>,
    pub block_number: Option<u64>,
}

/// Router call parameters for a single swap.
///
/// For `ExactIn`, `amount_in` is spent and `amount_out` is the minimum
/// accepted; for `ExactOut`, `amount_out` is received and `amount_in` the
/// maximum spent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub kind: TradeType,
    pub path: Vec<Address>,
    pub amount_in: BigInt,
    pub amount_out: BigInt,
    /// Input paid in the native coin instead of its wrapped token.
    pub native_in: bool,
    /// Output paid out in the native coin.
    pub native_out: bool,
    pub recipient: Address,
    /// Unix seconds.
    pub deadline: u64,
    pub gas_price: Option<BigInt>,
    pub gas_limit: Option<BigInt>,
}

/// A UniswapV2-compatible deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dex {
    pub name: String,
    pub factory: Address,
    pub router: Address,
    pub init_code_hash: H256,
    #[serde(default = "default_fee_retained_bps")]
    pub fee_retained_bps: u32,
}

fn default_fee_retained_bps() -> u32 {
    DEFAULT_FEE_RETAINED_BPS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub chain_id: u64,
    pub native_symbol: String,
}

//! Collaborator interfaces the engine drives: on-chain reads and writes,
//! and session persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use ethers::types::{Address, TxHash};
use num_bigint::BigInt;

use crate::dex::Token;
use crate::errors::Result;
use crate::models::{PairInfo, Receipt, SwapRequest, TokenInfo};
use crate::trading::TradeSession;

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Reserves for every address that is a live pool. Unknown addresses are
    /// absent from the result rather than an error.
    async fn fetch_pair_reserves(&self, pairs: &[Address]) -> Result<HashMap<Address, PairInfo>>;

    async fn fetch_token_info(&self, tokens: &[Address]) -> Result<HashMap<Address, TokenInfo>>;

    /// Balance in raw units. Native tokens report the coin balance.
    async fn fetch_balance(&self, owner: Address, token: &Token) -> Result<BigInt>;

    async fn submit_swap(&self, request: &SwapRequest) -> Result<TxHash>;

    /// `None` while the transaction is not yet mined.
    async fn poll_receipt(&self, tx_hash: TxHash) -> Result<Option<Receipt>>;
}

pub trait SessionStore: Send + Sync {
    fn persist_session(&self, session: &TradeSession) -> Result<()>;

    fn load_session(&self) -> Result<Option<TradeSession>>;
}

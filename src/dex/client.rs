use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use ethers::{
    contract::abigen,
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::{Address, TxHash, U256, U64},
};
use futures::future::join_all;
use num_bigint::BigInt;
use parking_lot::Mutex;
use tracing::{debug, info};
use url::Url;

use super::{Token, TradeType};
use crate::chain::ChainClient;
use crate::errors::{AppError, Result};
use crate::models::{PairInfo, Receipt, SwapRequest, TokenInfo};
use crate::utils::{bigint_to_u256, u256_to_bigint};

abigen!(
    UniswapV2Pair,
    r"[
        function token0() view returns (address)
        function token1() view returns (address)
        function getReserves() view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast)
    ]",
);

abigen!(
    ERC20,
    r"[
        function balanceOf(address owner) view returns (uint256)
        function decimals() view returns (uint8)
        function symbol() view returns (string)
        function name() view returns (string)
    ]",
);

abigen!(
    UniswapV2Router02,
    r"[
        function swapExactTokensForTokens(uint256 amountIn, uint256 amountOutMin, address[] path, address to, uint256 deadline) returns (uint256[] amounts)
        function swapTokensForExactTokens(uint256 amountOut, uint256 amountInMax, address[] path, address to, uint256 deadline) returns (uint256[] amounts)
        function swapExactETHForTokens(uint256 amountOutMin, address[] path, address to, uint256 deadline) payable returns (uint256[] amounts)
        function swapETHForExactTokens(uint256 amountOut, address[] path, address to, uint256 deadline) payable returns (uint256[] amounts)
        function swapExactTokensForETH(uint256 amountIn, uint256 amountOutMin, address[] path, address to, uint256 deadline) returns (uint256[] amounts)
        function swapTokensForExactETH(uint256 amountOut, uint256 amountInMax, address[] path, address to, uint256 deadline) returns (uint256[] amounts)
    ]",
);

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Router entry point for a swap request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouterMethod {
    ExactTokensForTokens,
    TokensForExactTokens,
    ExactEthForTokens,
    EthForExactTokens,
    ExactTokensForEth,
    TokensForExactEth,
}

impl RouterMethod {
    fn for_request(request: &SwapRequest) -> Self {
        match (request.kind, request.native_in, request.native_out) {
            (TradeType::ExactIn, true, _) => Self::ExactEthForTokens,
            (TradeType::ExactIn, false, true) => Self::ExactTokensForEth,
            (TradeType::ExactIn, false, false) => Self::ExactTokensForTokens,
            (TradeType::ExactOut, true, _) => Self::EthForExactTokens,
            (TradeType::ExactOut, false, true) => Self::TokensForExactEth,
            (TradeType::ExactOut, false, false) => Self::TokensForExactTokens,
        }
    }
}

/// JSON-RPC chain access for UniswapV2-style deployments.
#[derive(Clone)]
pub struct EthersClient {
    provider: Arc<Provider<Http>>,
    router: UniswapV2Router02<SignerClient>,
    wallet: Address,
    /// Pool tokens never change, so they are read once per pool.
    pool_tokens: Arc<Mutex<HashMap<Address, (Address, Address)>>>,
}

impl EthersClient {
    pub async fn connect(rpc_url: &Url, private_key: &str, router: Address) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url.as_str())?;
        let chain_id = provider.get_chainid().await?;
        let wallet = LocalWallet::from_str(private_key.trim_start_matches("0x"))
            .map_err(|e| AppError::Config(format!("invalid PRIVATE_KEY: {e}")))?
            .with_chain_id(chain_id.as_u64());
        let address = wallet.address();
        let signer = Arc::new(SignerMiddleware::new(provider.clone(), wallet));
        info!(chain_id = chain_id.as_u64(), wallet = ?address, ?router, "[INIT] chain client ready");
        Ok(Self {
            provider: Arc::new(provider),
            router: UniswapV2Router02::new(router, signer),
            wallet: address,
            pool_tokens: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn wallet(&self) -> Address {
        self.wallet
    }

    /// Tokens of a pool, or `None` when nothing is deployed at `address`.
    async fn pool_tokens(&self, address: Address) -> Result<Option<(Address, Address)>> {
        if let Some(tokens) = self.pool_tokens.lock().get(&address).copied() {
            return Ok(Some(tokens));
        }
        let code = self.provider.get_code(address, None).await?;
        if code.as_ref().is_empty() {
            return Ok(None);
        }
        let pair = UniswapV2Pair::new(address, Arc::clone(&self.provider));
        let token0 = pair.token_0().call().await.map_err(contract_error)?;
        let token1 = pair.token_1().call().await.map_err(contract_error)?;
        self.pool_tokens.lock().insert(address, (token0, token1));
        Ok(Some((token0, token1)))
    }

    async fn pair_info(&self, address: Address) -> Result<Option<PairInfo>> {
        let Some((token0, token1)) = self.pool_tokens(address).await? else {
            debug!(?address, "[DEX] no pool deployed");
            return Ok(None);
        };
        let pair = UniswapV2Pair::new(address, Arc::clone(&self.provider));
        let (reserve0, reserve1, _) = pair.get_reserves().call().await.map_err(contract_error)?;
        Ok(Some(PairInfo {
            address,
            token0,
            token1,
            reserve0: BigInt::from(reserve0),
            reserve1: BigInt::from(reserve1),
        }))
    }

    async fn token_info(&self, address: Address) -> Result<TokenInfo> {
        let token = ERC20::new(address, Arc::clone(&self.provider));
        let (symbol, name, decimals) = tokio::try_join!(
            async { token.symbol().call().await.map_err(contract_error) },
            async { token.name().call().await.map_err(contract_error) },
            async { token.decimals().call().await.map_err(contract_error) },
        )?;
        Ok(TokenInfo {
            address,
            symbol,
            name,
            decimals,
        })
    }
}

#[async_trait]
impl ChainClient for EthersClient {
    async fn fetch_pair_reserves(&self, pairs: &[Address]) -> Result<HashMap<Address, PairInfo>> {
        let results = join_all(pairs.iter().map(|address| self.pair_info(*address))).await;
        let mut out = HashMap::with_capacity(pairs.len());
        for result in results {
            if let Some(info) = result? {
                out.insert(info.address, info);
            }
        }
        Ok(out)
    }

    async fn fetch_token_info(&self, tokens: &[Address]) -> Result<HashMap<Address, TokenInfo>> {
        let results = join_all(tokens.iter().map(|address| self.token_info(*address))).await;
        results
            .into_iter()
            .map(|r| r.map(|info| (info.address, info)))
            .collect()
    }

    async fn fetch_balance(&self, owner: Address, token: &Token) -> Result<BigInt> {
        let raw = if token.is_native {
            self.provider.get_balance(owner, None).await?
        } else {
            ERC20::new(token.address, Arc::clone(&self.provider))
                .balance_of(owner)
                .call()
                .await
                .map_err(contract_error)?
        };
        Ok(u256_to_bigint(raw))
    }

    async fn submit_swap(&self, request: &SwapRequest) -> Result<TxHash> {
        let amount_in = bigint_to_u256(&request.amount_in)?;
        let amount_out = bigint_to_u256(&request.amount_out)?;
        let path = request.path.clone();
        let to = request.recipient;
        let deadline = U256::from(request.deadline);

        let method = RouterMethod::for_request(request);
        let mut call = match method {
            RouterMethod::ExactTokensForTokens => self
                .router
                .swap_exact_tokens_for_tokens(amount_in, amount_out, path, to, deadline),
            RouterMethod::TokensForExactTokens => self
                .router
                .swap_tokens_for_exact_tokens(amount_out, amount_in, path, to, deadline),
            RouterMethod::ExactEthForTokens => self
                .router
                .swap_exact_eth_for_tokens(amount_out, path, to, deadline)
                .value(amount_in),
            RouterMethod::EthForExactTokens => self
                .router
                .swap_eth_for_exact_tokens(amount_out, path, to, deadline)
                .value(amount_in),
            RouterMethod::ExactTokensForEth => self
                .router
                .swap_exact_tokens_for_eth(amount_in, amount_out, path, to, deadline),
            RouterMethod::TokensForExactEth => self
                .router
                .swap_tokens_for_exact_eth(amount_out, amount_in, path, to, deadline),
        };
        if let Some(gas_price) = &request.gas_price {
            call = call.gas_price(bigint_to_u256(gas_price)?);
        }
        if let Some(gas_limit) = &request.gas_limit {
            call = call.gas(bigint_to_u256(gas_limit)?);
        }

        let pending = call.send().await.map_err(contract_error)?;
        let tx_hash = pending.tx_hash();
        debug!(?tx_hash, ?method, "[DEX] swap sent");
        Ok(tx_hash)
    }

    async fn poll_receipt(&self, tx_hash: TxHash) -> Result<Option<Receipt>> {
        let receipt = self.provider.get_transaction_receipt(tx_hash).await?;
        Ok(receipt.map(|r| Receipt {
            tx_hash,
            success: r.status == Some(U64::from(1)),
            gas_used: r.gas_used.map(u256_to_bigint).unwrap_or_default(),
            effective_gas_price: r.effective_gas_price.map(u256_to_bigint),
            block_number: r.block_number.map(|b| b.as_u64()),
        }))
    }
}

fn contract_error(e: impl std::fmt::Display) -> AppError {
    AppError::Contract(e.to_string())
}

//! Constant-product AMM model and route search for UniswapV2-style pools.

pub mod calc;
pub mod client;
pub mod pair;
pub mod price;
pub mod route;
pub mod router;
pub mod token;
pub mod trade;

pub use calc::{DEFAULT_FEE_RETAINED_BPS, FEE_DENOMINATOR, get_amount_in, get_amount_out};
pub use client::EthersClient;
pub use pair::Pair;
pub use price::Price;
pub use route::Route;
pub use router::{
    BestTradeOptions, best_trade_exact_in, best_trade_exact_out, sorted_insert, trade_comparator,
};
pub use token::{Token, TokenAmount};
pub use trade::{Trade, TradeType};

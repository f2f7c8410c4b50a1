//! Core library for the dex-trader engine.
//!
//! Quotes a token pair on a UniswapV2-style exchange, fires buy and sell
//! swaps when price targets trigger, and persists the session so a restart
//! resumes where it stopped.

pub mod chain;
pub mod config;
pub mod dex;
pub mod errors;
pub mod math;
pub mod models;
pub mod store;
pub mod trading;
pub mod utils;

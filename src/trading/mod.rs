//! Target-driven trading: live quoting, trigger evaluation and swap
//! execution for one session.

pub mod dispatcher;
pub mod feed;
pub mod session;
pub mod swap;
pub mod target;

pub use dispatcher::{SessionOutcome, TradeDispatcher, run_dispatcher};
pub use feed::{FeedAmount, FeedConfig, FeedHandle, FeedSnapshot, start_price_feed};
pub use session::{CompletionReason, SessionPhase, TargetId, TradeSession};
pub use swap::{Settlement, SwapEvent, SwapOrder};
pub use target::{
    AmountMode, GasSettings, Target, TargetAmount, TargetKind, TargetState, evaluate_buy,
    evaluate_sell,
};

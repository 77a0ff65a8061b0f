// Order execution and market data module
pub mod candle_buffer;
pub mod executor;
pub mod position_manager;
pub mod price_feed;
pub mod trader;

pub use candle_buffer::{CandleBuffer, PushOutcome};
pub use executor::{ExecutionAction, ExecutionDecision, Executor};
pub use position_manager::{PositionManager, PositionState};
pub use price_feed::{parse_kline_message, PriceFeedManager};
pub use trader::{KlineOutcome, Trader, TraderConfig};

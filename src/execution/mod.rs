// Order execution, position tracking and the live trading loop
pub mod candle_buffer;
pub mod error;
pub mod events;
pub mod position_manager;
pub mod runner;

pub use candle_buffer::{BufferUpdate, CandleBuffer};
pub use error::ExecutionError;
pub use events::TradingEvent;
pub use position_manager::{
    bracket_prices, BotStatus, CloseOutcome, PositionManager, TradingStatistics,
    ADOPTED_STRATEGY, BRACKET_CLOSE_REASON, MANUAL_STRATEGY,
};
pub use runner::{BotError, TradingBot};

use crate::models::{ClosedTrade, Position, Signal};
use serde::Serialize;

/// Everything the position manager reports to observers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TradingEvent {
    TradingStarted {
        baseline_equity: f64,
        adopted_positions: usize,
    },
    TradingStopped,
    TradeExecuted {
        position: Position,
        signal: Signal,
    },
    TradeFailed {
        symbol: String,
        strategy: String,
        reason: String,
    },
    PositionClosed {
        trade: ClosedTrade,
    },
    ClosePositionFailed {
        symbol: String,
        reason: String,
    },
    /// Informational; nothing is liquidated
    DrawdownAlert {
        drawdown_percent: f64,
        max_drawdown_percent: f64,
        equity: f64,
        peak_equity: f64,
    },
    DailyLossLimitReached {
        daily_pnl: f64,
        limit: f64,
    },
}

impl TradingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TradingEvent::TradingStarted { .. } => "trading_started",
            TradingEvent::TradingStopped => "trading_stopped",
            TradingEvent::TradeExecuted { .. } => "trade_executed",
            TradingEvent::TradeFailed { .. } => "trade_failed",
            TradingEvent::PositionClosed { .. } => "position_closed",
            TradingEvent::ClosePositionFailed { .. } => "close_position_failed",
            TradingEvent::DrawdownAlert { .. } => "drawdown_alert",
            TradingEvent::DailyLossLimitReached { .. } => "daily_loss_limit_reached",
        }
    }
}

use crate::config::TradingConfig;
use crate::models::{Direction, PositionState};
use thiserror::Error;

/// Pre-trade gates, evaluated in a fixed order before any order is sent
#[derive(Debug, Clone, PartialEq)]
pub struct RiskLimits {
    pub max_positions: usize,
    pub daily_loss_limit_percent: f64,
    pub max_drawdown_percent: f64,
}

impl RiskLimits {
    pub fn from_config(config: &TradingConfig) -> Self {
        Self {
            max_positions: config.max_positions,
            daily_loss_limit_percent: config.daily_loss_limit_percent,
            max_drawdown_percent: config.max_drawdown_percent,
        }
    }

    /// Absolute loss allowed per UTC day, or None without a baseline
    pub fn daily_loss_limit(&self, baseline_equity: f64) -> Option<f64> {
        if baseline_equity <= 0.0 || self.daily_loss_limit_percent <= 0.0 {
            return None;
        }
        Some(baseline_equity * self.daily_loss_limit_percent / 100.0)
    }

    pub fn daily_loss_breached(&self, daily_pnl: f64, baseline_equity: f64) -> bool {
        self.daily_loss_limit(baseline_equity)
            .map(|limit| daily_pnl <= -limit)
            .unwrap_or(false)
    }

    pub fn drawdown_breached(&self, drawdown_percent: f64) -> bool {
        drawdown_percent > self.max_drawdown_percent
    }

    /// Gate order: position count, daily loss, symbol occupancy.
    /// `occupied` is whatever the book already holds for the signal's symbol.
    pub fn check_entry(&self, entry: &EntryCheck) -> Result<(), RiskRejection> {
        if entry.open_count >= self.max_positions {
            return Err(RiskRejection::MaxPositions {
                open: entry.open_count,
                max: self.max_positions,
            });
        }

        if self.daily_loss_breached(entry.daily_pnl, entry.baseline_equity) {
            return Err(RiskRejection::DailyLoss {
                daily_pnl: entry.daily_pnl,
                limit: self
                    .daily_loss_limit(entry.baseline_equity)
                    .unwrap_or_default(),
            });
        }

        if let Some((side, state)) = entry.occupied {
            return Err(RiskRejection::SymbolOccupied {
                symbol: entry.symbol.clone(),
                side,
                state,
                same_direction: side == entry.direction,
            });
        }

        Ok(())
    }
}

/// Book snapshot a gate evaluation runs against
#[derive(Debug, Clone)]
pub struct EntryCheck {
    pub symbol: String,
    pub direction: Direction,
    pub open_count: usize,
    pub daily_pnl: f64,
    pub baseline_equity: f64,
    pub occupied: Option<(Direction, PositionState)>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiskRejection {
    #[error("max positions reached ({open}/{max})")]
    MaxPositions { open: usize, max: usize },

    #[error("daily loss limit reached (pnl {daily_pnl:.2}, limit -{limit:.2})")]
    DailyLoss { daily_pnl: f64, limit: f64 },

    #[error(
        "{symbol} already has {} {side} position ({state:?})",
        occupancy(.same_direction)
    )]
    SymbolOccupied {
        symbol: String,
        side: Direction,
        state: PositionState,
        same_direction: bool,
    },
}

fn occupancy(same_direction: &bool) -> &'static str {
    if *same_direction {
        "a"
    } else {
        "an opposite"
    }
}

/// Equity high-water mark for drawdown measurement
#[derive(Debug, Clone, PartialEq)]
pub struct EquityTracker {
    pub baseline: f64,
    pub equity: f64,
    pub peak: f64,
}

impl EquityTracker {
    pub fn new(baseline: f64) -> Self {
        Self {
            baseline,
            equity: baseline,
            peak: baseline,
        }
    }

    pub fn update(&mut self, equity: f64) {
        self.equity = equity;
        if equity > self.peak {
            self.peak = equity;
        }
    }

    /// Percent below the peak; 0 at or above it
    pub fn drawdown_percent(&self) -> f64 {
        if self.peak <= 0.0 {
            return 0.0;
        }
        ((self.peak - self.equity) / self.peak * 100.0).max(0.0)
    }
}

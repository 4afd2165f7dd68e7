use super::{MarketContext, Strategy};
use crate::models::{Direction, Signal};

/// EMA(9)/EMA(21) crossover confirmed by RSI, the EMA(50) trend and a volume surge
///
/// Long: fast EMA crosses above slow EMA on the latest candle, RSI in (50, 70),
/// close above EMA(50), volume > 1.2x the trailing average. Short mirrors with
/// RSI in (30, 50) and close below EMA(50).
#[derive(Debug, Clone)]
pub struct EmaCrossoverStrategy {
    pub volume_multiplier: f64,
    pub stop_atr_multiple: f64,
    pub target_atr_multiple: f64,
}

impl Default for EmaCrossoverStrategy {
    fn default() -> Self {
        Self {
            volume_multiplier: 1.2,
            stop_atr_multiple: 2.0,
            target_atr_multiple: 4.0,
        }
    }
}

impl EmaCrossoverStrategy {
    pub const NAME: &'static str = "EMA Crossover + RSI";
    pub const CONFIDENCE: f64 = 75.0;
}

impl Strategy for EmaCrossoverStrategy {
    fn evaluate(&self, ctx: &MarketContext) -> Option<Signal> {
        if ctx.len() < self.min_candles_required() {
            return None;
        }

        let i = ctx.last_index()?;
        let fast = MarketContext::at(&ctx.ema9, i)?;
        let slow = MarketContext::at(&ctx.ema21, i)?;
        let prev_fast = MarketContext::at(&ctx.ema9, i - 1)?;
        let prev_slow = MarketContext::at(&ctx.ema21, i - 1)?;
        let trend = MarketContext::at(&ctx.ema50, i)?;
        let rsi = MarketContext::at(&ctx.rsi, i)?;
        let atr = MarketContext::at(&ctx.atr, i)?;
        let avg_volume = MarketContext::at(&ctx.volume_avg, i)?;

        let candle = ctx.last()?;
        let entry = candle.close;
        if candle.volume <= self.volume_multiplier * avg_volume {
            return None;
        }

        if prev_fast <= prev_slow && fast > slow && rsi > 50.0 && rsi < 70.0 && entry > trend {
            return Some(ctx.signal(
                Direction::Long,
                entry,
                entry - self.stop_atr_multiple * atr,
                entry + self.target_atr_multiple * atr,
                Self::CONFIDENCE,
                Self::NAME,
            ));
        }

        if prev_fast >= prev_slow && fast < slow && rsi > 30.0 && rsi < 50.0 && entry < trend {
            return Some(ctx.signal(
                Direction::Short,
                entry,
                entry + self.stop_atr_multiple * atr,
                entry - self.target_atr_multiple * atr,
                Self::CONFIDENCE,
                Self::NAME,
            ));
        }

        None
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn min_candles_required(&self) -> usize {
        50
    }
}

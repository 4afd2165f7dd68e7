use super::{MarketContext, Strategy};
use crate::indicators::find_swing_points;
use crate::models::{Direction, Signal};

/// Market structure break
///
/// Long when the close clears the second-most-recent swing high with RSI > 55.
/// The stop goes at the most recent swing low, or 2x ATR below entry when that
/// swing is missing or not below entry. Shorts mirror with RSI < 45.
#[derive(Debug, Clone)]
pub struct StructureBreakStrategy {
    pub fallback_atr_multiple: f64,
    pub target_atr_multiple: f64,
}

impl Default for StructureBreakStrategy {
    fn default() -> Self {
        Self {
            fallback_atr_multiple: 2.0,
            target_atr_multiple: 3.0,
        }
    }
}

impl StructureBreakStrategy {
    pub const NAME: &'static str = "Market Structure Break";
    pub const CONFIDENCE: f64 = 72.0;
}

impl Strategy for StructureBreakStrategy {
    fn evaluate(&self, ctx: &MarketContext) -> Option<Signal> {
        if ctx.len() < self.min_candles_required() {
            return None;
        }

        let i = ctx.last_index()?;
        let rsi = MarketContext::at(&ctx.rsi, i)?;
        let atr = MarketContext::at(&ctx.atr, i)?;
        let entry = ctx.last()?.close;
        let swings = find_swing_points(ctx.candles);

        if swings.highs.len() >= 2 && rsi > 55.0 {
            let broken = ctx.candles[swings.highs[swings.highs.len() - 2]].high;
            if entry > broken {
                let stop = swings
                    .lows
                    .last()
                    .map(|&idx| ctx.candles[idx].low)
                    .filter(|&low| low < entry)
                    .unwrap_or(entry - self.fallback_atr_multiple * atr);

                return Some(ctx.signal(
                    Direction::Long,
                    entry,
                    stop,
                    entry + self.target_atr_multiple * atr,
                    Self::CONFIDENCE,
                    Self::NAME,
                ));
            }
        }

        if swings.lows.len() >= 2 && rsi < 45.0 {
            let broken = ctx.candles[swings.lows[swings.lows.len() - 2]].low;
            if entry < broken {
                let stop = swings
                    .highs
                    .last()
                    .map(|&idx| ctx.candles[idx].high)
                    .filter(|&high| high > entry)
                    .unwrap_or(entry + self.fallback_atr_multiple * atr);

                return Some(ctx.signal(
                    Direction::Short,
                    entry,
                    stop,
                    entry - self.target_atr_multiple * atr,
                    Self::CONFIDENCE,
                    Self::NAME,
                ));
            }
        }

        None
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn min_candles_required(&self) -> usize {
        20
    }
}

use super::{MarketContext, Strategy};
use crate::models::{Direction, Signal};

/// Liquidity sweep + fair value gap
///
/// Over the last three candles (first, middle, current):
/// - a sweep: the lowest low of the three undercuts the first candle's low
/// - a reversal: the current close clears the middle candle's high
/// - a bullish gap: the current low sits above the first candle's high
/// - a volume surge on the current candle
///
/// Shorts mirror all four. The stop goes one ATR past the swept extreme and the
/// target is twice the entry-to-stop distance.
#[derive(Debug, Clone)]
pub struct LiquiditySweepStrategy {
    pub volume_multiplier: f64,
    pub reward_multiple: f64,
}

impl Default for LiquiditySweepStrategy {
    fn default() -> Self {
        Self {
            volume_multiplier: 1.5,
            reward_multiple: 2.0,
        }
    }
}

impl LiquiditySweepStrategy {
    pub const NAME: &'static str = "Liquidity Sweep + FVG";
    pub const CONFIDENCE: f64 = 82.0;
}

impl Strategy for LiquiditySweepStrategy {
    fn evaluate(&self, ctx: &MarketContext) -> Option<Signal> {
        if ctx.len() < self.min_candles_required() {
            return None;
        }

        let i = ctx.last_index()?;
        let atr = MarketContext::at(&ctx.atr, i)?;
        let avg_volume = MarketContext::at(&ctx.volume_avg, i)?;

        let [first, middle, current] = [&ctx.candles[i - 2], &ctx.candles[i - 1], &ctx.candles[i]];
        if current.volume <= self.volume_multiplier * avg_volume {
            return None;
        }

        let entry = current.close;
        let swept_low = first.low.min(middle.low).min(current.low);
        let swept_high = first.high.max(middle.high).max(current.high);

        let bullish_gap = current.low > first.high;
        if swept_low < first.low && entry > middle.high && bullish_gap {
            let stop = swept_low - atr;
            return Some(ctx.signal(
                Direction::Long,
                entry,
                stop,
                entry + self.reward_multiple * (entry - stop),
                Self::CONFIDENCE,
                Self::NAME,
            ));
        }

        let bearish_gap = current.high < first.low;
        if swept_high > first.high && entry < middle.low && bearish_gap {
            let stop = swept_high + atr;
            return Some(ctx.signal(
                Direction::Short,
                entry,
                stop,
                entry - self.reward_multiple * (stop - entry),
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
        5
    }
}

use super::{MarketContext, Strategy};
use crate::indicators::find_pivots;
use crate::models::{Direction, Signal};

/// Delta divergence
///
/// Within the trailing window, compares the last two 3-bar pivots. Price making
/// a lower low while delta at the pivot improves, with OBV rising across the
/// window and RSI < 40, is bullish. Bearish mirrors with RSI > 60.
#[derive(Debug, Clone)]
pub struct DeltaDivergenceStrategy {
    pub window: usize,
    pub target_atr_multiple: f64,
}

impl Default for DeltaDivergenceStrategy {
    fn default() -> Self {
        Self {
            window: 20,
            target_atr_multiple: 3.0,
        }
    }
}

impl DeltaDivergenceStrategy {
    pub const NAME: &'static str = "Delta Divergence";
    pub const CONFIDENCE: f64 = 78.0;
}

impl Strategy for DeltaDivergenceStrategy {
    fn evaluate(&self, ctx: &MarketContext) -> Option<Signal> {
        if ctx.len() < self.min_candles_required() {
            return None;
        }

        let i = ctx.last_index()?;
        let rsi = MarketContext::at(&ctx.rsi, i)?;
        let atr = MarketContext::at(&ctx.atr, i)?;
        let entry = ctx.last()?.close;

        let start = ctx.len().saturating_sub(self.window);
        let pivots = find_pivots(ctx.candles, start);
        let obv_rising = ctx.obv[i] > ctx.obv[start];
        let obv_falling = ctx.obv[i] < ctx.obv[start];

        if let &[.., prior, latest] = pivots.lows.as_slice() {
            let lower_low = ctx.candles[latest].low < ctx.candles[prior].low;
            let stronger_delta = ctx.delta[latest] > ctx.delta[prior];
            if lower_low && stronger_delta && obv_rising && rsi < 40.0 {
                return Some(ctx.signal(
                    Direction::Long,
                    entry,
                    ctx.candles[latest].low - atr,
                    entry + self.target_atr_multiple * atr,
                    Self::CONFIDENCE,
                    Self::NAME,
                ));
            }
        }

        if let &[.., prior, latest] = pivots.highs.as_slice() {
            let higher_high = ctx.candles[latest].high > ctx.candles[prior].high;
            let weaker_delta = ctx.delta[latest] < ctx.delta[prior];
            if higher_high && weaker_delta && obv_falling && rsi > 60.0 {
                return Some(ctx.signal(
                    Direction::Short,
                    entry,
                    ctx.candles[latest].high + atr,
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
        25
    }
}

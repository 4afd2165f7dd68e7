use super::{MarketContext, Strategy};
use crate::models::{Direction, Signal};

/// Volume profile + order flow
///
/// Looks for a close on the far side of VWAP backed by an outsized candle delta
/// and a volume surge. Stops sit one ATR beyond VWAP.
#[derive(Debug, Clone)]
pub struct OrderFlowStrategy {
    pub delta_multiplier: f64,
    pub volume_multiplier: f64,
    pub target_atr_multiple: f64,
}

impl Default for OrderFlowStrategy {
    fn default() -> Self {
        Self {
            delta_multiplier: 1.5,
            volume_multiplier: 1.5,
            target_atr_multiple: 3.0,
        }
    }
}

impl OrderFlowStrategy {
    pub const NAME: &'static str = "Volume Profile + Order Flow";
    pub const CONFIDENCE: f64 = 80.0;
}

impl Strategy for OrderFlowStrategy {
    fn evaluate(&self, ctx: &MarketContext) -> Option<Signal> {
        if ctx.len() < self.min_candles_required() {
            return None;
        }

        let i = ctx.last_index()?;
        let vwap = MarketContext::at(&ctx.vwap, i)?;
        let delta_ema = MarketContext::at(&ctx.delta_ema9, i)?;
        let atr = MarketContext::at(&ctx.atr, i)?;
        let avg_volume = MarketContext::at(&ctx.volume_avg, i)?;

        let candle = ctx.last()?;
        let entry = candle.close;
        let delta = ctx.delta[i];

        if candle.volume <= self.volume_multiplier * avg_volume {
            return None;
        }

        if entry > vwap && delta > 0.0 && delta > self.delta_multiplier * delta_ema {
            return Some(ctx.signal(
                Direction::Long,
                entry,
                vwap - atr,
                entry + self.target_atr_multiple * atr,
                Self::CONFIDENCE,
                Self::NAME,
            ));
        }

        if entry < vwap && delta < 0.0 && delta < self.delta_multiplier * delta_ema {
            return Some(ctx.signal(
                Direction::Short,
                entry,
                vwap + atr,
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
        20
    }
}

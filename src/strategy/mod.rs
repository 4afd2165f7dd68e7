// Trading strategy module
pub mod delta_divergence;
pub mod ema_crossover;
pub mod engine;
pub mod liquidity_sweep;
pub mod order_flow;
pub mod structure_break;

pub use delta_divergence::DeltaDivergenceStrategy;
pub use ema_crossover::EmaCrossoverStrategy;
pub use engine::StrategyEngine;
pub use liquidity_sweep::LiquiditySweepStrategy;
pub use order_flow::OrderFlowStrategy;
pub use structure_break::StructureBreakStrategy;

use chrono::Utc;

use crate::indicators::{
    calculate_atr_series, calculate_average_volume_series, calculate_delta_series,
    calculate_ema_series, calculate_obv_series, calculate_rsi_series, calculate_vwap_series,
};
use crate::models::{Candle, Direction, Signal};

pub const RSI_PERIOD: usize = 14;
pub const ATR_PERIOD: usize = 14;
pub const VOLUME_AVERAGE_PERIOD: usize = 20;

/// Base trait for all trading strategies
pub trait Strategy: Send + Sync {
    /// Evaluate the latest candle. `None` when the pattern is absent,
    /// the window is too short, or a required indicator is still warming up.
    fn evaluate(&self, ctx: &MarketContext) -> Option<Signal>;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum candles required for this strategy
    fn min_candles_required(&self) -> usize;
}

/// Indicator series computed once per evaluation cycle.
///
/// Every series has the same length as `candles`; index `i` holds the value
/// through candle `i`, or `None` while the indicator warms up.
#[derive(Debug, Clone)]
pub struct MarketContext<'a> {
    pub symbol: &'a str,
    pub candles: &'a [Candle],
    pub closes: Vec<f64>,
    pub ema9: Vec<Option<f64>>,
    pub ema21: Vec<Option<f64>>,
    pub ema50: Vec<Option<f64>>,
    pub rsi: Vec<Option<f64>>,
    pub atr: Vec<Option<f64>>,
    pub vwap: Vec<Option<f64>>,
    pub obv: Vec<f64>,
    pub delta: Vec<f64>,
    pub delta_ema9: Vec<Option<f64>>,
    pub volume_avg: Vec<Option<f64>>,
}

impl<'a> MarketContext<'a> {
    pub fn new(symbol: &'a str, candles: &'a [Candle]) -> Self {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let delta = calculate_delta_series(candles);

        Self {
            symbol,
            candles,
            ema9: calculate_ema_series(&closes, 9),
            ema21: calculate_ema_series(&closes, 21),
            ema50: calculate_ema_series(&closes, 50),
            rsi: calculate_rsi_series(&closes, RSI_PERIOD),
            atr: calculate_atr_series(candles, ATR_PERIOD),
            vwap: calculate_vwap_series(candles),
            obv: calculate_obv_series(candles),
            delta_ema9: calculate_ema_series(&delta, 9),
            volume_avg: calculate_average_volume_series(candles, VOLUME_AVERAGE_PERIOD),
            delta,
            closes,
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Index of the latest candle
    pub fn last_index(&self) -> Option<usize> {
        self.candles.len().checked_sub(1)
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Value of an aligned series at `index`, flattening warm-up gaps
    pub fn at(series: &[Option<f64>], index: usize) -> Option<f64> {
        series.get(index).copied().flatten()
    }

    /// Build a signal for this context's symbol, stamped now
    pub fn signal(
        &self,
        direction: Direction,
        entry_price: f64,
        stop_loss: f64,
        take_profit: f64,
        confidence: f64,
        strategy_name: &str,
    ) -> Signal {
        Signal {
            symbol: self.symbol.to_string(),
            direction,
            entry_price,
            stop_loss,
            take_profit,
            confidence,
            strategy_name: strategy_name.to_string(),
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Candle windows shaped so that exactly the named pattern fires on the last bar

    use crate::models::Candle;
    use chrono::{Duration, TimeZone, Utc};

    pub fn candle(i: usize, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Candle {
            timestamp: base + Duration::minutes(5 * i as i64),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Candles from a close path: open = previous close, wick of `wick` on both sides
    fn from_closes(closes: &[f64], wick: f64, volumes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let open = if i == 0 { close } else { closes[i - 1] };
                candle(
                    i,
                    open,
                    open.max(close) + wick,
                    open.min(close) - wick,
                    close,
                    volumes[i],
                )
            })
            .collect()
    }

    /// Choppy drift down for 45 bars, then a rally where EMA(9) crosses EMA(21)
    /// on the final bar with RSI ~54 and volume 1.3x the average
    pub fn ema_crossover_long() -> Vec<Candle> {
        let mut closes = Vec::with_capacity(50);
        for i in 0..45 {
            let wiggle = if i % 2 == 0 { 0.5 } else { -0.5 };
            closes.push(100.0 + wiggle - 0.1 * i as f64);
        }
        for step in [0.5, 0.5, -0.25, 0.5, 0.5] {
            let last = closes[closes.len() - 1];
            closes.push(last + step);
        }

        let mut volumes = vec![1000.0; 50];
        volumes[49] = 1300.0;
        from_closes(&closes, 0.5, &volumes)
    }

    /// Tight chop around 100 followed by a strong up bar on double volume
    pub fn order_flow_long() -> Vec<Candle> {
        let mut candles: Vec<Candle> = (0..29)
            .map(|i| {
                let close = if i % 2 == 0 { 100.2 } else { 99.8 };
                candle(
                    i,
                    100.0,
                    100.0f64.max(close) + 0.1,
                    100.0f64.min(close) - 0.1,
                    close,
                    1000.0,
                )
            })
            .collect();
        candles.push(candle(29, 100.0, 102.1, 99.9, 102.0, 2000.0));
        candles
    }

    pub fn order_flow_short() -> Vec<Candle> {
        let mut candles = order_flow_long();
        candles[29] = candle(29, 100.0, 100.1, 97.9, 98.0, 2000.0);
        candles
    }

    /// Staircase of three steps up, two steps down
    pub fn structure_break_long() -> Vec<Candle> {
        staircase(100.0, 1.0)
    }

    pub fn structure_break_short() -> Vec<Candle> {
        staircase(200.0, -1.0)
    }

    fn staircase(start: f64, sign: f64) -> Vec<Candle> {
        let pattern = [1.0, 1.0, 1.0, -1.0, -1.0];
        let mut closes = Vec::with_capacity(28);
        let mut close = start;
        for i in 0..28 {
            close += sign * pattern[i % pattern.len()];
            closes.push(close);
        }
        from_closes(&closes, 0.2, &[1000.0; 28])
    }

    /// Flat range, a sweep below the range low, then a gap-up reversal on 2.5x volume
    pub fn liquidity_sweep_long() -> Vec<Candle> {
        let mut candles: Vec<Candle> = (0..23)
            .map(|i| candle(i, 100.0, 100.5, 99.5, 100.0, 1000.0))
            .collect();
        candles.push(candle(23, 100.0, 100.8, 98.5, 100.6, 1000.0));
        candles.push(candle(24, 100.6, 102.2, 101.0, 102.0, 2500.0));
        candles
    }

    pub fn liquidity_sweep_short() -> Vec<Candle> {
        let mut candles: Vec<Candle> = (0..23)
            .map(|i| candle(i, 100.0, 100.5, 99.5, 100.0, 1000.0))
            .collect();
        candles.push(candle(23, 100.0, 101.5, 99.2, 99.4, 1000.0));
        candles.push(candle(24, 99.0, 99.0, 97.8, 98.0, 2500.0));
        candles
    }

    /// Sell-off in two-down-one-up legs where the last pivot low undercuts the
    /// previous one while its candle shows much less selling (higher delta)
    pub fn delta_divergence_long() -> Vec<Candle> {
        divergence(1.0)
    }

    pub fn delta_divergence_short() -> Vec<Candle> {
        divergence(-1.0)
    }

    fn divergence(sign: f64) -> Vec<Candle> {
        let deltas = [-1.0, -1.0, 0.5];
        let volumes = [100.0, 100.0, 1000.0];
        let mut candles = Vec::with_capacity(30);
        let mut close = 100.0;

        for i in 0..30 {
            let open = close;
            close = open + sign * deltas[i % 3];
            let falling = sign * (close - open) < 0.0;
            let (high, low) = if sign > 0.0 {
                // Bear leg: extra wick under falling bars
                let low = if falling { open.min(close) - 0.1 } else { open };
                (open.max(close), low)
            } else {
                let high = if falling { open.max(close) + 0.1 } else { open };
                (high, open.min(close))
            };
            candles.push(candle(i, open, high, low, close, volumes[i % 3]));
        }

        // Latest pivot candle gets a body in the opposite direction
        let c = &mut candles[28];
        c.open = c.close + sign * 0.3;
        c.high = c.high.max(c.open);
        c.low = c.low.min(c.open);
        candles
    }
}

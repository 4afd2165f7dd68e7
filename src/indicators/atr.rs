// Average True Range (ATR)
//
// True range is the greatest of high - low, |high - prev close| and
// |low - prev close|, smoothed Wilder-style like RSI.

use crate::models::Candle;

/// ATR aligned with candles. The first value lands at index `period`.
pub fn calculate_atr_series(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut series = vec![None; candles.len()];
    if period == 0 || candles.len() < period + 1 {
        return series;
    }

    let true_ranges: Vec<f64> = candles
        .windows(2)
        .map(|w| true_range(&w[1], w[0].close))
        .collect();

    // Seed with the simple average of the first `period` true ranges
    let p = period as f64;
    let mut atr: f64 = true_ranges[..period].iter().sum::<f64>() / p;
    series[period] = Some(atr);

    for i in period..true_ranges.len() {
        atr = (atr * (p - 1.0) + true_ranges[i]) / p;
        series[i + 1] = Some(atr);
    }

    series
}

fn true_range(candle: &Candle, prev_close: f64) -> f64 {
    (candle.high - candle.low)
        .max((candle.high - prev_close).abs())
        .max((candle.low - prev_close).abs())
}

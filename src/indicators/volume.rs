/// Volume and order-flow indicators
///
/// All series are aligned with the input candles.

use crate::models::Candle;

/// Cumulative volume-weighted average price over the whole window.
///
/// Uses the typical price `(high + low + close) / 3`. Indices where the
/// cumulative volume is still zero are `None`.
pub fn calculate_vwap_series(candles: &[Candle]) -> Vec<Option<f64>> {
    let mut price_volume = 0.0;
    let mut total_volume = 0.0;

    candles
        .iter()
        .map(|c| {
            price_volume += c.typical_price() * c.volume;
            total_volume += c.volume;
            if total_volume > 0.0 {
                Some(price_volume / total_volume)
            } else {
                None
            }
        })
        .collect()
}

/// On-balance volume. Starts at zero and adds or subtracts each candle's
/// volume depending on the direction of the close-to-close change.
pub fn calculate_obv_series(candles: &[Candle]) -> Vec<f64> {
    let mut series = Vec::with_capacity(candles.len());
    let mut obv = 0.0;

    for (i, candle) in candles.iter().enumerate() {
        if i > 0 {
            let change = candle.close - candles[i - 1].close;
            if change > 0.0 {
                obv += candle.volume;
            } else if change < 0.0 {
                obv -= candle.volume;
            }
        }
        series.push(obv);
    }

    series
}

/// Per-candle delta proxy (close - open)
pub fn calculate_delta_series(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(Candle::delta).collect()
}

/// Rolling mean volume including the current candle
pub fn calculate_average_volume_series(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut series = vec![None; candles.len()];
    if period == 0 || candles.len() < period {
        return series;
    }

    let mut window_sum: f64 = candles[..period].iter().map(|c| c.volume).sum();
    series[period - 1] = Some(window_sum / period as f64);

    for i in period..candles.len() {
        window_sum += candles[i].volume - candles[i - period].volume;
        series[i] = Some(window_sum / period as f64);
    }

    series
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn create_candle(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            timestamp: Utc::now(),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    #[test]
    fn test_vwap_weights_by_volume() {
        let candles = vec![
            create_candle(10.0, 10.0, 10.0, 10.0, 1.0),
            create_candle(20.0, 20.0, 20.0, 20.0, 3.0),
        ];
        let vwap = calculate_vwap_series(&candles);
        assert_eq!(vwap[0], Some(10.0));
        assert_eq!(vwap[1], Some(17.5));
    }

    #[test]
    fn test_vwap_zero_volume_prefix() {
        let candles = vec![
            create_candle(10.0, 10.0, 10.0, 10.0, 0.0),
            create_candle(12.0, 12.0, 12.0, 12.0, 2.0),
        ];
        let vwap = calculate_vwap_series(&candles);
        assert!(vwap[0].is_none());
        assert_eq!(vwap[1], Some(12.0));
    }

    #[test]
    fn test_obv_direction() {
        let candles = vec![
            create_candle(10.0, 10.0, 10.0, 10.0, 100.0),
            create_candle(10.0, 11.0, 10.0, 11.0, 50.0),  // up
            create_candle(11.0, 11.0, 10.5, 10.5, 30.0),  // down
            create_candle(10.5, 10.5, 10.5, 10.5, 999.0), // flat
        ];
        assert_eq!(calculate_obv_series(&candles), vec![0.0, 50.0, 20.0, 20.0]);
    }

    #[test]
    fn test_delta_series() {
        let candles = vec![
            create_candle(10.0, 12.0, 9.0, 11.5, 1.0),
            create_candle(11.5, 12.0, 9.0, 10.0, 1.0),
        ];
        assert_eq!(calculate_delta_series(&candles), vec![1.5, -1.5]);
    }

    #[test]
    fn test_average_volume_series_rolls_window() {
        let candles: Vec<Candle> = (1..=25)
            .map(|v| create_candle(1.0, 1.0, 1.0, 1.0, v as f64))
            .collect();
        let series = calculate_average_volume_series(&candles, 20);

        assert!(series[18].is_none());
        assert_eq!(series[19], Some(10.5));
        // Volumes 6..=25 average to 15.5
        assert_eq!(series[24], Some(15.5));
    }
}

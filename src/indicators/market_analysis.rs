/// Market structure analysis
///
/// Swing points (5-bar fractals) for structure breaks and 3-bar pivots for divergence checks

use crate::models::Candle;

/// Indices of confirmed swing highs and lows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SwingPoints {
    pub highs: Vec<usize>,
    pub lows: Vec<usize>,
}

/// Find swing highs and lows using a two-bar window on each side.
///
/// A candle is a swing high when its high is >= every high in `i-2..=i+2`
/// (non-strict, so equal highs both qualify). Lows mirror this. The last two
/// candles can never be swings since their right side is unconfirmed.
pub fn find_swing_points(candles: &[Candle]) -> SwingPoints {
    let mut points = SwingPoints::default();
    if candles.len() < 5 {
        return points;
    }

    for i in 2..candles.len() - 2 {
        let window = &candles[i - 2..=i + 2];
        let max_high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let min_low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);

        if candles[i].high >= max_high {
            points.highs.push(i);
        }
        if candles[i].low <= min_low {
            points.lows.push(i);
        }
    }

    points
}

/// Find strict 3-bar pivots at indices `start + 1 .. len - 1`.
///
/// A pivot low's low is strictly below both neighbours; pivot highs mirror this.
pub fn find_pivots(candles: &[Candle], start: usize) -> SwingPoints {
    let mut points = SwingPoints::default();
    if candles.len() < 3 {
        return points;
    }

    for i in (start + 1)..candles.len() - 1 {
        let (prev, curr, next) = (&candles[i - 1], &candles[i], &candles[i + 1]);

        if curr.low < prev.low && curr.low < next.low {
            points.lows.push(i);
        }
        if curr.high > prev.high && curr.high > next.high {
            points.highs.push(i);
        }
    }

    points
}

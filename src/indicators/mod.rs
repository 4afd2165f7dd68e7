// Technical indicators module
// Implements EMA, RSI, ATR, VWAP, OBV and swing detection for the strategy engine

pub mod atr;
pub mod market_analysis;
pub mod moving_average;
pub mod rsi;
pub mod volume;

pub use atr::calculate_atr_series;
pub use market_analysis::{find_pivots, find_swing_points, SwingPoints};
pub use moving_average::calculate_ema_series;
pub use rsi::calculate_rsi_series;
pub use volume::{
    calculate_average_volume_series, calculate_delta_series, calculate_obv_series,
    calculate_vwap_series,
};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV candlestick for one closed time bucket
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>, // Bucket open time
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Close minus open (positive = buying pressure)
    pub fn delta(&self) -> f64 {
        self.close - self.open
    }

    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Order side that opens a position in this direction
    pub fn entry_side(&self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces a position in this direction
    pub fn exit_side(&self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Sell,
            Direction::Short => OrderSide::Buy,
        }
    }

    /// +1 for longs, -1 for shorts
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// A strategy's proposed trade. Consumed at most once, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub confidence: f64, // 0-100
    pub strategy_name: String,
    pub generated_at: DateTime<Utc>,
}

/// Stop-loss / take-profit order ids owned by one position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BracketOrderPair {
    pub stop_order_id: i64,
    pub take_profit_order_id: i64,
    pub stop_price: f64,
    pub take_profit_price: f64,
}

/// Lifecycle of a position inside the position manager. A closed position
/// leaves the book and lives on as a `ClosedTrade`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PositionState {
    Opening,
    Open,
    Closing,
}

/// Open futures position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Direction,
    pub size: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
    pub leverage: u32,
    pub margin: f64,
    pub open_time: DateTime<Utc>,
    pub broker_order_id: i64,
    pub originating_strategy: String,
    pub bracket: Option<BracketOrderPair>, // None until risk orders are attached
    pub state: PositionState,
}

impl Position {
    /// PnL if the whole position were closed at `price`
    pub fn pnl_at(&self, price: f64) -> f64 {
        realized_pnl(self.side, self.entry_price, price, self.size)
    }

    /// Refresh mark price and unrealized PnL
    pub fn mark(&mut self, mark_price: f64) {
        self.mark_price = mark_price;
        self.unrealized_pnl = self.pnl_at(mark_price);
    }
}

/// `(exit - entry) * size` for longs, mirrored for shorts
pub fn realized_pnl(side: Direction, entry_price: f64, exit_price: f64, size: f64) -> f64 {
    (exit_price - entry_price) * size * side.sign()
}

/// Result of a completed round trip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: String,
    pub side: Direction,
    pub size: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub realized_pnl: f64,
    pub reason: String,
    pub originating_strategy: String,
    pub closed_at: DateTime<Utc>,
}

/// Process-wide trade statistics since the last reset or UTC rollover
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyStats {
    pub trade_count: u32,
    pub wins: u32,
    pub losses: u32,
    pub total_pnl: f64,
    pub window_start: DateTime<Utc>,
}

impl DailyStats {
    pub fn new(window_start: DateTime<Utc>) -> Self {
        Self {
            trade_count: 0,
            wins: 0,
            losses: 0,
            total_pnl: 0.0,
            window_start,
        }
    }

    /// Accumulate one closed trade. Breakeven counts as a win.
    pub fn record(&mut self, pnl: f64) {
        self.trade_count += 1;
        self.total_pnl += pnl;
        if pnl >= 0.0 {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.trade_count == 0 {
            return 0.0;
        }
        self.wins as f64 / self.trade_count as f64 * 100.0
    }

    /// True if `now` falls on a later UTC date than the window start
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let start: NaiveDate = self.window_start.date_naive();
        now.date_naive() > start
    }
}

use crate::models::Candle;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Thread-safe in-memory buffer for closed candles
///
/// Maintains a rolling window per symbol, ordered by open time
#[derive(Clone)]
pub struct CandleBuffer {
    data: Arc<RwLock<HashMap<String, VecDeque<Candle>>>>,
    max_candles: usize,
}

/// What `push` did with a candle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUpdate {
    Appended,
    Replaced,
    Stale,
}

impl CandleBuffer {
    /// Create a new candle buffer
    ///
    /// # Arguments
    /// * `max_candles` - Maximum number of candles to keep per symbol
    pub fn new(max_candles: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            max_candles: max_candles.max(1),
        }
    }

    pub fn max_candles(&self) -> usize {
        self.max_candles
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, VecDeque<Candle>>> {
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, VecDeque<Candle>>> {
        self.data.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace a symbol's history, keeping the newest `max_candles`
    pub fn seed(&self, symbol: &str, mut candles: Vec<Candle>) {
        candles.sort_by_key(|c| c.timestamp);
        candles.dedup_by_key(|c| c.timestamp);
        let skip = candles.len().saturating_sub(self.max_candles);
        let window: VecDeque<Candle> = candles.into_iter().skip(skip).collect();
        self.write().insert(symbol.to_string(), window);
    }

    /// Add a closed candle
    ///
    /// A candle with the same open time as the newest one replaces it; an older
    /// one is ignored. If the buffer is full, the oldest candle is dropped.
    pub fn push(&self, symbol: &str, candle: Candle) -> BufferUpdate {
        let mut data = self.write();
        let candles = data.entry(symbol.to_string()).or_default();

        match candles.back_mut() {
            Some(last) if last.timestamp == candle.timestamp => {
                *last = candle;
                return BufferUpdate::Replaced;
            }
            Some(last) if last.timestamp > candle.timestamp => return BufferUpdate::Stale,
            _ => {}
        }

        candles.push_back(candle);
        while candles.len() > self.max_candles {
            candles.pop_front();
        }
        BufferUpdate::Appended
    }

    /// All candles for a symbol, oldest first
    pub fn candles(&self, symbol: &str) -> Vec<Candle> {
        self.read()
            .get(symbol)
            .map(|deque| deque.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, symbol: &str) -> usize {
        self.read().get(symbol).map(|d| d.len()).unwrap_or(0)
    }
}

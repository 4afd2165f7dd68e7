use super::{
    DeltaDivergenceStrategy, EmaCrossoverStrategy, LiquiditySweepStrategy, MarketContext,
    OrderFlowStrategy, Strategy, StructureBreakStrategy,
};
use crate::models::{Candle, Signal};

/// Runs every strategy over one candle window and ranks what fires.
///
/// Holds no state between calls: each candle close is evaluated fresh.
pub struct StrategyEngine {
    strategies: Vec<Box<dyn Strategy>>,
}

impl Default for StrategyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyEngine {
    /// The five built-in strategies, in tie-break order
    pub fn new() -> Self {
        Self::with_strategies(vec![
            Box::new(EmaCrossoverStrategy::default()),
            Box::new(OrderFlowStrategy::default()),
            Box::new(StructureBreakStrategy::default()),
            Box::new(LiquiditySweepStrategy::default()),
            Box::new(DeltaDivergenceStrategy::default()),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Longest minimum window among the strategies
    pub fn min_candles_required(&self) -> usize {
        self.strategies
            .iter()
            .map(|s| s.min_candles_required())
            .max()
            .unwrap_or(0)
    }

    /// Highest-confidence signal, ties going to the earlier strategy
    pub fn evaluate(&self, symbol: &str, candles: &[Candle]) -> Option<Signal> {
        let ctx = MarketContext::new(symbol, candles);

        let mut best: Option<Signal> = None;
        for signal in self.strategies.iter().filter_map(|s| s.evaluate(&ctx)) {
            let better = match &best {
                Some(current) => signal.confidence > current.confidence,
                None => true,
            };
            if better {
                best = Some(signal);
            }
        }

        if let Some(signal) = &best {
            tracing::info!(
                "📈 {} {} signal from {} (confidence {:.0}, entry {:.4})",
                symbol,
                signal.direction,
                signal.strategy_name,
                signal.confidence,
                signal.entry_price
            );
        }

        best
    }

    /// Every firing strategy, confidence descending (stable for ties)
    pub fn evaluate_all(&self, symbol: &str, candles: &[Candle]) -> Vec<Signal> {
        let ctx = MarketContext::new(symbol, candles);

        let mut signals: Vec<Signal> = self
            .strategies
            .iter()
            .filter_map(|s| s.evaluate(&ctx))
            .collect();

        signals.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        signals
    }
}

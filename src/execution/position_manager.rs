use super::{ExecutionError, TradingEvent};
use crate::api::{
    AccountBalance, ExchangeGateway, OrderRequest, PositionRisk, SymbolRules,
    NO_MARGIN_CHANGE_CODE,
};
use crate::config::TradingConfig;
use crate::models::{
    realized_pnl, BracketOrderPair, ClosedTrade, DailyStats, Direction, Position, PositionState,
    Signal,
};
use crate::risk::{self, EntryCheck, EquityTracker, RiskLimits};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;
const HISTORY_CAPACITY: usize = 500;

/// Strategy name given to positions found on the exchange at start
pub const ADOPTED_STRATEGY: &str = "exchange";
/// Strategy name for operator-triggered trades
pub const MANUAL_STRATEGY: &str = "manual";
/// Close reason for positions the exchange flattened through a bracket leg
pub const BRACKET_CLOSE_REASON: &str = "bracket";

/// Derived view of the book; building one changes nothing
#[derive(Debug, Clone, Serialize)]
pub struct TradingStatistics {
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f64,
    pub daily_pnl: f64,
    pub realized_pnl: f64,
    pub open_positions: usize,
    pub unrealized_pnl: f64,
    pub equity: f64,
    pub peak_equity: f64,
    pub drawdown_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BotStatus {
    pub running: bool,
    pub balance: AccountBalance,
    pub positions: Vec<Position>,
    pub statistics: TradingStatistics,
}

/// Result of closing one symbol during `close_all_positions`
#[derive(Debug, Clone)]
pub struct CloseOutcome {
    pub symbol: String,
    pub result: Result<ClosedTrade, ExecutionError>,
}

/// Stop and take-profit trigger prices around an entry, rounded to the tick
pub fn bracket_prices(
    side: Direction,
    entry_price: f64,
    stop_loss_percent: f64,
    take_profit_percent: f64,
    rules: &SymbolRules,
) -> (f64, f64) {
    let sign = side.sign();
    let stop = entry_price * (1.0 - sign * stop_loss_percent / 100.0);
    let take_profit = entry_price * (1.0 + sign * take_profit_percent / 100.0);
    (rules.round_price(stop), rules.round_price(take_profit))
}

struct Book {
    positions: HashMap<String, Position>,
    /// Symbols with an entry in flight, counted against `max_positions`
    opening: HashMap<String, Direction>,
    daily: DailyStats,
    equity: EquityTracker,
    realized_pnl: f64,
    history: Vec<ClosedTrade>,
    drawdown_alerted: bool,
    daily_loss_alerted: bool,
}

impl Book {
    fn new() -> Self {
        Self {
            positions: HashMap::new(),
            opening: HashMap::new(),
            daily: DailyStats::new(Utc::now()),
            equity: EquityTracker::new(0.0),
            realized_pnl: 0.0,
            history: Vec::new(),
            drawdown_alerted: false,
            daily_loss_alerted: false,
        }
    }

    fn roll_daily(&mut self, now: DateTime<Utc>) {
        if self.daily.is_stale(now) {
            tracing::info!(
                "📅 Daily stats rolled over ({} trades, PnL {:.2})",
                self.daily.trade_count,
                self.daily.total_pnl
            );
            self.daily = DailyStats::new(now);
            self.daily_loss_alerted = false;
        }
    }

    /// Daily stats as they read at `now`, without rolling them
    fn daily_view(&self, now: DateTime<Utc>) -> DailyStats {
        if self.daily.is_stale(now) {
            DailyStats::new(now)
        } else {
            self.daily.clone()
        }
    }

    fn open_count(&self) -> usize {
        self.positions.len() + self.opening.len()
    }

    fn occupied(&self, symbol: &str) -> Option<(Direction, PositionState)> {
        self.positions
            .get(symbol)
            .map(|p| (p.side, p.state))
            .or_else(|| {
                self.opening
                    .get(symbol)
                    .map(|side| (*side, PositionState::Opening))
            })
    }

    fn unrealized_pnl(&self) -> f64 {
        self.positions.values().map(|p| p.unrealized_pnl).sum()
    }

    fn current_equity(&self) -> f64 {
        self.equity.baseline + self.realized_pnl + self.unrealized_pnl()
    }

    fn record_close(&mut self, trade: &ClosedTrade) {
        self.roll_daily(trade.closed_at);
        self.daily.record(trade.realized_pnl);
        self.realized_pnl += trade.realized_pnl;
        self.history.push(trade.clone());
        if self.history.len() > HISTORY_CAPACITY {
            let excess = self.history.len() - HISTORY_CAPACITY;
            self.history.drain(..excess);
        }
    }
}

/// Removes the in-flight marker for a symbol however the entry attempt ends
struct OpeningReservation<'a> {
    book: &'a Mutex<Book>,
    symbol: String,
}

impl Drop for OpeningReservation<'_> {
    fn drop(&mut self) {
        lock(self.book).opening.remove(&self.symbol);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct Inner {
    gateway: ExchangeGateway,
    config: RwLock<Arc<TradingConfig>>,
    book: Mutex<Book>,
    symbol_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    rules: Mutex<HashMap<String, SymbolRules>>,
    events: broadcast::Sender<TradingEvent>,
    running: AtomicBool,
    lifecycle: tokio::sync::Mutex<()>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

/// Owns every position and all risk state; the only component that places
/// or cancels orders.
///
/// Cloning is cheap and every clone drives the same book.
#[derive(Clone)]
pub struct PositionManager {
    inner: Arc<Inner>,
}

impl PositionManager {
    pub fn new(gateway: ExchangeGateway, config: TradingConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                gateway,
                config: RwLock::new(Arc::new(config)),
                book: Mutex::new(Book::new()),
                symbol_locks: Mutex::new(HashMap::new()),
                rules: Mutex::new(HashMap::new()),
                events,
                running: AtomicBool::new(false),
                lifecycle: tokio::sync::Mutex::new(()),
                monitor: Mutex::new(None),
            }),
        }
    }

    pub fn gateway(&self) -> &ExchangeGateway {
        &self.inner.gateway
    }

    /// Current configuration snapshot
    pub fn config(&self) -> Arc<TradingConfig> {
        self.inner
            .config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Swap in a new snapshot. A changed monitor interval applies on the next start.
    pub fn update_config(&self, config: TradingConfig) -> Result<(), ExecutionError> {
        config.validate().map_err(ExecutionError::InvalidConfig)?;
        tracing::info!(
            "⚙️  Trading config updated (risk {}%, max {} positions, SL {}%, TP {}%)",
            config.risk_percent,
            config.max_positions,
            config.stop_loss_percent,
            config.take_profit_percent
        );
        *self
            .inner
            .config
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Arc::new(config);
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TradingEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    fn emit(&self, event: TradingEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    fn book(&self) -> MutexGuard<'_, Book> {
        lock(&self.inner.book)
    }

    fn symbol_lock(&self, symbol: &str) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.inner.symbol_locks)
            .entry(symbol.to_string())
            .or_default()
            .clone()
    }

    async fn symbol_rules(&self, symbol: &str) -> Result<SymbolRules, ExecutionError> {
        if let Some(rules) = lock(&self.inner.rules).get(symbol) {
            return Ok(rules.clone());
        }
        let rules = self.inner.gateway.symbol_rules(symbol).await?;
        lock(&self.inner.rules).insert(symbol.to_string(), rules.clone());
        Ok(rules)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Prepare the account and begin risk monitoring.
    ///
    /// Applies leverage and margin type to the configured symbol, adopts
    /// exchange positions not yet tracked and captures the baseline equity.
    pub async fn start(&self) -> Result<(), ExecutionError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.is_running() {
            return Ok(());
        }

        let config = self.config();
        let gateway = &self.inner.gateway;

        if let Err(e) = gateway.sync_time().await {
            tracing::warn!("⚠️  Server time sync failed, using local clock: {}", e);
        }

        gateway
            .change_leverage(&config.symbol, config.leverage)
            .await?;
        match gateway
            .change_margin_type(&config.symbol, &config.margin_type)
            .await
        {
            Ok(_) => {}
            Err(e) if e.exchange_code() == Some(NO_MARGIN_CHANGE_CODE) => {
                tracing::debug!("{} margin type already {}", config.symbol, config.margin_type);
            }
            Err(e) => return Err(e.into()),
        }

        let adopted = self.adopt_exchange_positions().await?;

        let baseline = match config.baseline_equity {
            Some(equity) => equity,
            None => gateway.usdt_balance().await?.total,
        };

        {
            let mut book = self.book();
            book.equity = EquityTracker::new(baseline);
            book.realized_pnl = 0.0;
            book.drawdown_alerted = false;
            book.roll_daily(Utc::now());
        }

        self.inner.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(monitor_loop(self.clone(), config.monitor_interval()));
        if let Some(previous) = lock(&self.inner.monitor).replace(handle) {
            previous.abort();
        }

        tracing::info!(
            "🚀 Trading started on {} ({}x {}, baseline equity {:.2}, {} adopted positions)",
            config.symbol,
            config.leverage,
            config.margin_type,
            baseline,
            adopted
        );
        self.emit(TradingEvent::TradingStarted {
            baseline_equity: baseline,
            adopted_positions: adopted,
        });
        Ok(())
    }

    /// Stop monitoring and reject new signals. Open positions stay open.
    pub async fn stop(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let was_running = self.inner.running.swap(false, Ordering::SeqCst);
        if let Some(handle) = lock(&self.inner.monitor).take() {
            handle.abort();
        }
        if was_running {
            tracing::info!(
                "🛑 Trading stopped ({} positions left open)",
                self.book().positions.len()
            );
            self.emit(TradingEvent::TradingStopped);
        }
    }

    /// Track exchange positions the book does not know about yet. They get no
    /// bracket and are attributed to `ADOPTED_STRATEGY`.
    ///
    /// The exchange is the source of truth, so positions beyond `max_positions`
    /// are still tracked; new entries stay blocked until the book is back under
    /// the cap.
    pub async fn adopt_exchange_positions(&self) -> Result<usize, ExecutionError> {
        let risks = self.inner.gateway.open_positions().await?;
        let config = self.config();
        let leverage = config.leverage;
        let now = Utc::now();

        let mut book = self.book();
        let mut adopted = 0;
        for risk in &risks {
            if book.positions.contains_key(&risk.symbol) {
                continue;
            }
            let position = adopted_position(risk, leverage, now);
            tracing::info!(
                symbol = %risk.symbol,
                "📥 Adopted {} {} @ {} from exchange",
                position.side,
                position.size,
                position.entry_price
            );
            book.positions.insert(risk.symbol.clone(), position);
            adopted += 1;
        }

        if book.positions.len() > config.max_positions {
            tracing::warn!(
                "⚠️  Exchange holds {} positions, above max_positions {}; new entries are blocked",
                book.positions.len(),
                config.max_positions
            );
        }
        Ok(adopted)
    }

    // ========================================================================
    // Entries
    // ========================================================================

    /// Gate, size and open a position for a signal, then attach its bracket.
    ///
    /// The bracket comes from the configured percentages around the fill; the
    /// signal's own stop and target are not used for orders.
    pub async fn execute_signal(&self, signal: &Signal) -> Result<Position, ExecutionError> {
        if !self.is_running() {
            return Err(ExecutionError::NotRunning);
        }

        let symbol_lock = self.symbol_lock(&signal.symbol);
        let _symbol_guard = symbol_lock.lock().await;

        let config = self.config();
        let limits = RiskLimits::from_config(&config);

        {
            let mut book = self.book();
            book.roll_daily(Utc::now());
            let check = EntryCheck {
                symbol: signal.symbol.clone(),
                direction: signal.direction,
                open_count: book.open_count(),
                daily_pnl: book.daily.total_pnl,
                baseline_equity: book.equity.baseline,
                occupied: book.occupied(&signal.symbol),
            };
            if let Err(rejection) = limits.check_entry(&check) {
                tracing::warn!(
                    symbol = %signal.symbol,
                    "🚫 {} signal from {} rejected: {}",
                    signal.direction,
                    signal.strategy_name,
                    rejection
                );
                return Err(ExecutionError::RiskLimit(rejection.to_string()));
            }
            book.opening
                .insert(signal.symbol.clone(), signal.direction);
        }

        let _reservation = OpeningReservation {
            book: &self.inner.book,
            symbol: signal.symbol.clone(),
        };
        self.open_position(signal, &config).await
    }

    async fn open_position(
        &self,
        signal: &Signal,
        config: &TradingConfig,
    ) -> Result<Position, ExecutionError> {
        let gateway = &self.inner.gateway;
        let symbol = signal.symbol.as_str();

        let rules = self.symbol_rules(symbol).await?;
        let balance = gateway.usdt_balance().await?;
        let size = risk::position_size(
            balance.available,
            config.risk_percent,
            config.stop_loss_percent,
            signal.entry_price,
            &rules,
        )
        .map_err(|e| {
            tracing::warn!(symbol = %symbol, "🚫 Sizing failed: {}", e);
            ExecutionError::InvalidSize(e.to_string())
        })?;

        let entry_order = OrderRequest::market(symbol, signal.direction.entry_side(), size)
            .with_client_order_id(client_order_id());
        let fill = match gateway.new_order(&entry_order).await {
            Ok(fill) => fill,
            Err(e) => {
                tracing::error!(symbol = %symbol, "❌ Entry order failed: {}", e);
                self.emit(TradingEvent::TradeFailed {
                    symbol: symbol.to_string(),
                    strategy: signal.strategy_name.clone(),
                    reason: e.to_string(),
                });
                return Err(e.into());
            }
        };

        let entry_price = if fill.avg_price > 0.0 {
            fill.avg_price
        } else {
            signal.entry_price
        };
        let size = if fill.executed_qty > 0.0 {
            fill.executed_qty
        } else {
            size
        };

        let bracket = match self
            .attach_bracket(symbol, signal.direction, size, entry_price, &rules, config)
            .await
        {
            Ok(bracket) => bracket,
            Err(reason) => {
                tracing::error!(symbol = %symbol, "❌ Bracket failed, flattening entry: {}", reason);
                self.flatten(symbol, signal.direction, size).await;
                self.emit(TradingEvent::TradeFailed {
                    symbol: symbol.to_string(),
                    strategy: signal.strategy_name.clone(),
                    reason: reason.clone(),
                });
                return Err(ExecutionError::BracketFailed(reason));
            }
        };

        let leverage = config.leverage.max(1);
        let position = Position {
            symbol: symbol.to_string(),
            side: signal.direction,
            size,
            entry_price,
            mark_price: entry_price,
            unrealized_pnl: 0.0,
            leverage,
            margin: entry_price * size / leverage as f64,
            open_time: Utc::now(),
            broker_order_id: fill.order_id,
            originating_strategy: signal.strategy_name.clone(),
            bracket: Some(bracket.clone()),
            state: PositionState::Open,
        };

        {
            let mut book = self.book();
            book.positions.insert(symbol.to_string(), position.clone());
            book.opening.remove(symbol);
        }

        tracing::info!(
            symbol = %symbol,
            order_id = fill.order_id,
            "✅ Opened {} {} @ {} (SL {} / TP {}) via {}",
            position.side,
            position.size,
            position.entry_price,
            bracket.stop_price,
            bracket.take_profit_price,
            position.originating_strategy
        );
        self.emit(TradingEvent::TradeExecuted {
            position: position.clone(),
            signal: signal.clone(),
        });
        Ok(position)
    }

    async fn attach_bracket(
        &self,
        symbol: &str,
        side: Direction,
        size: f64,
        entry_price: f64,
        rules: &SymbolRules,
        config: &TradingConfig,
    ) -> Result<BracketOrderPair, String> {
        let gateway = &self.inner.gateway;
        let (stop_price, take_profit_price) = bracket_prices(
            side,
            entry_price,
            config.stop_loss_percent,
            config.take_profit_percent,
            rules,
        );

        let stop = gateway
            .new_order(&OrderRequest::stop_market(
                symbol,
                side.exit_side(),
                size,
                stop_price,
            ))
            .await
            .map_err(|e| format!("stop-loss order: {}", e))?;

        let take_profit = match gateway
            .new_order(&OrderRequest::take_profit_market(
                symbol,
                side.exit_side(),
                size,
                take_profit_price,
            ))
            .await
        {
            Ok(order) => order,
            Err(e) => {
                if let Err(cancel_err) = gateway.cancel_order(symbol, stop.order_id).await {
                    tracing::error!(
                        symbol = %symbol,
                        "❌ Could not cancel stop order {}: {}",
                        stop.order_id,
                        cancel_err
                    );
                }
                return Err(format!("take-profit order: {}", e));
            }
        };

        Ok(BracketOrderPair {
            stop_order_id: stop.order_id,
            take_profit_order_id: take_profit.order_id,
            stop_price,
            take_profit_price,
        })
    }

    async fn flatten(&self, symbol: &str, side: Direction, size: f64) {
        let order = OrderRequest::market(symbol, side.exit_side(), size).reduce_only();
        match self.inner.gateway.new_order(&order).await {
            Ok(_) => tracing::warn!(symbol = %symbol, "⚠️  Entry of {} flattened", size),
            Err(e) => tracing::error!(
                symbol = %symbol,
                "❌ Could not flatten {} after bracket failure: {}",
                size,
                e
            ),
        }
    }

    /// Open a position at the current ticker price, outside any strategy
    pub async fn open_manual(
        &self,
        symbol: &str,
        direction: Direction,
    ) -> Result<Position, ExecutionError> {
        if !self.is_running() {
            return Err(ExecutionError::NotRunning);
        }

        let price = self.inner.gateway.ticker_price(symbol).await?.price;
        let config = self.config();
        let sign = direction.sign();
        let signal = Signal {
            symbol: symbol.to_string(),
            direction,
            entry_price: price,
            stop_loss: price * (1.0 - sign * config.stop_loss_percent / 100.0),
            take_profit: price * (1.0 + sign * config.take_profit_percent / 100.0),
            confidence: 100.0,
            strategy_name: MANUAL_STRATEGY.to_string(),
            generated_at: Utc::now(),
        };

        tracing::info!(symbol = %symbol, "🖐️  Manual {} @ {}", direction, price);
        self.execute_signal(&signal).await
    }

    // ========================================================================
    // Exits
    // ========================================================================

    /// Market-close the full position and cancel its bracket
    pub async fn close_position(
        &self,
        symbol: &str,
        reason: &str,
    ) -> Result<ClosedTrade, ExecutionError> {
        let symbol_lock = self.symbol_lock(symbol);
        let _symbol_guard = symbol_lock.lock().await;

        let position = {
            let mut book = self.book();
            let position = book
                .positions
                .get_mut(symbol)
                .ok_or_else(|| ExecutionError::NoPosition(symbol.to_string()))?;
            position.state = PositionState::Closing;
            position.clone()
        };

        let order =
            OrderRequest::market(symbol, position.side.exit_side(), position.size).reduce_only();
        let fill = match self.inner.gateway.new_order(&order).await {
            Ok(fill) => fill,
            Err(e) => {
                if let Some(p) = self.book().positions.get_mut(symbol) {
                    p.state = PositionState::Open;
                }
                tracing::error!(symbol = %symbol, "❌ Close failed: {}", e);
                self.emit(TradingEvent::ClosePositionFailed {
                    symbol: symbol.to_string(),
                    reason: e.to_string(),
                });
                return Err(e.into());
            }
        };

        let exit_price = if fill.avg_price > 0.0 {
            fill.avg_price
        } else {
            position.mark_price
        };

        if let Some(bracket) = &position.bracket {
            self.cancel_bracket(symbol, bracket).await;
        }

        Ok(self.finish_close(&position, exit_price, reason))
    }

    /// Close every tracked position in turn; one failure does not stop the rest
    pub async fn close_all_positions(&self, reason: &str) -> Vec<CloseOutcome> {
        let mut symbols: Vec<String> = self.book().positions.keys().cloned().collect();
        symbols.sort();

        let mut outcomes = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let result = self.close_position(&symbol, reason).await;
            outcomes.push(CloseOutcome { symbol, result });
        }

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        tracing::info!(
            "📤 Closed {}/{} positions ({})",
            outcomes.len() - failed,
            outcomes.len(),
            reason
        );
        outcomes
    }

    async fn cancel_bracket(&self, symbol: &str, bracket: &BracketOrderPair) {
        for order_id in [bracket.stop_order_id, bracket.take_profit_order_id] {
            // A leg that already triggered is gone on the exchange side
            if let Err(e) = self.inner.gateway.cancel_order(symbol, order_id).await {
                tracing::debug!(symbol = %symbol, "Bracket order {} not cancelled: {}", order_id, e);
            }
        }
    }

    fn finish_close(&self, position: &Position, exit_price: f64, reason: &str) -> ClosedTrade {
        let trade = ClosedTrade {
            symbol: position.symbol.clone(),
            side: position.side,
            size: position.size,
            entry_price: position.entry_price,
            exit_price,
            realized_pnl: realized_pnl(
                position.side,
                position.entry_price,
                exit_price,
                position.size,
            ),
            reason: reason.to_string(),
            originating_strategy: position.originating_strategy.clone(),
            closed_at: Utc::now(),
        };

        {
            let mut book = self.book();
            book.positions.remove(&position.symbol);
            book.record_close(&trade);
        }

        let marker = if trade.realized_pnl >= 0.0 { "💰" } else { "📉" };
        tracing::info!(
            symbol = %trade.symbol,
            "{} Closed {} {} @ {} -> {} PnL {:.2} ({})",
            marker,
            trade.side,
            trade.size,
            trade.entry_price,
            trade.exit_price,
            trade.realized_pnl,
            reason
        );
        self.emit(TradingEvent::PositionClosed {
            trade: trade.clone(),
        });
        trade
    }

    // ========================================================================
    // Monitoring
    // ========================================================================

    /// One monitor tick: refresh marks, reconcile positions the exchange
    /// already flattened, then check drawdown and the daily loss limit.
    pub async fn refresh_positions(&self) -> Result<(), ExecutionError> {
        let fetched_at = Utc::now();
        let risks = self.inner.gateway.position_risk(None).await?;
        let live: HashMap<&str, &PositionRisk> = risks
            .iter()
            .filter(|r| r.is_open())
            .map(|r| (r.symbol.as_str(), r))
            .collect();

        let mut flattened = Vec::new();
        {
            let mut book = self.book();
            for (symbol, position) in book.positions.iter_mut() {
                if position.state != PositionState::Open {
                    continue;
                }
                match live.get(symbol.as_str()) {
                    Some(risk) => {
                        position.size = risk.position_amt.abs();
                        if risk.mark_price > 0.0 {
                            position.mark(risk.mark_price);
                        }
                    }
                    // Opened after the snapshot was taken
                    None if position.open_time > fetched_at => {}
                    None => flattened.push(symbol.clone()),
                }
            }
        }

        for symbol in flattened {
            self.reconcile_flattened(&symbol, fetched_at).await;
        }

        self.check_risk();
        Ok(())
    }

    async fn reconcile_flattened(&self, symbol: &str, fetched_at: DateTime<Utc>) {
        let symbol_lock = self.symbol_lock(symbol);
        let _symbol_guard = symbol_lock.lock().await;

        let position = match self.book().positions.get(symbol) {
            Some(p) if p.state == PositionState::Open && p.open_time <= fetched_at => p.clone(),
            _ => return,
        };

        if position.bracket.is_some() {
            if let Err(e) = self.inner.gateway.cancel_all_orders(symbol).await {
                tracing::warn!(symbol = %symbol, "⚠️  Could not cancel leftover bracket leg: {}", e);
            }
        }

        self.finish_close(&position, position.mark_price, BRACKET_CLOSE_REASON);
    }

    fn check_risk(&self) {
        let limits = RiskLimits::from_config(&self.config());
        let mut alerts = Vec::new();

        {
            let mut book = self.book();
            book.roll_daily(Utc::now());

            let equity = book.current_equity();
            book.equity.update(equity);
            let drawdown = book.equity.drawdown_percent();

            if limits.drawdown_breached(drawdown) {
                if !book.drawdown_alerted {
                    book.drawdown_alerted = true;
                    alerts.push(TradingEvent::DrawdownAlert {
                        drawdown_percent: drawdown,
                        max_drawdown_percent: limits.max_drawdown_percent,
                        equity,
                        peak_equity: book.equity.peak,
                    });
                }
            } else {
                book.drawdown_alerted = false;
            }

            let baseline = book.equity.baseline;
            if !book.daily_loss_alerted && limits.daily_loss_breached(book.daily.total_pnl, baseline)
            {
                book.daily_loss_alerted = true;
                alerts.push(TradingEvent::DailyLossLimitReached {
                    daily_pnl: book.daily.total_pnl,
                    limit: limits.daily_loss_limit(baseline).unwrap_or_default(),
                });
            }
        }

        for alert in alerts {
            match &alert {
                TradingEvent::DrawdownAlert {
                    drawdown_percent,
                    max_drawdown_percent,
                    ..
                } => tracing::warn!(
                    "⚠️  Drawdown {:.2}% exceeds {:.2}%",
                    drawdown_percent,
                    max_drawdown_percent
                ),
                TradingEvent::DailyLossLimitReached { daily_pnl, limit } => tracing::warn!(
                    "⚠️  Daily loss limit reached (PnL {:.2}, limit -{:.2})",
                    daily_pnl,
                    limit
                ),
                _ => {}
            }
            self.emit(alert);
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Tracked positions, sorted by symbol
    pub fn get_positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.book().positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    pub fn get_position(&self, symbol: &str) -> Option<Position> {
        self.book().positions.get(symbol).cloned()
    }

    pub fn get_statistics(&self) -> TradingStatistics {
        let book = self.book();
        let daily = book.daily_view(Utc::now());
        let unrealized_pnl = book.unrealized_pnl();
        TradingStatistics {
            total_trades: daily.trade_count,
            wins: daily.wins,
            losses: daily.losses,
            win_rate: daily.win_rate(),
            daily_pnl: daily.total_pnl,
            realized_pnl: book.realized_pnl,
            open_positions: book.positions.len(),
            unrealized_pnl,
            equity: book.current_equity(),
            peak_equity: book.equity.peak,
            drawdown_percent: book.equity.drawdown_percent(),
        }
    }

    pub fn daily_stats(&self) -> DailyStats {
        self.book().daily_view(Utc::now())
    }

    /// Most recent closed trades, oldest first
    pub fn trade_history(&self) -> Vec<ClosedTrade> {
        self.book().history.clone()
    }

    pub fn reset_daily_stats(&self) {
        let mut book = self.book();
        book.daily = DailyStats::new(Utc::now());
        book.daily_loss_alerted = false;
        tracing::info!("📅 Daily stats reset");
    }

    /// Running flag, wallet snapshot and the book
    pub async fn status(&self) -> Result<BotStatus, ExecutionError> {
        let balance = self.inner.gateway.usdt_balance().await?;
        Ok(BotStatus {
            running: self.is_running(),
            balance,
            positions: self.get_positions(),
            statistics: self.get_statistics(),
        })
    }
}

async fn monitor_loop(manager: PositionManager, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if !manager.is_running() {
            break;
        }
        if let Err(e) = manager.refresh_positions().await {
            tracing::warn!("⚠️  Position refresh failed: {}", e);
        }
    }
}

fn adopted_position(risk: &PositionRisk, fallback_leverage: u32, now: DateTime<Utc>) -> Position {
    let side = if risk.position_amt > 0.0 {
        Direction::Long
    } else {
        Direction::Short
    };
    let size = risk.position_amt.abs();
    let leverage = if risk.leverage >= 1.0 {
        risk.leverage as u32
    } else {
        fallback_leverage.max(1)
    };
    let margin = if risk.isolated_margin > 0.0 {
        risk.isolated_margin
    } else {
        risk.entry_price * size / leverage as f64
    };
    let mark_price = if risk.mark_price > 0.0 {
        risk.mark_price
    } else {
        risk.entry_price
    };

    let mut position = Position {
        symbol: risk.symbol.clone(),
        side,
        size,
        entry_price: risk.entry_price,
        mark_price,
        unrealized_pnl: 0.0,
        leverage,
        margin,
        open_time: now,
        broker_order_id: 0,
        originating_strategy: ADOPTED_STRATEGY.to_string(),
        bracket: None,
        state: PositionState::Open,
    };
    position.mark(mark_price);
    position
}

fn client_order_id() -> String {
    format!("fb-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::GatewayError;
    use crate::config::{Credentials, ExchangeConfig};
    use mockito::{Matcher, Mock, Server, ServerGuard};
    use tokio_test::{assert_err, assert_ok};

    const EXCHANGE_INFO: &str = r#"{"symbols":[{"symbol":"BTCUSDT","filters":[
        {"filterType":"PRICE_FILTER","tickSize":"0.10"},
        {"filterType":"LOT_SIZE","stepSize":"0.001","minQty":"0.001"},
        {"filterType":"MIN_NOTIONAL","notional":"5"}]}]}"#;

    fn config(baseline: f64) -> TradingConfig {
        TradingConfig {
            baseline_equity: Some(baseline),
            ..Default::default()
        }
    }

    fn manager(server: &ServerGuard, config: TradingConfig) -> PositionManager {
        let exchange = ExchangeConfig {
            rest_base_url: Some(server.url()),
            ..Default::default()
        };
        let gateway = ExchangeGateway::new(&exchange, Credentials::new("key", "secret")).unwrap();
        PositionManager::new(gateway, config)
    }

    fn signal(symbol: &str, direction: Direction, entry: f64) -> Signal {
        Signal {
            symbol: symbol.to_string(),
            direction,
            entry_price: entry,
            stop_loss: entry * 0.97,
            take_profit: entry * 1.05,
            confidence: 80.0,
            strategy_name: "test".to_string(),
            generated_at: Utc::now(),
        }
    }

    fn position_json(symbol: &str, amt: f64, entry: f64, mark: f64) -> String {
        format!(
            r#"{{"symbol":"{}","positionAmt":"{}","entryPrice":"{}","markPrice":"{}","unRealizedProfit":"0","leverage":"10","isolatedMargin":"0","marginType":"isolated"}}"#,
            symbol, amt, entry, mark
        )
    }

    fn positions_body(rows: &[String]) -> String {
        format!("[{}]", rows.join(","))
    }

    async fn mock_positions(server: &mut ServerGuard, body: &str) -> Mock {
        server
            .mock("GET", "/fapi/v2/positionRisk")
            .match_query(Matcher::Any)
            .with_body(body)
            .create_async()
            .await
    }

    struct StartMocks {
        snapshot: Mock,
        _setup: Vec<Mock>,
    }

    /// Account setup calls `start` makes, plus the position snapshot it adopts
    async fn start_with(
        server: &mut ServerGuard,
        pm: &PositionManager,
        positions: &str,
    ) -> StartMocks {
        let time = server
            .mock("GET", "/fapi/v1/time")
            .with_body(format!(r#"{{"serverTime":{}}}"#, Utc::now().timestamp_millis()))
            .create_async()
            .await;
        let leverage = server
            .mock("POST", "/fapi/v1/leverage")
            .match_query(Matcher::Any)
            .with_body(r#"{"leverage":10,"symbol":"BTCUSDT"}"#)
            .create_async()
            .await;
        let margin_type = server
            .mock("POST", "/fapi/v1/marginType")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code":-4046,"msg":"No need to change margin type."}"#)
            .create_async()
            .await;
        let snapshot = mock_positions(server, positions).await;

        assert_ok!(pm.start().await);
        StartMocks {
            snapshot,
            _setup: vec![time, leverage, margin_type],
        }
    }

    /// Symbol filters and the wallet an entry is sized from
    async fn mock_sizing_inputs(server: &mut ServerGuard, available: &str) -> Vec<Mock> {
        let info = server
            .mock("GET", "/fapi/v1/exchangeInfo")
            .with_body(EXCHANGE_INFO)
            .create_async()
            .await;
        let balance = server
            .mock("GET", "/fapi/v2/balance")
            .match_query(Matcher::Any)
            .with_body(format!(
                r#"[{{"asset":"USDT","balance":"{0}","availableBalance":"{0}"}}]"#,
                available
            ))
            .create_async()
            .await;
        vec![info, balance]
    }

    /// Exchange info, balance and a filled entry with both bracket legs
    async fn mock_entry_flow(server: &mut ServerGuard) -> Vec<Mock> {
        let mut mocks = mock_sizing_inputs(server, "10000").await;
        let entry = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("type".into(), "MARKET".into()),
                Matcher::UrlEncoded("side".into(), "BUY".into()),
                Matcher::UrlEncoded("quantity".into(), "50".into()),
            ]))
            .with_body(
                r#"{"orderId":1,"symbol":"BTCUSDT","status":"FILLED","avgPrice":"100.0","executedQty":"50"}"#,
            )
            .expect(1)
            .create_async()
            .await;
        let stop = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("type".into(), "STOP_MARKET".into()),
                Matcher::UrlEncoded("side".into(), "SELL".into()),
                Matcher::UrlEncoded("stopPrice".into(), "98".into()),
                Matcher::UrlEncoded("reduceOnly".into(), "true".into()),
            ]))
            .with_body(r#"{"orderId":2,"symbol":"BTCUSDT","status":"NEW"}"#)
            .expect(1)
            .create_async()
            .await;
        mocks.push(entry);
        mocks.push(stop);
        mocks
    }

    async fn mock_take_profit(server: &mut ServerGuard) -> Mock {
        server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("type".into(), "TAKE_PROFIT_MARKET".into()),
                Matcher::UrlEncoded("stopPrice".into(), "104".into()),
            ]))
            .with_body(r#"{"orderId":3,"symbol":"BTCUSDT","status":"NEW"}"#)
            .expect(1)
            .create_async()
            .await
    }

    fn drain(events: &mut broadcast::Receiver<TradingEvent>) -> Vec<TradingEvent> {
        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            received.push(event);
        }
        received
    }

    #[test]
    fn test_bracket_prices() {
        let rules = SymbolRules {
            symbol: "BTCUSDT".to_string(),
            step_size: 0.001,
            min_qty: 0.001,
            tick_size: 0.1,
            min_notional: 5.0,
        };
        assert_eq!(bracket_prices(Direction::Long, 100.0, 2.0, 4.0, &rules), (98.0, 104.0));
        assert_eq!(bracket_prices(Direction::Short, 100.0, 2.0, 4.0, &rules), (102.0, 96.0));
        assert_eq!(
            bracket_prices(Direction::Long, 43_210.37, 2.0, 4.0, &rules),
            (42_346.2, 44_938.8)
        );
    }

    #[tokio::test]
    async fn test_execute_requires_running() {
        let mut server = Server::new_async().await;
        let order = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let pm = manager(&server, config(10_000.0));
        let result = pm
            .execute_signal(&signal("BTCUSDT", Direction::Long, 100.0))
            .await;

        assert_eq!(result.unwrap_err(), ExecutionError::NotRunning);
        assert_eq!(
            pm.open_manual("BTCUSDT", Direction::Long).await.unwrap_err(),
            ExecutionError::NotRunning
        );
        order.assert_async().await;
    }

    #[tokio::test]
    async fn test_execute_signal_attaches_bracket() {
        let mut server = Server::new_async().await;
        let pm = manager(&server, config(10_000.0));
        let _start = start_with(&mut server, &pm, "[]").await;
        let flow = mock_entry_flow(&mut server).await;
        let take_profit = mock_take_profit(&mut server).await;
        let mut events = pm.subscribe();

        let position = pm
            .execute_signal(&signal("BTCUSDT", Direction::Long, 100.0))
            .await
            .unwrap();

        assert_eq!(position.size, 50.0);
        assert_eq!(position.entry_price, 100.0);
        assert_eq!(position.state, PositionState::Open);
        assert_eq!(position.broker_order_id, 1);
        assert_eq!(position.originating_strategy, "test");
        assert_eq!(position.margin, 500.0);
        let bracket = position.bracket.clone().unwrap();
        assert_eq!(bracket.stop_order_id, 2);
        assert_eq!(bracket.take_profit_order_id, 3);
        assert_eq!(bracket.stop_price, 98.0);
        assert_eq!(bracket.take_profit_price, 104.0);

        assert!(pm.get_position("BTCUSDT").is_some());
        assert_eq!(pm.get_statistics().open_positions, 1);

        let received = drain(&mut events);
        assert_eq!(received.len(), 1);
        assert!(matches!(received[0], TradingEvent::TradeExecuted { .. }));

        for mock in flow {
            mock.assert_async().await;
        }
        take_profit.assert_async().await;
    }

    #[tokio::test]
    async fn test_max_positions_blocks_order() {
        let mut server = Server::new_async().await;
        let pm = manager(&server, config(10_000.0));
        let open = positions_body(&[
            position_json("BTCUSDT", 0.01, 40_000.0, 40_000.0),
            position_json("ETHUSDT", 0.5, 2_000.0, 2_000.0),
            position_json("SOLUSDT", 10.0, 100.0, 100.0),
        ]);
        let _start = start_with(&mut server, &pm, &open).await;
        assert_eq!(pm.get_positions().len(), 3);

        let order = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let info = server
            .mock("GET", "/fapi/v1/exchangeInfo")
            .expect(0)
            .create_async()
            .await;

        let result = pm
            .execute_signal(&signal("XRPUSDT", Direction::Long, 0.5))
            .await;

        match result {
            Err(ExecutionError::RiskLimit(message)) => {
                assert!(message.contains("max positions"), "{}", message)
            }
            other => panic!("expected risk limit, got {:?}", other),
        }
        order.assert_async().await;
        info.assert_async().await;
    }

    #[tokio::test]
    async fn test_one_position_per_symbol() {
        let mut server = Server::new_async().await;
        let pm = manager(&server, config(10_000.0));
        let open = positions_body(&[position_json("BTCUSDT", 1.0, 100.0, 100.0)]);
        let _start = start_with(&mut server, &pm, &open).await;

        let adopted = pm.get_position("BTCUSDT").unwrap();
        assert_eq!(adopted.side, Direction::Long);
        assert_eq!(adopted.originating_strategy, ADOPTED_STRATEGY);
        assert!(adopted.bracket.is_none());

        let order = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let same = pm
            .execute_signal(&signal("BTCUSDT", Direction::Long, 100.0))
            .await;
        assert!(matches!(same, Err(ExecutionError::RiskLimit(_))));

        let opposite = pm
            .execute_signal(&signal("BTCUSDT", Direction::Short, 100.0))
            .await;
        match opposite {
            Err(ExecutionError::RiskLimit(message)) => {
                assert!(message.contains("opposite"), "{}", message)
            }
            other => panic!("expected risk limit, got {:?}", other),
        }
        order.assert_async().await;
    }

    #[tokio::test]
    async fn test_close_position_realizes_pnl() {
        let mut server = Server::new_async().await;
        let pm = manager(&server, config(10_000.0));
        let open = positions_body(&[
            position_json("BTCUSDT", 2.0, 100.0, 100.0),
            position_json("ETHUSDT", -2.0, 100.0, 100.0),
        ]);
        let _start = start_with(&mut server, &pm, &open).await;

        let close_long = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
                Matcher::UrlEncoded("side".into(), "SELL".into()),
                Matcher::UrlEncoded("quantity".into(), "2".into()),
                Matcher::UrlEncoded("reduceOnly".into(), "true".into()),
            ]))
            .with_body(r#"{"orderId":10,"symbol":"BTCUSDT","avgPrice":"110","executedQty":"2"}"#)
            .expect(1)
            .create_async()
            .await;
        let close_short = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "ETHUSDT".into()),
                Matcher::UrlEncoded("side".into(), "BUY".into()),
            ]))
            .with_body(r#"{"orderId":11,"symbol":"ETHUSDT","avgPrice":"90","executedQty":"2"}"#)
            .expect(1)
            .create_async()
            .await;
        // Adopted positions carry no bracket
        let cancel = server
            .mock("DELETE", "/fapi/v1/order")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let mut events = pm.subscribe();

        let long = pm.close_position("BTCUSDT", "manual").await.unwrap();
        assert_eq!(long.exit_price, 110.0);
        assert!((long.realized_pnl - 20.0).abs() < 1e-9);
        assert_eq!(long.reason, "manual");

        let short = pm.close_position("ETHUSDT", "manual").await.unwrap();
        assert!((short.realized_pnl - 20.0).abs() < 1e-9);

        // Closed positions leave the book and survive only as trades
        assert!(pm.get_positions().is_empty());
        assert!(pm.get_position("BTCUSDT").is_none());
        let history = pm.trade_history();
        assert_eq!(history[0].symbol, "BTCUSDT");
        assert_eq!(history[1].symbol, "ETHUSDT");
        let stats = pm.get_statistics();
        assert_eq!(stats.total_trades, 2);
        assert_eq!(stats.wins, 2);
        assert_eq!(stats.win_rate, 100.0);
        assert!((stats.daily_pnl - 40.0).abs() < 1e-9);
        assert_eq!(pm.trade_history().len(), 2);

        let closed = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, TradingEvent::PositionClosed { .. }))
            .count();
        assert_eq!(closed, 2);

        close_long.assert_async().await;
        close_short.assert_async().await;
        cancel.assert_async().await;
    }

    #[tokio::test]
    async fn test_close_without_position() {
        let server = Server::new_async().await;
        let pm = manager(&server, config(10_000.0));

        let result = pm.close_position("BTCUSDT", "manual").await;
        assert_eq!(
            result.unwrap_err(),
            ExecutionError::NoPosition("BTCUSDT".to_string())
        );
    }

    #[tokio::test]
    async fn test_close_all_collects_failures() {
        let mut server = Server::new_async().await;
        let pm = manager(&server, config(10_000.0));
        let open = positions_body(&[
            position_json("BTCUSDT", 1.0, 100.0, 100.0),
            position_json("ETHUSDT", 1.0, 100.0, 100.0),
        ]);
        let _start = start_with(&mut server, &pm, &open).await;

        let _rejected = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()))
            .with_status(400)
            .with_body(r#"{"code":-2022,"msg":"ReduceOnly Order is rejected."}"#)
            .create_async()
            .await;
        let _filled = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::UrlEncoded("symbol".into(), "ETHUSDT".into()))
            .with_body(r#"{"orderId":12,"symbol":"ETHUSDT","avgPrice":"110","executedQty":"1"}"#)
            .create_async()
            .await;
        let mut events = pm.subscribe();

        let outcomes = pm.close_all_positions("shutdown").await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].symbol, "BTCUSDT");
        match &outcomes[0].result {
            Err(ExecutionError::Gateway(GatewayError::Exchange { code, .. })) => {
                assert_eq!(*code, -2022)
            }
            other => panic!("expected exchange error, got {:?}", other),
        }
        assert_eq!(outcomes[1].symbol, "ETHUSDT");
        assert_ok!(&outcomes[1].result);

        let remaining = pm.get_positions();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].symbol, "BTCUSDT");
        assert_eq!(remaining[0].state, PositionState::Open);

        let received = drain(&mut events);
        assert!(received
            .iter()
            .any(|e| matches!(e, TradingEvent::ClosePositionFailed { symbol, .. } if symbol == "BTCUSDT")));
    }

    #[tokio::test]
    async fn test_bracket_failure_flattens_entry() {
        let mut server = Server::new_async().await;
        let pm = manager(&server, config(10_000.0));
        let _start = start_with(&mut server, &pm, "[]").await;
        let _flow = mock_entry_flow(&mut server).await;

        let _take_profit = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::UrlEncoded("type".into(), "TAKE_PROFIT_MARKET".into()))
            .with_status(400)
            .with_body(r#"{"code":-2021,"msg":"Order would immediately trigger."}"#)
            .create_async()
            .await;
        let cancel_stop = server
            .mock("DELETE", "/fapi/v1/order")
            .match_query(Matcher::UrlEncoded("orderId".into(), "2".into()))
            .with_body(r#"{"orderId":2,"symbol":"BTCUSDT","status":"CANCELED"}"#)
            .expect(1)
            .create_async()
            .await;
        let flatten = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("type".into(), "MARKET".into()),
                Matcher::UrlEncoded("side".into(), "SELL".into()),
                Matcher::UrlEncoded("reduceOnly".into(), "true".into()),
            ]))
            .with_body(r#"{"orderId":4,"symbol":"BTCUSDT","avgPrice":"100","executedQty":"50"}"#)
            .expect(1)
            .create_async()
            .await;
        let mut events = pm.subscribe();

        let result = pm
            .execute_signal(&signal("BTCUSDT", Direction::Long, 100.0))
            .await;

        assert!(matches!(result, Err(ExecutionError::BracketFailed(_))));
        assert!(pm.get_position("BTCUSDT").is_none());
        assert_eq!(pm.get_statistics().open_positions, 0);
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, TradingEvent::TradeFailed { .. })));

        cancel_stop.assert_async().await;
        flatten.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_marks_and_alerts_drawdown() {
        let mut server = Server::new_async().await;
        let pm = manager(
            &server,
            TradingConfig {
                max_drawdown_percent: 5.0,
                ..config(1_000.0)
            },
        );
        let open = positions_body(&[position_json("BTCUSDT", 1.0, 100.0, 100.0)]);
        let start = start_with(&mut server, &pm, &open).await;
        start.snapshot.remove_async().await;
        let _marked = mock_positions(
            &mut server,
            &positions_body(&[position_json("BTCUSDT", 1.0, 100.0, 40.0)]),
        )
        .await;
        let mut events = pm.subscribe();

        assert_ok!(pm.refresh_positions().await);

        let position = pm.get_position("BTCUSDT").unwrap();
        assert_eq!(position.mark_price, 40.0);
        assert!((position.unrealized_pnl + 60.0).abs() < 1e-9);

        let stats = pm.get_statistics();
        assert!((stats.equity - 940.0).abs() < 1e-9);
        assert!((stats.drawdown_percent - 6.0).abs() < 1e-9);

        let received = drain(&mut events);
        assert_eq!(received.len(), 1);
        assert!(matches!(received[0], TradingEvent::DrawdownAlert { .. }));

        // Alerts once per breach; nothing is liquidated
        assert_ok!(pm.refresh_positions().await);
        assert!(drain(&mut events).is_empty());
        assert_eq!(pm.get_positions().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_reconciles_bracket_exit() {
        let mut server = Server::new_async().await;
        let pm = manager(&server, config(10_000.0));
        let start = start_with(&mut server, &pm, "[]").await;
        let _flow = mock_entry_flow(&mut server).await;
        let _take_profit = mock_take_profit(&mut server).await;
        assert_ok!(
            pm.execute_signal(&signal("BTCUSDT", Direction::Long, 100.0))
                .await
        );

        start.snapshot.remove_async().await;
        let live = mock_positions(
            &mut server,
            &positions_body(&[position_json("BTCUSDT", 50.0, 100.0, 103.0)]),
        )
        .await;
        assert_ok!(pm.refresh_positions().await);
        assert_eq!(pm.get_position("BTCUSDT").unwrap().mark_price, 103.0);

        live.remove_async().await;
        let _flat = mock_positions(&mut server, "[]").await;
        let cancel_leftover = server
            .mock("DELETE", "/fapi/v1/allOpenOrders")
            .match_query(Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()))
            .with_body(r#"{"code":200,"msg":"ok"}"#)
            .expect(1)
            .create_async()
            .await;

        assert_ok!(pm.refresh_positions().await);

        assert!(pm.get_position("BTCUSDT").is_none());
        let history = pm.trade_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reason, BRACKET_CLOSE_REASON);
        assert_eq!(history[0].exit_price, 103.0);
        assert!((history[0].realized_pnl - 150.0).abs() < 1e-6);
        cancel_leftover.assert_async().await;
    }

    #[tokio::test]
    async fn test_daily_loss_blocks_and_alerts() {
        let mut server = Server::new_async().await;
        // 5% of 1000 = 50
        let pm = manager(&server, config(1_000.0));
        let open = positions_body(&[position_json("BTCUSDT", 1.0, 100.0, 100.0)]);
        let start = start_with(&mut server, &pm, &open).await;

        let _close = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()))
            .with_body(r#"{"orderId":20,"symbol":"BTCUSDT","avgPrice":"40","executedQty":"1"}"#)
            .create_async()
            .await;
        let trade = pm.close_position("BTCUSDT", "stop").await.unwrap();
        assert!((trade.realized_pnl + 60.0).abs() < 1e-9);
        assert_eq!(pm.daily_stats().losses, 1);

        let result = pm
            .execute_signal(&signal("ETHUSDT", Direction::Long, 2_000.0))
            .await;
        match result {
            Err(ExecutionError::RiskLimit(message)) => {
                assert!(message.contains("daily loss"), "{}", message)
            }
            other => panic!("expected risk limit, got {:?}", other),
        }

        start.snapshot.remove_async().await;
        let _flat = mock_positions(&mut server, "[]").await;
        let mut events = pm.subscribe();
        assert_ok!(pm.refresh_positions().await);
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, TradingEvent::DailyLossLimitReached { .. })));

        pm.reset_daily_stats();
        assert_eq!(pm.daily_stats().trade_count, 0);
    }

    #[tokio::test]
    async fn test_stop_leaves_positions_open() {
        let mut server = Server::new_async().await;
        let pm = manager(&server, config(10_000.0));
        let open = positions_body(&[position_json("BTCUSDT", 1.0, 100.0, 100.0)]);
        let _start = start_with(&mut server, &pm, &open).await;
        assert!(pm.is_running());

        // Second start is a no-op
        assert_ok!(pm.start().await);

        pm.stop().await;
        pm.stop().await;
        assert!(!pm.is_running());
        assert_eq!(pm.get_positions().len(), 1);
        assert_err!(
            pm.execute_signal(&signal("ETHUSDT", Direction::Long, 100.0))
                .await
        );
    }

    #[tokio::test]
    async fn test_open_manual_uses_ticker_and_shows_in_status() {
        let mut server = Server::new_async().await;
        let pm = manager(&server, config(10_000.0));
        assert_eq!(
            pm.open_manual("BTCUSDT", Direction::Long).await.unwrap_err(),
            ExecutionError::NotRunning
        );

        let _start = start_with(&mut server, &pm, "[]").await;
        let _ticker = server
            .mock("GET", "/fapi/v1/ticker/price")
            .match_query(Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()))
            .with_body(r#"{"symbol":"BTCUSDT","price":"100.00"}"#)
            .create_async()
            .await;
        let _entry = mock_entry_flow(&mut server).await;
        let _tp = mock_take_profit(&mut server).await;

        let position = pm.open_manual("BTCUSDT", Direction::Long).await.unwrap();
        assert_eq!(position.originating_strategy, MANUAL_STRATEGY);
        assert_eq!(position.size, 50.0);

        let status = pm.status().await.unwrap();
        assert!(status.running);
        assert_eq!(status.balance.available, 10_000.0);
        assert_eq!(status.positions.len(), 1);
        assert_eq!(status.statistics.open_positions, 1);
    }

    #[tokio::test]
    async fn test_entry_failure_emits_trade_failed() {
        let mut server = Server::new_async().await;
        let pm = manager(&server, config(10_000.0));
        let _start = start_with(&mut server, &pm, "[]").await;
        let _sizing = mock_sizing_inputs(&mut server, "10000").await;
        let entry = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code":-2019,"msg":"Margin is insufficient."}"#)
            .expect(1)
            .create_async()
            .await;
        let mut events = pm.subscribe();

        let result = pm
            .execute_signal(&signal("BTCUSDT", Direction::Long, 100.0))
            .await;

        match result {
            Err(ExecutionError::Gateway(GatewayError::Exchange { code, .. })) => {
                assert_eq!(code, -2019)
            }
            other => panic!("expected exchange error, got {:?}", other),
        }
        assert!(pm.get_positions().is_empty());
        assert!(pm.book().opening.is_empty());
        assert_eq!(pm.daily_stats().trade_count, 0);

        let events = drain(&mut events);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            TradingEvent::TradeFailed { symbol, strategy, .. }
                if symbol == "BTCUSDT" && strategy == "test"
        ));
        // Bracket legs are never attempted
        entry.assert_async().await;
    }

    #[tokio::test]
    async fn test_unsizable_signal_has_no_side_effects() {
        let mut server = Server::new_async().await;
        let pm = manager(&server, config(10_000.0));
        let _start = start_with(&mut server, &pm, "[]").await;
        // 1% of 10 USDT over a 2% stop at 30000 floors to zero lots
        let _sizing = mock_sizing_inputs(&mut server, "10").await;
        let order = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let mut events = pm.subscribe();

        let result = pm
            .execute_signal(&signal("BTCUSDT", Direction::Long, 30_000.0))
            .await;

        assert!(matches!(result, Err(ExecutionError::InvalidSize(_))));
        assert!(pm.get_position("BTCUSDT").is_none());
        assert!(pm.book().opening.is_empty());
        assert!(drain(&mut events).is_empty());
        order.assert_async().await;
    }

    #[tokio::test]
    async fn test_close_and_reentry_interleave_to_one_position() {
        let mut server = Server::new_async().await;
        let pm = manager(&server, config(10_000.0));
        let open = positions_body(&[position_json("BTCUSDT", 2.0, 100.0, 100.0)]);
        let _start = start_with(&mut server, &pm, &open).await;

        let close = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("type".into(), "MARKET".into()),
                Matcher::UrlEncoded("side".into(), "SELL".into()),
                Matcher::UrlEncoded("quantity".into(), "2".into()),
            ]))
            .with_body(r#"{"orderId":9,"symbol":"BTCUSDT","avgPrice":"100","executedQty":"2"}"#)
            .expect(1)
            .create_async()
            .await;
        let entry_flow = mock_entry_flow(&mut server).await;
        let _tp = mock_take_profit(&mut server).await;

        let long = signal("BTCUSDT", Direction::Long, 100.0);
        let (closed, first, second) = tokio::join!(
            pm.close_position("BTCUSDT", "manual"),
            pm.execute_signal(&long),
            pm.execute_signal(&long),
        );

        assert_ok!(closed);
        let entries = [first, second];
        assert_eq!(entries.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(entries
            .iter()
            .any(|r| matches!(r, Err(ExecutionError::RiskLimit(_)))));

        let positions = pm.get_positions();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].originating_strategy, "test");
        close.assert_async().await;
        for mock in &entry_flow {
            mock.assert_async().await;
        }
    }

    #[tokio::test]
    async fn test_adoption_over_cap_blocks_new_entries() {
        let mut server = Server::new_async().await;
        let pm = manager(
            &server,
            TradingConfig {
                max_positions: 2,
                ..config(10_000.0)
            },
        );
        let open = positions_body(&[
            position_json("BTCUSDT", 1.0, 100.0, 100.0),
            position_json("ETHUSDT", 1.0, 100.0, 100.0),
            position_json("SOLUSDT", -1.0, 100.0, 100.0),
        ]);
        let _start = start_with(&mut server, &pm, &open).await;
        let order = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        // Everything the exchange holds is tracked
        assert_eq!(pm.get_positions().len(), 3);

        let result = pm
            .execute_signal(&signal("XRPUSDT", Direction::Long, 1.0))
            .await;
        match result {
            Err(ExecutionError::RiskLimit(reason)) => {
                assert!(reason.contains("max positions reached (3/2)"))
            }
            other => panic!("expected risk limit, got {:?}", other),
        }
        order.assert_async().await;
    }

    #[tokio::test]
    async fn test_update_config_validates() {
        let server = Server::new_async().await;
        let pm = manager(&server, config(10_000.0));

        let bad = TradingConfig {
            leverage: 0,
            ..TradingConfig::default()
        };
        assert!(matches!(
            pm.update_config(bad),
            Err(ExecutionError::InvalidConfig(_))
        ));
        assert_eq!(pm.config().leverage, 10);

        let good = TradingConfig {
            max_positions: 5,
            ..TradingConfig::default()
        };
        assert_ok!(pm.update_config(good));
        assert_eq!(pm.config().max_positions, 5);
    }
}

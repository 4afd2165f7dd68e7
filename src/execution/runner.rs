use super::{CandleBuffer, ExecutionError, PositionManager};
use crate::api::{ExchangeGateway, GatewayError};
use crate::config::{AppConfig, Credentials};
use crate::models::{Candle, Position, Signal};
use crate::strategy::StrategyEngine;
use crate::stream::{
    channel, ChannelKind, ConnectionState, KlineEvent, MarketStreamManager, StreamError,
    StreamMessage,
};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum BotError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("market stream {channel_key} gave up: {reason}")]
    StreamFailed { channel_key: String, reason: String },
}

/// Closed candle in, signal out, order placed
pub struct TradingBot {
    gateway: ExchangeGateway,
    streams: MarketStreamManager,
    engine: StrategyEngine,
    positions: PositionManager,
    buffer: CandleBuffer,
}

impl TradingBot {
    pub fn new(config: &AppConfig, credentials: Credentials) -> Result<Self, BotError> {
        let gateway = ExchangeGateway::new(&config.exchange, credentials)?;
        let streams = MarketStreamManager::new(config.exchange.ws_url(), config.stream.clone());
        let positions = PositionManager::new(gateway.clone(), config.trading.clone());
        Ok(Self::from_parts(
            gateway,
            streams,
            StrategyEngine::new(),
            positions,
        ))
    }

    pub fn from_parts(
        gateway: ExchangeGateway,
        streams: MarketStreamManager,
        engine: StrategyEngine,
        positions: PositionManager,
    ) -> Self {
        let capacity = (positions.config().history_limit as usize).max(engine.min_candles_required());
        Self {
            gateway,
            streams,
            engine,
            positions,
            buffer: CandleBuffer::new(capacity),
        }
    }

    pub fn positions(&self) -> &PositionManager {
        &self.positions
    }

    pub fn streams(&self) -> &MarketStreamManager {
        &self.streams
    }

    pub fn engine(&self) -> &StrategyEngine {
        &self.engine
    }

    pub fn buffer(&self) -> &CandleBuffer {
        &self.buffer
    }

    /// Load closed candles for the configured symbol. The newest REST kline
    /// is still forming and is dropped.
    pub async fn seed_history(&self) -> Result<usize, BotError> {
        let config = self.positions.config();
        let mut candles = self
            .gateway
            .klines(&config.symbol, &config.timeframe, config.history_limit + 1)
            .await?;
        candles.pop();

        self.buffer.seed(&config.symbol, candles);
        let count = self.buffer.len(&config.symbol);
        tracing::info!(
            "📊 Seeded {} {} candles for {}",
            count,
            config.timeframe,
            config.symbol
        );
        Ok(count)
    }

    /// Append a closed candle and evaluate the strategies over the window
    pub fn on_closed_candle(&self, symbol: &str, candle: Candle) -> Option<Signal> {
        if self.buffer.push(symbol, candle) == super::BufferUpdate::Stale {
            tracing::debug!(symbol = %symbol, "Ignoring out-of-order candle {}", candle.timestamp);
            return None;
        }
        let candles = self.buffer.candles(symbol);
        self.engine.evaluate(symbol, &candles)
    }

    /// Feed one stream message through. Returns the execution outcome when a
    /// closed kline produced a signal.
    pub async fn handle_message(
        &self,
        message: &StreamMessage,
    ) -> Option<Result<Position, ExecutionError>> {
        if message.kind != ChannelKind::Kline {
            return None;
        }
        let kline = KlineEvent::from_payload(&message.payload)?;
        if !kline.is_closed {
            return None;
        }

        let signal = self.on_closed_candle(&kline.symbol, kline.to_candle())?;
        let result = self.positions.execute_signal(&signal).await;
        if let Err(e) = &result {
            tracing::warn!(
                symbol = %signal.symbol,
                "⚠️  {} signal not executed: {}",
                signal.strategy_name,
                e
            );
        }
        Some(result)
    }

    /// Seed, start trading and follow the kline stream until `shutdown`
    /// flips to true or the stream gives up.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), BotError> {
        let config = self.positions.config();
        self.seed_history().await?;
        self.positions.start().await?;

        let channel_key = channel::kline(&config.symbol, &config.timeframe);
        let mut handle = self.streams.connect(&channel_key)?;
        tracing::info!("📡 Following {}", channel_key);

        let outcome = loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break Ok(());
                    }
                }
                message = handle.messages.recv() => match message {
                    Ok(message) => {
                        self.handle_message(&message).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("⚠️  {} lagged, skipped {} messages", channel_key, skipped);
                    }
                    Err(RecvError::Closed) => {
                        break Err(BotError::StreamFailed {
                            channel_key: channel_key.clone(),
                            reason: "message channel closed".to_string(),
                        });
                    }
                },
                changed = handle.state.changed() => {
                    if changed.is_err() {
                        continue;
                    }
                    let state = handle.state.borrow_and_update().clone();
                    if let ConnectionState::Failed(reason) = state {
                        break Err(BotError::StreamFailed {
                            channel_key: channel_key.clone(),
                            reason,
                        });
                    }
                }
            }
        };

        self.shutdown().await;
        outcome
    }

    /// Stop trading and drop every stream. Positions stay open.
    pub async fn shutdown(&self) {
        self.positions.stop().await;
        self.streams.disconnect_all().await;
        tracing::info!("👋 Trading bot shut down");
    }
}

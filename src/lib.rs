// Core modules
pub mod api;
pub mod config;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod risk;
pub mod strategy;
pub mod stream;

// Re-export commonly used types
pub use api::{ExchangeGateway, GatewayError};
pub use config::{AppConfig, Credentials, TradingConfig};
pub use execution::{ExecutionError, PositionManager, TradingBot, TradingEvent};
pub use models::*;
pub use strategy::{Strategy, StrategyEngine};
pub use stream::{MarketStreamManager, StreamError};

// Configuration snapshot types and loader
//
// Layering: defaults <- futuresbot.toml (optional) <- FUTURESBOT__* env vars.
// Credentials are read separately from BINANCE_API_KEY / BINANCE_SECRET_KEY.

use serde::Deserialize;
use std::time::Duration;

const TESTNET_REST_URL: &str = "https://testnet.binancefuture.com";
const TESTNET_WS_URL: &str = "wss://stream.binancefuture.com";
const LIVE_REST_URL: &str = "https://fapi.binance.com";
const LIVE_WS_URL: &str = "wss://fstream.binance.com";

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub trading: TradingConfig,
}

impl AppConfig {
    /// Load from `futuresbot.toml` (if present) and `FUTURESBOT__*` environment variables
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from("futuresbot")
    }

    /// Load with an explicit config file stem (no extension)
    pub fn load_from(file_stem: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(file_stem).required(false))
            .add_source(
                config::Environment::with_prefix("FUTURESBOT")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}

/// Exchange REST/stream endpoints and gateway limits
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_true")]
    pub testnet: bool,
    #[serde(default)]
    pub rest_base_url: Option<String>,
    #[serde(default)]
    pub ws_base_url: Option<String>,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: usize,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            testnet: true,
            rest_base_url: None,
            ws_base_url: None,
            requests_per_minute: default_requests_per_minute(),
            request_timeout_ms: default_request_timeout_ms(),
            recv_window_ms: default_recv_window_ms(),
        }
    }
}

impl ExchangeConfig {
    pub fn rest_url(&self) -> String {
        match &self.rest_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None if self.testnet => TESTNET_REST_URL.to_string(),
            None => LIVE_REST_URL.to_string(),
        }
    }

    pub fn ws_url(&self) -> String {
        match &self.ws_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None if self.testnet => TESTNET_WS_URL.to_string(),
            None => LIVE_WS_URL.to_string(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// API credentials. Either half may be missing; signed calls then fail with an auth error.
#[derive(Clone, Default)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            secret_key: Some(secret_key.into()),
        }
    }

    /// Read BINANCE_API_KEY / BINANCE_SECRET_KEY (blank values count as missing)
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            api_key: read("BINANCE_API_KEY"),
            secret_key: read("BINANCE_SECRET_KEY"),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.api_key.is_some() && self.secret_key.is_some()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("has_api_key", &self.api_key.is_some())
            .field("has_secret_key", &self.secret_key.is_some())
            .finish()
    }
}

/// Market stream connection policy
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_connect_queue_delay_ms")]
    pub connect_queue_delay_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            connect_queue_delay_ms: default_connect_queue_delay_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl StreamConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn connect_queue_delay(&self) -> Duration {
        Duration::from_millis(self.connect_queue_delay_ms)
    }
}

/// Read-only trading snapshot. Replaced wholesale on update, never edited in place.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TradingConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default = "default_risk_percent")]
    pub risk_percent: f64,
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    #[serde(default = "default_stop_loss_percent")]
    pub stop_loss_percent: f64,
    #[serde(default = "default_take_profit_percent")]
    pub take_profit_percent: f64,
    #[serde(default = "default_max_drawdown_percent")]
    pub max_drawdown_percent: f64,
    #[serde(default = "default_daily_loss_limit_percent")]
    pub daily_loss_limit_percent: f64,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_margin_type")]
    pub margin_type: String,
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
    /// Equity the drawdown/daily-loss percentages are measured against.
    /// Captured from the account wallet balance on start when not set.
    #[serde(default)]
    pub baseline_equity: Option<f64>,
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            leverage: default_leverage(),
            risk_percent: default_risk_percent(),
            max_positions: default_max_positions(),
            stop_loss_percent: default_stop_loss_percent(),
            take_profit_percent: default_take_profit_percent(),
            max_drawdown_percent: default_max_drawdown_percent(),
            daily_loss_limit_percent: default_daily_loss_limit_percent(),
            timeframe: default_timeframe(),
            margin_type: default_margin_type(),
            monitor_interval_secs: default_monitor_interval_secs(),
            baseline_equity: None,
            history_limit: default_history_limit(),
        }
    }
}

impl TradingConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    /// Check value ranges. Returns a description of the first bad field.
    pub fn validate(&self) -> Result<(), String> {
        if self.symbol.trim().is_empty() {
            return Err("symbol must not be empty".to_string());
        }
        if self.leverage == 0 || self.leverage > 125 {
            return Err(format!("leverage {} outside 1..=125", self.leverage));
        }
        if !(self.risk_percent > 0.0 && self.risk_percent <= 100.0) {
            return Err(format!("risk_percent {} outside (0, 100]", self.risk_percent));
        }
        if self.max_positions == 0 {
            return Err("max_positions must be at least 1".to_string());
        }
        if !(self.stop_loss_percent > 0.0 && self.stop_loss_percent < 100.0) {
            return Err(format!(
                "stop_loss_percent {} outside (0, 100)",
                self.stop_loss_percent
            ));
        }
        if self.take_profit_percent <= 0.0 {
            return Err(format!(
                "take_profit_percent {} must be positive",
                self.take_profit_percent
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
fn default_requests_per_minute() -> usize {
    1200
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_recv_window_ms() -> u64 {
    5_000
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_connect_queue_delay_ms() -> u64 {
    250
}
fn default_channel_capacity() -> usize {
    1024
}
fn default_symbol() -> String {
    "BTCUSDT".to_string()
}
fn default_leverage() -> u32 {
    10
}
fn default_risk_percent() -> f64 {
    1.0
}
fn default_max_positions() -> usize {
    3
}
fn default_stop_loss_percent() -> f64 {
    2.0
}
fn default_take_profit_percent() -> f64 {
    4.0
}
fn default_max_drawdown_percent() -> f64 {
    10.0
}
fn default_daily_loss_limit_percent() -> f64 {
    5.0
}
fn default_timeframe() -> String {
    "5m".to_string()
}
fn default_margin_type() -> String {
    "ISOLATED".to_string()
}
fn default_monitor_interval_secs() -> u64 {
    30
}
fn default_history_limit() -> u32 {
    200
}

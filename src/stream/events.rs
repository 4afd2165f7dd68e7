// Channel keys, stream payload envelopes and typed events

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::api::types::de_f64;
use crate::models::Candle;

/// Channel key builders (`{symbolLower}@{type}`)
pub mod channel {
    pub fn ticker(symbol: &str) -> String {
        format!("{}@ticker", symbol.to_lowercase())
    }

    pub fn trade(symbol: &str) -> String {
        format!("{}@trade", symbol.to_lowercase())
    }

    pub fn kline(symbol: &str, interval: &str) -> String {
        format!("{}@kline_{}", symbol.to_lowercase(), interval)
    }

    pub fn depth(symbol: &str, levels: u32) -> String {
        format!("{}@depth{}@100ms", symbol.to_lowercase(), levels)
    }

    pub fn mark_price(symbol: &str) -> String {
        format!("{}@markPrice", symbol.to_lowercase())
    }

    pub fn force_order(symbol: &str) -> String {
        format!("{}@forceOrder", symbol.to_lowercase())
    }
}

/// Event-bus category of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Ticker,
    Trade,
    Kline,
    OrderBook,
    MarkPrice,
    Liquidation,
    UserData,
    Other,
}

impl ChannelKind {
    /// Classify a channel key. Keys without `@` are user-data listen keys.
    pub fn from_channel_key(key: &str) -> Self {
        let Some((_, stream_type)) = key.split_once('@') else {
            return ChannelKind::UserData;
        };

        match stream_type {
            "ticker" | "miniTicker" | "bookTicker" => ChannelKind::Ticker,
            "trade" | "aggTrade" => ChannelKind::Trade,
            "forceOrder" => ChannelKind::Liquidation,
            t if t.starts_with("kline_") => ChannelKind::Kline,
            t if t.starts_with("depth") => ChannelKind::OrderBook,
            t if t.starts_with("markPrice") => ChannelKind::MarkPrice,
            _ => ChannelKind::Other,
        }
    }
}

/// One inbound payload, unwrapped from the `{stream, data}` envelope when present
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub channel_key: String,
    pub kind: ChannelKind,
    /// Stream name from the envelope, if the payload was wrapped
    pub stream: Option<String>,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl StreamMessage {
    /// Parse a text frame. Non-JSON text is forwarded as a string payload.
    pub fn parse(channel_key: &str, text: &str) -> Self {
        let value: Value = serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()));

        let envelope = value
            .get("stream")
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|_| value.get("data").is_some());

        let (stream, payload, kind) = match envelope {
            Some(stream) => {
                let kind = ChannelKind::from_channel_key(&stream);
                let data = value.get("data").cloned().unwrap_or(Value::Null);
                (Some(stream), data, kind)
            }
            None => (None, value, ChannelKind::from_channel_key(channel_key)),
        };

        Self {
            channel_key: channel_key.to_string(),
            kind,
            stream,
            payload,
            received_at: Utc::now(),
        }
    }
}

/// Subscription lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
    Error(String),
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Gave up after exhausting reconnect attempts
    Failed(String),
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

/// Process-wide stream event bus payload
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Message(StreamMessage),
    Connected {
        channel_key: String,
    },
    ReconnectScheduled {
        channel_key: String,
        attempt: u32,
        delay: Duration,
    },
    /// Terminal: reconnects exhausted, subscription dropped
    Disconnected {
        channel_key: String,
        reason: String,
    },
    /// Normal close requested through `disconnect`
    Closed {
        channel_key: String,
    },
}

impl StreamEvent {
    pub fn channel_key(&self) -> &str {
        match self {
            StreamEvent::Message(msg) => &msg.channel_key,
            StreamEvent::Connected { channel_key }
            | StreamEvent::ReconnectScheduled { channel_key, .. }
            | StreamEvent::Disconnected { channel_key, .. }
            | StreamEvent::Closed { channel_key } => channel_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawKlineEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: RawKlineBody,
}

#[derive(Debug, Deserialize)]
struct RawKlineBody {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o", deserialize_with = "de_f64")]
    open: f64,
    #[serde(rename = "h", deserialize_with = "de_f64")]
    high: f64,
    #[serde(rename = "l", deserialize_with = "de_f64")]
    low: f64,
    #[serde(rename = "c", deserialize_with = "de_f64")]
    close: f64,
    #[serde(rename = "v", deserialize_with = "de_f64")]
    volume: f64,
    #[serde(rename = "x")]
    is_closed: bool,
}

/// Kline update from a `{symbol}@kline_{interval}` stream
#[derive(Debug, Clone, PartialEq)]
pub struct KlineEvent {
    pub symbol: String,
    pub interval: String,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// True on the final update for the bucket
    pub is_closed: bool,
}

impl KlineEvent {
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let raw: RawKlineEvent = serde_json::from_value(payload.clone()).ok()?;
        let k = raw.kline;
        Some(Self {
            symbol: raw.symbol,
            interval: k.interval,
            open_time: Utc.timestamp_millis_opt(k.open_time).single()?,
            close_time: Utc.timestamp_millis_opt(k.close_time).single()?,
            open: k.open,
            high: k.high,
            low: k.low,
            close: k.close,
            volume: k.volume,
            is_closed: k.is_closed,
        })
    }

    pub fn to_candle(&self) -> Candle {
        Candle {
            timestamp: self.open_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

// Typed exchange payloads the trading engine depends on.
// Everything else is returned as serde_json::Value.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::GatewayError;
use crate::models::{Candle, OrderSide};

/// Numbers arrive as JSON strings ("0.001") or plain numbers depending on the endpoint
pub(crate) fn de_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) if s.is_empty() => Ok(0.0),
        Raw::Str(s) => s.parse::<f64>().map_err(serde::de::Error::custom),
    }
}

/// Raw kline row: [openTime, open, high, low, close, volume, closeTime, ...]
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub(crate) struct RawKline(
    pub i64,    // 0: Open time
    pub String, // 1: Open
    pub String, // 2: High
    pub String, // 3: Low
    pub String, // 4: Close
    pub String, // 5: Volume
    pub i64,    // 6: Close time
    pub String, // 7: Quote asset volume
    pub u64,    // 8: Number of trades
    pub String, // 9: Taker buy base
    pub String, // 10: Taker buy quote
    pub String, // 11: Ignore
);

impl RawKline {
    pub(crate) fn to_candle(&self) -> Result<Candle, GatewayError> {
        let field = |name: &str, raw: &str| -> Result<f64, GatewayError> {
            raw.parse::<f64>().map_err(|_| {
                GatewayError::Decode(format!("kline {} {} is not a number: {:?}", self.0, name, raw))
            })
        };
        let timestamp = Utc
            .timestamp_millis_opt(self.0)
            .single()
            .ok_or_else(|| GatewayError::Decode(format!("kline open time {} out of range", self.0)))?;

        Ok(Candle {
            timestamp,
            open: field("open", &self.1)?,
            high: field("high", &self.2)?,
            low: field("low", &self.3)?,
            close: field("close", &self.4)?,
            volume: field("volume", &self.5)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    #[serde(deserialize_with = "de_f64")]
    pub price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServerTime {
    pub server_time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListenKey {
    pub listen_key: String,
}

/// One row of the futures balance endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceEntry {
    pub asset: String,
    #[serde(deserialize_with = "de_f64")]
    pub balance: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub available_balance: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub cross_un_pnl: f64,
}

/// USDT wallet summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AccountBalance {
    pub total: f64,
    pub available: f64,
    pub used: f64,
}

impl AccountBalance {
    pub fn from_entry(entry: &BalanceEntry) -> Self {
        Self {
            total: entry.balance,
            available: entry.available_balance,
            used: (entry.balance - entry.available_balance).max(0.0),
        }
    }
}

/// Exchange view of one position (one-way mode)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRisk {
    pub symbol: String,
    #[serde(deserialize_with = "de_f64")]
    pub position_amt: f64,
    #[serde(deserialize_with = "de_f64")]
    pub entry_price: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub mark_price: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub un_realized_profit: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub leverage: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub isolated_margin: f64,
    #[serde(default)]
    pub margin_type: String,
}

impl PositionRisk {
    pub fn is_open(&self) -> bool {
        self.position_amt != 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    StopMarket,
    TakeProfitMarket,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
        }
    }
}

/// New-order parameters. Quantities and prices should already be rounded
/// to the symbol's step and tick sizes.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Option<f64>,
    pub stop_price: Option<f64>,
    pub reduce_only: bool,
    pub working_type: Option<&'static str>,
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: OrderSide, quantity: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity: Some(quantity),
            stop_price: None,
            reduce_only: false,
            working_type: None,
            client_order_id: None,
        }
    }

    /// Reduce-only stop triggered on mark price
    pub fn stop_market(symbol: &str, side: OrderSide, quantity: f64, stop_price: f64) -> Self {
        Self {
            order_type: OrderType::StopMarket,
            stop_price: Some(stop_price),
            reduce_only: true,
            working_type: Some("MARK_PRICE"),
            ..Self::market(symbol, side, quantity)
        }
    }

    /// Reduce-only take-profit triggered on mark price
    pub fn take_profit_market(
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        stop_price: f64,
    ) -> Self {
        Self {
            order_type: OrderType::TakeProfitMarket,
            ..Self::stop_market(symbol, side, quantity, stop_price)
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }

    /// Request parameters in the order they are signed
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("symbol", self.symbol.clone()),
            ("side", self.side.as_str().to_string()),
            ("type", self.order_type.as_str().to_string()),
        ];
        if let Some(quantity) = self.quantity {
            params.push(("quantity", format_decimal(quantity)));
        }
        if let Some(stop_price) = self.stop_price {
            params.push(("stopPrice", format_decimal(stop_price)));
        }
        if self.reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }
        if let Some(working_type) = self.working_type {
            params.push(("workingType", working_type.to_string()));
        }
        if let Some(id) = &self.client_order_id {
            params.push(("newClientOrderId", id.clone()));
        }
        params
    }
}

/// Order acknowledgement / query result
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: i64,
    pub symbol: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub client_order_id: String,
    #[serde(default, deserialize_with = "de_f64")]
    pub avg_price: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub executed_qty: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub orig_qty: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub stop_price: f64,
    #[serde(default)]
    pub side: String,
    #[serde(default, rename = "type")]
    pub order_type: String,
}

/// Trading filters for one symbol
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolRules {
    pub symbol: String,
    pub step_size: f64,
    pub min_qty: f64,
    pub tick_size: f64,
    pub min_notional: f64,
}

impl SymbolRules {
    /// Pull LOT_SIZE, PRICE_FILTER and MIN_NOTIONAL out of an exchangeInfo payload
    pub fn from_exchange_info(info: &Value, symbol: &str) -> Result<Self, GatewayError> {
        let entry = info
            .get("symbols")
            .and_then(Value::as_array)
            .and_then(|symbols| {
                symbols
                    .iter()
                    .find(|s| s.get("symbol").and_then(Value::as_str) == Some(symbol))
            })
            .ok_or_else(|| GatewayError::Decode(format!("symbol {} not in exchange info", symbol)))?;

        let filters = entry
            .get("filters")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let filter_value = |filter_type: &str, field: &str| -> Option<f64> {
            filters
                .iter()
                .find(|f| f.get("filterType").and_then(Value::as_str) == Some(filter_type))
                .and_then(|f| f.get(field))
                .and_then(|v| match v {
                    Value::String(s) => s.parse().ok(),
                    other => other.as_f64(),
                })
        };

        let step_size = filter_value("LOT_SIZE", "stepSize")
            .ok_or_else(|| GatewayError::Decode(format!("{} has no LOT_SIZE filter", symbol)))?;

        Ok(Self {
            symbol: symbol.to_string(),
            step_size,
            min_qty: filter_value("LOT_SIZE", "minQty").unwrap_or(step_size),
            tick_size: filter_value("PRICE_FILTER", "tickSize").unwrap_or(0.0),
            min_notional: filter_value("MIN_NOTIONAL", "notional").unwrap_or(0.0),
        })
    }

    /// Floor a quantity to the lot step
    pub fn floor_quantity(&self, quantity: f64) -> f64 {
        floor_to_step(quantity, self.step_size)
    }

    /// Round a trigger price to the nearest tick
    pub fn round_price(&self, price: f64) -> f64 {
        if self.tick_size <= 0.0 {
            return price;
        }
        let ticks = (price / self.tick_size).round();
        round_to_decimals(ticks * self.tick_size, decimals_of(self.tick_size))
    }
}

/// `floor(value / step) * step`, tolerant of float noise just under a step boundary
pub fn floor_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    let steps = (value / step + 1e-9).floor();
    round_to_decimals(steps * step, decimals_of(step))
}

/// Decimal places implied by a step like 0.001 (-> 3)
pub fn decimals_of(step: f64) -> u32 {
    let formatted = format_decimal(step);
    formatted
        .split_once('.')
        .map(|(_, frac)| frac.len() as u32)
        .unwrap_or(0)
}

fn round_to_decimals(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Plain decimal string without float noise or trailing zeros
pub fn format_decimal(value: f64) -> String {
    let formatted = format!("{:.8}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

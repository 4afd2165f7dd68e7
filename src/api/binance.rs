//! Futures REST gateway: the single signed, rate-limited path to the exchange

use chrono::Utc;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use super::error::GatewayError;
use super::rate_window::RateWindow;
use super::signing::{canonical_query, sign};
use super::types::{
    AccountBalance, BalanceEntry, ListenKey, OrderRequest, OrderResponse, PositionRisk,
    RawKline, ServerTime, SymbolRules, TickerPrice,
};
use crate::config::{Credentials, ExchangeConfig};
use crate::models::Candle;

const API_KEY_HEADER: &str = "X-MBX-APIKEY";
const MAX_KLINES_PER_REQUEST: u32 = 1500;

// Exchange codes that mean the key or signature was rejected
const AUTH_ERROR_CODES: [i64; 3] = [-1022, -2014, -2015];

/// Margin type change that was already in effect
pub const NO_MARGIN_CHANGE_CODE: i64 = -4046;

/// Signed, rate-limited futures REST client.
///
/// Cloneable; all clones share the rate window and server-time offset.
#[derive(Clone)]
pub struct ExchangeGateway {
    client: Client,
    base_url: String,
    credentials: Credentials,
    recv_window_ms: u64,
    rate_window: Arc<Mutex<RateWindow>>,
    time_offset_ms: Arc<AtomicI64>,
}

impl ExchangeGateway {
    pub fn new(config: &ExchangeConfig, credentials: Credentials) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GatewayError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.rest_url(),
            credentials,
            recv_window_ms: config.recv_window_ms,
            rate_window: Arc::new(Mutex::new(RateWindow::per_minute(
                config.requests_per_minute,
            ))),
            time_offset_ms: Arc::new(AtomicI64::new(0)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_complete()
    }

    /// Send one request.
    ///
    /// Signed requests get `timestamp`, `recvWindow` and a `signature` over the
    /// URL-encoded query. Fails fast with `RateLimit` when the window is full.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
        requires_auth: bool,
    ) -> Result<T, GatewayError> {
        let mut query: Vec<(&str, String)> = params.to_vec();

        if requires_auth {
            let secret = self
                .credentials
                .secret_key
                .as_deref()
                .ok_or_else(|| GatewayError::Auth("secret key not configured".to_string()))?;
            if self.credentials.api_key.is_none() {
                return Err(GatewayError::Auth("API key not configured".to_string()));
            }

            query.push(("timestamp", self.timestamp_ms().to_string()));
            query.push(("recvWindow", self.recv_window_ms.to_string()));
            let signature = sign(secret, &canonical_query(&query));
            query.push(("signature", signature));
        }

        self.acquire_slot()?;

        let mut url = format!("{}{}", self.base_url, endpoint);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&canonical_query(&query));
        }

        let mut builder = self.client.request(method.clone(), &url);
        if let Some(api_key) = &self.credentials.api_key {
            builder = builder.header(API_KEY_HEADER, api_key);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::warn!("❌ {} {} failed: {}", method, endpoint, e);
            GatewayError::Network(e.to_string())
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        if !status.is_success() {
            let err = parse_error_body(status.as_u16(), &body);
            tracing::warn!("❌ {} {} rejected: {}", method, endpoint, err);
            return Err(err);
        }

        serde_json::from_str(&body).map_err(GatewayError::from)
    }

    fn acquire_slot(&self) -> Result<(), GatewayError> {
        let mut window = self.rate_window.lock().unwrap_or_else(|e| e.into_inner());
        if window.try_acquire() {
            Ok(())
        } else {
            tracing::warn!("⚠️  Local rate limit reached ({} req/min)", window.limit());
            Err(GatewayError::RateLimit {
                limit: window.limit(),
                window_secs: window.window().as_secs(),
            })
        }
    }

    fn timestamp_ms(&self) -> i64 {
        Utc::now().timestamp_millis() + self.time_offset_ms.load(Ordering::Relaxed)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        self.request(Method::GET, endpoint, params, false).await
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        self.request(method, endpoint, params, true).await
    }

    // ========================================================================
    // Market data (public)
    // ========================================================================

    pub async fn ping(&self) -> Result<(), GatewayError> {
        let _: Value = self.get("/fapi/v1/ping", &[]).await?;
        Ok(())
    }

    pub async fn server_time(&self) -> Result<i64, GatewayError> {
        let time: ServerTime = self.get("/fapi/v1/time", &[]).await?;
        Ok(time.server_time)
    }

    /// Measure the server clock offset used for signed timestamps
    pub async fn sync_time(&self) -> Result<i64, GatewayError> {
        let server = self.server_time().await?;
        let offset = server - Utc::now().timestamp_millis();
        self.time_offset_ms.store(offset, Ordering::Relaxed);
        tracing::debug!(offset_ms = offset, "Synchronized server time");
        Ok(offset)
    }

    pub async fn exchange_info(&self) -> Result<Value, GatewayError> {
        self.get("/fapi/v1/exchangeInfo", &[]).await
    }

    pub async fn symbol_rules(&self, symbol: &str) -> Result<SymbolRules, GatewayError> {
        let info = self.exchange_info().await?;
        SymbolRules::from_exchange_info(&info, symbol)
    }

    pub async fn ticker_price(&self, symbol: &str) -> Result<TickerPrice, GatewayError> {
        self.get("/fapi/v1/ticker/price", &[("symbol", symbol.to_string())])
            .await
    }

    pub async fn ticker_24h(&self, symbol: &str) -> Result<Value, GatewayError> {
        self.get("/fapi/v1/ticker/24hr", &[("symbol", symbol.to_string())])
            .await
    }

    pub async fn order_book(&self, symbol: &str, limit: u32) -> Result<Value, GatewayError> {
        self.get(
            "/fapi/v1/depth",
            &[("symbol", symbol.to_string()), ("limit", limit.to_string())],
        )
        .await
    }

    pub async fn recent_trades(&self, symbol: &str, limit: u32) -> Result<Value, GatewayError> {
        self.get(
            "/fapi/v1/trades",
            &[("symbol", symbol.to_string()), ("limit", limit.to_string())],
        )
        .await
    }

    /// Historical candles, oldest first. The last row may still be forming.
    pub async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, GatewayError> {
        let limit = limit.clamp(1, MAX_KLINES_PER_REQUEST);
        let raw: Vec<RawKline> = self
            .get(
                "/fapi/v1/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        // A bad row would leave a gap in the window, so it fails the whole call
        let candles = raw
            .iter()
            .map(RawKline::to_candle)
            .collect::<Result<Vec<Candle>, GatewayError>>()?;

        tracing::debug!(symbol, interval, count = candles.len(), "Fetched klines");
        Ok(candles)
    }

    pub async fn funding_rate(&self, symbol: &str, limit: u32) -> Result<Value, GatewayError> {
        self.get(
            "/fapi/v1/fundingRate",
            &[("symbol", symbol.to_string()), ("limit", limit.to_string())],
        )
        .await
    }

    pub async fn open_interest(&self, symbol: &str) -> Result<Value, GatewayError> {
        self.get("/fapi/v1/openInterest", &[("symbol", symbol.to_string())])
            .await
    }

    // ========================================================================
    // Account (signed)
    // ========================================================================

    pub async fn account(&self) -> Result<Value, GatewayError> {
        self.signed(Method::GET, "/fapi/v2/account", &[]).await
    }

    pub async fn balances(&self) -> Result<Vec<BalanceEntry>, GatewayError> {
        self.signed(Method::GET, "/fapi/v2/balance", &[]).await
    }

    /// USDT wallet totals; zeros when the account holds no USDT row
    pub async fn usdt_balance(&self) -> Result<AccountBalance, GatewayError> {
        let balances = self.balances().await?;
        Ok(balances
            .iter()
            .find(|b| b.asset == "USDT")
            .map(AccountBalance::from_entry)
            .unwrap_or_default())
    }

    pub async fn position_risk(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<PositionRisk>, GatewayError> {
        let params: Vec<(&str, String)> = symbol
            .map(|s| vec![("symbol", s.to_string())])
            .unwrap_or_default();
        self.signed(Method::GET, "/fapi/v2/positionRisk", &params)
            .await
    }

    /// Positions with a non-zero amount
    pub async fn open_positions(&self) -> Result<Vec<PositionRisk>, GatewayError> {
        let positions = self.position_risk(None).await?;
        Ok(positions.into_iter().filter(PositionRisk::is_open).collect())
    }

    pub async fn change_leverage(&self, symbol: &str, leverage: u32) -> Result<Value, GatewayError> {
        self.signed(
            Method::POST,
            "/fapi/v1/leverage",
            &[
                ("symbol", symbol.to_string()),
                ("leverage", leverage.to_string()),
            ],
        )
        .await
    }

    pub async fn change_margin_type(
        &self,
        symbol: &str,
        margin_type: &str,
    ) -> Result<Value, GatewayError> {
        self.signed(
            Method::POST,
            "/fapi/v1/marginType",
            &[
                ("symbol", symbol.to_string()),
                ("marginType", margin_type.to_uppercase()),
            ],
        )
        .await
    }

    // ========================================================================
    // Orders (signed)
    // ========================================================================

    pub async fn new_order(&self, order: &OrderRequest) -> Result<OrderResponse, GatewayError> {
        let params = order.to_params();
        let response: OrderResponse = self.signed(Method::POST, "/fapi/v1/order", &params).await?;
        tracing::debug!(
            symbol = %order.symbol,
            order_id = response.order_id,
            "Placed {} {} order",
            order.side.as_str(),
            order.order_type.as_str()
        );
        Ok(response)
    }

    pub async fn cancel_order(
        &self,
        symbol: &str,
        order_id: i64,
    ) -> Result<OrderResponse, GatewayError> {
        self.signed(
            Method::DELETE,
            "/fapi/v1/order",
            &[
                ("symbol", symbol.to_string()),
                ("orderId", order_id.to_string()),
            ],
        )
        .await
    }

    pub async fn cancel_all_orders(&self, symbol: &str) -> Result<Value, GatewayError> {
        self.signed(
            Method::DELETE,
            "/fapi/v1/allOpenOrders",
            &[("symbol", symbol.to_string())],
        )
        .await
    }

    pub async fn open_orders(&self, symbol: &str) -> Result<Vec<OrderResponse>, GatewayError> {
        self.signed(
            Method::GET,
            "/fapi/v1/openOrders",
            &[("symbol", symbol.to_string())],
        )
        .await
    }

    pub async fn user_trades(&self, symbol: &str, limit: u32) -> Result<Value, GatewayError> {
        self.signed(
            Method::GET,
            "/fapi/v1/userTrades",
            &[("symbol", symbol.to_string()), ("limit", limit.to_string())],
        )
        .await
    }

    pub async fn income_history(
        &self,
        symbol: Option<&str>,
        limit: u32,
    ) -> Result<Value, GatewayError> {
        let mut params = vec![("limit", limit.to_string())];
        if let Some(symbol) = symbol {
            params.insert(0, ("symbol", symbol.to_string()));
        }
        self.signed(Method::GET, "/fapi/v1/income", &params).await
    }

    // ========================================================================
    // User data stream (API key only)
    // ========================================================================

    pub async fn start_user_stream(&self) -> Result<String, GatewayError> {
        self.require_api_key()?;
        let key: ListenKey = self
            .request(Method::POST, "/fapi/v1/listenKey", &[], false)
            .await?;
        Ok(key.listen_key)
    }

    pub async fn keepalive_user_stream(&self) -> Result<(), GatewayError> {
        self.require_api_key()?;
        let _: Value = self
            .request(Method::PUT, "/fapi/v1/listenKey", &[], false)
            .await?;
        Ok(())
    }

    fn require_api_key(&self) -> Result<(), GatewayError> {
        if self.credentials.api_key.is_none() {
            return Err(GatewayError::Auth("API key not configured".to_string()));
        }
        Ok(())
    }
}

/// Map a non-2xx body to a typed error. `{"code": -2019, "msg": "..."}` keeps
/// its code; anything unparsable keeps code 0 and the raw text.
fn parse_error_body(http_status: u16, body: &str) -> GatewayError {
    let parsed: Option<(i64, String)> = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        let code = v.get("code")?.as_i64()?;
        let msg = v
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some((code, msg))
    });

    match parsed {
        Some((code, message)) if http_status == 401 || AUTH_ERROR_CODES.contains(&code) => {
            GatewayError::Auth(format!("{} (code {})", message, code))
        }
        Some((code, message)) => GatewayError::Exchange {
            http_status,
            code,
            message,
        },
        None if http_status == 401 => GatewayError::Auth(body.to_string()),
        None => GatewayError::Exchange {
            http_status,
            code: 0,
            message: body.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use tokio_test::{assert_err, assert_ok};

    fn gateway(url: &str, credentials: Credentials) -> ExchangeGateway {
        let config = ExchangeConfig {
            rest_base_url: Some(url.to_string()),
            ..Default::default()
        };
        ExchangeGateway::new(&config, credentials).unwrap()
    }

    #[tokio::test]
    async fn test_signed_request_carries_key_and_signature() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/fapi/v2/balance")
            .match_header(API_KEY_HEADER, "test-key")
            .match_query(Matcher::AllOf(vec![
                Matcher::Regex("timestamp=\\d+".to_string()),
                Matcher::UrlEncoded("recvWindow".to_string(), "5000".to_string()),
                Matcher::Regex("signature=[0-9a-f]{64}$".to_string()),
            ]))
            .with_body(
                r#"[{"asset":"BNB","balance":"1.0","availableBalance":"1.0"},
                    {"asset":"USDT","balance":"1000.0","availableBalance":"800.0"}]"#,
            )
            .expect(1)
            .create_async()
            .await;

        let gw = gateway(&server.url(), Credentials::new("test-key", "secret"));
        let balance = gw.usdt_balance().await.unwrap();

        assert_eq!(balance.total, 1000.0);
        assert_eq!(balance.available, 800.0);
        assert_eq!(balance.used, 200.0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_signature_covers_params_in_order() {
        let mut server = mockito::Server::new_async().await;
        let gw = gateway(&server.url(), Credentials::new("k", "secret"));
        let mock = server
            .mock("POST", "/fapi/v1/leverage")
            .match_query(Matcher::Regex(
                "^symbol=BTCUSDT&leverage=10&timestamp=\\d+&recvWindow=5000&signature=[0-9a-f]{64}$"
                    .to_string(),
            ))
            .with_body(r#"{"leverage":10,"symbol":"BTCUSDT"}"#)
            .expect(1)
            .create_async()
            .await;

        assert_ok!(gw.change_leverage("BTCUSDT", 10).await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_secret_is_auth_error_without_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/fapi/v2/account")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let gw = gateway(&server.url(), Credentials::default());
        let err = gw.account().await.unwrap_err();
        assert!(matches!(err, GatewayError::Auth(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_public_call_needs_no_credentials() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/fapi/v1/ticker/price")
            .match_query(Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()))
            .with_body(r#"{"symbol":"BTCUSDT","price":"43250.10","time":1}"#)
            .create_async()
            .await;

        let gw = gateway(&server.url(), Credentials::default());
        let ticker = gw.ticker_price("BTCUSDT").await.unwrap();
        assert_eq!(ticker.price, 43250.10);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_exchange_error_mapping() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code":-2019,"msg":"Margin is insufficient."}"#)
            .create_async()
            .await;

        let gw = gateway(&server.url(), Credentials::new("k", "s"));
        let order = OrderRequest::market("BTCUSDT", crate::models::OrderSide::Buy, 1.0);
        let err = gw.new_order(&order).await.unwrap_err();

        assert_eq!(
            err,
            GatewayError::Exchange {
                http_status: 400,
                code: -2019,
                message: "Margin is insufficient.".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_invalid_key_maps_to_auth() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fapi/v2/positionRisk")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"code":-2015,"msg":"Invalid API-key, IP, or permissions for action."}"#)
            .create_async()
            .await;

        let gw = gateway(&server.url(), Credentials::new("bad", "bad"));
        let err = gw.open_positions().await.unwrap_err();
        assert!(matches!(err, GatewayError::Auth(_)));
    }

    #[tokio::test]
    async fn test_unparsable_error_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fapi/v1/ping")
            .with_status(502)
            .with_body("Bad Gateway")
            .create_async()
            .await;

        let gw = gateway(&server.url(), Credentials::default());
        let err = gw.ping().await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::Exchange {
                http_status: 502,
                code: 0,
                message: "Bad Gateway".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_rate_limit_fails_fast() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/fapi/v1/ping")
            .with_body("{}")
            .expect(2)
            .create_async()
            .await;

        let config = ExchangeConfig {
            rest_base_url: Some(server.url()),
            requests_per_minute: 2,
            ..Default::default()
        };
        let gw = ExchangeGateway::new(&config, Credentials::default()).unwrap();

        assert_ok!(gw.ping().await);
        assert_ok!(gw.ping().await);
        let err = gw.ping().await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::RateLimit {
                limit: 2,
                window_secs: 60
            }
        );
        // The rejected call never reached the server
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_klines_parse_into_candles() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fapi/v1/klines")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
                Matcher::UrlEncoded("interval".into(), "5m".into()),
                Matcher::UrlEncoded("limit".into(), "2".into()),
            ]))
            .with_body(
                r#"[
                [1700000000000,"100.0","101.0","99.0","100.5","12.5",1700000299999,"1250.0",42,"6.0","600.0","0"],
                [1700000300000,"100.5","102.0","100.0","101.5","8.0",1700000599999,"810.0",30,"4.0","400.0","0"]
            ]"#,
            )
            .create_async()
            .await;

        let gw = gateway(&server.url(), Credentials::default());
        let candles = gw.klines("BTCUSDT", "5m", 2).await.unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, 100.5);
        assert_eq!(candles[1].volume, 8.0);
        assert_eq!(candles[1].timestamp.timestamp_millis(), 1700000300000);
    }

    #[tokio::test]
    async fn test_malformed_kline_fails_instead_of_leaving_gap() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fapi/v1/klines")
            .match_query(Matcher::Any)
            .with_body(
                r#"[
                [1700000000000,"100.0","101.0","99.0","100.5","12.5",1700000299999,"1250.0",42,"6.0","600.0","0"],
                [1700000300000,"100.5","102.0","100.0","n/a","8.0",1700000599999,"810.0",30,"4.0","400.0","0"],
                [1700000600000,"101.5","102.5","101.0","102.0","9.0",1700000899999,"900.0",31,"4.0","400.0","0"]
            ]"#,
            )
            .create_async()
            .await;

        let gw = gateway(&server.url(), Credentials::default());
        let err = assert_err!(gw.klines("BTCUSDT", "5m", 3).await);
        match err {
            GatewayError::Decode(message) => assert!(message.contains("close")),
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_positions_filters_flat() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fapi/v2/positionRisk")
            .match_query(Matcher::Any)
            .with_body(
                r#"[
                {"symbol":"BTCUSDT","positionAmt":"0.010","entryPrice":"43000","markPrice":"43100","unRealizedProfit":"1.0","leverage":"10"},
                {"symbol":"ETHUSDT","positionAmt":"0.000","entryPrice":"0.0","markPrice":"2300","unRealizedProfit":"0.0","leverage":"10"}
            ]"#,
            )
            .create_async()
            .await;

        let gw = gateway(&server.url(), Credentials::new("k", "s"));
        let positions = gw.open_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, "BTCUSDT");
    }

    #[tokio::test]
    async fn test_sync_time_sets_offset() {
        let mut server = mockito::Server::new_async().await;
        let ahead = Utc::now().timestamp_millis() + 60_000;
        server
            .mock("GET", "/fapi/v1/time")
            .with_body(format!(r#"{{"serverTime":{}}}"#, ahead))
            .create_async()
            .await;

        let gw = gateway(&server.url(), Credentials::default());
        let offset = gw.sync_time().await.unwrap();
        assert!(offset > 55_000 && offset <= 60_000);
        assert!(gw.timestamp_ms() - Utc::now().timestamp_millis() > 55_000);
    }

    #[tokio::test]
    async fn test_user_stream_requires_api_key() {
        let gw = gateway("http://127.0.0.1:1", Credentials::default());
        assert_err!(gw.start_user_stream().await);
    }

    #[tokio::test]
    async fn test_transport_failure_is_network_error() {
        // Nothing listens on port 1
        let gw = gateway("http://127.0.0.1:1", Credentials::default());
        let err = gw.ping().await.unwrap_err();
        assert!(matches!(err, GatewayError::Network(_)));
    }

    #[test]
    fn test_parse_error_body() {
        assert!(matches!(
            parse_error_body(400, r#"{"code":-1022,"msg":"Signature invalid"}"#),
            GatewayError::Auth(_)
        ));
        assert_eq!(
            parse_error_body(400, r#"{"code":-4046,"msg":"No need to change margin type."}"#)
                .exchange_code(),
            Some(NO_MARGIN_CHANGE_CODE)
        );
    }
}

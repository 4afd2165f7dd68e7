// Market stream manager
//
// One physical websocket per channel key, a read loop task per subscription,
// bounded exponential reconnects, broadcast fan-out to handles and the event bus.

use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::error::StreamError;
use super::events::{ConnectionState, StreamEvent, StreamMessage};
use super::reconnect::ReconnectPolicy;
use crate::config::StreamConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Receivers onto one live subscription
pub struct StreamHandle {
    pub channel_key: String,
    pub messages: broadcast::Receiver<StreamMessage>,
    pub state: watch::Receiver<ConnectionState>,
}

/// Aggregate connection counts for health checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionCounts {
    pub total: usize,
    pub open: usize,
    pub connecting: usize,
    pub reconnecting: usize,
}

/// Registry entry for one channel key
struct Subscription {
    id: u64,
    messages: broadcast::Sender<StreamMessage>,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: watch::Sender<bool>,
    reconnect_attempt: Arc<AtomicU32>,
    last_heartbeat_ms: Arc<AtomicI64>,
    task: JoinHandle<()>,
}

struct Inner {
    ws_base_url: String,
    config: StreamConfig,
    policy: ReconnectPolicy,
    subscriptions: Mutex<HashMap<String, Subscription>>,
    events: broadcast::Sender<StreamEvent>,
    connect_gate: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
}

/// Keeps named market-data subscriptions alive.
///
/// Cloneable; clones share the registry and event bus.
#[derive(Clone)]
pub struct MarketStreamManager {
    inner: Arc<Inner>,
}

/// Why a connected read loop returned
enum LoopExit {
    Shutdown,
    Failed(StreamError),
}

impl MarketStreamManager {
    pub fn new(ws_base_url: impl Into<String>, config: StreamConfig) -> Self {
        let (events, _) = broadcast::channel(config.channel_capacity.max(1));
        let policy = ReconnectPolicy::new(config.reconnect_base_delay(), config.max_reconnect_attempts);

        Self {
            inner: Arc::new(Inner {
                ws_base_url: ws_base_url.into().trim_end_matches('/').to_string(),
                config,
                policy,
                subscriptions: Mutex::new(HashMap::new()),
                events,
                connect_gate: tokio::sync::Mutex::new(()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe to every stream event across all channels
    pub fn subscribe_events(&self) -> broadcast::Receiver<StreamEvent> {
        self.inner.events.subscribe()
    }

    /// Open (or join) the subscription for `channel_key`.
    ///
    /// Returns immediately; watch `handle.state` for `Open`. A second call for a
    /// live key returns fresh receivers onto the same connection.
    pub fn connect(&self, channel_key: &str) -> Result<StreamHandle, StreamError> {
        validate_channel_key(channel_key)?;

        let mut subscriptions = self.lock_subscriptions();
        if let Some(existing) = subscriptions.get(channel_key) {
            tracing::debug!(channel = channel_key, "Reusing existing stream subscription");
            return Ok(StreamHandle {
                channel_key: channel_key.to_string(),
                messages: existing.messages.subscribe(),
                state: existing.state.subscribe(),
            });
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (messages, messages_rx) = broadcast::channel(self.inner.config.channel_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let state = Arc::new(state_tx);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let reconnect_attempt = Arc::new(AtomicU32::new(0));
        let last_heartbeat_ms = Arc::new(AtomicI64::new(0));

        let worker = Worker {
            id,
            channel_key: channel_key.to_string(),
            inner: Arc::clone(&self.inner),
            messages: messages.clone(),
            state: Arc::clone(&state),
            shutdown: shutdown_rx,
            reconnect_attempt: Arc::clone(&reconnect_attempt),
            last_heartbeat_ms: Arc::clone(&last_heartbeat_ms),
        };
        let task = tokio::spawn(worker.run());

        subscriptions.insert(
            channel_key.to_string(),
            Subscription {
                id,
                messages,
                state,
                shutdown,
                reconnect_attempt,
                last_heartbeat_ms,
                task,
            },
        );
        tracing::info!("📡 Subscribing to {}", channel_key);

        Ok(StreamHandle {
            channel_key: channel_key.to_string(),
            messages: messages_rx,
            state: state_rx,
        })
    }

    /// Close one subscription with a normal close code. No reconnect follows.
    /// Returns false if the key was not subscribed.
    pub async fn disconnect(&self, channel_key: &str) -> bool {
        let removed = self.lock_subscriptions().remove(channel_key);
        let Some(subscription) = removed else {
            return false;
        };

        subscription.state.send_replace(ConnectionState::Closing);
        subscription.shutdown.send_replace(true);

        let mut task = subscription.task;
        if tokio::time::timeout(Duration::from_secs(5), &mut task).await.is_err() {
            tracing::warn!(channel = channel_key, "Stream task did not stop in time, aborting");
            task.abort();
        }
        subscription.state.send_replace(ConnectionState::Closed);
        tracing::info!("🔌 Disconnected from {}", channel_key);
        true
    }

    pub async fn disconnect_all(&self) {
        for key in self.channel_keys() {
            self.disconnect(&key).await;
        }
    }

    pub fn is_connected(&self, channel_key: &str) -> bool {
        self.state(channel_key)
            .map(|s| s.is_open())
            .unwrap_or(false)
    }

    pub fn state(&self, channel_key: &str) -> Option<ConnectionState> {
        self.lock_subscriptions()
            .get(channel_key)
            .map(|s| s.state.borrow().clone())
    }

    /// Consecutive failed attempts on a subscription (0 while healthy)
    pub fn reconnect_attempt(&self, channel_key: &str) -> Option<u32> {
        self.lock_subscriptions()
            .get(channel_key)
            .map(|s| s.reconnect_attempt.load(Ordering::Relaxed))
    }

    /// Epoch ms of the last ping sent or pong received, 0 if none yet
    pub fn last_heartbeat_ms(&self, channel_key: &str) -> Option<i64> {
        self.lock_subscriptions()
            .get(channel_key)
            .map(|s| s.last_heartbeat_ms.load(Ordering::Relaxed))
    }

    pub fn connection_counts(&self) -> ConnectionCounts {
        let subscriptions = self.lock_subscriptions();
        let mut counts = ConnectionCounts {
            total: subscriptions.len(),
            ..Default::default()
        };
        for subscription in subscriptions.values() {
            match &*subscription.state.borrow() {
                ConnectionState::Open => counts.open += 1,
                ConnectionState::Connecting => counts.connecting += 1,
                ConnectionState::Error(_) | ConnectionState::ReconnectScheduled { .. } => {
                    counts.reconnecting += 1
                }
                _ => {}
            }
        }
        counts
    }

    pub fn channel_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock_subscriptions().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock_subscriptions(&self) -> std::sync::MutexGuard<'_, HashMap<String, Subscription>> {
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

fn validate_channel_key(key: &str) -> Result<(), StreamError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StreamError::InvalidChannel(key.to_string()))
    }
}

/// Connection task for one subscription
struct Worker {
    id: u64,
    channel_key: String,
    inner: Arc<Inner>,
    messages: broadcast::Sender<StreamMessage>,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: watch::Receiver<bool>,
    reconnect_attempt: Arc<AtomicU32>,
    last_heartbeat_ms: Arc<AtomicI64>,
}

impl Worker {
    async fn run(mut self) {
        let url = format!("{}/ws/{}", self.inner.ws_base_url, self.channel_key);
        let mut failures: u32 = 0;

        loop {
            if self.is_shutdown() {
                break;
            }
            self.state.send_replace(ConnectionState::Connecting);

            let error = match self.open(&url).await {
                Ok(Some(ws)) => {
                    failures = 0;
                    self.reconnect_attempt.store(0, Ordering::Relaxed);
                    self.state.send_replace(ConnectionState::Open);
                    self.emit(StreamEvent::Connected {
                        channel_key: self.channel_key.clone(),
                    });
                    tracing::info!("✅ Stream open: {}", self.channel_key);

                    match self.read_loop(ws).await {
                        LoopExit::Shutdown => break,
                        LoopExit::Failed(err) => err,
                    }
                }
                Ok(None) => break,
                Err(err) => err,
            };

            failures += 1;
            self.reconnect_attempt.store(failures, Ordering::Relaxed);
            self.state
                .send_replace(ConnectionState::Error(error.to_string()));

            let Some(delay) = self.inner.policy.delay_for(failures) else {
                let reason = format!(
                    "gave up after {} reconnect attempts: {}",
                    self.inner.policy.max_attempts, error
                );
                tracing::error!("❌ Stream {} dropped: {}", self.channel_key, reason);
                self.state.send_replace(ConnectionState::Failed(reason.clone()));
                self.unregister();
                self.emit(StreamEvent::Disconnected {
                    channel_key: self.channel_key.clone(),
                    reason,
                });
                return;
            };

            tracing::warn!(
                "⚠️  Stream {} error ({}), reconnecting in {:?} (attempt {}/{})",
                self.channel_key,
                error,
                delay,
                failures,
                self.inner.policy.max_attempts
            );
            self.state.send_replace(ConnectionState::ReconnectScheduled {
                attempt: failures,
                delay,
            });
            self.emit(StreamEvent::ReconnectScheduled {
                channel_key: self.channel_key.clone(),
                attempt: failures,
                delay,
            });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for_shutdown(&mut self.shutdown) => break,
            }
        }

        self.state.send_replace(ConnectionState::Closed);
        self.emit(StreamEvent::Closed {
            channel_key: self.channel_key.clone(),
        });
    }

    /// Physical connect behind the global gate. `Ok(None)` means shutdown won.
    async fn open(&mut self, url: &str) -> Result<Option<WsStream>, StreamError> {
        let queue_delay = self.inner.config.connect_queue_delay();
        let connect_timeout = self.inner.config.heartbeat_interval().max(Duration::from_secs(1));

        loop {
            if let Ok(_gate) = self.inner.connect_gate.try_lock() {
                let attempt = tokio::time::timeout(connect_timeout, connect_async(url));
                return tokio::select! {
                    result = attempt => match result {
                        Ok(Ok((ws, _response))) => Ok(Some(ws)),
                        Ok(Err(e)) => Err(StreamError::Connection(e.to_string())),
                        Err(_) => Err(StreamError::Connection("connect timed out".to_string())),
                    },
                    _ = wait_for_shutdown(&mut self.shutdown) => Ok(None),
                };
            }

            // Another connect is in flight; queue behind it
            tracing::debug!(channel = %self.channel_key, "Connect queued behind in-flight attempt");
            tokio::select! {
                _ = tokio::time::sleep(queue_delay) => {}
                _ = wait_for_shutdown(&mut self.shutdown) => return Ok(None),
            }
        }
    }

    async fn read_loop(&mut self, ws: WsStream) -> LoopExit {
        let (mut write, mut read) = ws.split();
        let heartbeat = self.inner.config.heartbeat_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
        let mut last_inbound = Instant::now();

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut self.shutdown) => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    let _ = write.close().await;
                    return LoopExit::Shutdown;
                }
                _ = ticker.tick() => {
                    if last_inbound.elapsed() >= heartbeat * 2 {
                        return LoopExit::Failed(StreamError::Heartbeat(format!(
                            "no frames for {:?}",
                            last_inbound.elapsed()
                        )));
                    }
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        return LoopExit::Failed(StreamError::Heartbeat(e.to_string()));
                    }
                    self.stamp_heartbeat();
                }
                frame = read.next() => {
                    let message = match frame {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => return LoopExit::Failed(StreamError::Connection(e.to_string())),
                        None => return LoopExit::Failed(StreamError::Connection("stream ended".to_string())),
                    };
                    last_inbound = Instant::now();

                    match message {
                        Message::Text(text) => self.dispatch(&text),
                        Message::Binary(bytes) => {
                            if let Ok(text) = String::from_utf8(bytes) {
                                self.dispatch(&text);
                            }
                        }
                        Message::Ping(payload) => {
                            if let Err(e) = write.send(Message::Pong(payload)).await {
                                return LoopExit::Failed(StreamError::Connection(e.to_string()));
                            }
                        }
                        Message::Pong(_) => self.stamp_heartbeat(),
                        Message::Close(frame) => {
                            let detail = frame
                                .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                                .unwrap_or_else(|| "no close frame".to_string());
                            return LoopExit::Failed(StreamError::Connection(format!(
                                "closed by server: {}",
                                detail
                            )));
                        }
                        Message::Frame(_) => {}
                    }
                }
            }
        }
    }

    fn dispatch(&self, text: &str) {
        let message = StreamMessage::parse(&self.channel_key, text);
        let _ = self.messages.send(message.clone());
        self.emit(StreamEvent::Message(message));
    }

    fn emit(&self, event: StreamEvent) {
        let _ = self.inner.events.send(event);
    }

    fn stamp_heartbeat(&self) {
        self.last_heartbeat_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Drop our own registry entry, unless it was already replaced
    fn unregister(&self) {
        let mut subscriptions = self
            .inner
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if subscriptions.get(&self.channel_key).map(|s| s.id) == Some(self.id) {
            subscriptions.remove(&self.channel_key);
        }
    }
}

/// Resolves once shutdown is requested or the sender is gone
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

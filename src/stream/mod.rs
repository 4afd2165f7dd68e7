// Market data streaming: resilient websocket subscriptions with typed fan-out
pub mod error;
pub mod events;
pub mod manager;
pub mod reconnect;

pub use error::StreamError;
pub use events::{channel, ChannelKind, ConnectionState, KlineEvent, StreamEvent, StreamMessage};
pub use manager::{ConnectionCounts, MarketStreamManager, StreamHandle};
pub use reconnect::ReconnectPolicy;

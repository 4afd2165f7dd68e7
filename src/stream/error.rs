use thiserror::Error;

/// Transport failures inside the stream manager.
///
/// Connection and heartbeat errors are turned into scheduled reconnects;
/// only `InvalidChannel` reaches callers of `connect`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("heartbeat failed: {0}")]
    Heartbeat(String),

    #[error("invalid channel key: {0:?}")]
    InvalidChannel(String),
}

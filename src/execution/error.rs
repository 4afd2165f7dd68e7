use crate::api::GatewayError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("trading is not running")]
    NotRunning,

    #[error("risk limit: {0}")]
    RiskLimit(String),

    #[error("invalid position size: {0}")]
    InvalidSize(String),

    #[error("no open position for {0}")]
    NoPosition(String),

    #[error("invalid trading config: {0}")]
    InvalidConfig(String),

    #[error("bracket orders failed: {0}")]
    BracketFailed(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

pub mod binance;
pub mod error;
pub mod rate_window;
pub mod signing;
pub mod types;

pub use binance::{ExchangeGateway, NO_MARGIN_CHANGE_CODE};
pub use error::GatewayError;
pub use rate_window::RateWindow;
pub use types::{
    AccountBalance, BalanceEntry, OrderRequest, OrderResponse, OrderType, PositionRisk,
    SymbolRules, TickerPrice,
};

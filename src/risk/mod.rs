// Risk management module
pub mod limits;
pub mod sizing;

pub use limits::{EntryCheck, EquityTracker, RiskLimits, RiskRejection};
pub use sizing::{position_size, raw_position_size, SizingError};

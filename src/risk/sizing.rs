use crate::api::SymbolRules;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SizingError {
    #[error("invalid sizing input: {0}")]
    InvalidInput(String),

    #[error("size rounds to zero (raw {raw})")]
    Zero { raw: f64 },

    #[error("size {size} below minimum quantity {min_qty}")]
    BelowMinQty { size: f64, min_qty: f64 },

    #[error("notional {notional} below exchange minimum {min_notional}")]
    BelowMinNotional { notional: f64, min_notional: f64 },
}

/// Units such that hitting the stop loses `risk_percent` of the balance.
/// Leverage plays no part here; it only changes the margin consumed.
pub fn raw_position_size(
    available_balance: f64,
    risk_percent: f64,
    stop_loss_percent: f64,
    price: f64,
) -> Result<f64, SizingError> {
    if !(available_balance.is_finite() && available_balance >= 0.0) {
        return Err(SizingError::InvalidInput(format!(
            "available balance {}",
            available_balance
        )));
    }
    if !(price.is_finite() && price > 0.0) {
        return Err(SizingError::InvalidInput(format!("price {}", price)));
    }
    if stop_loss_percent <= 0.0 {
        return Err(SizingError::InvalidInput(format!(
            "stop loss percent {}",
            stop_loss_percent
        )));
    }

    let risk_amount = available_balance * risk_percent / 100.0;
    let risk_per_unit = price * stop_loss_percent / 100.0;
    Ok(risk_amount / risk_per_unit)
}

/// Raw size floored to the lot step and checked against the symbol's minimums
pub fn position_size(
    available_balance: f64,
    risk_percent: f64,
    stop_loss_percent: f64,
    price: f64,
    rules: &SymbolRules,
) -> Result<f64, SizingError> {
    let raw = raw_position_size(available_balance, risk_percent, stop_loss_percent, price)?;
    let size = rules.floor_quantity(raw);

    if size <= 0.0 {
        return Err(SizingError::Zero { raw });
    }
    if size < rules.min_qty {
        return Err(SizingError::BelowMinQty {
            size,
            min_qty: rules.min_qty,
        });
    }
    let notional = size * price;
    if notional < rules.min_notional {
        return Err(SizingError::BelowMinNotional {
            notional,
            min_notional: rules.min_notional,
        });
    }

    Ok(size)
}

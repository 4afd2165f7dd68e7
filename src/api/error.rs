use thiserror::Error;

/// Errors surfaced by [`ExchangeGateway`](super::ExchangeGateway).
///
/// None of these are retried by the gateway; callers own the retry policy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("authentication error: {0}")]
    Auth(String),

    #[error("rate limit reached: {limit} requests per {window_secs}s")]
    RateLimit { limit: usize, window_secs: u64 },

    #[error("exchange error (HTTP {http_status}, code {code}): {message}")]
    Exchange {
        http_status: u16,
        code: i64,
        message: String,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to decode exchange response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Exchange error code, if this is an exchange rejection
    pub fn exchange_code(&self) -> Option<i64> {
        match self {
            GatewayError::Exchange { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else {
            GatewayError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GatewayError::Exchange {
            http_status: 400,
            code: -2019,
            message: "Margin is insufficient.".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "exchange error (HTTP 400, code -2019): Margin is insufficient."
        );
        assert_eq!(err.exchange_code(), Some(-2019));

        let err = GatewayError::RateLimit {
            limit: 1200,
            window_secs: 60,
        };
        assert!(err.to_string().contains("1200 requests per 60s"));
        assert_eq!(err.exchange_code(), None);
    }
}

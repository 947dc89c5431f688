//! Domain error taxonomy shared by the resolver, providers and ledger.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TradeError {
    /// Bad input shape or range. Never retried.
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Unknown currency '{code}'. Supported: {}", supported.join(", "))]
    CurrencyNotFound { code: String, supported: Vec<String> },

    #[error(
        "Insufficient funds: available {available:.4} {currency}, required {required:.4} {currency}"
    )]
    InsufficientFunds {
        available: f64,
        required: f64,
        currency: String,
    },

    /// A provider call failed after its retries were exhausted.
    #[error("API request failed: {reason}")]
    ApiRequest { reason: String },

    #[error("Rate {from}->{to} is unavailable, retry later")]
    RateUnavailable { from: String, to: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl TradeError {
    pub fn api(reason: impl Into<String>) -> Self {
        TradeError::ApiRequest {
            reason: reason.into(),
        }
    }

    pub fn rate_unavailable(from: &str, to: &str) -> Self {
        TradeError::RateUnavailable {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        TradeError::Storage(err.to_string())
    }
}

pub type TradeResult<T> = Result<T, TradeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_funds_message() {
        let err = TradeError::InsufficientFunds {
            available: 10.0,
            required: 12.5,
            currency: "USD".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds: available 10.0000 USD, required 12.5000 USD"
        );
    }

    #[test]
    fn test_currency_not_found_lists_supported_codes() {
        let err = TradeError::CurrencyNotFound {
            code: "ABC".to_string(),
            supported: vec!["BTC".to_string(), "USD".to_string()],
        };
        assert_eq!(err.to_string(), "Unknown currency 'ABC'. Supported: BTC, USD");
    }
}

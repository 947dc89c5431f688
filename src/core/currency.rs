//! Currency registry and conversion abstractions

use crate::core::error::{TradeError, TradeResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Display;

#[async_trait]
pub trait CurrencyRateProvider: Send + Sync {
    /// Rate converting one unit of `from` into `to`.
    async fn get_rate(&self, from: &str, to: &str) -> TradeResult<f64>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum CurrencyKind {
    Fiat {
        issuing_country: String,
    },
    Crypto {
        algorithm: String,
        market_cap: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Currency {
    pub code: String,
    pub name: String,
    pub kind: CurrencyKind,
}

impl Currency {
    pub fn is_crypto(&self) -> bool {
        matches!(self.kind, CurrencyKind::Crypto { .. })
    }

    /// Returns a one-line description for tables and logs.
    pub fn display_info(&self) -> String {
        match &self.kind {
            CurrencyKind::Fiat { issuing_country } => format!(
                "[FIAT] {} — {} (Issuing: {})",
                self.code, self.name, issuing_country
            ),
            CurrencyKind::Crypto {
                algorithm,
                market_cap,
            } => match market_cap {
                Some(mcap) => format!(
                    "[CRYPTO] {} — {} (Algo: {}, MCAP: {:.2e})",
                    self.code, self.name, algorithm, mcap
                ),
                None => format!("[CRYPTO] {} — {} (Algo: {})", self.code, self.name, algorithm),
            },
        }
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_info())
    }
}

/// Trims and upper-cases a currency code, rejecting anything that is not
/// 2-5 ASCII letters.
pub fn normalize_code(code: &str) -> TradeResult<String> {
    let code = code.trim().to_uppercase();
    if !(2..=5).contains(&code.len()) || !code.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(TradeError::Validation(format!(
            "Currency code must be 2-5 letters, got '{code}'"
        )));
    }
    Ok(code)
}

/// Read-only set of currencies known to the application.
#[derive(Debug, Clone)]
pub struct CurrencyRegistry {
    currencies: BTreeMap<String, Currency>,
}

impl CurrencyRegistry {
    pub fn new(currencies: impl IntoIterator<Item = Currency>) -> Self {
        Self {
            currencies: currencies
                .into_iter()
                .map(|c| (c.code.clone(), c))
                .collect(),
        }
    }

    pub fn get(&self, code: &str) -> TradeResult<&Currency> {
        let normalized = code.trim().to_uppercase();
        self.currencies
            .get(&normalized)
            .ok_or_else(|| TradeError::CurrencyNotFound {
                code: normalized,
                supported: self.supported_codes(),
            })
    }

    pub fn contains(&self, code: &str) -> bool {
        self.currencies.contains_key(&code.trim().to_uppercase())
    }

    /// Sorted list of registered codes.
    pub fn supported_codes(&self) -> Vec<String> {
        self.currencies.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Currency> {
        self.currencies.values()
    }
}

impl Default for CurrencyRegistry {
    fn default() -> Self {
        let fiat = |code: &str, name: &str, issuing_country: &str| Currency {
            code: code.to_string(),
            name: name.to_string(),
            kind: CurrencyKind::Fiat {
                issuing_country: issuing_country.to_string(),
            },
        };
        let crypto = |code: &str, name: &str, algorithm: &str, market_cap: f64| Currency {
            code: code.to_string(),
            name: name.to_string(),
            kind: CurrencyKind::Crypto {
                algorithm: algorithm.to_string(),
                market_cap: Some(market_cap),
            },
        };

        Self::new([
            fiat("USD", "US Dollar", "United States"),
            fiat("EUR", "Euro", "Eurozone"),
            fiat("RUB", "Russian Ruble", "Russian Federation"),
            fiat("GBP", "British Pound", "United Kingdom"),
            fiat("JPY", "Japanese Yen", "Japan"),
            fiat("CNY", "Chinese Yuan", "China"),
            crypto("BTC", "Bitcoin", "SHA-256", 1.12e12),
            crypto("ETH", "Ethereum", "Ethash", 4.5e11),
            crypto("SOL", "Solana", "Proof of History", 7.8e10),
            crypto("USDT", "Tether", "Omni Layer", 8.3e10),
            crypto("BNB", "Binance Coin", "BFT", 7.2e10),
            crypto("XRP", "Ripple", "RPCA", 2.8e10),
        ])
    }
}

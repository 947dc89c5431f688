//! Values a portfolio in a single target currency.
use crate::core::currency::CurrencyRateProvider;
use crate::core::portfolio::Portfolio;
use futures::future::join_all;
use tracing::debug;

/// The converted value of one wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletValue {
    pub currency: String,
    pub balance: f64,
    pub rate: Option<f64>,
    pub value: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioValue {
    pub user_id: u64,
    pub target_currency: String,
    pub wallets: Vec<WalletValue>,
    /// Present only when every wallet could be converted.
    pub total: Option<f64>,
}

/// Converts every wallet of `portfolio` into `target_currency`.
///
/// A wallet whose rate cannot be resolved carries the error instead of a
/// value, and the total is left empty.
pub async fn calculate_portfolio_value(
    portfolio: &Portfolio,
    currency_provider: &dyn CurrencyRateProvider,
    target_currency: &str,
) -> PortfolioValue {
    let target_currency = target_currency.trim().to_uppercase();

    let conversions = portfolio.wallets().map(|wallet| {
        let target = target_currency.as_str();
        async move {
            let currency = wallet.currency_code().to_string();
            let balance = wallet.balance();
            match currency_provider.get_rate(&currency, target).await {
                Ok(rate) => {
                    debug!(
                        "Converted {balance} {currency} to {target} at rate {rate}",
                    );
                    WalletValue {
                        currency,
                        balance,
                        rate: Some(rate),
                        value: Some(balance * rate),
                        error: None,
                    }
                }
                Err(e) => {
                    debug!("Currency conversion error for {}: {}", currency, e);
                    WalletValue {
                        currency,
                        balance,
                        rate: None,
                        value: None,
                        error: Some(e.to_string()),
                    }
                }
            }
        }
    });
    let wallets: Vec<WalletValue> = join_all(conversions).await;

    let total = wallets
        .iter()
        .map(|w| w.value)
        .sum::<Option<f64>>();

    PortfolioValue {
        user_id: portfolio.user_id,
        target_currency,
        wallets,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{TradeError, TradeResult};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct MockCurrencyProvider {
        rates: HashMap<String, f64>,
    }

    impl MockCurrencyProvider {
        fn new(rates: &[(&str, &str, f64)]) -> Self {
            MockCurrencyProvider {
                rates: rates
                    .iter()
                    .map(|(from, to, rate)| (format!("{from}:{to}"), *rate))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl CurrencyRateProvider for MockCurrencyProvider {
        async fn get_rate(&self, from: &str, to: &str) -> TradeResult<f64> {
            if from == to {
                return Ok(1.0);
            }
            self.rates
                .get(&format!("{from}:{to}"))
                .cloned()
                .ok_or_else(|| TradeError::rate_unavailable(from, to))
        }
    }

    fn portfolio(balances: &[(&str, f64)]) -> Portfolio {
        let mut portfolio = Portfolio::new(1);
        for (code, amount) in balances {
            portfolio.wallet_mut(code).deposit(*amount).unwrap();
        }
        portfolio
    }

    #[tokio::test]
    async fn test_all_wallets_converted() {
        let provider = MockCurrencyProvider::new(&[("BTC", "USD", 50000.0), ("EUR", "USD", 1.1)]);
        let value = calculate_portfolio_value(
            &portfolio(&[("USD", 100.0), ("BTC", 0.01), ("EUR", 10.0)]),
            &provider,
            "usd",
        )
        .await;

        assert_eq!(value.target_currency, "USD");
        assert_eq!(value.wallets.len(), 3);
        assert!((value.total.unwrap() - (100.0 + 500.0 + 11.0)).abs() < 1e-9);
        assert!(value.wallets.iter().all(|w| w.error.is_none()));
    }

    #[tokio::test]
    async fn test_missing_rate_drops_total() {
        let provider = MockCurrencyProvider::new(&[("BTC", "USD", 50000.0)]);
        let value = calculate_portfolio_value(
            &portfolio(&[("BTC", 1.0), ("JPY", 1000.0)]),
            &provider,
            "USD",
        )
        .await;

        assert!(value.total.is_none());
        let jpy = value.wallets.iter().find(|w| w.currency == "JPY").unwrap();
        assert!(jpy.value.is_none());
        assert!(jpy.error.as_ref().unwrap().contains("JPY->USD"));
        let btc = value.wallets.iter().find(|w| w.currency == "BTC").unwrap();
        assert_eq!(btc.value, Some(50000.0));
    }

    #[tokio::test]
    async fn test_empty_portfolio_totals_zero() {
        let provider = MockCurrencyProvider::new(&[]);
        let value = calculate_portfolio_value(&Portfolio::new(9), &provider, "USD").await;
        assert_eq!(value.total, Some(0.0));
        assert!(value.wallets.is_empty());
    }
}

//! Wallets and per-user portfolios.
//!
//! A `Wallet` never holds a negative or non-finite balance: every mutation
//! goes through `deposit`/`withdraw`, and deserialized records are validated
//! the same way.

use crate::core::error::{TradeError, TradeResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalletRecord {
    currency_code: String,
    balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WalletRecord", into = "WalletRecord")]
pub struct Wallet {
    currency_code: String,
    balance: f64,
}

impl TryFrom<WalletRecord> for Wallet {
    type Error = TradeError;

    fn try_from(record: WalletRecord) -> Result<Self, Self::Error> {
        Wallet::with_balance(&record.currency_code, record.balance)
    }
}

impl From<Wallet> for WalletRecord {
    fn from(wallet: Wallet) -> Self {
        WalletRecord {
            currency_code: wallet.currency_code,
            balance: wallet.balance,
        }
    }
}

impl Wallet {
    pub fn new(currency_code: &str) -> Self {
        Self {
            currency_code: currency_code.trim().to_uppercase(),
            balance: 0.0,
        }
    }

    pub fn with_balance(currency_code: &str, balance: f64) -> TradeResult<Self> {
        if !balance.is_finite() || balance < 0.0 {
            return Err(TradeError::Validation(format!(
                "Balance of {currency_code} wallet must be a non-negative number, got {balance}"
            )));
        }
        Ok(Self {
            currency_code: currency_code.trim().to_uppercase(),
            balance,
        })
    }

    pub fn currency_code(&self) -> &str {
        &self.currency_code
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn deposit(&mut self, amount: f64) -> TradeResult<()> {
        validate_amount(amount)?;
        let balance = self.balance + amount;
        if !balance.is_finite() {
            return Err(TradeError::Validation(format!(
                "Deposit of {amount} overflows the {} wallet",
                self.currency_code
            )));
        }
        self.balance = balance;
        Ok(())
    }

    pub fn withdraw(&mut self, amount: f64) -> TradeResult<()> {
        validate_amount(amount)?;
        if amount > self.balance {
            return Err(TradeError::InsufficientFunds {
                available: self.balance,
                required: amount,
                currency: self.currency_code.clone(),
            });
        }
        self.balance = (self.balance - amount).max(0.0);
        Ok(())
    }
}

/// Rejects zero, negative, NaN and infinite amounts.
pub fn validate_amount(amount: f64) -> TradeResult<()> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(TradeError::Validation(format!(
            "Amount must be a positive number, got {amount}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub user_id: u64,
    #[serde(default)]
    wallets: BTreeMap<String, Wallet>,
}

impl Portfolio {
    pub fn new(user_id: u64) -> Self {
        Self {
            user_id,
            wallets: BTreeMap::new(),
        }
    }

    pub fn wallet(&self, currency_code: &str) -> Option<&Wallet> {
        self.wallets.get(&currency_code.trim().to_uppercase())
    }

    /// Returns the wallet for `currency_code`, creating an empty one first.
    pub fn wallet_mut(&mut self, currency_code: &str) -> &mut Wallet {
        let code = currency_code.trim().to_uppercase();
        self.wallets
            .entry(code.clone())
            .or_insert_with(|| Wallet::new(&code))
    }

    pub fn balance(&self, currency_code: &str) -> f64 {
        self.wallet(currency_code).map_or(0.0, Wallet::balance)
    }

    pub fn wallets(&self) -> impl Iterator<Item = &Wallet> {
        self.wallets.values()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deposit_and_withdraw() {
        let mut wallet = Wallet::new("usd");
        assert_eq!(wallet.currency_code(), "USD");
        wallet.deposit(100.0).unwrap();
        wallet.withdraw(40.0).unwrap();
        assert_eq!(wallet.balance(), 60.0);
    }

    #[test]
    fn test_withdraw_more_than_balance_leaves_balance_unchanged() {
        let mut wallet = Wallet::with_balance("BTC", 0.5).unwrap();
        let err = wallet.withdraw(0.6).unwrap_err();
        assert!(matches!(err, TradeError::InsufficientFunds { .. }));
        assert_eq!(wallet.balance(), 0.5);
    }

    #[test]
    fn test_rejects_non_positive_and_non_finite_amounts() {
        let mut wallet = Wallet::with_balance("EUR", 10.0).unwrap();
        for amount in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(wallet.deposit(amount).is_err(), "deposit {amount}");
            assert!(wallet.withdraw(amount).is_err(), "withdraw {amount}");
        }
        assert_eq!(wallet.balance(), 10.0);
    }

    #[test]
    fn test_balance_never_negative_over_sequence() {
        let mut wallet = Wallet::new("ETH");
        let ops: [(bool, f64); 8] = [
            (true, 1.0),
            (false, 0.3),
            (false, 0.7),
            (false, 0.1),
            (true, 0.2),
            (false, 0.2),
            (false, 1e-12),
            (true, 5.0),
        ];
        for (is_deposit, amount) in ops {
            let _ = if is_deposit {
                wallet.deposit(amount)
            } else {
                wallet.withdraw(amount)
            };
            assert!(wallet.balance() >= 0.0);
            assert!(wallet.balance().is_finite());
        }
    }

    #[test]
    fn test_negative_balance_record_is_rejected() {
        let json = r#"{"currency_code": "USD", "balance": -5.0}"#;
        assert!(serde_json::from_str::<Wallet>(json).is_err());
    }

    #[test]
    fn test_portfolio_json_shape() {
        let mut portfolio = Portfolio::new(7);
        portfolio.wallet_mut("USD").deposit(1000.0).unwrap();

        let value = serde_json::to_value(&portfolio).unwrap();
        assert_eq!(value["user_id"], 7);
        assert_eq!(value["wallets"]["USD"]["currency_code"], "USD");
        assert_eq!(value["wallets"]["USD"]["balance"], 1000.0);

        let restored: Portfolio = serde_json::from_value(value).unwrap();
        assert_eq!(restored, portfolio);
    }

    #[test]
    fn test_missing_wallet_has_zero_balance() {
        let portfolio = Portfolio::new(1);
        assert!(portfolio.wallet("EUR").is_none());
        assert_eq!(portfolio.balance("EUR"), 0.0);
        assert!(portfolio.is_empty());
    }
}

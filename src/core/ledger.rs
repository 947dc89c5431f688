//! Buy/sell/deposit transactions over a user's portfolio.
//!
//! Each operation validates, resolves the rate and checks funds before
//! touching anything. Mutations are applied to a copy of the portfolio, and
//! the stored record is replaced only if the save succeeds, so a failed call
//! leaves no partial change behind.

use crate::core::currency::{CurrencyRateProvider, CurrencyRegistry};
use crate::core::error::{TradeError, TradeResult};
use crate::core::log::AUDIT_TARGET;
use crate::core::portfolio::{Portfolio, validate_amount};
use crate::store::PortfolioRepository;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// The user a ledger call acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub user_id: u64,
}

impl Session {
    pub fn new(user_id: u64) -> Self {
        Self { user_id }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeAction {
    Buy,
    Sell,
    Deposit,
}

impl Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeAction::Buy => write!(f, "BUY"),
            TradeAction::Sell => write!(f, "SELL"),
            TradeAction::Deposit => write!(f, "DEPOSIT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionResult {
    pub action: TradeAction,
    pub currency: String,
    pub amount: f64,
    /// Units of base currency per unit of `currency`.
    pub rate: f64,
    pub base_currency: String,
    /// Cost of a buy, proceeds of a sell.
    pub base_amount: f64,
    pub currency_before: f64,
    pub currency_after: f64,
    pub base_before: f64,
    pub base_after: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepositResult {
    pub currency: String,
    pub amount: f64,
    pub balance_before: f64,
    pub balance_after: f64,
}

pub struct Ledger {
    registry: Arc<CurrencyRegistry>,
    rates: Arc<dyn CurrencyRateProvider>,
    portfolios: PortfolioRepository,
    base_currency: String,
    user_locks: Mutex<HashMap<u64, Arc<Mutex<()>>>>,
}

impl Ledger {
    pub fn new(
        registry: Arc<CurrencyRegistry>,
        rates: Arc<dyn CurrencyRateProvider>,
        portfolios: PortfolioRepository,
        base_currency: &str,
    ) -> Self {
        Self {
            registry,
            rates,
            portfolios,
            base_currency: base_currency.trim().to_uppercase(),
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_currency(&self) -> &str {
        &self.base_currency
    }

    /// Serializes every mutating call for one user.
    async fn lock_user(&self, user_id: u64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.user_locks.lock().await;
            Arc::clone(locks.entry(user_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Drops the user's lock entry once no call holds or awaits it. Clones
    /// are only taken under the map lock, so a count of one means unused.
    async fn release_user(&self, user_id: u64) {
        let mut locks = self.user_locks.lock().await;
        if locks
            .get(&user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&user_id);
        }
    }

    pub async fn portfolio(&self, session: &Session) -> TradeResult<Portfolio> {
        self.portfolios.load_or_create(session.user_id).await
    }

    pub async fn buy(
        &self,
        session: &Session,
        currency_code: &str,
        amount: f64,
    ) -> TradeResult<TransactionResult> {
        let result = self.execute_buy(session, currency_code, amount).await;
        self.release_user(session.user_id).await;
        audit(TradeAction::Buy, session, currency_code, amount, &result);
        result
    }

    pub async fn sell(
        &self,
        session: &Session,
        currency_code: &str,
        amount: f64,
    ) -> TradeResult<TransactionResult> {
        let result = self.execute_sell(session, currency_code, amount).await;
        self.release_user(session.user_id).await;
        audit(TradeAction::Sell, session, currency_code, amount, &result);
        result
    }

    /// Credits `amount` to the wallet for `currency_code`, creating it if needed.
    pub async fn deposit(
        &self,
        session: &Session,
        currency_code: &str,
        amount: f64,
    ) -> TradeResult<DepositResult> {
        let result = self.execute_deposit(session, currency_code, amount).await;
        self.release_user(session.user_id).await;
        match &result {
            Ok(r) => info!(
                target: AUDIT_TARGET,
                action = %TradeAction::Deposit,
                user_id = session.user_id,
                currency = %r.currency,
                amount = r.amount,
                before = r.balance_before,
                after = r.balance_after,
                result = "OK",
                "Deposit completed"
            ),
            Err(e) => warn!(
                target: AUDIT_TARGET,
                action = %TradeAction::Deposit,
                user_id = session.user_id,
                currency = %currency_code,
                amount,
                result = "ERROR",
                error = %e,
                "Deposit failed"
            ),
        }
        result
    }

    /// Validates the amount and returns the registered, non-base code.
    fn tradable_code(&self, currency_code: &str, amount: f64) -> TradeResult<String> {
        validate_amount(amount)?;
        let code = self.registry.get(currency_code)?.code.clone();
        if code == self.base_currency {
            return Err(TradeError::Validation(format!(
                "Cannot trade the base currency {code} against itself"
            )));
        }
        Ok(code)
    }

    async fn execute_buy(
        &self,
        session: &Session,
        currency_code: &str,
        amount: f64,
    ) -> TradeResult<TransactionResult> {
        let code = self.tradable_code(currency_code, amount)?;
        let base = self.base_currency.clone();

        let _guard = self.lock_user(session.user_id).await;
        let portfolio = self.portfolios.load_or_create(session.user_id).await?;

        let rate = self.rates.get_rate(&code, &base).await?;
        let cost = amount * rate;
        if !cost.is_finite() || cost <= 0.0 {
            return Err(TradeError::Validation(format!(
                "Cost of {amount} {code} at rate {rate} is not a valid amount"
            )));
        }

        let base_before = portfolio.balance(&base);
        if base_before < cost {
            return Err(TradeError::InsufficientFunds {
                available: base_before,
                required: cost,
                currency: base,
            });
        }
        let currency_before = portfolio.balance(&code);

        let mut next = portfolio.clone();
        next.wallet_mut(&base).withdraw(cost)?;
        next.wallet_mut(&code).deposit(amount)?;
        self.portfolios.save(&next).await?;

        debug!("User {} bought {} {} for {} {}", session.user_id, amount, code, cost, base);
        Ok(TransactionResult {
            action: TradeAction::Buy,
            currency_after: next.balance(&code),
            base_after: next.balance(&base),
            currency: code,
            amount,
            rate,
            base_currency: base,
            base_amount: cost,
            currency_before,
            base_before,
        })
    }

    async fn execute_sell(
        &self,
        session: &Session,
        currency_code: &str,
        amount: f64,
    ) -> TradeResult<TransactionResult> {
        let code = self.tradable_code(currency_code, amount)?;
        let base = self.base_currency.clone();

        let _guard = self.lock_user(session.user_id).await;
        let portfolio = self.portfolios.load_or_create(session.user_id).await?;

        let currency_before = portfolio.balance(&code);
        if currency_before < amount {
            return Err(TradeError::InsufficientFunds {
                available: currency_before,
                required: amount,
                currency: code,
            });
        }

        let rate = self.rates.get_rate(&code, &base).await?;
        let proceeds = amount * rate;
        if !proceeds.is_finite() || proceeds <= 0.0 {
            return Err(TradeError::Validation(format!(
                "Proceeds of {amount} {code} at rate {rate} are not a valid amount"
            )));
        }
        let base_before = portfolio.balance(&base);

        let mut next = portfolio.clone();
        next.wallet_mut(&code).withdraw(amount)?;
        next.wallet_mut(&base).deposit(proceeds)?;
        self.portfolios.save(&next).await?;

        debug!("User {} sold {} {} for {} {}", session.user_id, amount, code, proceeds, base);
        Ok(TransactionResult {
            action: TradeAction::Sell,
            currency_after: next.balance(&code),
            base_after: next.balance(&base),
            currency: code,
            amount,
            rate,
            base_currency: base,
            base_amount: proceeds,
            currency_before,
            base_before,
        })
    }

    async fn execute_deposit(
        &self,
        session: &Session,
        currency_code: &str,
        amount: f64,
    ) -> TradeResult<DepositResult> {
        validate_amount(amount)?;
        let code = self.registry.get(currency_code)?.code.clone();

        let _guard = self.lock_user(session.user_id).await;
        let portfolio = self.portfolios.load_or_create(session.user_id).await?;
        let balance_before = portfolio.balance(&code);

        let mut next = portfolio.clone();
        next.wallet_mut(&code).deposit(amount)?;
        self.portfolios.save(&next).await?;

        Ok(DepositResult {
            balance_after: next.balance(&code),
            currency: code,
            amount,
            balance_before,
        })
    }
}

fn audit(
    action: TradeAction,
    session: &Session,
    currency_code: &str,
    amount: f64,
    result: &TradeResult<TransactionResult>,
) {
    match result {
        Ok(r) => info!(
            target: AUDIT_TARGET,
            action = %action,
            user_id = session.user_id,
            currency = %r.currency,
            amount = r.amount,
            rate = r.rate,
            base = %r.base_currency,
            base_amount = r.base_amount,
            currency_before = r.currency_before,
            currency_after = r.currency_after,
            base_before = r.base_before,
            base_after = r.base_after,
            result = "OK",
            "{} completed",
            action
        ),
        Err(e) => warn!(
            target: AUDIT_TARGET,
            action = %action,
            user_id = session.user_id,
            currency = %currency_code,
            amount,
            result = "ERROR",
            error = %e,
            "{} failed",
            action
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::FreshnessPolicy;
    use crate::core::rate::PairKey;
    use crate::core::resolver::RateResolver;
    use crate::store::memory::MemoryCollection;
    use crate::store::{KeyValueCollection, RateStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory collection whose writes can be made to fail.
    #[derive(Default)]
    struct FlakyCollection {
        inner: MemoryCollection,
        fail_puts: AtomicBool,
    }

    #[async_trait]
    impl KeyValueCollection for FlakyCollection {
        async fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &[u8], value: &[u8]) -> anyhow::Result<()> {
            if self.fail_puts.load(Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            self.inner.put(key, value).await
        }

        async fn remove(&self, key: &[u8]) -> anyhow::Result<()> {
            self.inner.remove(key).await
        }
    }

    async fn ledger_with(rates: &[(&str, f64)]) -> (Ledger, Arc<FlakyCollection>) {
        let store = Arc::new(RateStore::in_memory());
        let rates: HashMap<PairKey, f64> = rates
            .iter()
            .map(|(key, rate)| (key.parse().unwrap(), *rate))
            .collect();
        store.put(&rates, "test").await.unwrap();

        let resolver = RateResolver::new(store, "USD", 300, FreshnessPolicy::Advisory);
        let collection = Arc::new(FlakyCollection::default());
        let ledger = Ledger::new(
            Arc::new(CurrencyRegistry::default()),
            Arc::new(resolver),
            PortfolioRepository::new(Arc::clone(&collection) as Arc<dyn KeyValueCollection>),
            "USD",
        );
        (ledger, collection)
    }

    const USER: Session = Session { user_id: 1 };

    #[tokio::test]
    async fn test_buy_debits_base_and_credits_target() {
        let (ledger, _) = ledger_with(&[("BTC_USD", 50000.0)]).await;
        ledger.deposit(&USER, "USD", 1000.0).await.unwrap();

        let result = ledger.buy(&USER, "btc", 0.01).await.unwrap();
        assert_eq!(result.action, TradeAction::Buy);
        assert_eq!(result.currency, "BTC");
        assert_eq!(result.rate, 50000.0);
        assert!((result.base_amount - 500.0).abs() < 1e-9);
        assert_eq!(result.base_before, 1000.0);
        assert!((result.base_after - 500.0).abs() < 1e-9);
        assert_eq!(result.currency_before, 0.0);
        assert_eq!(result.currency_after, 0.01);

        let portfolio = ledger.portfolio(&USER).await.unwrap();
        assert!((portfolio.balance("USD") - 500.0).abs() < 1e-9);
        assert_eq!(portfolio.balance("BTC"), 0.01);
    }

    #[tokio::test]
    async fn test_sell_without_wallet_is_insufficient_funds() {
        let (ledger, _) = ledger_with(&[("EUR_USD", 1.08)]).await;
        ledger.deposit(&USER, "USD", 100.0).await.unwrap();
        let before = ledger.portfolio(&USER).await.unwrap();

        let err = ledger.sell(&USER, "EUR", 10.0).await.unwrap_err();
        assert_eq!(
            err,
            TradeError::InsufficientFunds {
                available: 0.0,
                required: 10.0,
                currency: "EUR".to_string(),
            }
        );
        assert_eq!(ledger.portfolio(&USER).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_failed_funds_check_leaves_balances_unchanged() {
        let (ledger, _) = ledger_with(&[("BTC_USD", 50000.0)]).await;
        ledger.deposit(&USER, "USD", 100.0).await.unwrap();
        ledger.deposit(&USER, "BTC", 0.5).await.unwrap();
        let before = ledger.portfolio(&USER).await.unwrap();

        let err = ledger.buy(&USER, "BTC", 1.0).await.unwrap_err();
        assert!(matches!(err, TradeError::InsufficientFunds { .. }));

        let after = ledger.portfolio(&USER).await.unwrap();
        assert_eq!(after.balance("USD").to_bits(), before.balance("USD").to_bits());
        assert_eq!(after.balance("BTC").to_bits(), before.balance("BTC").to_bits());
    }

    #[tokio::test]
    async fn test_sell_credits_base() {
        let (ledger, _) = ledger_with(&[("ETH_USD", 3000.0)]).await;
        ledger.deposit(&USER, "ETH", 2.0).await.unwrap();

        let result = ledger.sell(&USER, "ETH", 0.5).await.unwrap();
        assert_eq!(result.base_amount, 1500.0);
        assert_eq!(result.currency_after, 1.5);
        assert_eq!(result.base_after, 1500.0);
    }

    #[tokio::test]
    async fn test_rejects_invalid_requests() {
        let (ledger, _) = ledger_with(&[("BTC_USD", 50000.0)]).await;
        ledger.deposit(&USER, "USD", 1000.0).await.unwrap();

        for amount in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                ledger.buy(&USER, "BTC", amount).await,
                Err(TradeError::Validation(_))
            ));
        }
        assert!(matches!(
            ledger.buy(&USER, "USD", 1.0).await,
            Err(TradeError::Validation(_))
        ));
        assert!(matches!(
            ledger.sell(&USER, "USD", 1.0).await,
            Err(TradeError::Validation(_))
        ));
        assert!(matches!(
            ledger.buy(&USER, "DOGE", 1.0).await,
            Err(TradeError::CurrencyNotFound { .. })
        ));
        assert_eq!(ledger.portfolio(&USER).await.unwrap().balance("USD"), 1000.0);
    }

    #[tokio::test]
    async fn test_missing_rate_is_unavailable() {
        let (ledger, _) = ledger_with(&[]).await;
        ledger.deposit(&USER, "USD", 1000.0).await.unwrap();

        let err = ledger.buy(&USER, "ETH", 1.0).await.unwrap_err();
        assert_eq!(err, TradeError::rate_unavailable("ETH", "USD"));
        assert!(ledger.portfolio(&USER).await.unwrap().wallet("ETH").is_none());
    }

    #[tokio::test]
    async fn test_failed_save_keeps_stored_portfolio() {
        let (ledger, collection) = ledger_with(&[("BTC_USD", 50000.0)]).await;
        ledger.deposit(&USER, "USD", 1000.0).await.unwrap();

        collection.fail_puts.store(true, Ordering::SeqCst);
        let err = ledger.buy(&USER, "BTC", 0.01).await.unwrap_err();
        assert!(matches!(err, TradeError::Storage(_)));

        let portfolio = ledger.portfolio(&USER).await.unwrap();
        assert_eq!(portfolio.balance("USD"), 1000.0);
        assert_eq!(portfolio.balance("BTC"), 0.0);
    }

    #[tokio::test]
    async fn test_concurrent_buys_do_not_lose_updates() {
        let (ledger, _) = ledger_with(&[("ETH_USD", 100.0)]).await;
        let ledger = Arc::new(ledger);
        ledger.deposit(&USER, "USD", 500.0).await.unwrap();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move { ledger.buy(&USER, "ETH", 1.0).await })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }
        assert_eq!(succeeded, 5);

        let portfolio = ledger.portfolio(&USER).await.unwrap();
        assert_eq!(portfolio.balance("ETH"), 5.0);
        assert_eq!(portfolio.balance("USD"), 0.0);
        assert!(ledger.user_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_user_locks_are_released() {
        let (ledger, _) = ledger_with(&[("BTC_USD", 50000.0)]).await;
        for user_id in 1..=20 {
            let session = Session::new(user_id);
            ledger.deposit(&session, "USD", 1000.0).await.unwrap();
            ledger.buy(&session, "BTC", 0.01).await.unwrap();
            assert!(ledger.sell(&session, "BTC", 1.0).await.is_err());
        }
        assert!(ledger.user_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let (ledger, _) = ledger_with(&[("BTC_USD", 50000.0)]).await;
        let other = Session::new(2);
        ledger.deposit(&USER, "USD", 1000.0).await.unwrap();

        assert!(matches!(
            ledger.buy(&other, "BTC", 0.01).await,
            Err(TradeError::InsufficientFunds { .. })
        ));
        assert!(ledger.portfolio(&other).await.unwrap().is_empty());
    }
}

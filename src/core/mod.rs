//! Core business logic: currencies, rates, wallets and the ledger

pub mod config;
pub mod currency;
pub mod error;
pub mod ledger;
pub mod log;
pub mod portfolio;
pub mod rate;
pub mod resolver;
pub mod scheduler;
pub mod updater;
pub mod valuation;

// Re-export main types for cleaner imports
pub use currency::{Currency, CurrencyKind, CurrencyRateProvider, CurrencyRegistry};
pub use error::{TradeError, TradeResult};
pub use ledger::{DepositResult, Ledger, Session, TradeAction, TransactionResult};
pub use portfolio::{Portfolio, Wallet};
pub use rate::{HistoryRecord, PairKey, RateProvider, RateRecord, RatesSnapshot};
pub use resolver::{RatePath, RateResolver, ResolvedRate};
pub use scheduler::RatesScheduler;
pub use updater::{RatesUpdater, UpdateMethod, UpdateReport};
pub use valuation::{PortfolioValue, WalletValue};

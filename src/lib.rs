pub mod cli;
pub mod core;
pub mod providers;
pub mod store;

use crate::core::config::AppConfig;
use crate::core::{
    CurrencyRateProvider, CurrencyRegistry, Ledger, PortfolioValue, RateProvider, RateResolver,
    RatesScheduler, RatesUpdater, Session, TradeResult, valuation,
};
use crate::store::{HistoryStore, KeyValueStore, PortfolioRepository, RateStore};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const RATES_FILE: &str = "rates.json";
pub const HISTORY_FILE: &str = "exchange_rates.json";
pub const PORTFOLIOS_COLLECTION: &str = "portfolios";

pub enum AppCommand {
    Currencies,
    UpdateRates {
        source: Option<String>,
    },
    ShowRates {
        currency: Option<String>,
    },
    History {
        pair: String,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        limit: Option<usize>,
    },
    GetRate {
        from: String,
        to: String,
    },
    Deposit {
        currency: String,
        amount: f64,
    },
    Buy {
        currency: String,
        amount: f64,
    },
    Sell {
        currency: String,
        amount: f64,
    },
    ShowPortfolio {
        base: Option<String>,
    },
    Schedule {
        interval_seconds: Option<u64>,
    },
}

/// Every long-lived component, wired from one `AppConfig`.
pub struct App {
    pub config: AppConfig,
    pub registry: Arc<CurrencyRegistry>,
    pub rates: Arc<RateStore>,
    pub history: Arc<HistoryStore>,
    pub resolver: Arc<RateResolver>,
    pub updater: Arc<RatesUpdater>,
    pub ledger: Ledger,
}

impl App {
    /// Opens the stores under the configured data directory.
    pub fn open(config: AppConfig) -> Result<Self> {
        let data_path = config.default_data_path()?;
        debug!("Using data directory {}", data_path.display());
        let providers = providers::build_providers(&config)?;
        Self::open_at(config, &data_path, providers)
    }

    pub fn open_at(
        config: AppConfig,
        data_path: &Path,
        providers: Vec<Arc<dyn RateProvider>>,
    ) -> Result<Self> {
        let kv = KeyValueStore::open(data_path)?;
        let rates = RateStore::open(data_path.join(RATES_FILE))?;
        let history = HistoryStore::open(
            data_path.join(HISTORY_FILE),
            config.rates.max_history_per_pair,
        )?;
        Self::assemble(config, &kv, rates, history, providers)
    }

    /// Everything in memory; nothing touches the filesystem.
    pub fn in_memory(config: AppConfig, providers: Vec<Arc<dyn RateProvider>>) -> Result<Self> {
        let history = HistoryStore::in_memory(config.rates.max_history_per_pair);
        Self::assemble(
            config,
            &KeyValueStore::in_memory(),
            RateStore::in_memory(),
            history,
            providers,
        )
    }

    fn assemble(
        config: AppConfig,
        kv: &KeyValueStore,
        rates: RateStore,
        history: HistoryStore,
        providers: Vec<Arc<dyn RateProvider>>,
    ) -> Result<Self> {
        let registry = Arc::new(CurrencyRegistry::default());
        let rates = Arc::new(rates);
        let history = Arc::new(history);
        let resolver = Arc::new(RateResolver::from_config(Arc::clone(&rates), &config));
        let updater = Arc::new(RatesUpdater::new(
            providers,
            Arc::clone(&rates),
            Arc::clone(&history),
        ));
        let ledger = Ledger::new(
            Arc::clone(&registry),
            Arc::clone(&resolver) as Arc<dyn CurrencyRateProvider>,
            PortfolioRepository::new(kv.collection(PORTFOLIOS_COLLECTION)?),
            &config.base_currency,
        );

        Ok(Self {
            config,
            registry,
            rates,
            history,
            resolver,
            updater,
            ledger,
        })
    }

    pub fn scheduler(&self, interval: Option<Duration>) -> RatesScheduler {
        RatesScheduler::new(
            Arc::clone(&self.updater),
            interval.unwrap_or(Duration::from_secs(self.config.rates.update_interval_seconds)),
            Duration::from_secs(self.config.rates.shutdown_grace_seconds),
        )
    }

    /// Values the session's portfolio in `base`, or the configured base currency.
    pub async fn portfolio_value(
        &self,
        session: &Session,
        base: Option<&str>,
    ) -> TradeResult<PortfolioValue> {
        let target = match base {
            Some(code) => self.registry.get(code)?.code.clone(),
            None => self.ledger.base_currency().to_string(),
        };
        let portfolio = self.ledger.portfolio(session).await?;
        Ok(valuation::calculate_portfolio_value(&portfolio, self.resolver.as_ref(), &target).await)
    }
}

pub async fn run_command(
    command: AppCommand,
    config_path: Option<&str>,
    user_id: u64,
) -> Result<()> {
    info!("Valuta starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let app = App::open(config)?;
    execute(&app, command, &Session::new(user_id)).await
}

/// Runs one command against an already assembled app.
pub async fn execute(app: &App, command: AppCommand, session: &Session) -> Result<()> {
    match command {
        AppCommand::Currencies => cli::rates::currencies(app),
        AppCommand::UpdateRates { source } => cli::rates::update_rates(app, source.as_deref()).await,
        AppCommand::ShowRates { currency } => cli::rates::show_rates(app, currency.as_deref()).await,
        AppCommand::History {
            pair,
            since,
            until,
            limit,
        } => cli::rates::history(app, &pair, since, until, limit).await,
        AppCommand::GetRate { from, to } => cli::rates::get_rate(app, &from, &to).await,
        AppCommand::Deposit { currency, amount } => {
            cli::trade::deposit(app, session, &currency, amount).await
        }
        AppCommand::Buy { currency, amount } => {
            cli::trade::buy(app, session, &currency, amount).await
        }
        AppCommand::Sell { currency, amount } => {
            cli::trade::sell(app, session, &currency, amount).await
        }
        AppCommand::ShowPortfolio { base } => {
            cli::portfolio::show(app, session, base.as_deref()).await
        }
        AppCommand::Schedule { interval_seconds } => {
            cli::schedule::run(app, interval_seconds.map(Duration::from_secs)).await
        }
    }
}

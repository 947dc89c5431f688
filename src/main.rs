use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use valuta::cli::setup::setup;
use valuta::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    /// User whose portfolio the command acts on
    #[arg(short, long, global = true, default_value_t = 1)]
    user_id: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for valuta::AppCommand {
    fn from(cmd: Commands) -> valuta::AppCommand {
        match cmd {
            Commands::Currencies => valuta::AppCommand::Currencies,
            Commands::UpdateRates { source } => valuta::AppCommand::UpdateRates { source },
            Commands::ShowRates { currency } => valuta::AppCommand::ShowRates { currency },
            Commands::History {
                pair,
                since,
                until,
                limit,
            } => valuta::AppCommand::History {
                pair,
                since,
                until,
                limit,
            },
            Commands::GetRate { from, to } => valuta::AppCommand::GetRate { from, to },
            Commands::Deposit { currency, amount } => {
                valuta::AppCommand::Deposit { currency, amount }
            }
            Commands::Buy { currency, amount } => valuta::AppCommand::Buy { currency, amount },
            Commands::Sell { currency, amount } => valuta::AppCommand::Sell { currency, amount },
            Commands::ShowPortfolio { base } => valuta::AppCommand::ShowPortfolio { base },
            Commands::Schedule { interval } => valuta::AppCommand::Schedule {
                interval_seconds: interval,
            },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// List supported currencies
    Currencies,
    /// Fetch fresh rates from the providers
    UpdateRates {
        /// Only update from this source (e.g. coingecko, exchangerate)
        #[arg(short, long)]
        source: Option<String>,
    },
    /// Show cached rates
    ShowRates {
        /// Only pairs involving this currency
        #[arg(long)]
        currency: Option<String>,
    },
    /// Show recorded rates for a pair, newest first
    History {
        /// Pair key such as BTC_USD
        #[arg(short, long)]
        pair: String,
        /// Earliest timestamp (RFC 3339)
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// Latest timestamp (RFC 3339)
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Resolve the rate between two currencies
    GetRate {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Fund a wallet
    Deposit {
        #[arg(long)]
        currency: String,
        #[arg(short, long)]
        amount: f64,
    },
    /// Buy a currency with the base currency
    Buy {
        #[arg(long)]
        currency: String,
        #[arg(short, long)]
        amount: f64,
    },
    /// Sell a currency for the base currency
    Sell {
        #[arg(long)]
        currency: String,
        #[arg(short, long)]
        amount: f64,
    },
    /// Display wallet balances and their value
    ShowPortfolio {
        /// Currency to value the portfolio in
        #[arg(short, long)]
        base: Option<String>,
    },
    /// Refresh rates periodically until Ctrl-C
    Schedule {
        /// Seconds between updates
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => setup(),
        Some(cmd) => {
            valuta::run_command(cmd.into(), cli.config_path.as_deref(), cli.user_id).await
        }
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}

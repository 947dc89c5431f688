use crate::core::currency::{CurrencyRegistry, normalize_code};
use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

pub const API_KEY_ENV: &str = "EXCHANGERATE_API_KEY";

/// Upper bound for `rates.ttl_seconds` (ten years).
pub const MAX_TTL_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

/// How the resolver treats records older than the TTL.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FreshnessPolicy {
    /// Stale records are returned with a warning.
    #[default]
    Advisory,
    /// Stale records are treated as missing.
    Strict,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RatesConfig {
    pub ttl_seconds: u64,
    pub update_interval_seconds: u64,
    pub shutdown_grace_seconds: u64,
    pub max_history_per_pair: usize,
    pub freshness: FreshnessPolicy,
}

impl Default for RatesConfig {
    fn default() -> Self {
        RatesConfig {
            ttl_seconds: 300,
            update_interval_seconds: 300,
            shutdown_grace_seconds: 5,
            max_history_per_pair: 1000,
            freshness: FreshnessPolicy::Advisory,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TrackedCurrencies {
    pub fiat: Vec<String>,
    pub crypto: Vec<String>,
}

impl Default for TrackedCurrencies {
    fn default() -> Self {
        TrackedCurrencies {
            fiat: ["EUR", "GBP", "RUB", "JPY", "CNY"].map(String::from).to_vec(),
            crypto: ["BTC", "ETH", "SOL", "BNB", "XRP"].map(String::from).to_vec(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CoinGeckoConfig {
    pub base_url: String,
    /// Ticker to CoinGecko coin id.
    pub ids: BTreeMap<String, String>,
}

impl Default for CoinGeckoConfig {
    fn default() -> Self {
        let ids = [
            ("BTC", "bitcoin"),
            ("ETH", "ethereum"),
            ("SOL", "solana"),
            ("BNB", "binancecoin"),
            ("XRP", "ripple"),
            ("USDT", "tether"),
            ("ADA", "cardano"),
            ("DOGE", "dogecoin"),
            ("DOT", "polkadot"),
            ("MATIC", "polygon"),
        ]
        .into_iter()
        .map(|(ticker, id)| (ticker.to_string(), id.to_string()))
        .collect();

        CoinGeckoConfig {
            base_url: "https://api.coingecko.com/api/v3".to_string(),
            ids,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ExchangeRateConfig {
    pub base_url: String,
    pub api_key: String,
}

impl Default for ExchangeRateConfig {
    fn default() -> Self {
        ExchangeRateConfig {
            base_url: "https://v6.exchangerate-api.com/v6".to_string(),
            api_key: "demo".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct ProvidersConfig {
    pub coingecko: CoinGeckoConfig,
    pub exchangerate: ExchangeRateConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
    /// Total attempts per request, including the first one.
    pub max_attempts: usize,
    pub retry_delay_ms: u64,
    pub user_agent: String,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            timeout_seconds: 30,
            max_attempts: 3,
            retry_delay_ms: 2000,
            user_agent: "valuta/1.0".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub base_currency: String,
    pub data_path: Option<String>,
    pub rates: RatesConfig,
    pub tracked: TrackedCurrencies,
    pub providers: ProvidersConfig,
    pub http: HttpConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            base_currency: "USD".to_string(),
            data_path: None,
            rates: RatesConfig::default(),
            tracked: TrackedCurrencies::default(),
            providers: ProvidersConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads the config at the default location, falling back to built-in
    /// defaults when no file exists there.
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            debug!(
                "No config at {}, using defaults",
                config_path.display()
            );
            let mut config = Self::default();
            config.finalize()?;
            return Ok(config);
        }
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("org", "valuta", "valuta")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("org", "valuta", "valuta")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config
            .finalize()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    /// Normalizes codes, applies environment overrides and validates.
    pub fn finalize(&mut self) -> Result<()> {
        if let Ok(key) = std::env::var(API_KEY_ENV)
            && !key.trim().is_empty()
        {
            self.providers.exchangerate.api_key = key.trim().to_string();
        }
        if self.providers.exchangerate.api_key == "demo" {
            debug!("Using the demo ExchangeRate-API key, set {API_KEY_ENV} for full access");
        }

        self.base_currency = normalize_code(&self.base_currency)?;
        self.tracked.fiat = self
            .tracked
            .fiat
            .iter()
            .map(|c| normalize_code(c))
            .collect::<Result<_, _>>()?;
        self.tracked.crypto = self
            .tracked
            .crypto
            .iter()
            .map(|c| normalize_code(c))
            .collect::<Result<_, _>>()?;

        let registry = CurrencyRegistry::default();
        let supported = || registry.supported_codes().join(", ");
        if !registry.contains(&self.base_currency) {
            bail!(
                "Base currency {} is not supported. Supported: {}",
                self.base_currency,
                supported()
            );
        }
        for code in self.tracked.fiat.iter().chain(&self.tracked.crypto) {
            if !registry.contains(code) {
                bail!(
                    "Tracked currency {code} is not supported. Supported: {}",
                    supported()
                );
            }
        }

        for ticker in &self.tracked.crypto {
            if !self.providers.coingecko.ids.contains_key(ticker) {
                bail!("Crypto currency {ticker} has no CoinGecko id mapping");
            }
        }
        if self.rates.ttl_seconds == 0 || self.rates.ttl_seconds > MAX_TTL_SECONDS {
            bail!("rates.ttl_seconds must be between 1 and {MAX_TTL_SECONDS}");
        }
        if self.rates.update_interval_seconds == 0 {
            bail!("rates.update_interval_seconds must be positive");
        }
        if self.rates.max_history_per_pair == 0 {
            bail!("rates.max_history_per_pair must be positive");
        }
        if self.http.max_attempts == 0 {
            bail!("http.max_attempts must be positive");
        }
        Ok(())
    }
}

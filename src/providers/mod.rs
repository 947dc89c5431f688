pub mod coingecko;
pub mod exchangerate;
pub mod util;

use crate::core::config::AppConfig;
use crate::core::error::TradeResult;
use crate::core::rate::RateProvider;
use coingecko::CoinGeckoProvider;
use exchangerate::ExchangeRateProvider;
use std::sync::Arc;
use util::HttpClient;

/// Builds the configured rate sources in update order: crypto first, then fiat.
pub fn build_providers(config: &AppConfig) -> TradeResult<Vec<Arc<dyn RateProvider>>> {
    let mut providers: Vec<Arc<dyn RateProvider>> = Vec::new();

    if !config.tracked.crypto.is_empty() {
        providers.push(Arc::new(CoinGeckoProvider::new(
            &config.providers.coingecko,
            &config.tracked.crypto,
            &config.base_currency,
            HttpClient::new(&config.http)?,
        )));
    }
    if !config.tracked.fiat.is_empty() {
        providers.push(Arc::new(ExchangeRateProvider::new(
            &config.providers.exchangerate,
            &config.tracked.fiat,
            &config.base_currency,
            HttpClient::new(&config.http)?,
        )));
    }
    Ok(providers)
}

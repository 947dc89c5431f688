use super::util::HttpClient;
use crate::core::config::CoinGeckoConfig;
use crate::core::error::{TradeError, TradeResult};
use crate::core::rate::{PairKey, RateProvider};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, instrument, warn};

pub const SOURCE_NAME: &str = "CoinGecko";

/// Crypto prices quoted in the base currency, emitted as `TICKER_BASE`.
pub struct CoinGeckoProvider {
    base_url: String,
    base_currency: String,
    /// Coin id to ticker, for the tracked cryptocurrencies only.
    tickers: BTreeMap<String, String>,
    http: HttpClient,
}

impl CoinGeckoProvider {
    pub fn new(
        config: &CoinGeckoConfig,
        tracked: &[String],
        base_currency: &str,
        http: HttpClient,
    ) -> Self {
        let tickers = tracked
            .iter()
            .filter_map(|ticker| match config.ids.get(ticker) {
                Some(id) => Some((id.clone(), ticker.clone())),
                None => {
                    warn!("No CoinGecko id for {}, not tracking it", ticker);
                    None
                }
            })
            .collect();

        CoinGeckoProvider {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            base_currency: base_currency.to_uppercase(),
            tickers,
            http,
        }
    }

    fn url(&self) -> String {
        let ids: Vec<&str> = self.tickers.keys().map(String::as_str).collect();
        format!(
            "{}/simple/price?ids={}&vs_currencies={}",
            self.base_url,
            ids.join(","),
            self.base_currency.to_lowercase()
        )
    }

    fn parse(&self, data: HashMap<String, HashMap<String, Value>>) -> HashMap<PairKey, f64> {
        let quote_key = self.base_currency.to_lowercase();
        let mut rates = HashMap::new();

        for (coin_id, quotes) in data {
            let Some(ticker) = self.tickers.get(&coin_id) else {
                warn!("Unknown CoinGecko id {}, skipping", coin_id);
                continue;
            };
            let Some(value) = quotes.get(&quote_key) else {
                warn!("CoinGecko quote for {} has no {} price", coin_id, quote_key);
                continue;
            };
            match value.as_f64() {
                Some(rate) if rate.is_finite() && rate > 0.0 => {
                    rates.insert(PairKey::new(ticker, &self.base_currency), rate);
                }
                _ => warn!("Invalid CoinGecko price for {}: {}", coin_id, value),
            }
        }
        rates
    }
}

#[async_trait]
impl RateProvider for CoinGeckoProvider {
    #[instrument(name = "CoinGeckoFetch", skip(self), fields(source = SOURCE_NAME))]
    async fn fetch_rates(&self) -> TradeResult<HashMap<PairKey, f64>> {
        if self.tickers.is_empty() {
            return Err(TradeError::api("CoinGecko: no tracked cryptocurrencies"));
        }

        debug!("Requesting {} CoinGecko prices", self.tickers.len());
        let data: HashMap<String, HashMap<String, Value>> =
            self.http.get_json(&self.url(), SOURCE_NAME).await?;

        let rates = self.parse(data);
        if rates.is_empty() {
            return Err(TradeError::api(
                "CoinGecko returned no usable rates for the tracked currencies",
            ));
        }

        info!("CoinGecko: fetched {} rates", rates.len());
        Ok(rates)
    }

    fn source_name(&self) -> &str {
        SOURCE_NAME
    }
}

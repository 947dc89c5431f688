use super::util::HttpClient;
use crate::core::config::ExchangeRateConfig;
use crate::core::error::{TradeError, TradeResult};
use crate::core::rate::{PairKey, RateProvider};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, instrument, warn};

pub const SOURCE_NAME: &str = "ExchangeRate-API";

/// Fiat rates from ExchangeRate-API.
///
/// The API quotes `BASE -> X`; stored pairs are `X_BASE`, so every rate is
/// inverted.
pub struct ExchangeRateProvider {
    base_url: String,
    api_key: String,
    base_currency: String,
    tracked: BTreeSet<String>,
    http: HttpClient,
}

impl ExchangeRateProvider {
    pub fn new(
        config: &ExchangeRateConfig,
        tracked: &[String],
        base_currency: &str,
        http: HttpClient,
    ) -> Self {
        ExchangeRateProvider {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            base_currency: base_currency.to_uppercase(),
            tracked: tracked.iter().map(|c| c.to_uppercase()).collect(),
            http,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/{}/latest/{}",
            self.base_url, self.api_key, self.base_currency
        )
    }

    fn parse(&self, data: LatestResponse) -> TradeResult<HashMap<PairKey, f64>> {
        if data.result.as_deref() != Some("success") {
            let error_type = data.error_type.as_deref().unwrap_or("unknown");
            return Err(TradeError::api(format!(
                "ExchangeRate-API returned an error: {error_type}"
            )));
        }

        let raw = if data.conversion_rates.is_empty() {
            data.rates
        } else {
            data.conversion_rates
        };
        if raw.is_empty() {
            return Err(TradeError::api("ExchangeRate-API returned no rates"));
        }

        let mut rates = HashMap::new();
        for (code, value) in raw {
            if code == self.base_currency || !self.tracked.contains(&code) {
                continue;
            }
            match value.as_f64() {
                Some(rate) if rate.is_finite() && rate > 0.0 => {
                    rates.insert(PairKey::new(&code, &self.base_currency), 1.0 / rate);
                }
                _ => warn!("Invalid ExchangeRate-API rate for {}: {}", code, value),
            }
        }

        if rates.is_empty() {
            let wanted: Vec<&str> = self.tracked.iter().map(String::as_str).collect();
            return Err(TradeError::api(format!(
                "ExchangeRate-API returned none of the tracked currencies ({})",
                wanted.join(", ")
            )));
        }
        Ok(rates)
    }
}

#[derive(Debug, Deserialize)]
struct LatestResponse {
    result: Option<String>,
    #[serde(rename = "error-type")]
    error_type: Option<String>,
    #[serde(default)]
    conversion_rates: HashMap<String, Value>,
    #[serde(default)]
    rates: HashMap<String, Value>,
}

#[async_trait]
impl RateProvider for ExchangeRateProvider {
    #[instrument(name = "ExchangeRateFetch", skip(self), fields(source = SOURCE_NAME))]
    async fn fetch_rates(&self) -> TradeResult<HashMap<PairKey, f64>> {
        debug!(
            "Requesting ExchangeRate-API rates for base {}",
            self.base_currency
        );
        let data: LatestResponse = self.http.get_json(&self.url(), SOURCE_NAME).await?;
        let rates = self.parse(data)?;
        info!("ExchangeRate-API: fetched {} rates", rates.len());
        Ok(rates)
    }

    fn source_name(&self) -> &str {
        SOURCE_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer, max_attempts: usize) -> ExchangeRateProvider {
        let config = ExchangeRateConfig {
            base_url: server.uri(),
            api_key: "test-key".to_string(),
        };
        let http = HttpClient::with_settings(
            Duration::from_millis(200),
            max_attempts,
            Duration::from_millis(10),
            "test/1.0",
        )
        .unwrap();
        let tracked: Vec<String> = ["EUR", "GBP", "JPY"].map(String::from).to_vec();
        ExchangeRateProvider::new(&config, &tracked, "USD", http)
    }

    async fn mount(server: &MockServer, status: u16, body: &str) {
        Mock::given(method("GET"))
            .and(path("/test-key/latest/USD"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body.to_string()))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_rates_are_inverted_and_filtered() {
        let server = MockServer::start().await;
        mount(
            &server,
            200,
            r#"{
                "result": "success",
                "base_code": "USD",
                "conversion_rates": {"USD": 1, "EUR": 0.8, "GBP": 0.5, "CHF": 0.9}
            }"#,
        )
        .await;

        let rates = provider(&server, 1).fetch_rates().await.unwrap();
        assert_eq!(rates.len(), 2);
        assert!((rates[&PairKey::new("EUR", "USD")] - 1.25).abs() < 1e-12);
        assert!((rates[&PairKey::new("GBP", "USD")] - 2.0).abs() < 1e-12);
        assert!(!rates.contains_key(&PairKey::new("USD", "USD")));
    }

    #[tokio::test]
    async fn test_falls_back_to_rates_field() {
        let server = MockServer::start().await;
        mount(
            &server,
            200,
            r#"{"result": "success", "rates": {"JPY": 150.0}}"#,
        )
        .await;

        let rates = provider(&server, 1).fetch_rates().await.unwrap();
        assert!((rates[&PairKey::new("JPY", "USD")] - 1.0 / 150.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_error_result_carries_error_type() {
        let server = MockServer::start().await;
        mount(
            &server,
            200,
            r#"{"result": "error", "error-type": "quota-reached"}"#,
        )
        .await;

        let err = provider(&server, 1).fetch_rates().await.unwrap_err();
        assert_eq!(
            err,
            TradeError::api("ExchangeRate-API returned an error: quota-reached")
        );
    }

    #[tokio::test]
    async fn test_no_tracked_currency_is_error() {
        let server = MockServer::start().await;
        mount(
            &server,
            200,
            r#"{"result": "success", "conversion_rates": {"CHF": 0.9}}"#,
        )
        .await;

        let err = provider(&server, 1).fetch_rates().await.unwrap_err();
        assert!(err.to_string().contains("none of the tracked currencies"));
    }

    #[tokio::test]
    async fn test_auth_failure_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/test-key/latest/USD"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server, 3).fetch_rates().await.unwrap_err();
        assert!(err.to_string().contains("authentication failed"));
    }
}

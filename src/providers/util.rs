use crate::core::config::HttpConfig;
use crate::core::error::{TradeError, TradeResult};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of a single failed attempt.
#[derive(Debug)]
pub enum AttemptError {
    /// Worth another try: timeouts, connection failures, 5xx.
    Transient(String),
    /// Retrying will not help: rate limiting, auth, bad payloads.
    Terminal(String),
}

impl AttemptError {
    fn into_message(self) -> String {
        match self {
            AttemptError::Transient(msg) | AttemptError::Terminal(msg) => msg,
        }
    }
}

/// Retries an async operation while it fails transiently.
///
/// `max_attempts` counts every run including the first. Terminal failures
/// are returned immediately.
pub async fn with_retry<F, Fut, T>(
    mut operation: F,
    max_attempts: usize,
    delay: Duration,
) -> TradeResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(AttemptError::Transient(msg)) if attempt < max_attempts => {
                debug!(
                    "Attempt {}/{} failed: {}. Retrying...",
                    attempt, max_attempts, msg
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(TradeError::api(err.into_message())),
        }
    }
}

/// Shared HTTP client carrying the configured timeout and retry policy.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    max_attempts: usize,
    retry_delay: Duration,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> TradeResult<Self> {
        Self::with_settings(
            config.timeout(),
            config.max_attempts,
            config.retry_delay(),
            &config.user_agent,
        )
    }

    pub fn with_settings(
        timeout: Duration,
        max_attempts: usize,
        retry_delay: Duration,
        user_agent: &str,
    ) -> TradeResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| TradeError::api(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            max_attempts,
            retry_delay,
        })
    }

    /// GETs `url` and decodes the JSON body. `label` names the request in
    /// logs and errors so that secrets embedded in the URL stay out of them.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, label: &str) -> TradeResult<T> {
        debug!("Requesting {}", label);
        let text = with_retry(
            || self.get_text_once(url, label),
            self.max_attempts,
            self.retry_delay,
        )
        .await?;

        serde_json::from_str(&text)
            .map_err(|e| TradeError::api(format!("Failed to parse {label} response: {e}")))
    }

    async fn get_text_once(&self, url: &str, label: &str) -> Result<String, AttemptError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_request_error(&e, label))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, label));
        }

        response
            .text()
            .await
            .map_err(|e| classify_request_error(&e, label))
    }
}

fn classify_request_error(err: &reqwest::Error, label: &str) -> AttemptError {
    if err.is_timeout() {
        AttemptError::Transient(format!("{label} timed out"))
    } else if err.is_connect() || err.is_request() {
        AttemptError::Transient(format!("{label} connection failed: {err}"))
    } else {
        AttemptError::Terminal(format!("{label} request failed: {err}"))
    }
}

fn classify_status(status: StatusCode, label: &str) -> AttemptError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            warn!("{} rate limit exceeded", label);
            AttemptError::Terminal(format!("{label} rate limit exceeded (HTTP 429)"))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AttemptError::Terminal(format!(
            "{label} authentication failed (HTTP {})",
            status.as_u16()
        )),
        s if s.is_server_error() => {
            AttemptError::Transient(format!("{label} server error (HTTP {})", s.as_u16()))
        }
        s => AttemptError::Terminal(format!("{label} HTTP error: {s}")),
    }
}

//! One refresh cycle over every configured rate source.

use crate::core::rate::{HistoryRecord, PairKey, RateProvider};
use crate::store::{HistoryStore, RateStore};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Recorded in each history entry's `update_method` meta field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMethod {
    Manual,
    Automatic,
}

impl Display for UpdateMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateMethod::Manual => write!(f, "manual"),
            UpdateMethod::Automatic => write!(f, "automatic"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReport {
    /// True only if no source failed.
    pub success: bool,
    /// Distinct pairs written during the cycle.
    pub total_rates: usize,
    pub by_source: BTreeMap<String, usize>,
    pub errors: Vec<String>,
    pub duration_seconds: f64,
    pub last_refresh: Option<DateTime<Utc>>,
}

pub struct RatesUpdater {
    providers: Vec<Arc<dyn RateProvider>>,
    rates: Arc<RateStore>,
    history: Arc<HistoryStore>,
    cycle: Mutex<()>,
}

impl RatesUpdater {
    pub fn new(
        providers: Vec<Arc<dyn RateProvider>>,
        rates: Arc<RateStore>,
        history: Arc<HistoryStore>,
    ) -> Self {
        Self {
            providers,
            rates,
            history,
            cycle: Mutex::new(()),
        }
    }

    pub fn source_names(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| p.source_name().to_string())
            .collect()
    }

    /// On-demand refresh, optionally restricted to sources matching `source_filter`.
    pub async fn run_update(&self, source_filter: Option<&str>) -> UpdateReport {
        self.run_cycle(source_filter, UpdateMethod::Manual).await
    }

    pub async fn run_cycle(&self, source_filter: Option<&str>, method: UpdateMethod) -> UpdateReport {
        let _guard = self.cycle.lock().await;
        let started = Instant::now();
        let mut report = UpdateReport::default();

        let selected: Vec<&Arc<dyn RateProvider>> = match source_filter {
            Some(filter) => self
                .providers
                .iter()
                .filter(|p| source_matches(p.source_name(), filter))
                .collect(),
            None => self.providers.iter().collect(),
        };

        if selected.is_empty() {
            let reason = match source_filter {
                Some(filter) => format!(
                    "No rate source matches '{}'. Available: {}",
                    filter,
                    self.source_names().join(", ")
                ),
                None => "No rate sources configured".to_string(),
            };
            warn!("{}", reason);
            report.errors.push(reason);
            report.duration_seconds = started.elapsed().as_secs_f64();
            return report;
        }

        info!("Starting {} rate update over {} sources", method, selected.len());
        let results = join_all(selected.iter().map(|p| p.fetch_rates())).await;

        let mut written: HashSet<PairKey> = HashSet::new();
        for (provider, result) in selected.iter().zip(results) {
            let name = provider.source_name().to_string();
            let rates = match result {
                Ok(rates) => rates,
                Err(e) => {
                    warn!("{} failed: {}", name, e);
                    report.errors.push(format!("{name}: {e}"));
                    report.by_source.insert(name, 0);
                    continue;
                }
            };

            if rates.is_empty() {
                warn!("{} returned no rates", name);
                report.by_source.insert(name, 0);
                continue;
            }

            let batch = match self.rates.put(&rates, &name).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!("Failed to store rates from {}: {:#}", name, e);
                    report.errors.push(format!("{name}: failed to store rates: {e:#}"));
                    report.by_source.insert(name, 0);
                    continue;
                }
            };
            let timestamp = batch.timestamp;

            let records: Vec<HistoryRecord> = batch
                .pairs
                .iter()
                .filter_map(|pair| rates.get(pair).map(|rate| (pair, *rate)))
                .map(|(pair, rate)| {
                    HistoryRecord::new(pair, rate, timestamp, &name)
                        .with_meta("update_method", &method.to_string())
                        .with_meta("pair_key", &pair.to_string())
                })
                .collect();
            if let Err(e) = self.history.append(records).await {
                warn!("Failed to append history for {}: {:#}", name, e);
                report.errors.push(format!("{name}: failed to append history: {e:#}"));
            }

            let count = batch.pairs.len();
            debug!("{}: stored {} of {} rates", name, count, rates.len());
            written.extend(batch.pairs);
            report.by_source.insert(name, count);
            report.last_refresh = Some(timestamp);
        }

        report.total_rates = written.len();
        report.success = report.errors.is_empty();
        report.duration_seconds = started.elapsed().as_secs_f64();

        info!(
            "Rate update finished: success={}, total={}, errors={}, took {:.2}s",
            report.success,
            report.total_rates,
            report.errors.len(),
            report.duration_seconds
        );
        report
    }
}

/// Case-insensitive substring match ignoring everything but letters and digits,
/// so `exchangerate` matches `ExchangeRate-API`.
fn source_matches(source_name: &str, filter: &str) -> bool {
    let normalize = |s: &str| -> String {
        s.chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect()
    };
    let filter = normalize(filter);
    !filter.is_empty() && normalize(source_name).contains(&filter)
}

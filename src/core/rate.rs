//! Exchange rate records and the provider abstraction

use crate::core::error::{TradeError, TradeResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::str::FromStr;

/// Ordered currency pair, rendered as `FROM_TO`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    pub from: String,
    pub to: String,
}

impl PairKey {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.trim().to_uppercase(),
            to: to.trim().to_uppercase(),
        }
    }

    pub fn inverse(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
        }
    }
}

impl Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.from, self.to)
    }
}

impl FromStr for PairKey {
    type Err = TradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('_') {
            Some((from, to)) if !from.is_empty() && !to.is_empty() && !to.contains('_') => {
                Ok(PairKey::new(from, to))
            }
            _ => Err(TradeError::Validation(format!("Invalid pair key: {s}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRecord {
    pub rate: f64,
    pub updated_at: DateTime<Utc>,
    pub source: String,
}

impl RateRecord {
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.updated_at).num_seconds()
    }

    /// True while the record is younger than `ttl_seconds`. TTLs beyond
    /// `i64::MAX` saturate instead of wrapping.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl_seconds: u64) -> bool {
        self.age_seconds(now) < i64::try_from(ttl_seconds).unwrap_or(i64::MAX)
    }
}

/// The persisted rate cache: `{"pairs": {...}, "last_refresh": ...}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatesSnapshot {
    #[serde(default)]
    pub pairs: BTreeMap<String, RateRecord>,
    #[serde(default)]
    pub last_refresh: Option<DateTime<Utc>>,
}

impl RatesSnapshot {
    pub fn get(&self, pair: &PairKey) -> Option<&RateRecord> {
        self.pairs.get(&pair.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub from_currency: String,
    pub to_currency: String,
    pub rate: f64,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

impl HistoryRecord {
    pub fn new(pair: &PairKey, rate: f64, timestamp: DateTime<Utc>, source: &str) -> Self {
        Self {
            id: format!("{}_{}", pair, timestamp.to_rfc3339()),
            from_currency: pair.from.clone(),
            to_currency: pair.to.clone(),
            rate,
            timestamp,
            source: source.to_string(),
            meta: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: &str) -> Self {
        self.meta.insert(key.to_string(), value.to_string());
        self
    }

    pub fn pair(&self) -> PairKey {
        PairKey::new(&self.from_currency, &self.to_currency)
    }
}

/// A source of raw exchange rates, already normalized to `FROM_TO` keys.
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn fetch_rates(&self) -> TradeResult<HashMap<PairKey, f64>>;

    fn source_name(&self) -> &str;
}

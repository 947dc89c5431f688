use super::write_json_atomic;
use crate::core::rate::{PairKey, RateRecord, RatesSnapshot};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// The pairs accepted by one `put` and the timestamp they were stamped with.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBatch {
    pub timestamp: DateTime<Utc>,
    pub pairs: Vec<PairKey>,
}

/// The rate cache (`rates.json`).
///
/// All access goes through one mutex. A `put` builds the next state, writes it
/// to disk atomically and only then swaps it in, so readers see either the
/// whole batch or none of it.
pub struct RateStore {
    path: Option<PathBuf>,
    inner: Mutex<RatesSnapshot>,
}

impl RateStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = read_snapshot(&path);
        if !path.exists() {
            write_json_atomic(&path, &snapshot)?;
        }
        debug!(
            "Opened rate cache at {} with {} pairs",
            path.display(),
            snapshot.pairs.len()
        );
        Ok(Self {
            path: Some(path),
            inner: Mutex::new(snapshot),
        })
    }

    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(RatesSnapshot::default()),
        }
    }

    /// Stores `rates` stamped with the current time and `source`.
    pub async fn put(&self, rates: &HashMap<PairKey, f64>, source: &str) -> Result<StoredBatch> {
        let timestamp = Utc::now();
        let pairs = self.put_at(rates, source, timestamp).await?;
        Ok(StoredBatch { timestamp, pairs })
    }

    /// Stores `rates` with an explicit batch timestamp. Returns the pairs
    /// written; non-finite and non-positive rates are skipped.
    pub async fn put_at(
        &self,
        rates: &HashMap<PairKey, f64>,
        source: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<PairKey>> {
        let mut inner = self.inner.lock().await;
        let mut next = inner.clone();
        let mut written = Vec::with_capacity(rates.len());

        for (pair, rate) in rates {
            if !rate.is_finite() || *rate <= 0.0 {
                warn!("Skipping invalid rate {} for {} from {}", rate, pair, source);
                continue;
            }
            next.pairs.insert(
                pair.to_string(),
                RateRecord {
                    rate: *rate,
                    updated_at: timestamp,
                    source: source.to_string(),
                },
            );
            written.push(pair.clone());
        }
        next.last_refresh = Some(timestamp);

        if let Some(path) = &self.path {
            write_json_atomic(path, &next)?;
        }
        *inner = next;

        info!(
            "Updated {} rates in cache (source: {}, time: {})",
            written.len(),
            source,
            timestamp.to_rfc3339()
        );
        Ok(written)
    }

    pub async fn get(&self, pair: &PairKey) -> Option<RateRecord> {
        self.inner.lock().await.get(pair).cloned()
    }

    /// A consistent copy of every pair and the last refresh time.
    pub async fn snapshot(&self) -> RatesSnapshot {
        self.inner.lock().await.clone()
    }
}

fn read_snapshot(path: &Path) -> RatesSnapshot {
    match std::fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => RatesSnapshot::default(),
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(
                "Rate cache {} is corrupt ({}), starting empty",
                path.display(),
                e
            );
            RatesSnapshot::default()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => RatesSnapshot::default(),
        Err(e) => {
            warn!("Failed to read {}: {}, starting empty", path.display(), e);
            RatesSnapshot::default()
        }
    }
}

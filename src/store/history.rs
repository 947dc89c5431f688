use super::write_json_atomic;
use crate::core::rate::{HistoryRecord, PairKey};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Append-only log of observed rates (`exchange_rates.json`).
///
/// Records are kept in insertion order. Each pair keeps at most
/// `max_per_pair` entries; the oldest are dropped first.
pub struct HistoryStore {
    path: Option<PathBuf>,
    max_per_pair: usize,
    records: Mutex<Vec<HistoryRecord>>,
}

impl HistoryStore {
    pub fn open(path: impl Into<PathBuf>, max_per_pair: usize) -> Result<Self> {
        let path = path.into();
        let records = read_records(&path);
        if !path.exists() {
            write_json_atomic(&path, &records)?;
        }
        debug!(
            "Opened rate history at {} with {} records",
            path.display(),
            records.len()
        );
        Ok(Self {
            path: Some(path),
            max_per_pair,
            records: Mutex::new(records),
        })
    }

    pub fn in_memory(max_per_pair: usize) -> Self {
        Self {
            path: None,
            max_per_pair,
            records: Mutex::new(Vec::new()),
        }
    }

    /// Appends `batch`, skipping ids already present. Returns the number of
    /// records added.
    pub async fn append(&self, batch: Vec<HistoryRecord>) -> Result<usize> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        let mut seen: HashSet<String> = next.iter().map(|r| r.id.clone()).collect();

        let mut added = 0;
        for record in batch {
            if seen.insert(record.id.clone()) {
                next.push(record);
                added += 1;
            } else {
                debug!("Skipping duplicate history record {}", record.id);
            }
        }
        if added == 0 {
            return Ok(0);
        }

        let evicted = enforce_cap(&mut next, self.max_per_pair);
        if let Some(path) = &self.path {
            write_json_atomic(path, &next)?;
        }
        *records = next;

        info!(
            "Appended {} history records ({} evicted over cap)",
            added, evicted
        );
        Ok(added)
    }

    /// Records for one pair, optionally bounded by time, newest first.
    pub async fn query(
        &self,
        pair: &PairKey,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Vec<HistoryRecord> {
        let records = self.records.lock().await;
        let mut matching: Vec<HistoryRecord> = records
            .iter()
            .filter(|r| &r.pair() == pair)
            .filter(|r| from.is_none_or(|f| r.timestamp >= f))
            .filter(|r| to.is_none_or(|t| r.timestamp <= t))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            matching.truncate(limit);
        }
        matching
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

/// Drops the oldest records of any pair holding more than `cap` entries.
fn enforce_cap(records: &mut Vec<HistoryRecord>, cap: usize) -> usize {
    let mut counts: HashMap<PairKey, usize> = HashMap::new();
    for record in records.iter() {
        *counts.entry(record.pair()).or_default() += 1;
    }

    let mut to_drop: HashMap<PairKey, usize> = counts
        .into_iter()
        .filter(|(_, count)| *count > cap)
        .map(|(pair, count)| (pair, count - cap))
        .collect();
    if to_drop.is_empty() {
        return 0;
    }

    // Sort by timestamp so "oldest" holds even if a batch arrived out of order
    records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    let before = records.len();
    records.retain(|record| {
        match to_drop.get_mut(&record.pair()) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                false
            }
            _ => true,
        }
    });
    before - records.len()
}

fn read_records(path: &Path) -> Vec<HistoryRecord> {
    match std::fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Vec::new(),
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(
                "Rate history {} is corrupt ({}), starting empty",
                path.display(),
                e
            );
            Vec::new()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            warn!("Failed to read {}: {}, starting empty", path.display(), e);
            Vec::new()
        }
    }
}

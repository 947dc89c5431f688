//! Exchange rate resolution over the rate cache.
//!
//! Lookup order for `from -> to`: identity, direct pair, inverse pair, then
//! triangulation through the base currency. Every lookup in one call reads the
//! same snapshot of the cache.

use crate::core::config::{AppConfig, FreshnessPolicy};
use crate::core::currency::{CurrencyRateProvider, normalize_code};
use crate::core::error::{TradeError, TradeResult};
use crate::core::rate::{PairKey, RatesSnapshot};
use crate::store::RateStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatePath {
    Identity,
    Direct,
    Inverse,
    Triangulated,
}

impl Display for RatePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RatePath::Identity => "identity",
            RatePath::Direct => "direct",
            RatePath::Inverse => "inverse",
            RatePath::Triangulated => "triangulated",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRate {
    pub rate: f64,
    pub path: RatePath,
    /// Timestamp of the oldest record used, `None` for identity.
    pub updated_at: Option<DateTime<Utc>>,
    pub stale: bool,
}

/// One usable leg read from the snapshot.
#[derive(Debug, Clone, Copy)]
struct Leg {
    rate: f64,
    path: RatePath,
    updated_at: DateTime<Utc>,
    stale: bool,
}

pub struct RateResolver {
    store: Arc<RateStore>,
    base_currency: String,
    ttl_seconds: u64,
    freshness: FreshnessPolicy,
}

impl RateResolver {
    pub fn new(
        store: Arc<RateStore>,
        base_currency: &str,
        ttl_seconds: u64,
        freshness: FreshnessPolicy,
    ) -> Self {
        Self {
            store,
            base_currency: base_currency.trim().to_uppercase(),
            ttl_seconds,
            freshness,
        }
    }

    pub fn from_config(store: Arc<RateStore>, config: &AppConfig) -> Self {
        Self::new(
            store,
            &config.base_currency,
            config.rates.ttl_seconds,
            config.rates.freshness,
        )
    }

    pub async fn resolve(&self, from: &str, to: &str) -> TradeResult<f64> {
        self.resolve_detailed(from, to).await.map(|r| r.rate)
    }

    pub async fn resolve_detailed(&self, from: &str, to: &str) -> TradeResult<ResolvedRate> {
        let from = normalize_code(from)?;
        let to = normalize_code(to)?;

        if from == to {
            return Ok(ResolvedRate {
                rate: 1.0,
                path: RatePath::Identity,
                updated_at: None,
                stale: false,
            });
        }

        let snapshot = self.store.snapshot().await;
        let resolved = self
            .resolve_in(&snapshot, &from, &to, Utc::now())
            .ok_or_else(|| TradeError::rate_unavailable(&from, &to))?;

        if resolved.stale {
            warn!(
                "Rate {}->{} is stale (updated {}), using it anyway",
                from,
                to,
                resolved
                    .updated_at
                    .map_or("never".to_string(), |t| t.to_rfc3339())
            );
        }
        debug!(
            "Resolved {}->{} = {} via {} path",
            from, to, resolved.rate, resolved.path
        );
        Ok(resolved)
    }

    /// Resolves against a fixed snapshot and clock. Codes must already be
    /// normalized and distinct.
    pub fn resolve_in(
        &self,
        snapshot: &RatesSnapshot,
        from: &str,
        to: &str,
        now: DateTime<Utc>,
    ) -> Option<ResolvedRate> {
        if let Some(leg) = self.leg(snapshot, from, to, now) {
            return Some(ResolvedRate {
                rate: leg.rate,
                path: leg.path,
                updated_at: Some(leg.updated_at),
                stale: leg.stale,
            });
        }

        let base = self.base_currency.as_str();
        if from == base || to == base {
            return None;
        }

        let from_base = self.leg(snapshot, from, base, now)?;
        let to_base = self.leg(snapshot, to, base, now)?;
        let rate = from_base.rate / to_base.rate;
        if !rate.is_finite() || rate <= 0.0 {
            return None;
        }

        Some(ResolvedRate {
            rate,
            path: RatePath::Triangulated,
            updated_at: Some(from_base.updated_at.min(to_base.updated_at)),
            stale: from_base.stale || to_base.stale,
        })
    }

    /// Direct record if usable, otherwise the inverted reverse record.
    fn leg(&self, snapshot: &RatesSnapshot, from: &str, to: &str, now: DateTime<Utc>) -> Option<Leg> {
        let pair = PairKey::new(from, to);

        if let Some(record) = snapshot.get(&pair) {
            let stale = !record.is_fresh(now, self.ttl_seconds);
            if self.usable(stale) && record.rate > 0.0 {
                return Some(Leg {
                    rate: record.rate,
                    path: RatePath::Direct,
                    updated_at: record.updated_at,
                    stale,
                });
            }
            if record.rate <= 0.0 {
                debug!("Direct rate {} is not positive, ignoring it", pair);
            } else {
                debug!("Direct rate {} is stale, ignoring it", pair);
            }
        }

        let inverse = pair.inverse();
        if let Some(record) = snapshot.get(&inverse) {
            let stale = !record.is_fresh(now, self.ttl_seconds);
            if self.usable(stale) && record.rate > 0.0 {
                return Some(Leg {
                    rate: 1.0 / record.rate,
                    path: RatePath::Inverse,
                    updated_at: record.updated_at,
                    stale,
                });
            }
            if record.rate <= 0.0 {
                debug!("Inverse rate {} is not positive, ignoring it", inverse);
            } else {
                debug!("Inverse rate {} is stale, ignoring it", inverse);
            }
        }
        None
    }

    fn usable(&self, stale: bool) -> bool {
        !stale || self.freshness == FreshnessPolicy::Advisory
    }
}

#[async_trait]
impl CurrencyRateProvider for RateResolver {
    async fn get_rate(&self, from: &str, to: &str) -> TradeResult<f64> {
        self.resolve(from, to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    async fn seeded(
        entries: &[(&str, f64)],
        age_seconds: i64,
        freshness: FreshnessPolicy,
    ) -> RateResolver {
        let store = Arc::new(RateStore::in_memory());
        let rates: HashMap<PairKey, f64> = entries
            .iter()
            .map(|(key, rate)| (key.parse().unwrap(), *rate))
            .collect();
        store
            .put_at(
                &rates,
                "test",
                Utc::now() - chrono::Duration::seconds(age_seconds),
            )
            .await
            .unwrap();
        RateResolver::new(store, "USD", 300, freshness)
    }

    #[tokio::test]
    async fn test_identity_is_exactly_one() {
        let resolver = seeded(&[], 0, FreshnessPolicy::Strict).await;
        let resolved = resolver.resolve_detailed("btc", "BTC").await.unwrap();
        assert_eq!(resolved.rate, 1.0);
        assert_eq!(resolved.path, RatePath::Identity);
        assert!(resolved.updated_at.is_none());
    }

    #[tokio::test]
    async fn test_direct_and_inverse() {
        let resolver = seeded(&[("BTC_USD", 50000.0)], 0, FreshnessPolicy::Advisory).await;

        let direct = resolver.resolve_detailed("BTC", "USD").await.unwrap();
        assert_eq!(direct.rate, 50000.0);
        assert_eq!(direct.path, RatePath::Direct);

        let inverse = resolver.resolve_detailed("USD", "BTC").await.unwrap();
        assert_eq!(inverse.path, RatePath::Inverse);
        assert!((direct.rate * inverse.rate - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_triangulation_through_base() {
        let resolver = seeded(
            &[("EUR_USD", 1.08), ("GBP_USD", 1.27)],
            0,
            FreshnessPolicy::Advisory,
        )
        .await;

        let resolved = resolver.resolve_detailed("EUR", "GBP").await.unwrap();
        assert_eq!(resolved.path, RatePath::Triangulated);
        assert!((resolved.rate - 1.08 / 1.27).abs() < 1e-12);

        let back = resolver.resolve("GBP", "EUR").await.unwrap();
        assert!((resolved.rate * back - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_triangulation_uses_inverse_legs() {
        let resolver = seeded(
            &[("USD_JPY", 150.0), ("BTC_USD", 60000.0)],
            0,
            FreshnessPolicy::Advisory,
        )
        .await;

        let rate = resolver.resolve("BTC", "JPY").await.unwrap();
        assert!((rate - 60000.0 * 150.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_unavailable_when_a_leg_is_missing() {
        let resolver = seeded(&[("EUR_USD", 1.08)], 0, FreshnessPolicy::Advisory).await;
        let err = resolver.resolve("EUR", "GBP").await.unwrap_err();
        assert_eq!(err, TradeError::rate_unavailable("EUR", "GBP"));
    }

    #[tokio::test]
    async fn test_advisory_returns_stale_rate() {
        let resolver = seeded(&[("EUR_USD", 1.08)], 3600, FreshnessPolicy::Advisory).await;
        let resolved = resolver.resolve_detailed("EUR", "USD").await.unwrap();
        assert_eq!(resolved.rate, 1.08);
        assert!(resolved.stale);
    }

    #[tokio::test]
    async fn test_strict_treats_stale_as_missing() {
        let resolver = seeded(&[("EUR_USD", 1.08)], 3600, FreshnessPolicy::Strict).await;
        assert!(matches!(
            resolver.resolve("EUR", "USD").await,
            Err(TradeError::RateUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_strict_falls_back_to_fresh_inverse() {
        let resolver = seeded(&[("EUR_USD", 1.08)], 3600, FreshnessPolicy::Strict).await;
        resolver
            .store
            .put(
                &HashMap::from([(PairKey::new("USD", "EUR"), 0.9)]),
                "fresh",
            )
            .await
            .unwrap();

        let resolved = resolver.resolve_detailed("EUR", "USD").await.unwrap();
        assert_eq!(resolved.path, RatePath::Inverse);
        assert!((resolved.rate - 1.0 / 0.9).abs() < 1e-12);
        assert!(!resolved.stale);
    }

    #[tokio::test]
    async fn test_invalid_code_is_validation_error() {
        let resolver = seeded(&[], 0, FreshnessPolicy::Advisory).await;
        assert!(matches!(
            resolver.resolve("", "USD").await,
            Err(TradeError::Validation(_))
        ));
    }

    #[test]
    fn test_non_positive_record_falls_back_to_inverse() {
        let now = Utc::now();
        let record = |rate: f64| crate::core::rate::RateRecord {
            rate,
            updated_at: now,
            source: "test".to_string(),
        };
        let snapshot = RatesSnapshot {
            pairs: [
                ("EUR_USD".to_string(), record(0.0)),
                ("USD_EUR".to_string(), record(0.8)),
            ]
            .into_iter()
            .collect(),
            last_refresh: Some(now),
        };
        let resolver = RateResolver::new(
            Arc::new(RateStore::in_memory()),
            "USD",
            300,
            FreshnessPolicy::Advisory,
        );

        let resolved = resolver.resolve_in(&snapshot, "EUR", "USD", now).unwrap();
        assert_eq!(resolved.path, RatePath::Inverse);
        assert!((resolved.rate - 1.25).abs() < 1e-12);
    }
}

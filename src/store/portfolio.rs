use super::KeyValueCollection;
use crate::core::error::{TradeError, TradeResult};
use crate::core::portfolio::Portfolio;
use std::sync::Arc;
use tracing::debug;

/// Portfolios stored as JSON under `user:{id}` keys.
pub struct PortfolioRepository {
    collection: Arc<dyn KeyValueCollection>,
}

impl PortfolioRepository {
    pub fn new(collection: Arc<dyn KeyValueCollection>) -> Self {
        Self { collection }
    }

    fn key(user_id: u64) -> String {
        format!("user:{user_id}")
    }

    pub async fn load(&self, user_id: u64) -> TradeResult<Option<Portfolio>> {
        let bytes = self
            .collection
            .get(Self::key(user_id).as_bytes())
            .await
            .map_err(TradeError::storage)?;

        match bytes {
            Some(bytes) => {
                let portfolio: Portfolio = serde_json::from_slice(&bytes).map_err(|e| {
                    TradeError::Storage(format!("Corrupt portfolio for user {user_id}: {e}"))
                })?;
                Ok(Some(portfolio))
            }
            None => Ok(None),
        }
    }

    /// Loads the portfolio, or returns a new empty one that is not yet saved.
    pub async fn load_or_create(&self, user_id: u64) -> TradeResult<Portfolio> {
        match self.load(user_id).await? {
            Some(portfolio) => Ok(portfolio),
            None => {
                debug!("No portfolio for user {}, starting empty", user_id);
                Ok(Portfolio::new(user_id))
            }
        }
    }

    pub async fn save(&self, portfolio: &Portfolio) -> TradeResult<()> {
        let bytes = serde_json::to_vec(portfolio).map_err(TradeError::storage)?;
        self.collection
            .put(Self::key(portfolio.user_id).as_bytes(), &bytes)
            .await
            .map_err(TradeError::storage)?;
        debug!("Saved portfolio for user {}", portfolio.user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryCollection;

    #[tokio::test]
    async fn test_save_and_load() {
        let repo = PortfolioRepository::new(Arc::new(MemoryCollection::new()));
        assert!(repo.load(1).await.unwrap().is_none());

        let mut portfolio = repo.load_or_create(1).await.unwrap();
        portfolio.wallet_mut("USD").deposit(250.0).unwrap();
        repo.save(&portfolio).await.unwrap();

        let loaded = repo.load(1).await.unwrap().unwrap();
        assert_eq!(loaded.balance("USD"), 250.0);
        assert!(repo.load(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_storage_error() {
        let collection = Arc::new(MemoryCollection::new());
        collection.put(b"user:3", b"not json").await.unwrap();
        let repo = PortfolioRepository::new(collection);

        let err = repo.load(3).await.unwrap_err();
        assert!(matches!(err, TradeError::Storage(_)));
    }
}

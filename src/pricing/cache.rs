//! Latest-price cache backed by the ledger store
//!
//! Reads never check staleness; freshness is owned by the refresh
//! scheduler. A miss synthesizes a price, writes it through and returns
//! whatever the store holds afterwards.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::common::errors::Result;
use crate::common::traits::{LedgerStore, PriceFeed};
use crate::common::types::{now, PriceSnapshot};

/// Outcome of one refresh pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Symbols whose price was rewritten
    pub updated: Vec<String>,
    /// Symbols skipped because quoting or persisting failed
    pub failed: Vec<String>,
}

impl RefreshReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct PriceCache {
    store: Arc<dyn LedgerStore>,
    feed: Arc<dyn PriceFeed>,
    currency: String,
}

impl PriceCache {
    pub fn new(store: Arc<dyn LedgerStore>, feed: Arc<dyn PriceFeed>, currency: impl Into<String>) -> Self {
        Self {
            store,
            feed,
            currency: currency.into(),
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Current price for a symbol, filling the cache on a miss
    #[instrument(skip(self))]
    pub async fn get_current_price(&self, symbol: &str) -> Result<Decimal> {
        if let Some(stored) = self.store.latest_price(symbol).await? {
            return Ok(stored.price);
        }

        let quoted = self.feed.quote(symbol)?;
        let stored = self
            .store
            .fill_price(symbol, quoted, &self.currency, now())
            .await?;
        debug!(symbol, price = %stored.price, "Filled price cache on miss");
        Ok(stored.price)
    }

    /// Re-quote every symbol that has ever been rewarded
    ///
    /// Fails only when the symbol list cannot be read. A symbol that cannot
    /// be quoted or written is logged and skipped.
    #[instrument(skip(self))]
    pub async fn refresh_all(&self) -> Result<RefreshReport> {
        let symbols = self.store.reward_symbols().await?;
        let mut report = RefreshReport::default();

        for symbol in symbols {
            match self.refresh_symbol(&symbol).await {
                Ok(price) => {
                    debug!(symbol = %symbol, price = %price, "Refreshed price");
                    report.updated.push(symbol);
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Failed to refresh price, skipping");
                    report.failed.push(symbol);
                }
            }
        }

        info!(
            updated = report.updated.len(),
            failed = report.failed.len(),
            "Price refresh complete"
        );
        Ok(report)
    }

    /// Every price recorded for a symbol, oldest first
    pub async fn history(&self, symbol: &str) -> Result<Vec<PriceSnapshot>> {
        self.store.price_history(symbol).await
    }

    async fn refresh_symbol(&self, symbol: &str) -> Result<Decimal> {
        let price = self.feed.quote(symbol)?;
        let stored = self
            .store
            .upsert_price(symbol, price, &self.currency, now())
            .await?;
        Ok(stored.price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::errors::LedgerError;
    use crate::common::traits::LedgerTransaction;
    use crate::common::types::Reward;
    use crate::config::types::PricingConfig;
    use crate::pricing::feed::SyntheticPriceFeed;
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    struct FixedFeed(Decimal);

    impl PriceFeed for FixedFeed {
        fn quote(&self, _symbol: &str) -> Result<Decimal> {
            Ok(self.0)
        }
    }

    /// Fails for one symbol, quotes a fixed price for the rest
    struct FlakyFeed {
        broken: &'static str,
        price: Decimal,
    }

    impl PriceFeed for FlakyFeed {
        fn quote(&self, symbol: &str) -> Result<Decimal> {
            if symbol == self.broken {
                return Err(LedgerError::PriceUnavailable {
                    symbol: symbol.to_string(),
                    reason: "feed offline".to_string(),
                });
            }
            Ok(self.price)
        }
    }

    async fn insert_reward(store: &MemoryStore, symbol: &str) {
        let at = now();
        let reward = Reward {
            reward_id: uuid::Uuid::new_v4().to_string(),
            user_id: "u1".to_string(),
            stock_symbol: symbol.to_string(),
            quantity: dec!(1),
            price_per_share: dec!(10),
            total_cost: dec!(10),
            brokerage_fee: Decimal::ZERO,
            stt_fee: Decimal::ZERO,
            gst_fee: Decimal::ZERO,
            sebi_charges: Decimal::ZERO,
            stamp_duty: Decimal::ZERO,
            total_fees: Decimal::ZERO,
            total_company_cost: dec!(10),
            rewarded_at: at,
            created_at: at,
        };
        let mut tx = store.begin().await.unwrap();
        tx.insert_reward(&reward).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_miss_fills_and_hit_is_stable() {
        let store = Arc::new(MemoryStore::new());
        let feed = Arc::new(SyntheticPriceFeed::with_seed(&PricingConfig::default(), 11));
        let cache = PriceCache::new(store.clone(), feed, "INR");

        let first = cache.get_current_price("RELIANCE").await.unwrap();
        assert!(first > Decimal::ZERO);
        for _ in 0..5 {
            assert_eq!(cache.get_current_price("RELIANCE").await.unwrap(), first);
        }

        let stored = store.latest_price("RELIANCE").await.unwrap().unwrap();
        assert_eq!(stored.price, first);
        assert_eq!(stored.currency, "INR");
    }

    #[tokio::test]
    async fn test_hit_ignores_feed() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_price("TCS", dec!(3333.33), "INR", now())
            .await
            .unwrap();
        let cache = PriceCache::new(store, Arc::new(FixedFeed(dec!(1))), "INR");
        assert_eq!(cache.get_current_price("TCS").await.unwrap(), dec!(3333.33));
    }

    #[test]
    fn test_fill_records_configured_currency() {
        let store = Arc::new(MemoryStore::new());
        let cache = PriceCache::new(store.clone(), Arc::new(FixedFeed(dec!(77))), "USD");
        assert_eq!(cache.currency(), "USD");

        let price = tokio_test::assert_ok!(tokio_test::block_on(cache.get_current_price("AAPL")));
        assert_eq!(price, dec!(77));
        let stored = tokio_test::block_on(store.latest_price("AAPL")).unwrap().unwrap();
        assert_eq!(stored.currency, "USD");
    }

    #[tokio::test]
    async fn test_fill_and_refresh_append_snapshots() {
        let store = Arc::new(MemoryStore::new());
        insert_reward(&store, "ITC").await;
        let cache = PriceCache::new(store.clone(), Arc::new(FixedFeed(dec!(450))), "INR");

        cache.get_current_price("ITC").await.unwrap();
        cache.get_current_price("ITC").await.unwrap();
        assert_eq!(cache.history("ITC").await.unwrap().len(), 1);

        // Snapshots are keyed by fetch time at microsecond precision
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        cache.refresh_all().await.unwrap();
        let history = cache.history("ITC").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].fetched_at <= history[1].fetched_at);
        assert!(history.iter().all(|s| s.symbol == "ITC" && s.price == dec!(450)));
        assert!(cache.history("TCS").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_with_no_rewards_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let cache = PriceCache::new(store, Arc::new(FixedFeed(dec!(10))), "INR");
        let report = cache.refresh_all().await.unwrap();
        assert!(report.updated.is_empty());
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_refresh_skips_failing_symbol() {
        let store = Arc::new(MemoryStore::new());
        for symbol in ["TCS", "ITC", "SBI", "TCS"] {
            insert_reward(&store, symbol).await;
        }

        let feed = FlakyFeed {
            broken: "SBI",
            price: dec!(123.45),
        };
        let cache = PriceCache::new(store.clone(), Arc::new(feed), "INR");
        let report = cache.refresh_all().await.unwrap();

        assert_eq!(report.updated, vec!["ITC".to_string(), "TCS".to_string()]);
        assert_eq!(report.failed, vec!["SBI".to_string()]);
        assert_eq!(
            store.latest_price("TCS").await.unwrap().unwrap().price,
            dec!(123.45)
        );
        assert!(store.latest_price("SBI").await.unwrap().is_none());
    }
}

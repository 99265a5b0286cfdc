use std::sync::Arc;

use crate::common::traits::{LedgerStore, PriceFeed};
use crate::config::AppConfig;
use crate::ledger::{FeeCalculator, IdempotencyGuard, LedgerEngine, Reports, RewardService};
use crate::pricing::PriceCache;

/// Shared handles for the HTTP handlers and background tasks
pub struct AppState {
    pub rewards: RewardService,
    pub reports: Reports,
    pub prices: Arc<PriceCache>,
    pub guard: Arc<IdempotencyGuard>,
}

impl AppState {
    /// Wire every component around one store and one price feed
    pub fn new(store: Arc<dyn LedgerStore>, feed: Arc<dyn PriceFeed>, config: &AppConfig) -> Self {
        let prices = Arc::new(PriceCache::new(
            store.clone(),
            feed,
            config.pricing.currency.clone(),
        ));
        let guard = Arc::new(IdempotencyGuard::new(store.clone(), config.idempotency.ttl()));
        let engine = LedgerEngine::new(
            store.clone(),
            prices.clone(),
            FeeCalculator::new(config.fees.clone()),
        );

        Self {
            rewards: RewardService::new(guard.clone(), engine),
            reports: Reports::new(store, prices.clone()),
            prices,
            guard,
        }
    }
}

//! Common test utilities and fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use mockall::mock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use stock_rewards::api::AppState;
use stock_rewards::common::types::{IdempotencyStatus, KeyClaim, PriceSnapshot};
use stock_rewards::config::types::FeeRates;
use stock_rewards::{
    AccountType, AppConfig, LedgerEntry, LedgerError, LedgerStore, LedgerTransaction,
    MemoryStore, PriceFeed, Result, Reward, StockPrice, UserHolding,
};

/// Rate table with round numbers: brokerage 0.5%, STT 0.1%, GST 18%
pub fn reference_rates() -> FeeRates {
    FeeRates {
        brokerage_percent: dec!(0.5),
        stt_percent: dec!(0.1),
        gst_on_brokerage_percent: dec!(18),
        sebi_charges_percent: dec!(0),
        stamp_duty_percent: dec!(0),
    }
}

pub fn reference_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.fees = reference_rates();
    config
}

/// Wire the full application over a store with fixed prices
pub fn app_state(store: Arc<dyn LedgerStore>, feed: Arc<dyn PriceFeed>) -> Arc<AppState> {
    Arc::new(AppState::new(store, feed, &reference_config()))
}

/// Rewards of a user, oldest first
pub async fn all_rewards(store: &dyn LedgerStore, user_id: &str) -> Vec<Reward> {
    store
        .rewards_before(user_id, Utc::now() + chrono::Duration::days(3650))
        .await
        .unwrap()
}

/// Noon local time on a day relative to today, as UTC
pub fn local_noon(days_ago: u64) -> DateTime<Utc> {
    let day: NaiveDate = Local::now().date_naive() - chrono::Days::new(days_ago);
    Local
        .from_local_datetime(&day.and_hms_opt(12, 0, 0).unwrap())
        .earliest()
        .unwrap()
        .with_timezone(&Utc)
}

// ============================================================================
// Price feeds
// ============================================================================

/// Fixed price per symbol; unknown symbols fail
pub struct StaticPriceFeed {
    prices: HashMap<String, Decimal>,
}

impl StaticPriceFeed {
    pub fn new(prices: &[(&str, Decimal)]) -> Self {
        Self {
            prices: prices
                .iter()
                .map(|(symbol, price)| (symbol.to_string(), *price))
                .collect(),
        }
    }

    pub fn standard() -> Self {
        Self::new(&[
            ("RELIANCE", dec!(2400)),
            ("TCS", dec!(3500)),
            ("ITC", dec!(450)),
            ("SBI", dec!(600)),
            ("WIPRO", dec!(400)),
        ])
    }
}

impl PriceFeed for StaticPriceFeed {
    fn quote(&self, symbol: &str) -> Result<Decimal> {
        self.prices
            .get(symbol)
            .copied()
            .ok_or_else(|| LedgerError::PriceUnavailable {
                symbol: symbol.to_string(),
                reason: "no fixed price".to_string(),
            })
    }
}

mock! {
    pub Feed {}

    impl PriceFeed for Feed {
        fn quote(&self, symbol: &str) -> Result<Decimal>;
    }
}

// ============================================================================
// Fault injection
// ============================================================================

/// Memory store whose transactions fail inserting one kind of ledger entry
///
/// The first `failures` inserts of `fail_on` entries return a persistence
/// error; later ones succeed.
pub struct FaultyStore {
    inner: MemoryStore,
    fail_on: AccountType,
    failures_left: Arc<AtomicUsize>,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore, fail_on: AccountType, failures: usize) -> Self {
        Self {
            inner,
            fail_on,
            failures_left: Arc::new(AtomicUsize::new(failures)),
        }
    }
}

#[async_trait]
impl LedgerStore for FaultyStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        Ok(Box::new(FaultyTransaction {
            inner: self.inner.begin().await?,
            fail_on: self.fail_on,
            failures_left: self.failures_left.clone(),
        }))
    }

    async fn latest_price(&self, symbol: &str) -> Result<Option<StockPrice>> {
        self.inner.latest_price(symbol).await
    }

    async fn fill_price(&self, symbol: &str, price: Decimal, currency: &str, at: DateTime<Utc>) -> Result<StockPrice> {
        self.inner.fill_price(symbol, price, currency, at).await
    }

    async fn upsert_price(&self, symbol: &str, price: Decimal, currency: &str, at: DateTime<Utc>) -> Result<StockPrice> {
        self.inner.upsert_price(symbol, price, currency, at).await
    }

    async fn price_history(&self, symbol: &str) -> Result<Vec<PriceSnapshot>> {
        self.inner.price_history(symbol).await
    }

    async fn reward_symbols(&self) -> Result<Vec<String>> {
        self.inner.reward_symbols().await
    }

    async fn claim_idempotency_key(
        &self,
        key: &str,
        request_payload: &serde_json::Value,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<KeyClaim> {
        self.inner
            .claim_idempotency_key(key, request_payload, now, expires_at)
            .await
    }

    async fn complete_idempotency_key(
        &self,
        key: &str,
        response_payload: &serde_json::Value,
        status: IdempotencyStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.inner
            .complete_idempotency_key(key, response_payload, status, at)
            .await
    }

    async fn delete_expired_idempotency_keys(&self, now: DateTime<Utc>) -> Result<u64> {
        self.inner.delete_expired_idempotency_keys(now).await
    }

    async fn rewards_between(&self, user_id: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Reward>> {
        self.inner.rewards_between(user_id, from, to).await
    }

    async fn rewards_before(&self, user_id: &str, before: DateTime<Utc>) -> Result<Vec<Reward>> {
        self.inner.rewards_before(user_id, before).await
    }

    async fn ledger_entries(&self, reward_id: &str) -> Result<Vec<LedgerEntry>> {
        self.inner.ledger_entries(reward_id).await
    }

    async fn holdings_for_user(&self, user_id: &str) -> Result<Vec<UserHolding>> {
        self.inner.holdings_for_user(user_id).await
    }

    async fn holding(&self, user_id: &str, symbol: &str) -> Result<Option<UserHolding>> {
        self.inner.holding(user_id, symbol).await
    }
}

struct FaultyTransaction {
    inner: Box<dyn LedgerTransaction>,
    fail_on: AccountType,
    failures_left: Arc<AtomicUsize>,
}

#[async_trait]
impl LedgerTransaction for FaultyTransaction {
    async fn insert_reward(&mut self, reward: &Reward) -> Result<()> {
        self.inner.insert_reward(reward).await
    }

    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<()> {
        let inject = entry.account_type == self.fail_on
            && self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if inject {
            return Err(LedgerError::Persistence(format!(
                "injected failure inserting {} entry",
                entry.account_type
            )));
        }
        self.inner.insert_ledger_entry(entry).await
    }

    async fn upsert_holding(
        &mut self,
        user_id: &str,
        symbol: &str,
        delta_quantity: Decimal,
        delta_cost: Decimal,
        at: DateTime<Utc>,
    ) -> Result<UserHolding> {
        self.inner
            .upsert_holding(user_id, symbol, delta_quantity, delta_cost, at)
            .await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.rollback().await
    }
}

//! Trait definitions for storage and price sources

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::errors::Result;
use super::types::{
    IdempotencyStatus, KeyClaim, LedgerEntry, PriceSnapshot, Reward, StockPrice, UserHolding,
};

/// Explicit handle to the ledger's persistent state
///
/// Every component receives one of these instead of reaching for a global.
/// Mutations that can race (holding increments, idempotency claims, price
/// fills) are single atomic operations on the implementation side.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a unit of work for posting a reward
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>>;

    /// Latest stored price for a symbol
    async fn latest_price(&self, symbol: &str) -> Result<Option<StockPrice>>;

    /// Insert a price only if the symbol has none yet
    ///
    /// Returns the row that is stored afterwards, which is the existing one
    /// when another writer got there first. Both price writes also append a
    /// snapshot keyed by `(symbol, fetched_at)`.
    async fn fill_price(
        &self,
        symbol: &str,
        price: Decimal,
        currency: &str,
        at: DateTime<Utc>,
    ) -> Result<StockPrice>;

    /// Overwrite the latest price for a symbol, creating it if absent
    async fn upsert_price(
        &self,
        symbol: &str,
        price: Decimal,
        currency: &str,
        at: DateTime<Utc>,
    ) -> Result<StockPrice>;

    /// Every recorded snapshot for a symbol, oldest first
    async fn price_history(&self, symbol: &str) -> Result<Vec<PriceSnapshot>>;

    /// Distinct symbols that appear in any reward, sorted
    async fn reward_symbols(&self) -> Result<Vec<String>>;

    /// Atomically take ownership of an idempotency key
    ///
    /// Inserts a PROCESSING row when the key is absent, expired or FAILED.
    /// Backed by a uniqueness constraint, never by a prior read.
    async fn claim_idempotency_key(
        &self,
        key: &str,
        request_payload: &serde_json::Value,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<KeyClaim>;

    /// Record the terminal status and response for a key
    async fn complete_idempotency_key(
        &self,
        key: &str,
        response_payload: &serde_json::Value,
        status: IdempotencyStatus,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Delete keys whose expiry has passed, regardless of status
    async fn delete_expired_idempotency_keys(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Rewards for a user with `from <= rewarded_at < to`, newest first
    async fn rewards_between(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Reward>>;

    /// Rewards for a user with `rewarded_at < before`, oldest first
    async fn rewards_before(&self, user_id: &str, before: DateTime<Utc>) -> Result<Vec<Reward>>;

    /// Audit trail of one reward in creation order
    async fn ledger_entries(&self, reward_id: &str) -> Result<Vec<LedgerEntry>>;

    /// Holdings with positive quantity, ordered by symbol
    async fn holdings_for_user(&self, user_id: &str) -> Result<Vec<UserHolding>>;

    /// Holding for one user and symbol
    async fn holding(&self, user_id: &str, symbol: &str) -> Result<Option<UserHolding>>;
}

/// A single reward-posting transaction
///
/// Nothing written through a transaction is visible until `commit`.
/// Dropping it without committing discards every write.
#[async_trait]
pub trait LedgerTransaction: Send {
    async fn insert_reward(&mut self, reward: &Reward) -> Result<()>;

    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<()>;

    /// Increment a holding in place and return its new totals
    async fn upsert_holding(
        &mut self,
        user_id: &str,
        symbol: &str,
        delta_quantity: Decimal,
        delta_cost: Decimal,
        at: DateTime<Utc>,
    ) -> Result<UserHolding>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Source of fresh prices for the cache
pub trait PriceFeed: Send + Sync {
    /// Produce a new price for a symbol
    fn quote(&self, symbol: &str) -> Result<Decimal>;
}

//! In-process ledger store
//!
//! Same contract as the Postgres store. A transaction holds the store lock
//! for its whole lifetime and writes into a private copy of the state, which
//! replaces the shared state only on commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::common::errors::{LedgerError, Result};
use crate::common::traits::{LedgerStore, LedgerTransaction};
use crate::common::types::{
    average_cost, IdempotencyRecord, IdempotencyStatus, KeyClaim, LedgerEntry, PriceSnapshot,
    Reward, StockPrice, UserHolding,
};

#[derive(Debug, Default, Clone)]
struct MemoryState {
    rewards: Vec<Reward>,
    ledger_entries: Vec<LedgerEntry>,
    /// Keyed by (user_id, stock_symbol)
    holdings: BTreeMap<(String, String), UserHolding>,
    prices: HashMap<String, StockPrice>,
    price_snapshots: Vec<PriceSnapshot>,
    idempotency_keys: HashMap<String, IdempotencyRecord>,
}

impl MemoryState {
    /// Append a snapshot unless `(symbol, fetched_at)` is already recorded
    fn record_snapshot(&mut self, price: &StockPrice) {
        let seen = self
            .price_snapshots
            .iter()
            .any(|s| s.symbol == price.symbol && s.fetched_at == price.fetched_at);
        if !seen {
            self.price_snapshots.push(PriceSnapshot::from(price));
        }
    }
}

/// Ledger store held entirely in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of idempotency rows currently stored
    pub async fn idempotency_key_count(&self) -> usize {
        self.state.lock().await.idempotency_keys.len()
    }

    /// Stored idempotency row for a key
    pub async fn idempotency_record(&self, key: &str) -> Option<IdempotencyRecord> {
        self.state.lock().await.idempotency_keys.get(key).cloned()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }

    async fn latest_price(&self, symbol: &str) -> Result<Option<StockPrice>> {
        Ok(self.state.lock().await.prices.get(symbol).cloned())
    }

    async fn fill_price(
        &self,
        symbol: &str,
        price: Decimal,
        currency: &str,
        at: DateTime<Utc>,
    ) -> Result<StockPrice> {
        let mut state = self.state.lock().await;
        let stored = state
            .prices
            .entry(symbol.to_string())
            .or_insert_with(|| StockPrice {
                symbol: symbol.to_string(),
                price,
                currency: currency.to_string(),
                fetched_at: at,
                updated_at: at,
                created_at: at,
            })
            .clone();
        state.record_snapshot(&stored);
        Ok(stored)
    }

    async fn upsert_price(
        &self,
        symbol: &str,
        price: Decimal,
        currency: &str,
        at: DateTime<Utc>,
    ) -> Result<StockPrice> {
        let mut state = self.state.lock().await;
        let stored = state
            .prices
            .entry(symbol.to_string())
            .and_modify(|p| {
                p.price = price;
                p.currency = currency.to_string();
                p.fetched_at = at;
                p.updated_at = at;
            })
            .or_insert_with(|| StockPrice {
                symbol: symbol.to_string(),
                price,
                currency: currency.to_string(),
                fetched_at: at,
                updated_at: at,
                created_at: at,
            })
            .clone();
        state.record_snapshot(&stored);
        Ok(stored)
    }

    async fn price_history(&self, symbol: &str) -> Result<Vec<PriceSnapshot>> {
        let state = self.state.lock().await;
        Ok(state
            .price_snapshots
            .iter()
            .filter(|s| s.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn reward_symbols(&self) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        let symbols: BTreeSet<String> = state
            .rewards
            .iter()
            .map(|r| r.stock_symbol.clone())
            .collect();
        Ok(symbols.into_iter().collect())
    }

    async fn claim_idempotency_key(
        &self,
        key: &str,
        request_payload: &serde_json::Value,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<KeyClaim> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.idempotency_keys.get(key) {
            if !existing.is_reclaimable(now) {
                return Ok(KeyClaim::Existing(existing.clone()));
            }
        }

        state.idempotency_keys.insert(
            key.to_string(),
            IdempotencyRecord {
                key: key.to_string(),
                request_payload: request_payload.clone(),
                response_payload: None,
                status: IdempotencyStatus::Processing,
                created_at: now,
                completed_at: None,
                expires_at,
            },
        );
        Ok(KeyClaim::Claimed)
    }

    async fn complete_idempotency_key(
        &self,
        key: &str,
        response_payload: &serde_json::Value,
        status: IdempotencyStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.idempotency_keys.get_mut(key) {
            Some(record) => {
                record.response_payload = Some(response_payload.clone());
                record.status = status;
                record.completed_at = Some(at);
                Ok(())
            }
            None => Err(LedgerError::Persistence(format!(
                "idempotency key not found: {}",
                key
            ))),
        }
    }

    async fn delete_expired_idempotency_keys(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let before = state.idempotency_keys.len();
        state.idempotency_keys.retain(|_, record| !record.is_expired(now));
        Ok((before - state.idempotency_keys.len()) as u64)
    }

    async fn rewards_between(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Reward>> {
        let state = self.state.lock().await;
        let mut rewards: Vec<Reward> = state
            .rewards
            .iter()
            .filter(|r| r.user_id == user_id && r.rewarded_at >= from && r.rewarded_at < to)
            .cloned()
            .collect();
        rewards.sort_by(|a, b| b.rewarded_at.cmp(&a.rewarded_at));
        Ok(rewards)
    }

    async fn rewards_before(&self, user_id: &str, before: DateTime<Utc>) -> Result<Vec<Reward>> {
        let state = self.state.lock().await;
        let mut rewards: Vec<Reward> = state
            .rewards
            .iter()
            .filter(|r| r.user_id == user_id && r.rewarded_at < before)
            .cloned()
            .collect();
        rewards.sort_by(|a, b| a.rewarded_at.cmp(&b.rewarded_at));
        Ok(rewards)
    }

    async fn ledger_entries(&self, reward_id: &str) -> Result<Vec<LedgerEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .ledger_entries
            .iter()
            .filter(|e| e.reward_id == reward_id)
            .cloned()
            .collect())
    }

    async fn holdings_for_user(&self, user_id: &str) -> Result<Vec<UserHolding>> {
        let state = self.state.lock().await;
        Ok(state
            .holdings
            .values()
            .filter(|h| h.user_id == user_id && h.total_quantity > Decimal::ZERO)
            .cloned()
            .collect())
    }

    async fn holding(&self, user_id: &str, symbol: &str) -> Result<Option<UserHolding>> {
        let state = self.state.lock().await;
        Ok(state
            .holdings
            .get(&(user_id.to_string(), symbol.to_string()))
            .cloned())
    }
}

/// Unit of work over a private copy of the store state
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl LedgerTransaction for MemoryTransaction {
    async fn insert_reward(&mut self, reward: &Reward) -> Result<()> {
        if self
            .working
            .rewards
            .iter()
            .any(|r| r.reward_id == reward.reward_id)
        {
            return Err(LedgerError::DuplicateRequest {
                key: reward.reward_id.clone(),
            });
        }
        self.working.rewards.push(reward.clone());
        Ok(())
    }

    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<()> {
        if !self
            .working
            .rewards
            .iter()
            .any(|r| r.reward_id == entry.reward_id)
        {
            return Err(LedgerError::Persistence(format!(
                "ledger entry {} references unknown reward {}",
                entry.entry_id, entry.reward_id
            )));
        }
        if entry.debit < Decimal::ZERO
            || entry.credit < Decimal::ZERO
            || (!entry.debit.is_zero() && !entry.credit.is_zero())
        {
            return Err(LedgerError::Persistence(format!(
                "ledger entry {} must carry exactly one non-negative side",
                entry.entry_id
            )));
        }
        self.working.ledger_entries.push(entry.clone());
        Ok(())
    }

    async fn upsert_holding(
        &mut self,
        user_id: &str,
        symbol: &str,
        delta_quantity: Decimal,
        delta_cost: Decimal,
        at: DateTime<Utc>,
    ) -> Result<UserHolding> {
        let holding = self
            .working
            .holdings
            .entry((user_id.to_string(), symbol.to_string()))
            .or_insert_with(|| UserHolding {
                user_id: user_id.to_string(),
                stock_symbol: symbol.to_string(),
                total_quantity: Decimal::ZERO,
                average_cost: Decimal::ZERO,
                total_cost: Decimal::ZERO,
                updated_at: at,
            });

        let (Some(total_quantity), Some(total_cost)) = (
            holding.total_quantity.checked_add(delta_quantity),
            holding.total_cost.checked_add(delta_cost),
        ) else {
            return Err(LedgerError::Persistence(format!(
                "holding {}/{} totals out of range",
                user_id, symbol
            )));
        };
        holding.total_quantity = total_quantity;
        holding.total_cost = total_cost;
        holding.average_cost = average_cost(holding.total_cost, holding.total_quantity);
        holding.updated_at = at;
        Ok(holding.clone())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

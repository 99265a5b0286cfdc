//! Per-user, per-symbol running positions

use rust_decimal::Decimal;
use std::sync::Arc;

use crate::common::errors::{LedgerError, Result};
use crate::common::traits::{LedgerStore, LedgerTransaction};
use crate::common::types::{now, UserHolding};

/// Maintains holdings by accumulation only
///
/// Quantity and cost only ever grow; the average cost is recomputed from the
/// two running totals on every update.
#[derive(Clone)]
pub struct HoldingsAggregator {
    store: Arc<dyn LedgerStore>,
}

impl HoldingsAggregator {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Add a reward to a holding inside an open transaction
    pub async fn upsert(
        &self,
        tx: &mut dyn LedgerTransaction,
        user_id: &str,
        symbol: &str,
        delta_quantity: Decimal,
        delta_cost: Decimal,
    ) -> Result<UserHolding> {
        if delta_quantity <= Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "holding quantity delta must be positive, got {}",
                delta_quantity
            )));
        }
        if delta_cost < Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "holding cost delta must not be negative, got {}",
                delta_cost
            )));
        }

        tx.upsert_holding(user_id, symbol, delta_quantity, delta_cost, now())
            .await
    }

    /// Holdings with a positive quantity, ordered by symbol
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<UserHolding>> {
        self.store.holdings_for_user(user_id).await
    }

    pub async fn get(&self, user_id: &str, symbol: &str) -> Result<Option<UserHolding>> {
        self.store.holding(user_id, symbol).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    async fn post(aggregator: &HoldingsAggregator, store: &MemoryStore, symbol: &str, qty: Decimal, cost: Decimal) -> UserHolding {
        let mut tx = store.begin().await.unwrap();
        let holding = aggregator
            .upsert(tx.as_mut(), "u1", symbol, qty, cost)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        holding
    }

    #[tokio::test]
    async fn test_average_cost_independent_of_order() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        let agg_a = HoldingsAggregator::new(Arc::new(a.clone()));
        let agg_b = HoldingsAggregator::new(Arc::new(b.clone()));

        post(&agg_a, &a, "TCS", dec!(3), dec!(10500)).await;
        let first = post(&agg_a, &a, "TCS", dec!(7), dec!(23800.70)).await;

        post(&agg_b, &b, "TCS", dec!(7), dec!(23800.70)).await;
        let second = post(&agg_b, &b, "TCS", dec!(3), dec!(10500)).await;

        assert_eq!(first.total_quantity, dec!(10));
        assert_eq!(first.total_cost, dec!(34300.70));
        assert_eq!(first.average_cost, dec!(3430.07));
        assert_eq!(first.average_cost, second.average_cost);
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_symbol() {
        let store = MemoryStore::new();
        let aggregator = HoldingsAggregator::new(Arc::new(store.clone()));
        for symbol in ["WIPRO", "ITC", "TCS"] {
            post(&aggregator, &store, symbol, dec!(1), dec!(100)).await;
        }

        let symbols: Vec<String> = aggregator
            .list_for_user("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.stock_symbol)
            .collect();
        assert_eq!(symbols, vec!["ITC", "TCS", "WIPRO"]);
        assert!(aggregator.list_for_user("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_non_positive_quantity() {
        let store = MemoryStore::new();
        let aggregator = HoldingsAggregator::new(Arc::new(store.clone()));
        let mut tx = store.begin().await.unwrap();

        let err = aggregator
            .upsert(tx.as_mut(), "u1", "TCS", dec!(0), dec!(10))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let err = aggregator
            .upsert(tx.as_mut(), "u1", "TCS", dec!(1), dec!(-10))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_zero_cost_keeps_quantity() {
        let store = MemoryStore::new();
        let aggregator = HoldingsAggregator::new(Arc::new(store.clone()));
        let holding = post(&aggregator, &store, "SBI", dec!(4), dec!(0)).await;
        assert_eq!(holding.total_quantity, dec!(4));
        assert_eq!(holding.average_cost, dec!(0));
        assert_eq!(aggregator.get("u1", "SBI").await.unwrap(), Some(holding));
    }
}

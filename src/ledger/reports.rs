//! Read-only views over rewards and holdings
//!
//! Every value is computed at the current cached price, including the value
//! of backdated rewards.

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::instrument;

use crate::common::errors::{LedgerError, Result};
use crate::common::traits::LedgerStore;
use crate::common::types::{
    checked_value, round_money, DailyInrValue, HistoricalInr, HoldingValuation, LedgerEntry, Portfolio,
    SymbolQuantity, TodayRewards, UserStats,
};
use crate::pricing::PriceCache;

pub struct Reports {
    store: Arc<dyn LedgerStore>,
    prices: Arc<PriceCache>,
}

impl Reports {
    pub fn new(store: Arc<dyn LedgerStore>, prices: Arc<PriceCache>) -> Self {
        Self { store, prices }
    }

    /// Rewards granted on the current local day, newest first
    pub async fn today_rewards(&self, user_id: &str) -> Result<TodayRewards> {
        self.rewards_on(user_id, Local::now().date_naive()).await
    }

    /// Rewards granted on one local calendar day, newest first
    pub async fn rewards_on(&self, user_id: &str, date: NaiveDate) -> Result<TodayRewards> {
        let (from, to) = local_day_bounds(date)?;
        let rewards = self.store.rewards_between(user_id, from, to).await?;
        Ok(TodayRewards {
            user_id: user_id.to_string(),
            date,
            rewards,
        })
    }

    /// INR value per past day, at current prices, oldest day first
    pub async fn historical_inr(&self, user_id: &str) -> Result<HistoricalInr> {
        self.historical_inr_before(user_id, Local::now().date_naive())
            .await
    }

    /// INR value per local day strictly before `today`
    #[instrument(skip(self))]
    pub async fn historical_inr_before(&self, user_id: &str, today: NaiveDate) -> Result<HistoricalInr> {
        let (start_of_today, _) = local_day_bounds(today)?;
        let rewards = self.store.rewards_before(user_id, start_of_today).await?;

        let mut prices: HashMap<String, Decimal> = HashMap::new();
        let mut by_day: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();
        for reward in &rewards {
            let price = match prices.get(&reward.stock_symbol) {
                Some(price) => *price,
                None => {
                    let price = self.prices.get_current_price(&reward.stock_symbol).await?;
                    prices.insert(reward.stock_symbol.clone(), price);
                    price
                }
            };
            let day = reward.rewarded_at.with_timezone(&Local).date_naive();
            let total = by_day.entry(day).or_default();
            let so_far = *total;
            *total = reward
                .quantity
                .checked_mul(price)
                .and_then(|value| so_far.checked_add(value))
                .ok_or_else(|| out_of_range(user_id))?;
        }

        Ok(HistoricalInr {
            user_id: user_id.to_string(),
            daily: by_day
                .into_iter()
                .map(|(date, value)| DailyInrValue {
                    date,
                    total_value: round_money(value),
                })
                .collect(),
        })
    }

    /// Today's quantities per symbol plus the current portfolio value
    #[instrument(skip(self))]
    pub async fn stats(&self, user_id: &str) -> Result<UserStats> {
        let today = self.today_rewards(user_id).await?;

        let mut quantities: BTreeMap<String, Decimal> = BTreeMap::new();
        for reward in today.rewards {
            *quantities.entry(reward.stock_symbol).or_default() += reward.quantity;
        }

        let portfolio = self.portfolio(user_id).await?;
        Ok(UserStats {
            user_id: user_id.to_string(),
            today_rewards: quantities
                .into_iter()
                .map(|(stock_symbol, quantity)| SymbolQuantity {
                    stock_symbol,
                    quantity,
                })
                .collect(),
            current_portfolio_value: portfolio.total_value,
        })
    }

    /// Holdings valued at the current price, ordered by symbol
    #[instrument(skip(self))]
    pub async fn portfolio(&self, user_id: &str) -> Result<Portfolio> {
        let holdings = self.store.holdings_for_user(user_id).await?;

        let mut valued = Vec::with_capacity(holdings.len());
        let mut total_value = Decimal::ZERO;
        for holding in holdings {
            let current_price = self.prices.get_current_price(&holding.stock_symbol).await?;
            let current_value = checked_value(holding.total_quantity, current_price)
                .ok_or_else(|| out_of_range(user_id))?;
            total_value = total_value
                .checked_add(current_value)
                .ok_or_else(|| out_of_range(user_id))?;
            valued.push(HoldingValuation {
                stock_symbol: holding.stock_symbol,
                total_quantity: holding.total_quantity,
                average_cost: holding.average_cost,
                total_cost: holding.total_cost,
                current_price,
                current_value,
            });
        }

        Ok(Portfolio {
            user_id: user_id.to_string(),
            holdings: valued,
            total_value,
        })
    }

    /// Audit trail of one reward in creation order
    pub async fn ledger_entries(&self, reward_id: &str) -> Result<Vec<LedgerEntry>> {
        self.store.ledger_entries(reward_id).await
    }
}

fn out_of_range(user_id: &str) -> LedgerError {
    LedgerError::Internal(format!("valuation for {} is out of range", user_id))
}

/// UTC instants bounding a local calendar day, `[start, end)`
pub fn local_day_bounds(date: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let next = date
        .succ_opt()
        .ok_or_else(|| LedgerError::Internal(format!("no day after {}", date)))?;
    Ok((local_midnight(date)?, local_midnight(next)?))
}

fn local_midnight(date: NaiveDate) -> Result<DateTime<Utc>> {
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| LedgerError::Internal(format!("invalid midnight for {}", date)))?;
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| LedgerError::Internal(format!("local midnight does not exist on {}", date)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_bounds_are_ordered_and_contiguous() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let (start, end) = local_day_bounds(day).unwrap();
        let (next_start, _) = local_day_bounds(day.succ_opt().unwrap()).unwrap();

        assert!(start < end);
        assert_eq!(end, next_start);
        assert_eq!(start.with_timezone(&Local).date_naive(), day);
    }
}

//! Atomic reward posting
//!
//! One reward becomes one transaction: the reward row, its three ledger
//! entries and the holding increment commit together or not at all.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::fees::{FeeBreakdown, FeeCalculator};
use super::holdings::HoldingsAggregator;
use crate::common::errors::{LedgerError, Result};
use crate::common::traits::{LedgerStore, LedgerTransaction};
use crate::common::types::{
    checked_value, now, AccountType, BalanceType, LedgerEntry, Reward, RewardRequest, RewardResult,
    UserHolding,
};
use crate::pricing::PriceCache;

pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    prices: Arc<PriceCache>,
    fees: FeeCalculator,
    holdings: HoldingsAggregator,
}

impl LedgerEngine {
    pub fn new(store: Arc<dyn LedgerStore>, prices: Arc<PriceCache>, fees: FeeCalculator) -> Self {
        Self {
            holdings: HoldingsAggregator::new(store.clone()),
            store,
            prices,
            fees,
        }
    }

    pub fn fee_calculator(&self) -> &FeeCalculator {
        &self.fees
    }

    /// Price a reward, compute its fees and persist it with its postings
    ///
    /// A price that cannot be resolved is replaced by zero and flagged on the
    /// result. Any storage failure rolls the whole posting back.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, symbol = %request.stock_symbol))]
    pub async fn post_reward(&self, request: &RewardRequest, idempotency_key: &str) -> Result<RewardResult> {
        let request = request.validate()?;
        let rewarded_at = request.rewarded_at.unwrap_or_else(now);

        let (price, price_unavailable) = match self.prices.get_current_price(&request.stock_symbol).await {
            Ok(price) => (price, false),
            Err(e) => {
                warn!(error = %e, "Price unavailable, posting reward at zero price");
                (Decimal::ZERO, true)
            }
        };

        let stock_value = checked_value(request.quantity, price).ok_or_else(|| {
            LedgerError::Validation(format!(
                "value of {} {} at {} is out of range",
                request.quantity, request.stock_symbol, price
            ))
        })?;
        let fees = self.fees.compute_fees(stock_value)?;
        let total_company_cost = stock_value.checked_add(fees.total).ok_or_else(|| {
            LedgerError::Validation(format!("company cost of {} plus fees is out of range", stock_value))
        })?;
        let created_at = now();

        let reward = Reward {
            reward_id: Uuid::new_v4().to_string(),
            user_id: request.user_id.clone(),
            stock_symbol: request.stock_symbol.clone(),
            quantity: request.quantity,
            price_per_share: price,
            total_cost: stock_value,
            brokerage_fee: fees.brokerage,
            stt_fee: fees.stt,
            gst_fee: fees.gst,
            sebi_charges: fees.sebi,
            stamp_duty: fees.stamp_duty,
            total_fees: fees.total,
            total_company_cost,
            rewarded_at,
            created_at,
        };
        let entries = postings(&reward, &fees);

        let mut tx = self.store.begin().await?;
        let written = self.write(tx.as_mut(), &reward, &entries).await;
        let holding = match written {
            Ok(holding) => holding,
            Err(e) => {
                error!(reward_id = %reward.reward_id, error = %e, "Reward posting failed, rolling back");
                if let Err(rollback_err) = tx.rollback().await {
                    error!(error = %rollback_err, "Rollback failed");
                }
                return Err(e);
            }
        };
        tx.commit().await?;

        info!(
            reward_id = %reward.reward_id,
            quantity = %reward.quantity,
            price = %price,
            total_company_cost = %reward.total_company_cost,
            "Reward posted"
        );

        Ok(RewardResult {
            idempotency_key: idempotency_key.to_string(),
            reward,
            ledger_entries: entries,
            holding,
            price_per_share: price,
            stock_value,
            price_unavailable,
        })
    }

    async fn write(
        &self,
        tx: &mut dyn LedgerTransaction,
        reward: &Reward,
        entries: &[LedgerEntry],
    ) -> Result<UserHolding> {
        tx.insert_reward(reward).await?;
        for entry in entries {
            tx.insert_ledger_entry(entry).await?;
        }
        self.holdings
            .upsert(tx, &reward.user_id, &reward.stock_symbol, reward.quantity, reward.total_cost)
            .await
    }
}

/// The three postings for a reward, in booking order
fn postings(reward: &Reward, fees: &FeeBreakdown) -> Vec<LedgerEntry> {
    let entry = |account_type: AccountType,
                 debit: Decimal,
                 credit: Decimal,
                 balance_type: BalanceType,
                 quantity: Option<Decimal>,
                 description: String| LedgerEntry {
        entry_id: Uuid::new_v4().to_string(),
        reward_id: reward.reward_id.clone(),
        account_type,
        stock_symbol: reward.stock_symbol.clone(),
        debit,
        credit,
        balance_type,
        quantity,
        description,
        created_at: reward.created_at,
    };

    vec![
        entry(
            AccountType::StockAsset,
            Decimal::ZERO,
            reward.total_cost,
            BalanceType::StockUnits,
            Some(reward.quantity),
            format!("Stock reward credited to user {}", reward.user_id),
        ),
        entry(
            AccountType::CashOutflow,
            reward.total_cost,
            Decimal::ZERO,
            BalanceType::Inr,
            None,
            "Company cash outflow for stock purchase".to_string(),
        ),
        entry(
            AccountType::FeeExpense,
            fees.total,
            Decimal::ZERO,
            BalanceType::Inr,
            None,
            format!("Transaction fees - {}", fees.describe()),
        ),
    ]
}

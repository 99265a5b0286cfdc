//! Reward submission: validation, idempotency and posting

use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::engine::LedgerEngine;
use super::idempotency::{Admission, IdempotencyGuard};
use crate::common::errors::Result;
use crate::common::types::{
    derive_idempotency_key, now, IdempotencyStatus, RewardOutcome, RewardRequest, RewardResult,
};

pub struct RewardService {
    guard: Arc<IdempotencyGuard>,
    engine: LedgerEngine,
}

impl RewardService {
    pub fn new(guard: Arc<IdempotencyGuard>, engine: LedgerEngine) -> Self {
        Self { guard, engine }
    }

    pub fn engine(&self) -> &LedgerEngine {
        &self.engine
    }

    /// Submit a reward request
    ///
    /// A missing `rewarded_at` defaults to now and a missing key is derived
    /// from user, symbol and `rewarded_at`. A completed key replays its
    /// stored result without touching the ledger.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, symbol = %request.stock_symbol))]
    pub async fn submit(&self, request: RewardRequest) -> Result<RewardOutcome> {
        let mut request = request.validate()?;
        let rewarded_at = *request.rewarded_at.get_or_insert_with(now);
        let key = request
            .idempotency_key
            .get_or_insert_with(|| {
                derive_idempotency_key(&request.user_id, &request.stock_symbol, rewarded_at)
            })
            .clone();

        let payload = serde_json::to_value(&request)?;
        match self.guard.begin(&key, &payload).await? {
            Admission::Duplicate(stored) => {
                let result: RewardResult = serde_json::from_value(stored)?;
                info!(key = %key, reward_id = %result.reward.reward_id, "Duplicate reward request");
                Ok(RewardOutcome::Duplicate(result))
            }
            Admission::InFlight => Ok(RewardOutcome::InFlight {
                idempotency_key: key,
            }),
            Admission::Fresh => self.post(&request, key).await,
        }
    }

    async fn post(&self, request: &RewardRequest, key: String) -> Result<RewardOutcome> {
        match self.engine.post_reward(request, &key).await {
            Ok(result) => {
                let response = serde_json::to_value(&result)?;
                if let Err(e) = self
                    .guard
                    .complete(&key, &response, IdempotencyStatus::Completed)
                    .await
                {
                    // The reward is committed; the key stays PROCESSING until it expires
                    error!(key = %key, error = %e, "Failed to record completed idempotency key");
                }
                Ok(RewardOutcome::Created(result))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Reward posting failed, releasing key for retry");
                let response = json!({ "error": e.to_string() });
                if let Err(complete_err) = self
                    .guard
                    .complete(&key, &response, IdempotencyStatus::Failed)
                    .await
                {
                    error!(key = %key, error = %complete_err, "Failed to record failed idempotency key");
                }
                Err(e)
            }
        }
    }
}

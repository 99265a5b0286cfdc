//! At-most-once admission of reward requests

use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::common::errors::{LedgerError, Result};
use crate::common::traits::LedgerStore;
use crate::common::types::{now, IdempotencyStatus, KeyClaim};

/// What the caller may do with a request
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// The key was claimed; run the request
    Fresh,
    /// The key already completed; replay this stored response
    Duplicate(serde_json::Value),
    /// Another request holds the key
    InFlight,
}

pub struct IdempotencyGuard {
    store: Arc<dyn LedgerStore>,
    ttl: chrono::Duration,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn LedgerStore>, ttl: chrono::Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// Claim a key for a request
    ///
    /// Concurrent callers with the same key are arbitrated by the store's
    /// uniqueness constraint: exactly one of them sees `Fresh`.
    #[instrument(skip(self, request_payload))]
    pub async fn begin(&self, key: &str, request_payload: &serde_json::Value) -> Result<Admission> {
        let at = now();
        let claim = self
            .store
            .claim_idempotency_key(key, request_payload, at, at + self.ttl)
            .await?;

        let record = match claim {
            KeyClaim::Claimed => {
                debug!(key, "Idempotency key claimed");
                return Ok(Admission::Fresh);
            }
            KeyClaim::Existing(record) => record,
        };

        match (record.status, record.response_payload) {
            (IdempotencyStatus::Completed, Some(response)) => {
                info!(key, "Replaying stored response for completed key");
                Ok(Admission::Duplicate(response))
            }
            (IdempotencyStatus::Completed, None) => Err(LedgerError::Internal(format!(
                "completed idempotency key {} has no stored response",
                key
            ))),
            (status, _) => {
                warn!(key, status = %status, "Idempotency key is held by another request");
                Ok(Admission::InFlight)
            }
        }
    }

    /// Record the terminal status and response of a claimed key
    #[instrument(skip(self, response_payload))]
    pub async fn complete(
        &self,
        key: &str,
        response_payload: &serde_json::Value,
        status: IdempotencyStatus,
    ) -> Result<()> {
        self.store
            .complete_idempotency_key(key, response_payload, status, now())
            .await
    }

    /// Delete keys past their expiry; failures are logged only
    pub async fn cleanup_expired(&self) -> u64 {
        match self.store.delete_expired_idempotency_keys(now()).await {
            Ok(deleted) => {
                if deleted > 0 {
                    info!(deleted, "Removed expired idempotency keys");
                }
                deleted
            }
            Err(e) => {
                error!(error = %e, "Failed to clean up expired idempotency keys");
                0
            }
        }
    }
}

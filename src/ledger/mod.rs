//! Reward ledger: fees, idempotency, posting, holdings and reports

pub mod engine;
pub mod fees;
pub mod holdings;
pub mod idempotency;
pub mod reports;
pub mod service;

pub use engine::LedgerEngine;
pub use fees::{FeeBreakdown, FeeCalculator};
pub use holdings::HoldingsAggregator;
pub use idempotency::{Admission, IdempotencyGuard};
pub use reports::Reports;
pub use service::RewardService;

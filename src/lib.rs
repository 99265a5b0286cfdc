//! Stock Rewards Library
//!
//! Idempotent stock-reward ingestion with fee computation, ledger posting,
//! holdings aggregation and a refreshed latest-price cache.

pub mod api;
pub mod common;
pub mod config;
pub mod ledger;
pub mod pricing;
pub mod scheduler;
pub mod store;

// Re-export commonly used types
pub use common::errors::{LedgerError, Result};
pub use common::traits::{LedgerStore, LedgerTransaction, PriceFeed};
pub use common::types::{
    AccountType, BalanceType, IdempotencyStatus, LedgerEntry, Portfolio, PriceSnapshot, Reward,
    RewardOutcome, RewardRequest, RewardResult, StockPrice, UserHolding,
};
pub use config::types::AppConfig;

// Ledger components
pub use ledger::{
    Admission, FeeBreakdown, FeeCalculator, HoldingsAggregator, IdempotencyGuard, LedgerEngine,
    Reports, RewardService,
};
pub use pricing::{PriceCache, RefreshReport, SyntheticPriceFeed};
pub use scheduler::PeriodicTask;
pub use store::{MemoryStore, PgStore};

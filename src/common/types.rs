//! Domain types shared by the ledger, pricing and storage layers

use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::errors::LedgerError;

/// Decimal places kept for INR amounts and prices
pub const MONEY_SCALE: u32 = 2;

/// Decimal places kept for a holding's average cost
pub const AVERAGE_COST_SCALE: u32 = 4;

/// Round an INR amount to paise, half away from zero
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Value of `quantity` shares at `price`, rounded to paise
///
/// `None` when the product does not fit in a `Decimal`.
pub fn checked_value(quantity: Decimal, price: Decimal) -> Option<Decimal> {
    quantity.checked_mul(price).map(round_money)
}

/// Average cost recomputed from running totals; zero for an empty position
pub fn average_cost(total_cost: Decimal, total_quantity: Decimal) -> Decimal {
    if total_quantity.is_zero() {
        return Decimal::ZERO;
    }
    (total_cost / total_quantity)
        .round_dp_with_strategy(AVERAGE_COST_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Current time truncated to the microsecond precision Postgres stores
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Ledger account a value movement is booked against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    StockAsset,
    CashOutflow,
    FeeExpense,
    StockLiability,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::StockAsset => "STOCK_ASSET",
            AccountType::CashOutflow => "CASH_OUTFLOW",
            AccountType::FeeExpense => "FEE_EXPENSE",
            AccountType::StockLiability => "STOCK_LIABILITY",
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STOCK_ASSET" => Ok(AccountType::StockAsset),
            "CASH_OUTFLOW" => Ok(AccountType::CashOutflow),
            "FEE_EXPENSE" => Ok(AccountType::FeeExpense),
            "STOCK_LIABILITY" => Ok(AccountType::StockLiability),
            other => Err(LedgerError::Internal(format!("unknown account type: {}", other))),
        }
    }
}

/// Unit a ledger entry is denominated in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BalanceType {
    StockUnits,
    Inr,
}

impl BalanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceType::StockUnits => "STOCK_UNITS",
            BalanceType::Inr => "INR",
        }
    }
}

impl std::fmt::Display for BalanceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BalanceType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STOCK_UNITS" => Ok(BalanceType::StockUnits),
            "INR" => Ok(BalanceType::Inr),
            other => Err(LedgerError::Internal(format!("unknown balance type: {}", other))),
        }
    }
}

/// A stock grant to a user, immutable once persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    pub reward_id: String,
    pub user_id: String,
    pub stock_symbol: String,
    /// Shares granted, always positive
    pub quantity: Decimal,
    /// Price used at grant time
    pub price_per_share: Decimal,
    /// quantity × price_per_share
    pub total_cost: Decimal,
    pub brokerage_fee: Decimal,
    pub stt_fee: Decimal,
    pub gst_fee: Decimal,
    pub sebi_charges: Decimal,
    pub stamp_duty: Decimal,
    pub total_fees: Decimal,
    /// total_cost + total_fees
    pub total_company_cost: Decimal,
    /// Business timestamp, may be backdated
    pub rewarded_at: DateTime<Utc>,
    /// Ingestion timestamp
    pub created_at: DateTime<Utc>,
}

/// One append-only value movement tied to a reward
///
/// Exactly one of `debit`/`credit` is non-zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub reward_id: String,
    pub account_type: AccountType,
    pub stock_symbol: String,
    pub debit: Decimal,
    pub credit: Decimal,
    pub balance_type: BalanceType,
    /// Units moved, only for unit-denominated movements
    pub quantity: Option<Decimal>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Signed movement: credit positive, debit negative
    pub fn net_amount(&self) -> Decimal {
        self.credit - self.debit
    }
}

/// Latest known price for a symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockPrice {
    pub symbol: String,
    pub price: Decimal,
    pub currency: String,
    pub fetched_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Immutable record of one observed price
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub symbol: String,
    pub price: Decimal,
    pub currency: String,
    pub fetched_at: DateTime<Utc>,
}

impl From<&StockPrice> for PriceSnapshot {
    fn from(price: &StockPrice) -> Self {
        Self {
            symbol: price.symbol.clone(),
            price: price.price,
            currency: price.currency.clone(),
            fetched_at: price.fetched_at,
        }
    }
}

/// Running position of one user in one symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserHolding {
    pub user_id: String,
    pub stock_symbol: String,
    pub total_quantity: Decimal,
    /// INR per unit, always total_cost / total_quantity
    pub average_cost: Decimal,
    pub total_cost: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle of an idempotency key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyStatus {
    Processing,
    Completed,
    Failed,
}

impl IdempotencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyStatus::Processing => "PROCESSING",
            IdempotencyStatus::Completed => "COMPLETED",
            IdempotencyStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdempotencyStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCESSING" => Ok(IdempotencyStatus::Processing),
            "COMPLETED" => Ok(IdempotencyStatus::Completed),
            "FAILED" => Ok(IdempotencyStatus::Failed),
            other => Err(LedgerError::Internal(format!(
                "unknown idempotency status: {}",
                other
            ))),
        }
    }
}

/// Stored idempotency row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub request_payload: serde_json::Value,
    /// Set once the request reaches a terminal status
    pub response_payload: Option<serde_json::Value>,
    pub status: IdempotencyStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Expired rows can be reclaimed by a new request
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether a new request may take over this key
    pub fn is_reclaimable(&self, now: DateTime<Utc>) -> bool {
        self.is_expired(now) || self.status == IdempotencyStatus::Failed
    }
}

/// Result of atomically claiming an idempotency key
#[derive(Debug, Clone, PartialEq)]
pub enum KeyClaim {
    /// The caller now owns the key in PROCESSING state
    Claimed,
    /// A live row already holds the key
    Existing(IdempotencyRecord),
}

/// Inbound reward creation request, as bound by the HTTP layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardRequest {
    pub user_id: String,
    pub stock_symbol: String,
    pub quantity: Decimal,
    #[serde(default)]
    pub rewarded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl RewardRequest {
    pub fn new(user_id: impl Into<String>, stock_symbol: impl Into<String>, quantity: Decimal) -> Self {
        Self {
            user_id: user_id.into(),
            stock_symbol: stock_symbol.into(),
            quantity,
            rewarded_at: None,
            idempotency_key: None,
        }
    }

    pub fn with_rewarded_at(mut self, rewarded_at: DateTime<Utc>) -> Self {
        self.rewarded_at = Some(rewarded_at);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Check the request and return a normalized copy
    ///
    /// User ids are trimmed, symbols trimmed and upper-cased, blank
    /// idempotency keys treated as absent.
    pub fn validate(&self) -> Result<Self, LedgerError> {
        let user_id = self.user_id.trim();
        if user_id.is_empty() {
            return Err(LedgerError::Validation("user_id is required".to_string()));
        }
        let stock_symbol = self.stock_symbol.trim().to_uppercase();
        if stock_symbol.is_empty() {
            return Err(LedgerError::Validation("stock_symbol is required".to_string()));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "quantity must be greater than zero, got {}",
                self.quantity
            )));
        }

        Ok(Self {
            user_id: user_id.to_string(),
            stock_symbol,
            quantity: self.quantity,
            rewarded_at: self.rewarded_at,
            idempotency_key: self
                .idempotency_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string),
        })
    }
}

/// Derive the idempotency key used when the caller did not supply one
pub fn derive_idempotency_key(user_id: &str, stock_symbol: &str, rewarded_at: DateTime<Utc>) -> String {
    format!("{}-{}-{}", user_id, stock_symbol, rewarded_at.timestamp())
}

/// Everything the engine produced for one reward
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardResult {
    pub idempotency_key: String,
    pub reward: Reward,
    /// Entries in posting order
    pub ledger_entries: Vec<LedgerEntry>,
    pub holding: UserHolding,
    pub price_per_share: Decimal,
    pub stock_value: Decimal,
    /// True when no price could be resolved and zero was used
    #[serde(default)]
    pub price_unavailable: bool,
}

/// Outcome of submitting a reward request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewardOutcome {
    /// First submission for the key; the reward was posted
    Created(RewardResult),
    /// The key already completed; this is the stored response
    Duplicate(RewardResult),
    /// The key is held by a request that has not finished yet
    InFlight { idempotency_key: String },
}

impl RewardOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    pub fn result(&self) -> Option<&RewardResult> {
        match self {
            Self::Created(r) | Self::Duplicate(r) => Some(r),
            Self::InFlight { .. } => None,
        }
    }
}

/// Quantity of one symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolQuantity {
    pub stock_symbol: String,
    pub quantity: Decimal,
}

/// Rewards granted on the current local day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodayRewards {
    pub user_id: String,
    pub date: NaiveDate,
    pub rewards: Vec<Reward>,
}

/// INR value of one past day's rewards at current prices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyInrValue {
    pub date: NaiveDate,
    pub total_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalInr {
    pub user_id: String,
    pub daily: Vec<DailyInrValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: String,
    pub today_rewards: Vec<SymbolQuantity>,
    pub current_portfolio_value: Decimal,
}

/// A holding valued at the current price
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingValuation {
    pub stock_symbol: String,
    pub total_quantity: Decimal,
    pub average_cost: Decimal,
    pub total_cost: Decimal,
    pub current_price: Decimal,
    pub current_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portfolio {
    pub user_id: String,
    pub holdings: Vec<HoldingValuation>,
    pub total_value: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_money_half_up() {
        assert_eq!(round_money(dec!(2.345)), dec!(2.35));
        assert_eq!(round_money(dec!(2.344)), dec!(2.34));
        assert_eq!(round_money(dec!(0.005)), dec!(0.01));
    }

    #[test]
    fn test_checked_value_rejects_unrepresentable_product() {
        assert_eq!(checked_value(dec!(10.5), dec!(2400)), Some(dec!(25200)));
        assert_eq!(checked_value(dec!(0.333), dec!(3.33)), Some(dec!(1.11)));
        assert_eq!(checked_value(dec!(100000000000000000000000000), dec!(2400)), None);
    }

    #[test]
    fn test_average_cost_of_empty_position() {
        assert_eq!(average_cost(dec!(100), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(average_cost(dec!(1000), dec!(3)), dec!(333.3333));
    }

    #[test]
    fn test_enum_round_trip_through_strings() {
        for account in [
            AccountType::StockAsset,
            AccountType::CashOutflow,
            AccountType::FeeExpense,
            AccountType::StockLiability,
        ] {
            assert_eq!(account.as_str().parse::<AccountType>().unwrap(), account);
        }
        assert_eq!("INR".parse::<BalanceType>().unwrap(), BalanceType::Inr);
        assert!("STOCK_LIABLITY".parse::<AccountType>().is_err());
    }

    #[test]
    fn test_account_type_serializes_screaming_snake() {
        let json = serde_json::to_string(&AccountType::StockLiability).unwrap();
        assert_eq!(json, "\"STOCK_LIABILITY\"");
    }

    #[test]
    fn test_validate_normalizes_request() {
        let req = RewardRequest::new(" u1 ", " reliance ", dec!(10.5)).with_idempotency_key("  ");
        let normalized = req.validate().unwrap();
        assert_eq!(normalized.user_id, "u1");
        assert_eq!(normalized.stock_symbol, "RELIANCE");
        assert_eq!(normalized.idempotency_key, None);
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        assert!(RewardRequest::new("", "TCS", dec!(1)).validate().is_err());
        assert!(RewardRequest::new("u1", "  ", dec!(1)).validate().is_err());
        assert!(RewardRequest::new("u1", "TCS", dec!(0)).validate().is_err());
        assert!(RewardRequest::new("u1", "TCS", dec!(-2)).validate().is_err());
    }

    #[test]
    fn test_derived_key_is_deterministic() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let key = derive_idempotency_key("u1", "TCS", at);
        assert_eq!(key, "u1-TCS-1704067200");
        assert_eq!(key, derive_idempotency_key("u1", "TCS", at));
    }

    #[test]
    fn test_failed_record_is_reclaimable() {
        let now = Utc::now();
        let record = IdempotencyRecord {
            key: "k1".into(),
            request_payload: serde_json::json!({}),
            response_payload: None,
            status: IdempotencyStatus::Failed,
            created_at: now,
            completed_at: Some(now),
            expires_at: now + chrono::Duration::hours(1),
        };
        assert!(!record.is_expired(now));
        assert!(record.is_reclaimable(now));
    }
}

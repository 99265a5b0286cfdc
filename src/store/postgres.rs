//! Postgres-backed ledger store
//!
//! Every racing mutation is one statement guarded by a unique constraint:
//! holding increments, idempotency claims and price fills never read before
//! they write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use tracing::{debug, info};

use crate::common::errors::{LedgerError, Result};
use crate::common::traits::{LedgerStore, LedgerTransaction};
use crate::common::types::{
    average_cost, IdempotencyRecord, IdempotencyStatus, KeyClaim, LedgerEntry, PriceSnapshot,
    Reward, StockPrice, UserHolding,
};
use crate::config::types::DatabaseConfig;

/// Attempts at claiming a key when the conflicting row vanishes between
/// the claim and the read that follows it
const CLAIM_ATTEMPTS: usize = 3;

const REWARD_COLUMNS: &str = "reward_id, user_id, stock_symbol, quantity, price_per_share, \
     total_cost, brokerage_fee, stt_fee, gst_fee, sebi_charges, stamp_duty, total_fees, \
     total_company_cost, rewarded_at, created_at";

const PRICE_COLUMNS: &str = "symbol, price, currency, fetched_at, updated_at, created_at";

/// Appends the row written by a `latest` CTE to the snapshot table
const SNAPSHOT_FROM_LATEST: &str = "insert into stock_price_snapshots (symbol, price, currency, fetched_at) \
     select symbol, price, currency, fetched_at from latest \
     on conflict (symbol, fetched_at) do nothing";

const HOLDING_COLUMNS: &str =
    "user_id, stock_symbol, total_quantity, average_cost, total_cost, updated_at";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Open a connection pool
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!(max_connections = config.max_connections, "Connected to Postgres");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run embedded migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    async fn idempotency_record(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            r#"
            select key, request_payload, response_payload, status, created_at, completed_at, expires_at
            from idempotency_keys
            where key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(idempotency_from_row).transpose()
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn latest_price(&self, symbol: &str) -> Result<Option<StockPrice>> {
        let row = sqlx::query(&format!(
            "select {} from stock_prices where symbol = $1",
            PRICE_COLUMNS
        ))
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(price_from_row).transpose()
    }

    async fn fill_price(
        &self,
        symbol: &str,
        price: Decimal,
        currency: &str,
        at: DateTime<Utc>,
    ) -> Result<StockPrice> {
        // The no-op update makes `returning` yield the row that won; the
        // snapshot of an existing row is already present and is skipped
        let row = sqlx::query(&format!(
            r#"
            with latest as (
                insert into stock_prices as p (symbol, price, currency, fetched_at, updated_at, created_at)
                values ($1, $2, $3, $4, $4, $4)
                on conflict (symbol) do update set symbol = p.symbol
                returning {cols}
            ), snapshot as (
                {snapshot}
            )
            select {cols} from latest
            "#,
            cols = PRICE_COLUMNS,
            snapshot = SNAPSHOT_FROM_LATEST,
        ))
        .bind(symbol)
        .bind(price)
        .bind(currency)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;

        price_from_row(&row)
    }

    async fn upsert_price(
        &self,
        symbol: &str,
        price: Decimal,
        currency: &str,
        at: DateTime<Utc>,
    ) -> Result<StockPrice> {
        let row = sqlx::query(&format!(
            r#"
            with latest as (
                insert into stock_prices (symbol, price, currency, fetched_at, updated_at, created_at)
                values ($1, $2, $3, $4, $4, $4)
                on conflict (symbol) do update set
                    price = excluded.price,
                    currency = excluded.currency,
                    fetched_at = excluded.fetched_at,
                    updated_at = excluded.updated_at
                returning {cols}
            ), snapshot as (
                {snapshot}
            )
            select {cols} from latest
            "#,
            cols = PRICE_COLUMNS,
            snapshot = SNAPSHOT_FROM_LATEST,
        ))
        .bind(symbol)
        .bind(price)
        .bind(currency)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;

        price_from_row(&row)
    }

    async fn price_history(&self, symbol: &str) -> Result<Vec<PriceSnapshot>> {
        let rows = sqlx::query(
            r#"
            select symbol, price, currency, fetched_at
            from stock_price_snapshots
            where symbol = $1
            order by fetched_at, id
            "#,
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(snapshot_from_row).collect()
    }

    async fn reward_symbols(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("select distinct stock_symbol from rewards order by stock_symbol")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("stock_symbol").map_err(LedgerError::from))
            .collect()
    }

    async fn claim_idempotency_key(
        &self,
        key: &str,
        request_payload: &serde_json::Value,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<KeyClaim> {
        for _ in 0..CLAIM_ATTEMPTS {
            let claimed = sqlx::query(
                r#"
                insert into idempotency_keys as k (key, request_payload, status, created_at, expires_at)
                values ($1, $2, 'PROCESSING', $3, $4)
                on conflict (key) do update set
                    request_payload = excluded.request_payload,
                    response_payload = null,
                    status = 'PROCESSING',
                    created_at = excluded.created_at,
                    completed_at = null,
                    expires_at = excluded.expires_at
                where k.expires_at <= excluded.created_at or k.status = 'FAILED'
                returning key
                "#,
            )
            .bind(key)
            .bind(request_payload)
            .bind(now)
            .bind(expires_at)
            .fetch_optional(&self.pool)
            .await?;

            if claimed.is_some() {
                return Ok(KeyClaim::Claimed);
            }

            if let Some(existing) = self.idempotency_record(key).await? {
                return Ok(KeyClaim::Existing(existing));
            }
            debug!(key, "Conflicting idempotency row vanished, retrying claim");
        }

        Err(LedgerError::InFlight {
            key: key.to_string(),
        })
    }

    async fn complete_idempotency_key(
        &self,
        key: &str,
        response_payload: &serde_json::Value,
        status: IdempotencyStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            update idempotency_keys
            set response_payload = $2,
                status = $3,
                completed_at = $4
            where key = $1
            "#,
        )
        .bind(key)
        .bind(response_payload)
        .bind(status.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::Persistence(format!(
                "idempotency key not found: {}",
                key
            )));
        }
        Ok(())
    }

    async fn delete_expired_idempotency_keys(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("delete from idempotency_keys where expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn rewards_between(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Reward>> {
        let rows = sqlx::query(&format!(
            r#"
            select {}
            from rewards
            where user_id = $1 and rewarded_at >= $2 and rewarded_at < $3
            order by rewarded_at desc, id desc
            "#,
            REWARD_COLUMNS
        ))
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(reward_from_row).collect()
    }

    async fn rewards_before(&self, user_id: &str, before: DateTime<Utc>) -> Result<Vec<Reward>> {
        let rows = sqlx::query(&format!(
            r#"
            select {}
            from rewards
            where user_id = $1 and rewarded_at < $2
            order by rewarded_at asc, id asc
            "#,
            REWARD_COLUMNS
        ))
        .bind(user_id)
        .bind(before)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(reward_from_row).collect()
    }

    async fn ledger_entries(&self, reward_id: &str) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            select entry_id, reward_id, account_type, stock_symbol, debit, credit,
                   balance_type, quantity, description, created_at
            from ledger_entries
            where reward_id = $1
            order by created_at asc, id asc
            "#,
        )
        .bind(reward_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn holdings_for_user(&self, user_id: &str) -> Result<Vec<UserHolding>> {
        let rows = sqlx::query(&format!(
            r#"
            select {}
            from user_holdings
            where user_id = $1 and total_quantity > 0
            order by stock_symbol
            "#,
            HOLDING_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(holding_from_row).collect()
    }

    async fn holding(&self, user_id: &str, symbol: &str) -> Result<Option<UserHolding>> {
        let row = sqlx::query(&format!(
            "select {} from user_holdings where user_id = $1 and stock_symbol = $2",
            HOLDING_COLUMNS
        ))
        .bind(user_id)
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(holding_from_row).transpose()
    }
}

/// One Postgres transaction; rolled back by sqlx when dropped uncommitted
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PgTransaction {
    async fn insert_reward(&mut self, reward: &Reward) -> Result<()> {
        sqlx::query(&format!(
            r#"
            insert into rewards ({})
            values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
            REWARD_COLUMNS
        ))
        .bind(&reward.reward_id)
        .bind(&reward.user_id)
        .bind(&reward.stock_symbol)
        .bind(reward.quantity)
        .bind(reward.price_per_share)
        .bind(reward.total_cost)
        .bind(reward.brokerage_fee)
        .bind(reward.stt_fee)
        .bind(reward.gst_fee)
        .bind(reward.sebi_charges)
        .bind(reward.stamp_duty)
        .bind(reward.total_fees)
        .bind(reward.total_company_cost)
        .bind(reward.rewarded_at)
        .bind(reward.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match LedgerError::from(e) {
            LedgerError::DuplicateRequest { .. } => LedgerError::DuplicateRequest {
                key: reward.reward_id.clone(),
            },
            other => other,
        })?;

        Ok(())
    }

    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<()> {
        sqlx::query(
            r#"
            insert into ledger_entries (
                entry_id, reward_id, account_type, stock_symbol, debit, credit,
                balance_type, quantity, description, created_at
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&entry.entry_id)
        .bind(&entry.reward_id)
        .bind(entry.account_type.as_str())
        .bind(&entry.stock_symbol)
        .bind(entry.debit)
        .bind(entry.credit)
        .bind(entry.balance_type.as_str())
        .bind(entry.quantity)
        .bind(&entry.description)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;

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
        let row = sqlx::query(&format!(
            r#"
            insert into user_holdings as h
                (user_id, stock_symbol, total_quantity, average_cost, total_cost, updated_at)
            values ($1, $2, $3, $4, $5, $6)
            on conflict (user_id, stock_symbol) do update set
                total_quantity = h.total_quantity + excluded.total_quantity,
                total_cost = h.total_cost + excluded.total_cost,
                average_cost = case
                    when h.total_quantity + excluded.total_quantity = 0 then 0
                    else round((h.total_cost + excluded.total_cost)
                               / (h.total_quantity + excluded.total_quantity), 4)
                end,
                updated_at = excluded.updated_at
            returning {}
            "#,
            HOLDING_COLUMNS
        ))
        .bind(user_id)
        .bind(symbol)
        .bind(delta_quantity)
        .bind(average_cost(delta_cost, delta_quantity))
        .bind(delta_cost)
        .bind(at)
        .fetch_one(&mut *self.tx)
        .await?;

        holding_from_row(&row)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn reward_from_row(row: &PgRow) -> Result<Reward> {
    Ok(Reward {
        reward_id: row.try_get("reward_id")?,
        user_id: row.try_get("user_id")?,
        stock_symbol: row.try_get("stock_symbol")?,
        quantity: row.try_get("quantity")?,
        price_per_share: row.try_get("price_per_share")?,
        total_cost: row.try_get("total_cost")?,
        brokerage_fee: row.try_get("brokerage_fee")?,
        stt_fee: row.try_get("stt_fee")?,
        gst_fee: row.try_get("gst_fee")?,
        sebi_charges: row.try_get("sebi_charges")?,
        stamp_duty: row.try_get("stamp_duty")?,
        total_fees: row.try_get("total_fees")?,
        total_company_cost: row.try_get("total_company_cost")?,
        rewarded_at: row.try_get("rewarded_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry> {
    Ok(LedgerEntry {
        entry_id: row.try_get("entry_id")?,
        reward_id: row.try_get("reward_id")?,
        account_type: row.try_get::<String, _>("account_type")?.parse()?,
        stock_symbol: row.try_get("stock_symbol")?,
        debit: row.try_get("debit")?,
        credit: row.try_get("credit")?,
        balance_type: row.try_get::<String, _>("balance_type")?.parse()?,
        quantity: row.try_get("quantity")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

fn price_from_row(row: &PgRow) -> Result<StockPrice> {
    Ok(StockPrice {
        symbol: row.try_get("symbol")?,
        price: row.try_get("price")?,
        currency: row.try_get("currency")?,
        fetched_at: row.try_get("fetched_at")?,
        updated_at: row.try_get("updated_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn snapshot_from_row(row: &PgRow) -> Result<PriceSnapshot> {
    Ok(PriceSnapshot {
        symbol: row.try_get("symbol")?,
        price: row.try_get("price")?,
        currency: row.try_get("currency")?,
        fetched_at: row.try_get("fetched_at")?,
    })
}

fn holding_from_row(row: &PgRow) -> Result<UserHolding> {
    Ok(UserHolding {
        user_id: row.try_get("user_id")?,
        stock_symbol: row.try_get("stock_symbol")?,
        total_quantity: row.try_get("total_quantity")?,
        average_cost: row.try_get("average_cost")?,
        total_cost: row.try_get("total_cost")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn idempotency_from_row(row: &PgRow) -> Result<IdempotencyRecord> {
    Ok(IdempotencyRecord {
        key: row.try_get("key")?,
        request_payload: row.try_get("request_payload")?,
        response_payload: row.try_get("response_payload")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

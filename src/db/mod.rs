//! Database module for PostgreSQL operations using SQLx
//! Uses runtime query checking (no compile-time DATABASE_URL needed)
//!
//! The `Store` trait is the persistence gateway: one method per query, no
//! business rules. Absence is reported as `None`/`false`; `DbError` is only
//! returned for connectivity, constraint or decoding failures.

mod models;
#[cfg(test)]
pub mod memory;

pub use models::*;

use crate::types::{BalanceAction, TransactionStatus, TransactionType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const USER_COLUMNS: &str = "id, username, email, password_hash, balance, role, status, \
     trading_mode, restrictions, created_at, last_login";

const TRADE_COLUMNS: &str = "id, user_id, symbol, amount, direction, duration, entry_price, \
     exit_price, result, profit, created_at, expires_at, settled_at";

const TRANSACTION_COLUMNS: &str = "id, user_id, type, amount, status, description, created_at";

const SETTING_COLUMNS: &str = "id, duration, min_amount, max_amount, profit_percentage, enabled";

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Record not found")]
    NotFound,
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Insufficient balance")]
    InsufficientBalance,
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Value out of range for a money column")]
    OutOfRange,
}

/// Map constraint violations onto domain-level conflicts.
fn classify(err: sqlx::Error) -> DbError {
    if let sqlx::Error::Database(ref db_err) = err {
        match db_err.code().as_deref() {
            Some("23505") => return DbError::Conflict("record already exists".to_string()),
            Some("23503") => return DbError::Conflict("record is still referenced".to_string()),
            Some("22003") => return DbError::OutOfRange,
            _ => {}
        }
    }
    DbError::Sqlx(err)
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23503"))
}

/// Fractional digits kept by the `NUMERIC(20, 8)` money columns.
pub const MONEY_SCALE: u32 = 8;

/// Largest stake, price or transfer accepted from a request. The columns hold
/// twelve integer digits; the margin covers credited payouts, nudged exit
/// prices and repeated admin credits.
pub fn max_money_input() -> Decimal {
    Decimal::from(1_000_000_000i64)
}

/// Reject a request value the money columns could not store.
pub fn check_money(field: &str, value: Decimal) -> Result<Decimal, String> {
    if value < Decimal::ZERO {
        return Err(format!("{field} must not be negative"));
    }
    if value > max_money_input() {
        return Err(format!("{field} must not exceed {}", max_money_input()));
    }
    if value.normalize().scale() > MONEY_SCALE {
        return Err(format!(
            "{field} allows at most {MONEY_SCALE} decimal places"
        ));
    }
    Ok(value)
}

/// Ledger row written for an admin balance operation.
pub(crate) fn adjustment_ledger(
    adjustment: &BalanceAdjustment,
    previous: Decimal,
    new: Decimal,
) -> (TransactionType, Decimal, String) {
    let kind = match adjustment.action {
        BalanceAction::Add => TransactionType::AdminCredit,
        BalanceAction::Subtract => TransactionType::AdminDebit,
        BalanceAction::Set => TransactionType::Adjustment,
    };
    let description = adjustment
        .note
        .clone()
        .unwrap_or_else(|| format!("Admin balance {}", adjustment.action));
    (kind, new - previous, description)
}

/// Typed access to users, trades, transactions and trading settings.
#[async_trait]
pub trait Store: Send + Sync {
    // Users
    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, DbError>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, DbError>;
    async fn create_user(&self, user: NewUser) -> Result<User, DbError>;
    async fn update_user(&self, id: Uuid, update: UserUpdate) -> Result<Option<User>, DbError>;
    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DbError>;
    async fn delete_user(&self, id: Uuid) -> Result<bool, DbError>;
    async fn list_users(&self) -> Result<Vec<User>, DbError>;
    /// Apply an admin add/subtract/set and append its ledger row atomically.
    /// Subtract clamps at zero.
    async fn adjust_balance(
        &self,
        adjustment: BalanceAdjustment,
    ) -> Result<Option<BalanceChange>, DbError>;

    // Trades
    /// Insert a pending trade and deduct its stake in one transaction.
    async fn create_trade(&self, trade: NewTrade) -> Result<Trade, DbError>;
    async fn get_trade(&self, id: Uuid) -> Result<Option<Trade>, DbError>;
    async fn list_trades(&self, user_id: Option<Uuid>) -> Result<Vec<Trade>, DbError>;
    async fn list_expired_pending_trades(&self, now: DateTime<Utc>) -> Result<Vec<Trade>, DbError>;
    /// Compare-and-swap `pending -> outcome`, then credit and ledger, in one
    /// transaction. `None` means the trade was no longer pending.
    async fn settle_trade(&self, settlement: &SettlementWrite) -> Result<Option<Trade>, DbError>;

    // Transactions
    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, DbError>;
    async fn list_transactions(&self, user_id: Option<Uuid>) -> Result<Vec<Transaction>, DbError>;
    async fn request_deposit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        description: &str,
    ) -> Result<Transaction, DbError>;
    /// Debit the amount (guarded, never below zero) and record a pending
    /// withdrawal row.
    async fn request_withdrawal(
        &self,
        user_id: Uuid,
        amount: Decimal,
        description: &str,
    ) -> Result<Transaction, DbError>;
    /// Compare-and-swap `pending -> completed`; deposits credit the balance.
    async fn complete_transaction(&self, id: Uuid) -> Result<Option<Transaction>, DbError>;

    // Trading settings
    async fn get_trading_settings(&self) -> Result<Vec<TradingSetting>, DbError>;
    async fn update_trading_setting(
        &self,
        id: i32,
        update: TradingSettingUpdate,
    ) -> Result<Option<TradingSetting>, DbError>;
}

/// Database connection wrapper
#[derive(Clone)]
pub struct Database {
    pool: Arc<PgPool>,
}

impl Database {
    /// Create a new database connection pool
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Database pool created with max {} connections", max_connections);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema (idempotent)
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        sqlx::raw_sql(SCHEMA).execute(self.pool()).await?;
        info!("Database schema is up to date");
        Ok(())
    }

    async fn insert_ledger_row(
        conn: &mut sqlx::PgConnection,
        user_id: Uuid,
        kind: TransactionType,
        amount: Decimal,
        status: TransactionStatus,
        description: &str,
    ) -> Result<Transaction, DbError> {
        let sql = format!(
            "INSERT INTO transactions (id, user_id, type, amount, status, description, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW()) RETURNING {TRANSACTION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(kind.as_str())
            .bind(amount)
            .bind(status.as_str())
            .bind(description)
            .fetch_one(conn)
            .await?;
        Ok(Transaction::from_row(&row)?)
    }
}

#[async_trait]
impl Store for Database {
    // ==========================================
    // User Operations
    // ==========================================

    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, DbError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(self.pool()).await?;

        match row {
            Some(row) => Ok(Some(User::from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, DbError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        let row = sqlx::query(&sql)
            .bind(username)
            .fetch_optional(self.pool())
            .await?;

        match row {
            Some(row) => Ok(Some(User::from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn create_user(&self, user: NewUser) -> Result<User, DbError> {
        let sql = format!(
            r#"
            INSERT INTO users (id, username, email, password_hash, balance, role, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.balance)
            .bind(user.role.as_str())
            .fetch_one(self.pool())
            .await
            .map_err(classify)?;

        debug!("Created user {}", user.username);
        Ok(User::from_row(&row)?)
    }

    async fn update_user(&self, id: Uuid, update: UserUpdate) -> Result<Option<User>, DbError> {
        let sql = format!(
            r#"
            UPDATE users
            SET
                email = COALESCE($2::text, email),
                password_hash = COALESCE($3::text, password_hash),
                role = COALESCE($4::text, role),
                status = COALESCE($5::text, status),
                trading_mode = COALESCE($6::text, trading_mode),
                restrictions = COALESCE($7::text[], restrictions)
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(update.email)
            .bind(update.password_hash)
            .bind(update.role.map(|r| r.as_str()))
            .bind(update.status.map(|s| s.as_str()))
            .bind(update.trading_mode.map(|m| m.as_str()))
            .bind(update.restrictions.map(|r| r.to_db()))
            .fetch_optional(self.pool())
            .await?;

        match row {
            Some(row) => Ok(Some(User::from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET last_login = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(classify)?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_users(&self) -> Result<Vec<User>, DbError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC");
        let rows = sqlx::query(&sql).fetch_all(self.pool()).await?;

        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            users.push(User::from_row(&row)?);
        }
        Ok(users)
    }

    async fn adjust_balance(
        &self,
        adjustment: BalanceAdjustment,
    ) -> Result<Option<BalanceChange>, DbError> {
        let mut tx = self.pool().begin().await?;

        let previous: Option<Decimal> =
            sqlx::query_scalar("SELECT balance FROM users WHERE id = $1 FOR UPDATE")
                .bind(adjustment.user_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(previous) = previous else {
            return Ok(None);
        };

        let update_sql = match adjustment.action {
            BalanceAction::Add => "UPDATE users SET balance = balance + $2 WHERE id = $1 RETURNING balance",
            BalanceAction::Subtract => {
                "UPDATE users SET balance = GREATEST(balance - $2, 0) WHERE id = $1 RETURNING balance"
            }
            BalanceAction::Set => "UPDATE users SET balance = $2 WHERE id = $1 RETURNING balance",
        };
        let new_balance: Decimal = sqlx::query_scalar(update_sql)
            .bind(adjustment.user_id)
            .bind(adjustment.amount)
            .fetch_one(&mut *tx)
            .await?;

        let (kind, amount, description) = adjustment_ledger(&adjustment, previous, new_balance);
        let transaction = Self::insert_ledger_row(
            &mut tx,
            adjustment.user_id,
            kind,
            amount,
            TransactionStatus::Completed,
            &description,
        )
        .await?;

        tx.commit().await?;

        info!(
            "Balance {} for {}: {} -> {}",
            adjustment.action, adjustment.user_id, previous, new_balance
        );
        Ok(Some(BalanceChange {
            previous_balance: previous,
            new_balance,
            transaction: Some(transaction),
        }))
    }

    // ==========================================
    // Trade Operations
    // ==========================================

    async fn create_trade(&self, trade: NewTrade) -> Result<Trade, DbError> {
        let mut tx = self.pool().begin().await?;

        let debited = sqlx::query(
            "UPDATE users SET balance = balance - $2 WHERE id = $1 AND balance >= $2 RETURNING balance",
        )
        .bind(trade.user_id)
        .bind(trade.amount)
        .fetch_optional(&mut *tx)
        .await?;

        if debited.is_none() {
            let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1")
                .bind(trade.user_id)
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match exists {
                Some(_) => DbError::InsufficientBalance,
                None => DbError::NotFound,
            });
        }

        let sql = format!(
            r#"
            INSERT INTO trades (
                id, user_id, symbol, amount, direction, duration, entry_price,
                result, created_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9)
            RETURNING {TRADE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(trade.user_id)
            .bind(&trade.symbol)
            .bind(trade.amount)
            .bind(trade.direction.as_str())
            .bind(trade.duration)
            .bind(trade.entry_price)
            .bind(trade.created_at)
            .bind(trade.expires_at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Trade::from_row(&row)?)
    }

    async fn get_trade(&self, id: Uuid) -> Result<Option<Trade>, DbError> {
        let sql = format!("SELECT {TRADE_COLUMNS} FROM trades WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(self.pool()).await?;

        match row {
            Some(row) => Ok(Some(Trade::from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_trades(&self, user_id: Option<Uuid>) -> Result<Vec<Trade>, DbError> {
        let sql = format!(
            r#"
            SELECT {TRADE_COLUMNS}
            FROM trades
            WHERE ($1::uuid IS NULL OR user_id = $1)
            ORDER BY created_at DESC
            "#
        );
        let rows = sqlx::query(&sql).bind(user_id).fetch_all(self.pool()).await?;

        let mut trades = Vec::with_capacity(rows.len());
        for row in rows {
            trades.push(Trade::from_row(&row)?);
        }
        Ok(trades)
    }

    async fn list_expired_pending_trades(&self, now: DateTime<Utc>) -> Result<Vec<Trade>, DbError> {
        let sql = format!(
            r#"
            SELECT {TRADE_COLUMNS}
            FROM trades
            WHERE result = 'pending' AND expires_at <= $1
            ORDER BY expires_at ASC
            "#
        );
        let rows = sqlx::query(&sql).bind(now).fetch_all(self.pool()).await?;

        let mut trades = Vec::with_capacity(rows.len());
        for row in rows {
            trades.push(Trade::from_row(&row)?);
        }
        Ok(trades)
    }

    async fn settle_trade(&self, settlement: &SettlementWrite) -> Result<Option<Trade>, DbError> {
        let mut tx = self.pool().begin().await?;

        let sql = format!(
            r#"
            UPDATE trades
            SET
                result = $2,
                profit = $3,
                exit_price = $4,
                settled_at = NOW()
            WHERE id = $1 AND result = 'pending'
            RETURNING {TRADE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(settlement.trade_id)
            .bind(settlement.outcome.as_str())
            .bind(settlement.profit)
            .bind(settlement.exit_price)
            .fetch_optional(&mut *tx)
            .await?;

        // Another caller already moved the trade out of pending.
        let Some(row) = row else {
            return Ok(None);
        };
        let trade = Trade::from_row(&row)?;

        if !settlement.balance_credit.is_zero() {
            let credited = sqlx::query("UPDATE users SET balance = balance + $2 WHERE id = $1")
                .bind(settlement.user_id)
                .bind(settlement.balance_credit)
                .execute(&mut *tx)
                .await?;
            if credited.rows_affected() != 1 {
                return Err(DbError::InvalidData(format!(
                    "trade {} owner {} missing",
                    settlement.trade_id, settlement.user_id
                )));
            }
        }

        Self::insert_ledger_row(
            &mut tx,
            settlement.user_id,
            settlement.ledger_type,
            settlement.ledger_amount,
            TransactionStatus::Completed,
            &settlement.description,
        )
        .await?;

        tx.commit().await?;
        Ok(Some(trade))
    }

    // ==========================================
    // Transaction Operations
    // ==========================================

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, DbError> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(self.pool()).await?;

        match row {
            Some(row) => Ok(Some(Transaction::from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_transactions(&self, user_id: Option<Uuid>) -> Result<Vec<Transaction>, DbError> {
        let sql = format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM transactions
            WHERE ($1::uuid IS NULL OR user_id = $1)
            ORDER BY created_at DESC
            "#
        );
        let rows = sqlx::query(&sql).bind(user_id).fetch_all(self.pool()).await?;

        let mut transactions = Vec::with_capacity(rows.len());
        for row in rows {
            transactions.push(Transaction::from_row(&row)?);
        }
        Ok(transactions)
    }

    async fn request_deposit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        description: &str,
    ) -> Result<Transaction, DbError> {
        let mut conn = self.pool().acquire().await?;
        Self::insert_ledger_row(
            &mut conn,
            user_id,
            TransactionType::Deposit,
            amount,
            TransactionStatus::Pending,
            description,
        )
        .await
        .map_err(|e| match e {
            DbError::Sqlx(inner) if is_foreign_key_violation(&inner) => DbError::NotFound,
            DbError::Sqlx(inner) => classify(inner),
            other => other,
        })
    }

    async fn request_withdrawal(
        &self,
        user_id: Uuid,
        amount: Decimal,
        description: &str,
    ) -> Result<Transaction, DbError> {
        let mut tx = self.pool().begin().await?;

        let debited = sqlx::query(
            "UPDATE users SET balance = balance - $2 WHERE id = $1 AND balance >= $2 RETURNING balance",
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await?;

        if debited.is_none() {
            let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match exists {
                Some(_) => DbError::InsufficientBalance,
                None => DbError::NotFound,
            });
        }

        let transaction = Self::insert_ledger_row(
            &mut tx,
            user_id,
            TransactionType::Withdrawal,
            -amount,
            TransactionStatus::Pending,
            description,
        )
        .await?;

        tx.commit().await?;
        Ok(transaction)
    }

    async fn complete_transaction(&self, id: Uuid) -> Result<Option<Transaction>, DbError> {
        let mut tx = self.pool().begin().await?;

        let sql = format!(
            r#"
            UPDATE transactions
            SET status = 'completed'
            WHERE id = $1 AND status = 'pending'
            RETURNING {TRANSACTION_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *tx).await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let transaction = Transaction::from_row(&row)?;

        if transaction.kind == TransactionType::Deposit {
            sqlx::query("UPDATE users SET balance = balance + $2 WHERE id = $1")
                .bind(transaction.user_id)
                .bind(transaction.amount)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(Some(transaction))
    }

    // ==========================================
    // Trading Settings Operations
    // ==========================================

    async fn get_trading_settings(&self) -> Result<Vec<TradingSetting>, DbError> {
        let sql = format!("SELECT {SETTING_COLUMNS} FROM trading_settings ORDER BY duration ASC");
        let rows = sqlx::query(&sql).fetch_all(self.pool()).await?;

        let mut settings = Vec::with_capacity(rows.len());
        for row in rows {
            settings.push(TradingSetting::from_row(&row)?);
        }
        Ok(settings)
    }

    async fn update_trading_setting(
        &self,
        id: i32,
        update: TradingSettingUpdate,
    ) -> Result<Option<TradingSetting>, DbError> {
        let sql = format!(
            r#"
            UPDATE trading_settings
            SET
                min_amount = COALESCE($2, min_amount),
                max_amount = COALESCE($3, max_amount),
                profit_percentage = COALESCE($4, profit_percentage),
                enabled = COALESCE($5, enabled)
            WHERE id = $1
            RETURNING {SETTING_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(update.min_amount)
            .bind(update.max_amount)
            .bind(update.profit_percentage)
            .bind(update.enabled)
            .fetch_optional(self.pool())
            .await?;

        match row {
            Some(row) => Ok(Some(TradingSetting::from_row(&row)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adjustment(action: BalanceAction, note: Option<&str>) -> BalanceAdjustment {
        BalanceAdjustment {
            user_id: Uuid::nil(),
            action,
            amount: Decimal::from(50),
            note: note.map(str::to_string),
        }
    }

    #[test]
    fn test_adjustment_ledger_types() {
        let (kind, amount, _) =
            adjustment_ledger(&adjustment(BalanceAction::Add, None), Decimal::from(100), Decimal::from(150));
        assert_eq!(kind, TransactionType::AdminCredit);
        assert_eq!(amount, Decimal::from(50));

        let (kind, amount, _) = adjustment_ledger(
            &adjustment(BalanceAction::Subtract, None),
            Decimal::from(30),
            Decimal::ZERO,
        );
        assert_eq!(kind, TransactionType::AdminDebit);
        assert_eq!(amount, Decimal::from(-30), "ledger records the clamped amount");
    }

    #[test]
    fn test_adjustment_ledger_description() {
        let (kind, _, description) = adjustment_ledger(
            &adjustment(BalanceAction::Set, Some("manual fix")),
            Decimal::from(10),
            Decimal::from(50),
        );
        assert_eq!(kind, TransactionType::Adjustment);
        assert_eq!(description, "manual fix");

        let (_, _, description) =
            adjustment_ledger(&adjustment(BalanceAction::Set, None), Decimal::ZERO, Decimal::ONE);
        assert_eq!(description, "Admin balance set");
    }

    #[test]
    fn test_check_money_bounds() {
        assert!(check_money("amount", Decimal::new(12_345_678_912_345_678, 8)).is_ok());
        assert!(check_money("amount", max_money_input()).is_ok());
        assert!(check_money("amount", Decimal::from(-1)).is_err());
        assert!(check_money("amount", max_money_input() + Decimal::ONE).is_err());
        assert!(check_money("amount", Decimal::new(1_000_000_001, 9)).is_err());
        // Trailing zeros do not count against the scale.
        assert!(check_money("amount", Decimal::new(1_000_000_000, 9)).is_ok());
    }

    /// Tests against a real PostgreSQL. Run with
    /// `DATABASE_URL=postgres://... cargo test -- --ignored`.
    mod postgres {
        use super::*;
        use crate::types::{Direction, Role, TradeOutcome, TradeResult};
        use chrono::Duration;
        use tokio::sync::OnceCell;

        static SCHEMA_APPLIED: OnceCell<()> = OnceCell::const_new();

        async fn database() -> Database {
            let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
            let db = Database::new(&url, 4).await.unwrap();
            SCHEMA_APPLIED
                .get_or_try_init(|| async { db.run_migrations().await })
                .await
                .unwrap();
            db
        }

        async fn user_with(db: &Database, balance: i64) -> User {
            let name = format!("pg_{}", Uuid::new_v4().simple());
            db.create_user(NewUser {
                email: format!("{name}@example.com"),
                username: name,
                password_hash: String::new(),
                balance: Decimal::from(balance),
                role: Role::User,
            })
            .await
            .unwrap()
        }

        async fn trade_for(db: &Database, user: &User, amount: i64) -> Result<Trade, DbError> {
            let now = Utc::now();
            db.create_trade(NewTrade {
                user_id: user.id,
                symbol: "BTC/USDT".to_string(),
                amount: Decimal::from(amount),
                direction: Direction::Up,
                duration: 30,
                entry_price: Decimal::from(45_000),
                created_at: now,
                expires_at: now + Duration::seconds(30),
            })
            .await
        }

        fn win(trade: &Trade) -> SettlementWrite {
            let profit = trade.amount / Decimal::from(10);
            SettlementWrite {
                trade_id: trade.id,
                user_id: trade.user_id,
                outcome: TradeOutcome::Win,
                profit,
                exit_price: Decimal::new(4_500_001, 2),
                balance_credit: trade.amount + profit,
                ledger_type: TransactionType::TradeWin,
                ledger_amount: trade.amount + profit,
                description: format!("Trade {} won", trade.id),
            }
        }

        async fn balance(db: &Database, id: Uuid) -> Decimal {
            db.get_user_by_id(id).await.unwrap().unwrap().balance
        }

        #[tokio::test]
        #[ignore = "requires DATABASE_URL"]
        async fn test_second_settlement_is_rejected() {
            let db = database().await;
            let user = user_with(&db, 1_000).await;
            let trade = trade_for(&db, &user, 100).await.unwrap();
            assert_eq!(balance(&db, user.id).await, Decimal::from(900));

            let write = win(&trade);
            let settled = db.settle_trade(&write).await.unwrap().unwrap();
            assert_eq!(settled.result, TradeResult::Win);
            assert!(db.settle_trade(&write).await.unwrap().is_none());

            assert_eq!(balance(&db, user.id).await, Decimal::from(1_010));
            let ledger = db.list_transactions(Some(user.id)).await.unwrap();
            assert_eq!(ledger.len(), 1);
            assert_eq!(ledger[0].amount, Decimal::from(110));
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        #[ignore = "requires DATABASE_URL"]
        async fn test_concurrent_settlements_credit_once() {
            let db = database().await;
            let user = user_with(&db, 1_000).await;
            let trade = trade_for(&db, &user, 100).await.unwrap();
            let write = win(&trade);

            let attempts: Vec<_> = (0..8)
                .map(|_| {
                    let db = db.clone();
                    let write = write.clone();
                    tokio::spawn(async move { db.settle_trade(&write).await })
                })
                .collect();
            let mut applied = 0;
            for attempt in attempts {
                if attempt.await.unwrap().unwrap().is_some() {
                    applied += 1;
                }
            }

            assert_eq!(applied, 1);
            assert_eq!(balance(&db, user.id).await, Decimal::from(1_010));
            assert_eq!(db.list_transactions(Some(user.id)).await.unwrap().len(), 1);
        }

        #[tokio::test]
        #[ignore = "requires DATABASE_URL"]
        async fn test_subtract_clamps_at_zero() {
            let db = database().await;
            let user = user_with(&db, 100).await;

            let change = db
                .adjust_balance(BalanceAdjustment {
                    user_id: user.id,
                    action: BalanceAction::Subtract,
                    amount: Decimal::from(500),
                    note: None,
                })
                .await
                .unwrap()
                .unwrap();
            assert_eq!(change.previous_balance, Decimal::from(100));
            assert_eq!(change.new_balance, Decimal::ZERO);
            assert_eq!(balance(&db, user.id).await, Decimal::ZERO);

            let ledger = db.list_transactions(Some(user.id)).await.unwrap();
            assert_eq!(ledger.len(), 1);
            assert_eq!(ledger[0].kind, TransactionType::AdminDebit);
            assert_eq!(ledger[0].amount, Decimal::from(-100));
        }

        #[tokio::test]
        #[ignore = "requires DATABASE_URL"]
        async fn test_stake_larger_than_balance_is_refused() {
            let db = database().await;
            let user = user_with(&db, 50).await;

            let result = trade_for(&db, &user, 100).await;
            assert!(matches!(result, Err(DbError::InsufficientBalance)));
            assert_eq!(balance(&db, user.id).await, Decimal::from(50));
            assert!(db.list_trades(Some(user.id)).await.unwrap().is_empty());
        }

        #[tokio::test]
        #[ignore = "requires DATABASE_URL"]
        async fn test_deposit_approved_once() {
            let db = database().await;
            let user = user_with(&db, 0).await;
            let deposit = db
                .request_deposit(user.id, Decimal::from(250), "Deposit request")
                .await
                .unwrap();

            assert!(db.complete_transaction(deposit.id).await.unwrap().is_some());
            assert!(db.complete_transaction(deposit.id).await.unwrap().is_none());
            assert_eq!(balance(&db, user.id).await, Decimal::from(250));

            let missing = db
                .request_deposit(Uuid::new_v4(), Decimal::ONE, "Deposit request")
                .await;
            assert!(matches!(missing, Err(DbError::NotFound)));
        }
    }
}

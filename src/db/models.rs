//! Database models matching PostgreSQL schema

use crate::restrictions::Restrictions;
use crate::types::{
    BalanceAction, Direction, Role, TradeOutcome, TradeResult, TradingMode, TransactionStatus,
    TransactionType, UserStatus,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use std::str::FromStr;
use uuid::Uuid;

/// Read a text column and parse it into one of the domain enums.
fn text_col<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

/// User account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub balance: Decimal,
    pub role: Role,
    pub status: UserStatus,
    pub trading_mode: TradingMode,
    pub restrictions: Restrictions,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for User {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let raw_restrictions: Vec<String> = row.try_get("restrictions")?;
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            balance: row.try_get("balance")?,
            role: text_col(row, "role")?,
            status: text_col(row, "status")?,
            trading_mode: text_col(row, "trading_mode")?,
            restrictions: Restrictions::from_db(&raw_restrictions).map_err(|e| {
                sqlx::Error::ColumnDecode {
                    index: "restrictions".to_string(),
                    source: Box::new(e),
                }
            })?,
            created_at: row.try_get("created_at")?,
            last_login: row.try_get("last_login")?,
        })
    }
}

/// New account (registration or seeding)
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub balance: Decimal,
    pub role: Role,
}

/// Partial user update (all fields optional, `None` keeps the current value)
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    pub trading_mode: Option<TradingMode>,
    pub restrictions: Option<Restrictions>,
}

/// Binary-option trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub amount: Decimal,
    pub direction: Direction,
    pub duration: i32,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub result: TradeResult,
    pub profit: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Trade {
    pub fn is_pending(&self) -> bool {
        self.result == TradeResult::Pending
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl<'r> FromRow<'r, PgRow> for Trade {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            symbol: row.try_get("symbol")?,
            amount: row.try_get("amount")?,
            direction: text_col(row, "direction")?,
            duration: row.try_get("duration")?,
            entry_price: row.try_get("entry_price")?,
            exit_price: row.try_get("exit_price")?,
            result: text_col(row, "result")?,
            profit: row.try_get("profit")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            settled_at: row.try_get("settled_at")?,
        })
    }
}

/// Trade placement (stake is deducted in the same DB transaction)
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub user_id: Uuid,
    pub symbol: String,
    pub amount: Decimal,
    pub direction: Direction,
    pub duration: i32,
    pub entry_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Everything the store needs to settle one trade atomically
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementWrite {
    pub trade_id: Uuid,
    pub user_id: Uuid,
    pub outcome: TradeOutcome,
    pub profit: Decimal,
    pub exit_price: Decimal,
    /// Relative balance increment, zero for a loss
    pub balance_credit: Decimal,
    pub ledger_type: TransactionType,
    pub ledger_amount: Decimal,
    pub description: String,
}

/// Ledger entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Transaction {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            kind: text_col(row, "type")?,
            amount: row.try_get("amount")?,
            status: text_col(row, "status")?,
            description: row.try_get::<Option<String>, _>("description")?.unwrap_or_default(),
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Admin balance operation request
#[derive(Debug, Clone)]
pub struct BalanceAdjustment {
    pub user_id: Uuid,
    pub action: BalanceAction,
    pub amount: Decimal,
    pub note: Option<String>,
}

/// Result of a balance adjustment
#[derive(Debug, Clone, Serialize)]
pub struct BalanceChange {
    pub previous_balance: Decimal,
    pub new_balance: Decimal,
    pub transaction: Option<Transaction>,
}

/// Payout tier keyed by trade duration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSetting {
    pub id: i32,
    pub duration: i32,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    /// Percent of the stake paid on a win (10 means 10 %)
    pub profit_percentage: Decimal,
    pub enabled: bool,
}

impl TradingSetting {
    /// Fractional payout rate (0.10 for 10 %)
    pub fn payout_rate(&self) -> Decimal {
        self.profit_percentage / Decimal::ONE_HUNDRED
    }
}

impl<'r> FromRow<'r, PgRow> for TradingSetting {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            duration: row.try_get("duration")?,
            min_amount: row.try_get("min_amount")?,
            max_amount: row.try_get("max_amount")?,
            profit_percentage: row.try_get("profit_percentage")?,
            enabled: row.try_get("enabled")?,
        })
    }
}

/// Trading setting update (all fields optional)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TradingSettingUpdate {
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub profit_percentage: Option<Decimal>,
    pub enabled: Option<bool>,
}

//! In-memory `Store` used by unit and router tests.
//!
//! Every method runs under one lock, which gives the same atomicity the
//! Postgres implementation gets from its DB transactions.

use super::*;
use crate::restrictions::Restrictions;
use crate::types::{Role, TradeResult, TradingMode, UserStatus};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    trades: HashMap<Uuid, Trade>,
    transactions: Vec<Transaction>,
    settings: Vec<TradingSetting>,
}

impl Inner {
    fn push_ledger(
        &mut self,
        user_id: Uuid,
        kind: TransactionType,
        amount: Decimal,
        status: TransactionStatus,
        description: &str,
    ) -> Transaction {
        let transaction = Transaction {
            id: Uuid::new_v4(),
            user_id,
            kind,
            amount,
            status,
            description: description.to_string(),
            created_at: Utc::now(),
        };
        self.transactions.push(transaction.clone());
        transaction
    }

    fn debit_guarded(&mut self, user_id: Uuid, amount: Decimal) -> Result<(), DbError> {
        let user = self.users.get_mut(&user_id).ok_or(DbError::NotFound)?;
        if user.balance < amount {
            return Err(DbError::InsufficientBalance);
        }
        user.balance -= amount;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: Vec<TradingSetting>) -> Self {
        let store = Self::default();
        store.inner.lock().settings = settings;
        store
    }

    /// Insert a user directly, bypassing registration.
    pub fn seed_user(&self, username: &str, role: Role, balance: Decimal) -> User {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password_hash: String::new(),
            balance,
            role,
            status: UserStatus::Active,
            trading_mode: TradingMode::Normal,
            restrictions: Restrictions::default(),
            created_at: Utc::now(),
            last_login: None,
        };
        self.inner.lock().users.insert(user.id, user.clone());
        user
    }

    pub fn balance_of(&self, user_id: Uuid) -> Option<Decimal> {
        self.inner.lock().users.get(&user_id).map(|u| u.balance)
    }

    pub fn ledger_of(&self, user_id: Uuid) -> Vec<Transaction> {
        self.inner
            .lock()
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Move a trade's expiry, for natural-settlement tests.
    pub fn set_expiry(&self, trade_id: Uuid, expires_at: DateTime<Utc>) {
        if let Some(trade) = self.inner.lock().trades.get_mut(&trade_id) {
            trade.expires_at = expires_at;
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, DbError> {
        Ok(self.inner.lock().users.get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, DbError> {
        Ok(self
            .inner
            .lock()
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn create_user(&self, user: NewUser) -> Result<User, DbError> {
        let mut inner = self.inner.lock();
        if inner.users.values().any(|u| u.username == user.username) {
            return Err(DbError::Conflict("record already exists".to_string()));
        }
        let created = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            balance: user.balance,
            role: user.role,
            status: UserStatus::Active,
            trading_mode: TradingMode::Normal,
            restrictions: Restrictions::default(),
            created_at: Utc::now(),
            last_login: None,
        };
        inner.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_user(&self, id: Uuid, update: UserUpdate) -> Result<Option<User>, DbError> {
        let mut inner = self.inner.lock();
        let Some(user) = inner.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(email) = update.email {
            user.email = email;
        }
        if let Some(hash) = update.password_hash {
            user.password_hash = hash;
        }
        if let Some(role) = update.role {
            user.role = role;
        }
        if let Some(status) = update.status {
            user.status = status;
        }
        if let Some(mode) = update.trading_mode {
            user.trading_mode = mode;
        }
        if let Some(restrictions) = update.restrictions {
            user.restrictions = restrictions;
        }
        Ok(Some(user.clone()))
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DbError> {
        if let Some(user) = self.inner.lock().users.get_mut(&id) {
            user.last_login = Some(at);
        }
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, DbError> {
        let mut inner = self.inner.lock();
        let referenced = inner.trades.values().any(|t| t.user_id == id)
            || inner.transactions.iter().any(|t| t.user_id == id);
        if referenced {
            return Err(DbError::Conflict("record is still referenced".to_string()));
        }
        Ok(inner.users.remove(&id).is_some())
    }

    async fn list_users(&self) -> Result<Vec<User>, DbError> {
        let mut users: Vec<User> = self.inner.lock().users.values().cloned().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users)
    }

    async fn adjust_balance(
        &self,
        adjustment: BalanceAdjustment,
    ) -> Result<Option<BalanceChange>, DbError> {
        let mut inner = self.inner.lock();
        let Some(user) = inner.users.get_mut(&adjustment.user_id) else {
            return Ok(None);
        };
        let previous = user.balance;
        user.balance = match adjustment.action {
            BalanceAction::Add => previous + adjustment.amount,
            BalanceAction::Subtract => (previous - adjustment.amount).max(Decimal::ZERO),
            BalanceAction::Set => adjustment.amount,
        };
        let new_balance = user.balance;

        let (kind, amount, description) = adjustment_ledger(&adjustment, previous, new_balance);
        let transaction = inner.push_ledger(
            adjustment.user_id,
            kind,
            amount,
            TransactionStatus::Completed,
            &description,
        );
        Ok(Some(BalanceChange {
            previous_balance: previous,
            new_balance,
            transaction: Some(transaction),
        }))
    }

    async fn create_trade(&self, trade: NewTrade) -> Result<Trade, DbError> {
        let mut inner = self.inner.lock();
        inner.debit_guarded(trade.user_id, trade.amount)?;
        let created = Trade {
            id: Uuid::new_v4(),
            user_id: trade.user_id,
            symbol: trade.symbol,
            amount: trade.amount,
            direction: trade.direction,
            duration: trade.duration,
            entry_price: trade.entry_price,
            exit_price: None,
            result: TradeResult::Pending,
            profit: None,
            created_at: trade.created_at,
            expires_at: trade.expires_at,
            settled_at: None,
        };
        inner.trades.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_trade(&self, id: Uuid) -> Result<Option<Trade>, DbError> {
        Ok(self.inner.lock().trades.get(&id).cloned())
    }

    async fn list_trades(&self, user_id: Option<Uuid>) -> Result<Vec<Trade>, DbError> {
        let mut trades: Vec<Trade> = self
            .inner
            .lock()
            .trades
            .values()
            .filter(|t| user_id.map_or(true, |id| t.user_id == id))
            .cloned()
            .collect();
        trades.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(trades)
    }

    async fn list_expired_pending_trades(&self, now: DateTime<Utc>) -> Result<Vec<Trade>, DbError> {
        let mut trades: Vec<Trade> = self
            .inner
            .lock()
            .trades
            .values()
            .filter(|t| t.is_pending() && t.expires_at <= now)
            .cloned()
            .collect();
        trades.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        Ok(trades)
    }

    async fn settle_trade(&self, settlement: &SettlementWrite) -> Result<Option<Trade>, DbError> {
        let mut inner = self.inner.lock();
        let Some(trade) = inner.trades.get_mut(&settlement.trade_id) else {
            return Ok(None);
        };
        if !trade.is_pending() {
            return Ok(None);
        }
        trade.result = settlement.outcome.into();
        trade.profit = Some(settlement.profit);
        trade.exit_price = Some(settlement.exit_price);
        trade.settled_at = Some(Utc::now());
        let settled = trade.clone();

        if !settlement.balance_credit.is_zero() {
            let owner = inner
                .users
                .get_mut(&settlement.user_id)
                .ok_or_else(|| DbError::InvalidData("trade owner missing".to_string()))?;
            owner.balance += settlement.balance_credit;
        }
        inner.push_ledger(
            settlement.user_id,
            settlement.ledger_type,
            settlement.ledger_amount,
            TransactionStatus::Completed,
            &settlement.description,
        );
        Ok(Some(settled))
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, DbError> {
        Ok(self
            .inner
            .lock()
            .transactions
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn list_transactions(&self, user_id: Option<Uuid>) -> Result<Vec<Transaction>, DbError> {
        let inner = self.inner.lock();
        Ok(inner
            .transactions
            .iter()
            .rev()
            .filter(|t| user_id.map_or(true, |id| t.user_id == id))
            .cloned()
            .collect())
    }

    async fn request_deposit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        description: &str,
    ) -> Result<Transaction, DbError> {
        let mut inner = self.inner.lock();
        if !inner.users.contains_key(&user_id) {
            return Err(DbError::NotFound);
        }
        Ok(inner.push_ledger(
            user_id,
            TransactionType::Deposit,
            amount,
            TransactionStatus::Pending,
            description,
        ))
    }

    async fn request_withdrawal(
        &self,
        user_id: Uuid,
        amount: Decimal,
        description: &str,
    ) -> Result<Transaction, DbError> {
        let mut inner = self.inner.lock();
        inner.debit_guarded(user_id, amount)?;
        Ok(inner.push_ledger(
            user_id,
            TransactionType::Withdrawal,
            -amount,
            TransactionStatus::Pending,
            description,
        ))
    }

    async fn complete_transaction(&self, id: Uuid) -> Result<Option<Transaction>, DbError> {
        let mut inner = self.inner.lock();
        let Some(transaction) = inner
            .transactions
            .iter_mut()
            .find(|t| t.id == id && t.status == TransactionStatus::Pending)
        else {
            return Ok(None);
        };
        transaction.status = TransactionStatus::Completed;
        let completed = transaction.clone();

        if completed.kind == TransactionType::Deposit {
            if let Some(user) = inner.users.get_mut(&completed.user_id) {
                user.balance += completed.amount;
            }
        }
        Ok(Some(completed))
    }

    async fn get_trading_settings(&self) -> Result<Vec<TradingSetting>, DbError> {
        let mut settings = self.inner.lock().settings.clone();
        settings.sort_by_key(|s| s.duration);
        Ok(settings)
    }

    async fn update_trading_setting(
        &self,
        id: i32,
        update: TradingSettingUpdate,
    ) -> Result<Option<TradingSetting>, DbError> {
        let mut inner = self.inner.lock();
        let Some(setting) = inner.settings.iter_mut().find(|s| s.id == id) else {
            return Ok(None);
        };
        if let Some(min) = update.min_amount {
            setting.min_amount = min;
        }
        if let Some(max) = update.max_amount {
            setting.max_amount = max;
        }
        if let Some(pct) = update.profit_percentage {
            setting.profit_percentage = pct;
        }
        if let Some(enabled) = update.enabled {
            setting.enabled = enabled;
        }
        Ok(Some(setting.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_money_requests_for_missing_user_are_not_found() {
        let store = MemoryStore::default();
        let ghost = Uuid::new_v4();
        let amount = Decimal::from(10);

        let deposit = store.request_deposit(ghost, amount, "Deposit request").await;
        assert!(matches!(deposit, Err(DbError::NotFound)));
        let withdrawal = store.request_withdrawal(ghost, amount, "Withdrawal request").await;
        assert!(matches!(withdrawal, Err(DbError::NotFound)));
        assert!(store.list_transactions(None).await.unwrap().is_empty());
    }
}

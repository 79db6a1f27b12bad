//! Trading Engine
//!
//! Places binary-option trades and settles them. Settlement is a single
//! compare-and-swap on `trades.result` in the store, so two concurrent
//! settlements of the same trade can never both pay out.

use crate::cache::Cache;
use crate::config_manager::ConfigManager;
use crate::db::{
    check_money, DbError, NewTrade, SettlementWrite, Store, Trade, TradingSetting,
    TradingSettingUpdate, User, UserUpdate,
};
use crate::price_feed::{PriceFeed, PriceFeedError};
use crate::restrictions::Restriction;
use crate::types::{Direction, TradeOutcome, TradingMode, TransactionType, UserStatus};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum TradingError {
    #[error("Trade not found")]
    TradeNotFound,
    #[error("User not found")]
    UserNotFound,
    #[error("Trade already settled")]
    AlreadySettled,
    #[error("Invalid outcome '{0}', expected win or lose")]
    InvalidOutcome(String),
    #[error("Trade has not expired yet (expires at {0})")]
    NotExpired(DateTime<Utc>),
    #[error("Insufficient balance")]
    InsufficientBalance,
    #[error("Invalid trade: {0}")]
    InvalidTrade(String),
    #[error("Invalid trading setting: {0}")]
    InvalidSetting(String),
    #[error("Trading setting not found")]
    SettingNotFound,
    #[error("Account is {0}")]
    AccountInactive(UserStatus),
    #[error("Account is restricted: {0}")]
    Restricted(Restriction),
    #[error("Price feed error: {0}")]
    PriceFeed(#[from] PriceFeedError),
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Parse an admin-supplied forced outcome.
pub fn parse_outcome(raw: &str) -> Result<TradeOutcome, TradingError> {
    raw.parse::<TradeOutcome>()
        .map_err(|_| TradingError::InvalidOutcome(raw.to_string()))
}

// ==========================================
// Requests / Reports
// ==========================================

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceTradeRequest {
    pub symbol: String,
    pub amount: Decimal,
    pub direction: Direction,
    pub duration: i32,
    #[serde(alias = "entryPrice")]
    pub entry_price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepFailure {
    pub trade_id: Uuid,
    pub message: String,
}

/// Outcome of an expired-trade sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub settled: Vec<Trade>,
    /// Trades another caller settled between listing and settling
    pub skipped: usize,
    pub failed: Vec<SweepFailure>,
}

// ==========================================
// Settlement math
// ==========================================

/// Synthetic exit price consistent with the outcome: a winning `up` or a
/// losing `down` trade moved the price up by `nudge`, everything else down.
pub fn nudged_exit_price(
    entry_price: Decimal,
    direction: Direction,
    outcome: TradeOutcome,
    nudge: Decimal,
) -> Decimal {
    let moved_up = matches!(
        (outcome, direction),
        (TradeOutcome::Win, Direction::Up) | (TradeOutcome::Lose, Direction::Down)
    );
    let factor = if moved_up {
        Decimal::ONE + nudge
    } else {
        Decimal::ONE - nudge
    };
    (entry_price * factor).round_dp(8)
}

/// Everything written when `trade` settles with `outcome`.
///
/// A win credits stake plus profit and records it as `trade_win`; a loss
/// leaves the balance alone (the stake was taken at placement) and records
/// `-amount` as `trade_loss`.
pub fn plan_settlement(
    trade: &Trade,
    outcome: TradeOutcome,
    payout_rate: Decimal,
    exit_price: Decimal,
) -> SettlementWrite {
    let (profit, balance_credit, ledger_type, ledger_amount) = match outcome {
        TradeOutcome::Win => {
            let profit = (trade.amount * payout_rate).round_dp(8);
            let payout = trade.amount + profit;
            (profit, payout, TransactionType::TradeWin, payout)
        }
        TradeOutcome::Lose => (
            -trade.amount,
            Decimal::ZERO,
            TransactionType::TradeLoss,
            -trade.amount,
        ),
    };

    SettlementWrite {
        trade_id: trade.id,
        user_id: trade.user_id,
        outcome,
        profit,
        exit_price,
        balance_credit,
        ledger_type,
        ledger_amount,
        description: format!(
            "{} {} {} trade {}",
            trade.symbol,
            trade.direction,
            outcome,
            trade.id
        ),
    }
}

// ==========================================
// Trading Engine
// ==========================================

pub struct TradingEngine {
    store: Arc<dyn Store>,
    config_manager: Arc<ConfigManager>,
    price_feed: Arc<dyn PriceFeed>,
    // Shared with the auth extractor; invalidated after balance writes.
    users: Arc<Cache<Uuid, User>>,
    // Listing only. Placement and settlement read tiers from the store.
    settings: Cache<(), Vec<TradingSetting>>,
}

impl TradingEngine {
    pub fn new(
        store: Arc<dyn Store>,
        config_manager: Arc<ConfigManager>,
        price_feed: Arc<dyn PriceFeed>,
        users: Arc<Cache<Uuid, User>>,
        cache_ttl: std::time::Duration,
    ) -> Self {
        Self {
            store,
            config_manager,
            price_feed,
            users,
            settings: Cache::new(1, cache_ttl),
        }
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }

    // ==========================================
    // Trading settings
    // ==========================================

    /// All payout tiers, ordered by duration. May lag a change made by
    /// another instance by up to the cache TTL.
    pub async fn trading_settings(&self) -> Result<Vec<TradingSetting>, TradingError> {
        let store = Arc::clone(&self.store);
        let settings = self
            .settings
            .get_or_try_load((), || async move {
                store.get_trading_settings().await.map(Some)
            })
            .await?;
        Ok(settings.unwrap_or_default())
    }

    /// Payout rate for a duration. The tier's `enabled` flag only gates new
    /// placements; settlement always honours the configured percentage.
    pub async fn payout_rate(&self, duration: i32) -> Result<Decimal, TradingError> {
        let settings = self.store.get_trading_settings().await?;
        Ok(settings
            .iter()
            .find(|s| s.duration == duration)
            .map(TradingSetting::payout_rate)
            .unwrap_or_else(|| self.config_manager.get_config().default_payout_rate))
    }

    pub async fn update_trading_setting(
        &self,
        id: i32,
        update: TradingSettingUpdate,
    ) -> Result<TradingSetting, TradingError> {
        let current = self
            .store
            .get_trading_settings()
            .await?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or(TradingError::SettingNotFound)?;

        let min = update.min_amount.unwrap_or(current.min_amount);
        let max = update.max_amount.unwrap_or(current.max_amount);
        let pct = update.profit_percentage.unwrap_or(current.profit_percentage);
        check_money("min_amount", min).map_err(TradingError::InvalidSetting)?;
        check_money("max_amount", max).map_err(TradingError::InvalidSetting)?;
        if min <= Decimal::ZERO || max < min {
            return Err(TradingError::InvalidSetting(format!(
                "amount bounds must satisfy 0 < min <= max, got {min}..{max}"
            )));
        }
        if pct < Decimal::ZERO || pct > Decimal::ONE_THOUSAND {
            return Err(TradingError::InvalidSetting(format!(
                "profit_percentage must be within 0..1000, got {pct}"
            )));
        }

        let updated = self.store.update_trading_setting(id, update).await;
        self.settings.clear();
        let updated = updated?.ok_or(TradingError::SettingNotFound)?;
        info!(
            "Trading setting {} ({}s) updated: {}%, {}..{}, enabled={}",
            updated.id,
            updated.duration,
            updated.profit_percentage,
            updated.min_amount,
            updated.max_amount,
            updated.enabled
        );
        Ok(updated)
    }

    // ==========================================
    // Placement
    // ==========================================

    /// Open a pending trade for `user_id`, deducting the stake atomically.
    ///
    /// Status and restrictions come from a fresh store read, never from the
    /// user cache.
    pub async fn place_trade(
        &self,
        user_id: Uuid,
        request: PlaceTradeRequest,
    ) -> Result<Trade, TradingError> {
        let user = self
            .store
            .get_user_by_id(user_id)
            .await?
            .ok_or(TradingError::UserNotFound)?;
        if user.status != UserStatus::Active {
            return Err(TradingError::AccountInactive(user.status));
        }
        if user.restrictions.contains(Restriction::NoTrading) {
            return Err(TradingError::Restricted(Restriction::NoTrading));
        }

        let symbol = request.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(TradingError::InvalidTrade("symbol is required".to_string()));
        }
        if request.amount <= Decimal::ZERO {
            return Err(TradingError::InvalidTrade("amount must be positive".to_string()));
        }
        if request.entry_price <= Decimal::ZERO {
            return Err(TradingError::InvalidTrade(
                "entry_price must be positive".to_string(),
            ));
        }
        check_money("amount", request.amount).map_err(TradingError::InvalidTrade)?;
        check_money("entry_price", request.entry_price).map_err(TradingError::InvalidTrade)?;
        if request.duration <= 0 {
            return Err(TradingError::InvalidTrade("duration must be positive".to_string()));
        }

        let settings = self.store.get_trading_settings().await?;
        if let Some(tier) = settings.iter().find(|s| s.duration == request.duration) {
            if !tier.enabled {
                return Err(TradingError::InvalidTrade(format!(
                    "{}s trades are disabled",
                    tier.duration
                )));
            }
            if request.amount < tier.min_amount || request.amount > tier.max_amount {
                return Err(TradingError::InvalidTrade(format!(
                    "amount must be between {} and {} for {}s trades",
                    tier.min_amount, tier.max_amount, tier.duration
                )));
            }
        }

        let now = Utc::now();
        let new_trade = NewTrade {
            user_id: user.id,
            symbol,
            amount: request.amount,
            direction: request.direction,
            duration: request.duration,
            entry_price: request.entry_price,
            created_at: now,
            expires_at: now + Duration::seconds(i64::from(request.duration)),
        };

        let created = self.store.create_trade(new_trade).await;
        self.users.invalidate(&user.id);
        let trade = created.map_err(|e| match e {
            DbError::InsufficientBalance => TradingError::InsufficientBalance,
            DbError::NotFound => TradingError::UserNotFound,
            other => TradingError::Db(other),
        })?;

        info!(
            "Trade {} placed: user={} {} {} {} for {}s @ {}",
            trade.id,
            trade.user_id,
            trade.symbol,
            trade.direction,
            trade.amount,
            trade.duration,
            trade.entry_price
        );
        Ok(trade)
    }

    // ==========================================
    // Settlement
    // ==========================================

    /// Settle a pending trade, with `forced` overriding the natural outcome.
    pub async fn settle_trade(
        &self,
        trade_id: Uuid,
        forced: Option<TradeOutcome>,
    ) -> Result<Trade, TradingError> {
        self.settle_at(trade_id, forced, Utc::now()).await
    }

    /// Naturally settle every pending trade whose expiry is at or before `now`.
    pub async fn settle_expired(&self, now: DateTime<Utc>) -> Result<SweepReport, TradingError> {
        let expired = self.store.list_expired_pending_trades(now).await?;
        debug!("Settlement sweep found {} expired trades", expired.len());

        let mut report = SweepReport::default();
        for trade in expired {
            match self.settle_at(trade.id, None, now).await {
                Ok(settled) => report.settled.push(settled),
                Err(TradingError::AlreadySettled) => report.skipped += 1,
                Err(e) => {
                    warn!("Failed to settle expired trade {}: {}", trade.id, e);
                    report.failed.push(SweepFailure {
                        trade_id: trade.id,
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Settlement sweep: {} settled, {} skipped, {} failed",
            report.settled.len(),
            report.skipped,
            report.failed.len()
        );
        Ok(report)
    }

    async fn settle_at(
        &self,
        trade_id: Uuid,
        forced: Option<TradeOutcome>,
        now: DateTime<Utc>,
    ) -> Result<Trade, TradingError> {
        let trade = self
            .store
            .get_trade(trade_id)
            .await?
            .ok_or(TradingError::TradeNotFound)?;
        if !trade.is_pending() {
            return Err(TradingError::AlreadySettled);
        }

        let (outcome, market_price) = match forced {
            Some(outcome) => (outcome, None),
            None => self.natural_outcome(&trade, now).await?,
        };

        let payout_rate = self.payout_rate(trade.duration).await?;
        let exit_price = match market_price {
            Some(price) => price,
            None => nudged_exit_price(
                trade.entry_price,
                trade.direction,
                outcome,
                self.config_manager.get_config().exit_price_nudge,
            ),
        };

        let write = plan_settlement(&trade, outcome, payout_rate, exit_price);
        let settled = self.store.settle_trade(&write).await;
        self.users.invalidate(&trade.user_id);
        let settled = settled?.ok_or(TradingError::AlreadySettled)?;

        info!(
            "Trade {} settled {}{}: profit={}, exit_price={}",
            settled.id,
            outcome,
            if forced.is_some() { " (forced)" } else { "" },
            write.profit,
            write.exit_price
        );
        Ok(settled)
    }

    /// Outcome when no admin forced one. The owner's trading mode wins over
    /// the market; otherwise the feed price decides and a tie loses.
    async fn natural_outcome(
        &self,
        trade: &Trade,
        now: DateTime<Utc>,
    ) -> Result<(TradeOutcome, Option<Decimal>), TradingError> {
        if !trade.is_expired(now) {
            return Err(TradingError::NotExpired(trade.expires_at));
        }

        let owner = self
            .store
            .get_user_by_id(trade.user_id)
            .await?
            .ok_or(TradingError::UserNotFound)?;

        match owner.trading_mode {
            TradingMode::Win => Ok((TradeOutcome::Win, None)),
            TradingMode::Lose => Ok((TradeOutcome::Lose, None)),
            TradingMode::Normal => {
                let price = self
                    .price_feed
                    .price_at(&trade.symbol, trade.entry_price, trade.expires_at)
                    .await?;
                let won = match trade.direction {
                    Direction::Up => price > trade.entry_price,
                    Direction::Down => price < trade.entry_price,
                };
                let outcome = if won { TradeOutcome::Win } else { TradeOutcome::Lose };
                Ok((outcome, Some(price)))
            }
        }
    }

    // ==========================================
    // Trading bias
    // ==========================================

    /// Sticky per-user bias for future natural settlements. Does not touch
    /// trades that are already settled.
    pub async fn set_trading_bias(
        &self,
        user_id: Uuid,
        mode: TradingMode,
    ) -> Result<User, TradingError> {
        let update = UserUpdate {
            trading_mode: Some(mode),
            ..UserUpdate::default()
        };
        let updated = self.store.update_user(user_id, update).await;
        self.users.invalidate(&user_id);
        let user = updated?.ok_or(TradingError::UserNotFound)?;
        info!("Trading mode for {} set to {}", user.username, mode);
        Ok(user)
    }
}

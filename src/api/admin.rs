//! Admin endpoints
//!
//! Every handler resolves the caller with `CurrentUser` and asks the guard
//! before reading or writing anything.

use super::error::ApiError;
use super::extract::{ApiJson, ApiPath, CurrentUser};
use super::handlers::{list_response, validate_email};
use crate::db::{check_money, BalanceAdjustment, TradingSettingUpdate, User, UserUpdate};
use crate::guard::{authorize, authorize_target, Action};
use crate::restrictions::Restrictions;
use crate::trading::parse_outcome;
use crate::types::{BalanceAction, Role, TradingMode, TransactionStatus, UserStatus};
use crate::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

// ==========================================
// Request Types
// ==========================================

#[derive(Debug, Deserialize)]
pub struct AdminUserUpdate {
    pub email: Option<String>,
    pub status: Option<UserStatus>,
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct RestrictionsRequest {
    pub restrictions: Restrictions,
}

#[derive(Debug, Deserialize)]
pub struct TradingControlRequest {
    #[serde(alias = "userId")]
    pub user_id: Uuid,
    #[serde(alias = "controlType")]
    pub control_type: String,
}

#[derive(Debug, Deserialize)]
pub struct TradeControlRequest {
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub struct BalanceRequest {
    #[serde(alias = "newBalance", alias = "amount")]
    pub balance: Decimal,
    pub action: BalanceAction,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SettlementConfigUpdate {
    #[serde(alias = "defaultPayoutRate")]
    pub default_payout_rate: Option<Decimal>,
    #[serde(alias = "exitPriceNudge")]
    pub exit_price_nudge: Option<Decimal>,
}

async fn load_target(state: &AppState, user_id: Uuid) -> Result<User, ApiError> {
    state
        .store
        .get_user_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

// ==========================================
// Listings
// ==========================================

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    authorize(caller.role, Action::ListAll)?;
    Ok(list_response(state.store.list_users().await?))
}

pub async fn list_trades(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    authorize(caller.role, Action::ListAll)?;
    Ok(list_response(state.store.list_trades(None).await?))
}

pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    authorize(caller.role, Action::ListAll)?;
    Ok(list_response(state.store.list_transactions(None).await?))
}

// ==========================================
// User Management
// ==========================================

pub async fn update_user(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
    ApiPath(user_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<AdminUserUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let target = load_target(&state, user_id).await?;
    let changes_role = req.role.is_some_and(|role| role != target.role);
    authorize_target(caller.role, Action::EditUser { changes_role }, target.role)?;

    let update = UserUpdate {
        email: req.email.as_deref().map(validate_email).transpose()?,
        status: req.status,
        role: req.role,
        ..UserUpdate::default()
    };
    let updated = state.store.update_user(user_id, update).await;
    state.users.invalidate(&user_id);
    let updated = updated?.ok_or_else(|| ApiError::not_found("User not found"))?;

    info!("User {} updated by {}", updated.username, caller.username);
    Ok(Json(serde_json::json!({
        "success": true,
        "user": updated
    })))
}

pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
    ApiPath(user_id): ApiPath<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let target = load_target(&state, user_id).await?;
    authorize_target(caller.role, Action::DeleteUser, target.role)?;

    let deleted = state.store.delete_user(user_id).await;
    state.users.invalidate(&user_id);
    if !deleted? {
        return Err(ApiError::not_found("User not found"));
    }

    info!("User {} deleted by {}", target.username, caller.username);
    Ok(Json(serde_json::json!({
        "success": true,
        "message": format!("User {} deleted", target.username)
    })))
}

pub async fn set_restrictions(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
    ApiPath(user_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<RestrictionsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let target = load_target(&state, user_id).await?;
    authorize_target(caller.role, Action::ManageRestrictions, target.role)?;

    let update = UserUpdate {
        restrictions: Some(req.restrictions),
        ..UserUpdate::default()
    };
    let updated = state.store.update_user(user_id, update).await;
    state.users.invalidate(&user_id);
    let updated = updated?.ok_or_else(|| ApiError::not_found("User not found"))?;

    info!(
        "Restrictions for {} set to {:?} by {}",
        updated.username,
        updated.restrictions.to_db(),
        caller.username
    );
    Ok(Json(serde_json::json!({
        "success": true,
        "user": updated
    })))
}

// ==========================================
// Trading Controls
// ==========================================

/// Set a user's sticky win/lose/normal bias for future natural settlements.
pub async fn set_trading_control(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
    ApiJson(req): ApiJson<TradingControlRequest>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(caller.role, Action::SetTradingMode)?;
    let mode: TradingMode = req
        .control_type
        .parse()
        .map_err(|e: crate::types::ParseEnumError| ApiError::bad_request(e.to_string()))?;

    let user = state.engine.set_trading_bias(req.user_id, mode).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "user": user
    })))
}

/// Settle one pending trade with an admin-chosen outcome.
pub async fn control_trade(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
    ApiPath(trade_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<TradeControlRequest>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(caller.role, Action::ForceTradeOutcome)?;
    let outcome = parse_outcome(&req.action)?;

    let trade = state.engine.settle_trade(trade_id, Some(outcome)).await?;
    info!("Trade {} forced to {} by {}", trade.id, outcome, caller.username);
    Ok(Json(serde_json::json!({
        "success": true,
        "trade": trade
    })))
}

pub async fn settle_trade(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
    ApiPath(trade_id): ApiPath<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(caller.role, Action::Settle)?;
    let trade = state.engine.settle_trade(trade_id, None).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "trade": trade
    })))
}

pub async fn settle_expired(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    authorize(caller.role, Action::Settle)?;
    let report = state.engine.settle_expired(Utc::now()).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "report": report
    })))
}

// ==========================================
// Balances & Transactions
// ==========================================

pub async fn adjust_balance(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
    ApiPath(user_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<BalanceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(caller.role, Action::AdjustBalance)?;
    let amount = check_money("balance", req.balance).map_err(ApiError::BadRequest)?;

    let adjustment = BalanceAdjustment {
        user_id,
        action: req.action,
        amount,
        note: req.note,
    };
    let change = state.store.adjust_balance(adjustment).await;
    state.users.invalidate(&user_id);
    let change = change?.ok_or_else(|| ApiError::not_found("User not found"))?;
    let user = load_target(&state, user_id).await?;

    info!(
        "Balance of {} changed {} -> {} ({}) by {}",
        user.username, change.previous_balance, change.new_balance, req.action, caller.username
    );
    Ok(Json(serde_json::json!({
        "success": true,
        "previousBalance": change.previous_balance,
        "newBalance": change.new_balance,
        "transaction": change.transaction,
        "user": user
    })))
}

pub async fn approve_transaction(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
    ApiPath(transaction_id): ApiPath<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(caller.role, Action::ApproveTransaction)?;

    let Some(transaction) = state.store.complete_transaction(transaction_id).await? else {
        return match state.store.get_transaction(transaction_id).await? {
            Some(existing) if existing.status == TransactionStatus::Completed => Err(
                ApiError::Conflict("Transaction already completed".to_string()),
            ),
            _ => Err(ApiError::not_found("Transaction not found")),
        };
    };
    state.users.invalidate(&transaction.user_id);

    info!(
        "Transaction {} ({}) approved by {}",
        transaction.id, transaction.kind, caller.username
    );
    Ok(Json(serde_json::json!({
        "success": true,
        "transaction": transaction
    })))
}

// ==========================================
// Trading Settings & Settlement Config
// ==========================================

pub async fn get_all_trading_settings(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    authorize(caller.role, Action::ViewSettings)?;
    Ok(list_response(state.engine.trading_settings().await?))
}

pub async fn update_trading_setting(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
    ApiPath(setting_id): ApiPath<i32>,
    ApiJson(update): ApiJson<TradingSettingUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(caller.role, Action::ManageSettings)?;
    let setting = state.engine.update_trading_setting(setting_id, update).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "setting": setting
    })))
}

pub async fn get_settlement_config(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    authorize(caller.role, Action::ViewSettings)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "config": state.engine.config_manager().get_config()
    })))
}

pub async fn update_settlement_config(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
    ApiJson(req): ApiJson<SettlementConfigUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(caller.role, Action::ManageSettings)?;
    let config = state
        .engine
        .config_manager()
        .update_config(req.default_payout_rate, req.exit_price_nudge)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "config": config
    })))
}

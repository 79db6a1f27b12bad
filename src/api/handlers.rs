//! API request handlers
//!
//! Public and account-scoped endpoints. Admin endpoints live in `admin.rs`.

use super::error::ApiError;
use super::extract::{ApiJson, ApiPath, CurrentUser};
use crate::auth::AuthError;
use crate::db::{check_money, NewUser, User, UserUpdate};
use crate::restrictions::Restriction;
use crate::trading::PlaceTradeRequest;
use crate::types::{Role, UserStatus};
use crate::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

// ==========================================
// Response Helpers
// ==========================================

pub fn list_response<T: Serialize>(items: Vec<T>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "count": items.len(),
        "data": items
    }))
}

// ==========================================
// Request Types
// ==========================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MoneyRequest {
    pub amount: Decimal,
    pub description: Option<String>,
}

pub(crate) fn validate_email(email: &str) -> Result<String, ApiError> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {
            Ok(email.to_string())
        }
        _ => Err(ApiError::bad_request("A valid email address is required")),
    }
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < 6 {
        return Err(ApiError::bad_request(
            "Password must be at least 6 characters",
        ));
    }
    Ok(())
}

fn validate_username(username: &str) -> Result<String, ApiError> {
    let username = username.trim();
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !(3..=32).contains(&username.len()) || !valid_chars {
        return Err(ApiError::bad_request(
            "Username must be 3-32 characters of letters, digits, '_' or '-'",
        ));
    }
    Ok(username.to_string())
}

fn positive_amount(amount: Decimal) -> Result<Decimal, ApiError> {
    if amount <= Decimal::ZERO {
        return Err(ApiError::bad_request("amount must be positive"));
    }
    check_money("amount", amount).map_err(ApiError::BadRequest)
}

/// Re-read the caller from the store; money paths must not act on a cached row.
async fn fresh_account(state: &AppState, id: Uuid) -> Result<User, ApiError> {
    let user = state
        .store
        .get_user_by_id(id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User no longer exists".to_string()))?;
    if user.status != UserStatus::Active {
        return Err(ApiError::Forbidden(format!("Account is {}", user.status)));
    }
    Ok(user)
}

// ==========================================
// Health
// ==========================================

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "success": true,
        "status": "healthy",
        "service": "optiondesk",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ==========================================
// Auth Handlers
// ==========================================

pub async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = validate_username(&req.username)?;
    let email = validate_email(&req.email)?;
    validate_password(&req.password)?;

    let password_hash = state.tokens.hash_password(&req.password).await?;
    let user = state
        .store
        .create_user(NewUser {
            username,
            email,
            password_hash,
            balance: Decimal::ZERO,
            role: Role::User,
        })
        .await
        .map_err(|e| match ApiError::from(e) {
            ApiError::Conflict(_) => ApiError::Conflict("Username already taken".to_string()),
            other => other,
        })?;

    let token = state.tokens.issue(user.id, user.role)?;
    info!("Registered user {}", user.username);

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "token": token,
            "user": user
        })),
    ))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .store
        .get_user_by_username(req.username.trim())
        .await?
        .ok_or(AuthError::InvalidCredentials)?;
    if !state
        .tokens
        .verify_password(&req.password, &user.password_hash)
        .await?
    {
        return Err(AuthError::InvalidCredentials.into());
    }

    if user.status != UserStatus::Active {
        return Err(ApiError::Forbidden(format!("Account is {}", user.status)));
    }

    state.store.record_login(user.id, Utc::now()).await?;
    state.users.invalidate(&user.id);
    let token = state.tokens.issue(user.id, user.role)?;
    info!("User {} logged in", user.username);

    Ok(Json(serde_json::json!({
        "success": true,
        "token": token,
        "user": user
    })))
}

pub async fn me(CurrentUser(user): CurrentUser) -> impl IntoResponse {
    Json(serde_json::json!({
        "success": true,
        "user": user
    }))
}

pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    ApiJson(req): ApiJson<ProfileUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.as_deref().map(validate_email).transpose()?;
    let password_hash = match req.password.as_deref() {
        Some(password) => {
            validate_password(password)?;
            Some(state.tokens.hash_password(password).await?)
        }
        None => None,
    };

    let update = UserUpdate {
        email,
        password_hash,
        ..UserUpdate::default()
    };
    let updated = state.store.update_user(user.id, update).await;
    state.users.invalidate(&user.id);
    let updated = updated?.ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(serde_json::json!({
        "success": true,
        "user": updated
    })))
}

// ==========================================
// Trading Settings
// ==========================================

pub async fn get_trading_settings(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let enabled: Vec<_> = state
        .engine
        .trading_settings()
        .await?
        .into_iter()
        .filter(|s| s.enabled)
        .collect();
    Ok(list_response(enabled))
}

// ==========================================
// Trades
// ==========================================

pub async fn place_trade(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    ApiJson(req): ApiJson<PlaceTradeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let trade = state.engine.place_trade(user.id, req).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "trade": trade
        })),
    ))
}

pub async fn get_my_trades(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let trades = state.store.list_trades(Some(user.id)).await?;
    Ok(list_response(trades))
}

/// Owners see their own trades; admins may read any. Someone else's trade
/// is reported as missing.
pub async fn get_trade(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    ApiPath(trade_id): ApiPath<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let trade = state
        .store
        .get_trade(trade_id)
        .await?
        .filter(|trade| trade.user_id == user.id || user.role.is_admin())
        .ok_or_else(|| ApiError::not_found("Trade not found"))?;

    Ok(Json(serde_json::json!({
        "success": true,
        "trade": trade
    })))
}

// ==========================================
// Transactions
// ==========================================

pub async fn get_my_transactions(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let transactions = state.store.list_transactions(Some(user.id)).await?;
    Ok(list_response(transactions))
}

pub async fn request_deposit(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    ApiJson(req): ApiJson<MoneyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = fresh_account(&state, user.id).await?;
    if user.restrictions.contains(Restriction::NoDeposit) {
        return Err(ApiError::Forbidden("Deposits are restricted on this account".to_string()));
    }
    let amount = positive_amount(req.amount)?;
    let description = req.description.unwrap_or_else(|| "Deposit request".to_string());

    let transaction = state
        .store
        .request_deposit(user.id, amount, &description)
        .await?;
    info!("Deposit {} requested by {}: {}", transaction.id, user.username, amount);

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "transaction": transaction
        })),
    ))
}

pub async fn request_withdrawal(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    ApiJson(req): ApiJson<MoneyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = fresh_account(&state, user.id).await?;
    if user.restrictions.contains(Restriction::NoWithdrawal) {
        return Err(ApiError::Forbidden(
            "Withdrawals are restricted on this account".to_string(),
        ));
    }
    let amount = positive_amount(req.amount)?;
    let description = req
        .description
        .unwrap_or_else(|| "Withdrawal request".to_string());

    let result = state
        .store
        .request_withdrawal(user.id, amount, &description)
        .await;
    state.users.invalidate(&user.id);
    let transaction = result?;
    info!(
        "Withdrawal {} requested by {}: {}",
        transaction.id, user.username, amount
    );

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "transaction": transaction
        })),
    ))
}

// ==========================================
// Fallbacks
// ==========================================

pub async fn not_found() -> ApiError {
    ApiError::not_found("Route not found")
}

//! API module - Axum HTTP server and routes
//!
//! JSON in, JSON out. Errors always use the `{success: false, message}`
//! body, including axum's own 404/405 responses.

mod admin;
mod error;
mod extract;
mod handlers;

pub use error::ApiError;

use crate::AppState;
use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main application router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ==========================================
        // Health & Auth
        // ==========================================
        .route("/api/health", get(handlers::health_check))
        .route("/api/auth/register", post(handlers::register))
        .route("/api/auth/login", post(handlers::login))
        .route("/api/auth/me", get(handlers::me))
        .route("/api/users/me", put(handlers::update_profile))

        // ==========================================
        // Trading
        // ==========================================
        .route("/api/trading-settings", get(handlers::get_trading_settings))
        .route("/api/trades", get(handlers::get_my_trades).post(handlers::place_trade))
        .route("/api/trades/:trade_id", get(handlers::get_trade))

        // ==========================================
        // Transactions
        // ==========================================
        .route("/api/transactions", get(handlers::get_my_transactions))
        .route("/api/transactions/deposit", post(handlers::request_deposit))
        .route("/api/transactions/withdraw", post(handlers::request_withdrawal))

        // ==========================================
        // Admin - Users
        // ==========================================
        .route("/api/admin/users", get(admin::list_users))
        .route(
            "/api/admin/users/:user_id",
            put(admin::update_user).delete(admin::delete_user),
        )
        .route("/api/admin/users/:user_id/restrictions", put(admin::set_restrictions))

        // ==========================================
        // Admin - Trades
        // ==========================================
        .route("/api/admin/trades", get(admin::list_trades))
        .route("/api/admin/trading-controls", post(admin::set_trading_control))
        .route("/api/admin/trades/settle-expired", post(admin::settle_expired))
        .route("/api/admin/trades/:trade_id/control", post(admin::control_trade))
        .route("/api/admin/trades/:trade_id/settle", post(admin::settle_trade))

        // ==========================================
        // Admin - Balances & Transactions
        // ==========================================
        .route("/api/admin/balances/:user_id", put(admin::adjust_balance))
        .route("/api/admin/transactions", get(admin::list_transactions))
        .route(
            "/api/admin/transactions/:transaction_id/approve",
            post(admin::approve_transaction),
        )

        // ==========================================
        // Admin - Settings
        // ==========================================
        .route("/api/admin/trading-settings", get(admin::get_all_trading_settings))
        .route("/api/admin/trading-settings/:setting_id", put(admin::update_trading_setting))
        .route(
            "/api/admin/settlement-config",
            get(admin::get_settlement_config).put(admin::update_settlement_config),
        )

        .fallback(handlers::not_found)

        // Apply middleware
        .layer(middleware::map_response(json_method_not_allowed))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// axum answers a known path with the wrong method with an empty 405.
async fn json_method_not_allowed(response: Response) -> Response {
    if response.status() == StatusCode::METHOD_NOT_ALLOWED {
        return ApiError::MethodNotAllowed.into_response();
    }
    response
}

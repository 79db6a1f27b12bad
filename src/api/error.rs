//! API error type
//!
//! Every failure leaves the API as `{"success": false, "message": ...}` with
//! a status derived from the domain error.

use crate::auth::AuthError;
use crate::config_manager::SettlementConfigError;
use crate::db::DbError;
use crate::guard::GuardError;
use crate::trading::TradingError;
use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Internal(detail) => {
                error!("Internal error: {}", detail);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (
            status,
            Json(serde_json::json!({
                "success": false,
                "message": message
            })),
        )
            .into_response()
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => ApiError::not_found("Record not found"),
            DbError::Conflict(msg) => ApiError::Conflict(msg),
            DbError::InsufficientBalance => ApiError::Conflict("Insufficient balance".to_string()),
            DbError::OutOfRange => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<TradingError> for ApiError {
    fn from(err: TradingError) -> Self {
        match err {
            TradingError::TradeNotFound
            | TradingError::UserNotFound
            | TradingError::SettingNotFound => ApiError::NotFound(err.to_string()),
            TradingError::AlreadySettled
            | TradingError::NotExpired(_)
            | TradingError::InsufficientBalance => ApiError::Conflict(err.to_string()),
            TradingError::InvalidOutcome(_)
            | TradingError::InvalidTrade(_)
            | TradingError::InvalidSetting(_) => ApiError::BadRequest(err.to_string()),
            TradingError::AccountInactive(_) | TradingError::Restricted(_) => {
                ApiError::Forbidden(err.to_string())
            }
            TradingError::PriceFeed(e) => ApiError::Internal(e.to_string()),
            TradingError::Db(e) => e.into(),
        }
    }
}

impl From<GuardError> for ApiError {
    fn from(err: GuardError) -> Self {
        warn!("Authorization denied: {}", err);
        ApiError::Forbidden(err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken | AuthError::InvalidToken | AuthError::InvalidCredentials => {
                ApiError::Unauthorized(err.to_string())
            }
            AuthError::Hash(_) | AuthError::Encode(_) | AuthError::Task(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<SettlementConfigError> for ApiError {
    fn from(err: SettlementConfigError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

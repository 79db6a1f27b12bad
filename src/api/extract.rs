//! Request extractors that reject with `ApiError` instead of axum's plain-text
//! rejections.

use super::error::ApiError;
use crate::auth::bearer_token;
use crate::db::User;
use crate::types::UserStatus;
use crate::AppState;
use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use std::sync::Arc;

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// The authenticated, active account behind the bearer token.
///
/// Role and status come from the stored user, not the token, so a demotion
/// or suspension applies to tokens already issued once the cached row
/// expires (`CACHE_TTL_SECS`). Writes made through this instance apply at once.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        let token = bearer_token(header)?;
        let claims = state.tokens.verify(token)?;

        let user = state
            .load_user(claims.sub)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("Account no longer exists".to_string()))?;
        if user.status != UserStatus::Active {
            return Err(ApiError::Forbidden(format!("Account is {}", user.status)));
        }
        Ok(CurrentUser(user))
    }
}

//! Authentication Module
//!
//! Provides:
//! - bcrypt password hashing and verification
//! - HS256 JWT issuance and validation (sub = user id, role, exp)

use crate::types::Role;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("Token encoding failed: {0}")]
    Encode(#[from] jsonwebtoken::errors::Error),
    #[error("Password task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

/// JWT signer / verifier plus password hashing cost
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    bcrypt_cost: u32,
}

impl TokenService {
    pub fn new(secret: &str, ttl_hours: i64, bcrypt_cost: u32) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::hours(ttl_hours),
            bcrypt_cost,
        }
    }

    pub fn issue(&self, user_id: Uuid, role: Role) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id,
            role,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| AuthError::InvalidToken)
    }

    /// bcrypt is CPU-bound, so hashing runs on the blocking pool.
    pub async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let password = password.to_owned();
        let cost = self.bcrypt_cost;
        let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;
        Ok(hash)
    }

    /// A malformed stored hash counts as a mismatch.
    pub async fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let password = password.to_owned();
        let hash = hash.to_owned();
        let matched =
            tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash).unwrap_or(false))
                .await?;
        Ok(matched)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    header
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingToken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn service() -> TokenService {
        TokenService::new("test-secret", 1, 4)
    }

    #[test]
    fn test_issue_and_verify() {
        let tokens = service();
        let id = Uuid::new_v4();
        let token = tokens.issue(id, Role::Admin).unwrap();
        let claims = tokens.verify(&token).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.role, Role::Admin);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = service().issue(Uuid::new_v4(), Role::User).unwrap();
        let other = TokenService::new("other-secret", 1, 4);
        assert!(matches!(other.verify(&token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_expired_token_rejected() {
        let tokens = TokenService::new("test-secret", -2, 4);
        let token = tokens.issue(Uuid::new_v4(), Role::User).unwrap();
        assert!(matches!(tokens.verify(&token), Err(AuthError::InvalidToken)));
    }

    #[tokio::test]
    async fn test_password_roundtrip() {
        let tokens = service();
        let hash = tokens.hash_password("hunter22").await.unwrap();
        assert!(tokens.verify_password("hunter22", &hash).await.unwrap());
        assert!(!tokens.verify_password("hunter23", &hash).await.unwrap());
        assert!(!tokens.verify_password("hunter22", "not-a-hash").await.unwrap());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_hashing_leaves_the_runtime_free() {
        let tokens = Arc::new(TokenService::new("test-secret", 1, 11));
        let hashing = {
            let tokens = Arc::clone(&tokens);
            tokio::spawn(async move { tokens.hash_password("hunter22").await })
        };
        // A timer on the same single-threaded runtime still fires while the
        // hash is computed elsewhere.
        let ticked = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            tokio::time::sleep(std::time::Duration::from_millis(1)),
        )
        .await;
        assert!(ticked.is_ok());
        assert!(!hashing.is_finished());
        let hash = hashing.await.unwrap().unwrap();
        assert!(tokens.verify_password("hunter22", &hash).await.unwrap());
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(Some("Bearer abc")).unwrap(), "abc");
        assert!(matches!(bearer_token(Some("Basic abc")), Err(AuthError::MissingToken)));
        assert!(matches!(bearer_token(Some("Bearer ")), Err(AuthError::MissingToken)));
        assert!(matches!(bearer_token(None), Err(AuthError::MissingToken)));
    }
}

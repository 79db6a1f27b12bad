//! OptionDesk - binary-options trading backend
//!
//! Trade placement and settlement, admin controls and the account ledger,
//! served over an axum JSON API backed by PostgreSQL.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod config_manager;
pub mod db;
pub mod guard;
pub mod price_feed;
pub mod restrictions;
pub mod trading;
pub mod types;

use crate::auth::TokenService;
use crate::cache::Cache;
use crate::config_manager::ConfigManager;
use crate::db::{DbError, Store, User};
use crate::price_feed::PriceFeed;
use crate::trading::TradingEngine;

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Application state shared across all handlers
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub engine: Arc<TradingEngine>,
    pub tokens: TokenService,
    pub users: Arc<Cache<Uuid, User>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        config_manager: Arc<ConfigManager>,
        price_feed: Arc<dyn PriceFeed>,
        tokens: TokenService,
        cache_capacity: usize,
        cache_ttl: Duration,
    ) -> Self {
        let users = Arc::new(Cache::new(cache_capacity, cache_ttl));
        let engine = Arc::new(TradingEngine::new(
            Arc::clone(&store),
            config_manager,
            price_feed,
            Arc::clone(&users),
            cache_ttl,
        ));
        Self {
            store,
            engine,
            tokens,
            users,
        }
    }

    /// Current user row, read through the user cache. May lag a write made
    /// by another instance by up to the cache TTL.
    pub async fn load_user(&self, id: Uuid) -> Result<Option<User>, DbError> {
        let store = Arc::clone(&self.store);
        self.users
            .get_or_try_load(id, || async move { store.get_user_by_id(id).await })
            .await
    }
}

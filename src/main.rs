//! OptionDesk server
//!
//! Loads configuration, connects to PostgreSQL and serves the JSON API.

use optiondesk::api::create_router;
use optiondesk::auth::TokenService;
use optiondesk::config::AppConfig;
use optiondesk::config_manager::{ConfigManager, SettlementConfig};
use optiondesk::db::Database;
use optiondesk::price_feed::SimulatedPriceFeed;
use optiondesk::AppState;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logging
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("OptionDesk trading backend v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env()?;

    // Initialize database
    info!("Connecting to database...");
    let db = Database::new(&config.database_url, config.db_max_connections).await?;
    info!("Database connected");

    if config.run_migrations {
        db.run_migrations().await?;
        info!("Schema migrations applied");
    }

    let config_manager = Arc::new(ConfigManager::new(SettlementConfig {
        default_payout_rate: config.default_payout_rate,
        exit_price_nudge: config.exit_price_nudge,
    })?);

    warn!("Natural settlement uses the simulated price feed");
    let state = Arc::new(AppState::new(
        Arc::new(db),
        config_manager,
        Arc::new(SimulatedPriceFeed::default()),
        TokenService::new(&config.jwt_secret, config.jwt_ttl_hours, config.bcrypt_cost),
        config.cache_capacity,
        Duration::from_secs(config.cache_ttl_secs),
    ));

    // Create router with all API endpoints
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting API server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}

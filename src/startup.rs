use crate::config::Config;
use crate::error::Error;
use crate::shutdown;
use crate::store::{CachedDb, CalendarDb, InMemoryDb, RedisDb};
use crate::web::{self, AppState};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initialize logging with environment-based configuration
pub fn init_logging() -> miette::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Other(format!("Failed to set up logging: {}", e)))?;

    Ok(())
}

/// Load the application config
pub fn load_config() -> miette::Result<Config> {
    match Config::load() {
        Ok(config) => Ok(config),
        Err(e) => {
            error!("Failed to load configuration: {:?}", e);
            Err(e.into())
        }
    }
}

/// Open the configured store behind the listing cache.
/// Falls back to the in-memory store when Redis is not configured or unreachable.
pub async fn open_store(config: &Config) -> Arc<dyn CalendarDb> {
    let Some(redis_url) = config.redis_url.as_deref() else {
        info!("REDIS_URL not set, using in-memory database");
        return Arc::new(CachedDb::new(InMemoryDb::new()));
    };

    match RedisDb::connect(redis_url).await {
        Ok(redis_db) => {
            info!("Connected to Redis successfully");
            Arc::new(CachedDb::new(redis_db))
        }
        Err(e) => {
            warn!("Failed to connect to Redis: {}", e);
            info!("Using in-memory database as fallback");
            Arc::new(CachedDb::new(InMemoryDb::new()))
        }
    }
}

/// Build the shared state and serve the API until a shutdown signal arrives
pub async fn start_server(config: Config) -> miette::Result<()> {
    let addr = config.socket_addr()?;
    info!(
        "Calendar timezone {}, weeks start on {}",
        config.timezone, config.week_start
    );

    let db = open_store(&config).await;
    let app = web::router(AppState::new(config, db));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(Error::from)?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await
        .map_err(Error::from)?;

    info!("Server stopped");
    Ok(())
}

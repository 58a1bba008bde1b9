pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;

use actix_web::{web, HttpResponse};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

pub use auth::AuthService;
use cache::{MemorySessionCache, RedisSessionCache, SessionCache};
use config::LoggingConfig;
use db::{CredentialStore, DbOperations, MemoryCredentialStore};

/// Health check endpoint handler
/// Returns server status, timestamp and, when backed by Postgres, pool usage.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let database = match &state.db {
        Some(db) => serde_json::to_value(db.pool_status()).unwrap_or_default(),
        None => serde_json::json!({ "backend": "memory" }),
    };

    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "database": database,
    }))
}

/// Installs the global tracing subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let result = if config.format == "json" {
        builder.json().try_init()
    } else {
        builder.pretty().try_init()
    };
    if result.is_err() {
        // Already installed, e.g. by a test harness.
        tracing::debug!("tracing subscriber already initialised");
    }
}

/// JSON extractor errors rendered in the same envelope as every other error.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(64 * 1024)
        .error_handler(|err, _req| AppError::ValidationError(err.to_string()).into())
}

/// Application state shared across all workers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub auth_service: Arc<AuthService>,
    /// `None` when running on the in-memory store.
    pub db: Option<DbOperations>,
}

impl AppState {
    /// Connects the store and session cache named by `config`. A `memory://`
    /// URL selects the in-process implementation for that backend.
    pub async fn new(config: Settings) -> Result<Self> {
        let (store, db): (Arc<dyn CredentialStore>, Option<DbOperations>) =
            if config.database.is_memory() {
                info!("Using in-memory credential store");
                (Arc::new(MemoryCredentialStore::new()), None)
            } else {
                let db = DbOperations::connect(&config.database).await?;
                if config.database.run_migrations {
                    db.run_migrations().await?;
                }
                (Arc::new(db.clone()), Some(db))
            };

        let cache: Arc<dyn SessionCache> = if config.redis.is_memory() {
            info!("Using in-memory session cache");
            Arc::new(MemorySessionCache::new())
        } else {
            Arc::new(RedisSessionCache::connect(&config.redis).await?)
        };

        Ok(Self::with_backends(config, store, cache, db))
    }

    pub fn with_backends(
        config: Settings,
        store: Arc<dyn CredentialStore>,
        cache: Arc<dyn SessionCache>,
        db: Option<DbOperations>,
    ) -> Self {
        let auth_service = AuthService::new(store, cache, &config.auth);
        Self {
            config: Arc::new(config),
            auth_service: Arc::new(auth_service),
            db,
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        if let Some(db) = &self.db {
            db.close().await;
        }
        Ok(())
    }
}

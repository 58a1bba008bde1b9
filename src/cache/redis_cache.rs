use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::{refresh_key, CacheResult, SessionCache};
use crate::config::RedisConfig;
use crate::error::CacheError;

/// Redis-backed session cache. The connection manager reconnects on its own;
/// each command is bounded by the configured operation timeout.
#[derive(Clone)]
pub struct RedisSessionCache {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisSessionCache {
    pub async fn connect(config: &RedisConfig) -> CacheResult<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let conn = bounded(config.operation_timeout() * 10, ConnectionManager::new(client)).await?;
        info!("Redis connection established");
        Ok(Self {
            conn,
            op_timeout: config.operation_timeout(),
        })
    }
}

async fn bounded<T, F>(limit: Duration, fut: F) -> CacheResult<T>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(CacheError::from),
        Err(_) => Err(CacheError::Timeout),
    }
}

#[async_trait]
impl SessionCache for RedisSessionCache {
    async fn put(&self, user_id: Uuid, token: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let seconds = ttl.as_secs().max(1);
        bounded(self.op_timeout, conn.set_ex::<_, _, ()>(refresh_key(user_id), token, seconds)).await
    }

    async fn get(&self, user_id: Uuid) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        bounded(self.op_timeout, conn.get::<_, Option<String>>(refresh_key(user_id))).await
    }

    async fn evict(&self, user_id: Uuid) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        bounded(self.op_timeout, conn.del::<_, i64>(refresh_key(user_id)))
            .await
            .map(|_| ())
    }
}

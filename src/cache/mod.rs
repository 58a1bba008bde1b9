//! Session cache
//!
//! Holds the one refresh token per user that the refresh flow will accept.
//! Overwriting or evicting the entry narrows which refresh tokens still work;
//! it does not make a token cryptographically invalid.

mod memory;
mod redis_cache;

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::error::CacheError;

pub use memory::MemorySessionCache;
pub use redis_cache::RedisSessionCache;

pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionCache: Send + Sync {
    /// Stores `token` as the live refresh token for `user_id`, replacing any previous one.
    async fn put(&self, user_id: Uuid, token: &str, ttl: Duration) -> CacheResult<()>;

    /// `Ok(None)` on a miss or an expired entry.
    async fn get(&self, user_id: Uuid) -> CacheResult<Option<String>>;

    async fn evict(&self, user_id: Uuid) -> CacheResult<()>;
}

pub(crate) fn refresh_key(user_id: Uuid) -> String {
    format!("refresh_token:{}", user_id)
}

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CacheResult, SessionCache};

#[derive(Debug)]
struct Entry {
    token: String,
    expires_at: Instant,
}

/// Process-local session cache. Expired entries are dropped lazily on read.
#[derive(Default)]
pub struct MemorySessionCache {
    entries: RwLock<HashMap<Uuid, Entry>>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn cleanup(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.expires_at > now);
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    async fn put(&self, user_id: Uuid, token: &str, ttl: Duration) -> CacheResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            user_id,
            Entry {
                token: token.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, user_id: Uuid) -> CacheResult<Option<String>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(&user_id) {
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.token.clone())),
                None => return Ok(None),
                Some(_) => {}
            }
        }
        let mut entries = self.entries.write().await;
        if entries.get(&user_id).is_some_and(|e| e.expires_at <= now) {
            entries.remove(&user_id);
        }
        Ok(None)
    }

    async fn evict(&self, user_id: Uuid) -> CacheResult<()> {
        self.entries.write().await.remove(&user_id);
        Ok(())
    }
}

//! Hot TTL tier: Redis in production, an in-process map otherwise.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::Result;

#[async_trait]
pub trait HotStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// Replace the whole value and its TTL.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    fn backend(&self) -> &'static str;
}

#[derive(Clone)]
pub struct RedisHotStore {
    conn: ConnectionManager,
}

impl RedisHotStore {
    /// Open the client and verify it answers (e.g. `redis://redis:6379`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl HotStore for RedisHotStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let v: Option<String> = conn.get(key).await?;
        Ok(v)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, secs).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

/// Process-local TTL map with the same whole-value semantics.
#[derive(Debug, Default)]
pub struct MemoryHotStore {
    inner: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryHotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        let map = self.inner.lock().expect("hot store mutex poisoned");
        map.values().filter(|(_, exp)| *exp > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HotStore for MemoryHotStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut map = self.inner.lock().expect("hot store mutex poisoned");
        match map.get(key) {
            Some((v, exp)) if *exp > Instant::now() => Ok(Some(v.clone())),
            Some(_) => {
                map.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut map = self.inner.lock().expect("hot store mutex poisoned");
        map.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner
            .lock()
            .expect("hot store mutex poisoned")
            .remove(key);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_expires_entries() {
        let store = MemoryHotStore::new();
        store
            .set_ex("k", "v", Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn set_replaces_whole_value() {
        let store = MemoryHotStore::new();
        let ttl = Duration::from_secs(60);
        store.set_ex("k", "old", ttl).await.unwrap();
        store.set_ex("k", "new", ttl).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("new"));
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}

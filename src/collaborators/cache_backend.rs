// Cache-backend collaborator trait, standing in for the Redis client the
// query cache (C7) is built around. `redis_enabled` in config lets the
// whole cache layer be a no-op when unset — the read path degrades to
// "always miss," never to an error, matching `_cache_get_json`'s
// best-effort behavior in read_handler.py.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;

use crate::error::Result;

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Atomically increment the integer stored at `key` (creating it at 0
    /// first if absent) and return the new value. Backs the monotonic
    /// `tenant/<id>/ver` counter.
    async fn incr(&self, key: &str) -> Result<i64>;
}

#[derive(Default)]
pub struct InMemoryCacheBackend {
    values: DashMap<String, Vec<u8>>,
    counters: DashMap<String, i64>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.values.get(key).map(|v| v.clone()))
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, _ttl: Duration) -> Result<()> {
        // TTL expiry isn't modeled for the in-memory fake; tests assert on
        // presence/absence of keys directly rather than timing.
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut entry = self.counters.entry(key.to_string()).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn incr_starts_at_one_and_increments() {
        let cache = InMemoryCacheBackend::new();
        assert_eq!(cache.incr("tenant/t1/ver").await.unwrap(), 1);
        assert_eq!(cache.incr("tenant/t1/ver").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = InMemoryCacheBackend::new();
        cache.set_ex("k", b"v".to_vec(), Duration::from_secs(30)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
    }
}

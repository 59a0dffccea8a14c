//! Read-through cache for channel listings
//!
//! [`ChannelCache`] is advisory: every backend failure is logged and treated as
//! a miss, and writes invalidate the whole registry namespace rather than
//! individual keys.

use crate::config::CacheConfig;
use crate::error::{RegistryError, Result};
use crate::models::{Channel, NormalizedListQuery};
use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Key/value backend with TTL and prefix deletion
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Increment a counter, creating it at zero when absent
    async fn incr(&self, key: &str, delta: i64) -> Result<i64>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Remaining lifetime of `key`, `None` when absent or without expiry
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Delete every key starting with `prefix`, returning the number removed
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64>;
}

/// Redis-backed cache store
#[derive(Clone)]
pub struct RedisCacheStore {
    pool: deadpool_redis::Pool,
}

impl RedisCacheStore {
    pub fn new(pool: deadpool_redis::Pool) -> Self {
        Self { pool }
    }

    /// Create a pool for `url` and verify it answers PING
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = deadpool_redis::Config::from_url(url)
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| RegistryError::cache(format!("Failed to create Redis pool: {}", e)))?;

        let mut conn = pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!("Connected to Redis cache");
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.pool.get().await?;
        let value: i64 = conn.incr(key, delta).await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: bool = conn.expire(key, ttl.as_secs().max(1) as i64).await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.pool.get().await?;
        // -2 for a missing key, -1 for a key without expiry
        let secs: i64 = conn.ttl(key).await?;
        Ok(u64::try_from(secs).ok().map(Duration::from_secs))
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        let mut conn = self.pool.get().await?;
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut deleted = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let removed: u64 = conn.del(&keys).await?;
                deleted += removed;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(deleted)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Process-local cache store with per-entry expiry
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: DashMap<String, CacheEntry>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let value = self
            .entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone());
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert(CacheEntry {
            value: "0".to_string(),
            expires_at: None,
        });

        if !entry.is_live(now) {
            entry.value = "0".to_string();
            entry.expires_at = None;
        }

        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| RegistryError::cache(format!("value at {} is not an integer", key)))?;
        let next = current + delta;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        let remaining = self
            .entries
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now));
        Ok(remaining)
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        let mut removed = 0;
        self.entries.retain(|key, _| {
            let matched = key.starts_with(prefix);
            removed += u64::from(matched);
            !matched
        });
        Ok(removed)
    }
}

/// Read-through cache over listing results
#[derive(Clone)]
pub struct ChannelCache {
    backend: Option<Arc<dyn CacheStore>>,
    prefix: String,
    ttl: Duration,
}

impl ChannelCache {
    pub fn new(backend: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            backend: Some(backend),
            prefix: config.key_prefix.clone(),
            ttl: config.list_ttl(),
        }
    }

    /// Cache that always misses
    pub fn disabled() -> Self {
        Self {
            backend: None,
            prefix: CacheConfig::default().key_prefix,
            ttl: Duration::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Deterministic key for a listing query, e.g. `channel:all:0:10:sorted`
    pub fn key_for(&self, query: &NormalizedListQuery) -> String {
        let mut key = format!("{}all:{}:{}", self.prefix, query.page, query.page_size);
        if query.id_sort {
            key.push_str(":sorted");
        }
        if query.tag_mode {
            key.push_str(":tagged");
        }
        key
    }

    /// Cached listing, or `None` on miss, backend failure or undecodable value
    pub async fn get_channels(&self, query: &NormalizedListQuery) -> Option<Vec<Channel>> {
        let backend = self.backend.as_ref()?;
        let key = self.key_for(query);

        let raw = match backend.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("Cache miss for key '{}'", key);
                return None;
            }
            Err(e) => {
                warn!("Cache read failed for key '{}': {}", key, e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(channels) => {
                debug!("Cache hit for key '{}'", key);
                Some(channels)
            }
            Err(e) => {
                warn!("Discarding undecodable cache value at '{}': {}", key, e);
                None
            }
        }
    }

    /// Store a listing; failures are logged only
    pub async fn put_channels(&self, query: &NormalizedListQuery, channels: &[Channel]) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        let key = self.key_for(query);

        let raw = match serde_json::to_string(channels) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to serialize listing for '{}': {}", key, e);
                return;
            }
        };

        if let Err(e) = backend.set(&key, &raw, self.ttl).await {
            warn!("Cache write failed for key '{}': {}", key, e);
        }
    }

    /// Drop every entry under the registry prefix
    pub async fn invalidate(&self) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };

        match backend.delete_by_prefix(&self.prefix).await {
            Ok(removed) => debug!("Invalidated {} cache entries under '{}'", removed, self.prefix),
            Err(e) => warn!("Cache invalidation failed for '{}': {}", self.prefix, e),
        }
    }
}

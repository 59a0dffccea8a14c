//! Per-identity admission limiting for the channel creation path

use crate::cache::CacheStore;
use crate::config::RateLimitConfig;
use crate::error::{RegistryError, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of one admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    /// Requests counted in the current window, including this one
    pub count: u64,
    pub limit: u64,
    pub remaining: u64,
}

impl RateLimitResult {
    fn open(limit: u64) -> Self {
        Self {
            allowed: true,
            count: 0,
            limit,
            remaining: limit,
        }
    }
}

/// Fixed-window request counter keyed by client identity.
///
/// The counting backend is optional; without one, or when it errors, every
/// request is admitted. That includes failing to give a counter its window.
#[derive(Clone)]
pub struct AdmissionLimiter {
    backend: Option<Arc<dyn CacheStore>>,
    config: RateLimitConfig,
}

impl AdmissionLimiter {
    pub fn new(backend: Option<Arc<dyn CacheStore>>, config: RateLimitConfig) -> Self {
        Self { backend, config }
    }

    /// Limiter that admits everything
    pub fn disabled() -> Self {
        Self {
            backend: None,
            config: RateLimitConfig {
                enabled: false,
                ..Default::default()
            },
        }
    }

    pub fn key_for(&self, client: &str) -> String {
        format!("{}{}", self.config.key_prefix, client)
    }

    /// Count this request and report whether it is admitted
    pub async fn check(&self, client: &str) -> RateLimitResult {
        let limit = self.config.max_requests;
        let backend = match (&self.backend, self.config.enabled) {
            (Some(backend), true) => backend,
            _ => return RateLimitResult::open(limit),
        };

        let key = self.key_for(client);
        let count = match backend.incr(&key, 1).await {
            Ok(count) => count.max(0) as u64,
            Err(e) => {
                warn!("Rate limit backend unavailable, admitting {}: {}", client, e);
                return RateLimitResult::open(limit);
            }
        };

        // A counter left without expiry would never reset, so the window is
        // attached on first use and re-attached whenever it is missing
        let needs_window = count == 1
            || match backend.ttl(&key).await {
                Ok(remaining) => remaining.is_none(),
                Err(e) => {
                    warn!("Failed to read rate limit window for {}: {}", client, e);
                    false
                }
            };

        if needs_window {
            if let Err(e) = backend.expire(&key, self.config.window()).await {
                warn!("Failed to set rate limit window for {}, admitting: {}", client, e);
                return RateLimitResult::open(limit);
            }
        }

        let allowed = count <= limit;
        debug!(
            client = %client,
            count,
            limit,
            allowed,
            "Rate limit check completed"
        );

        RateLimitResult {
            allowed,
            count,
            limit,
            remaining: limit.saturating_sub(count),
        }
    }

    pub async fn allow(&self, client: &str) -> bool {
        self.check(client).await.allowed
    }

    /// Like [`allow`](Self::allow) but rejects with a rate-limit error
    pub async fn admit(&self, client: &str) -> Result<()> {
        let result = self.check(client).await;
        if result.allowed {
            return Ok(());
        }

        warn!(client = %client, count = result.count, "Rate limit exceeded");
        Err(RegistryError::rate_limited(format!(
            "Too many requests, at most {} per {} seconds",
            result.limit, self.config.window
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InMemoryCacheStore, MockCacheStore};
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    fn limiter() -> AdmissionLimiter {
        AdmissionLimiter::new(
            Some(Arc::new(InMemoryCacheStore::new())),
            RateLimitConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_eleventh_call_in_window_is_rejected() {
        let limiter = limiter();
        for _ in 0..10 {
            assert!(limiter.allow("10.0.0.1").await);
        }
        assert!(!limiter.allow("10.0.0.1").await);
        assert!(matches!(
            limiter.admit("10.0.0.1").await,
            Err(RegistryError::RateLimitExceeded { .. })
        ));

        // other identities are counted separately
        assert!(limiter.allow("10.0.0.2").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_resets_after_window() {
        let limiter = limiter();
        for _ in 0..11 {
            limiter.check("10.0.0.1").await;
        }
        assert!(!limiter.allow("10.0.0.1").await);

        tokio::time::advance(Duration::from_secs(61)).await;
        let result = limiter.check("10.0.0.1").await;
        assert!(result.allowed);
        assert_eq!(result.count, 1);
        assert_eq!(result.remaining, 9);
    }

    #[tokio::test]
    async fn test_fails_open_when_backend_errors() {
        let mut backend = MockCacheStore::new();
        backend
            .expect_incr()
            .returning(|_, _| Err(RegistryError::cache("connection refused")));

        let limiter = AdmissionLimiter::new(Some(Arc::new(backend)), RateLimitConfig::default());
        for _ in 0..20 {
            assert!(limiter.allow("10.0.0.1").await);
        }
    }

    #[tokio::test]
    async fn test_disabled_limiter_admits_everything() {
        let limiter = AdmissionLimiter::disabled();
        for _ in 0..20 {
            assert!(limiter.admit("10.0.0.1").await.is_ok());
        }
        assert_eq!(limiter.key_for("1.2.3.4"), "ratelimit:addchannel:1.2.3.4");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_open_when_window_cannot_be_set() {
        let counter = Arc::new(AtomicI64::new(0));
        let mut backend = MockCacheStore::new();
        let counted = counter.clone();
        backend
            .expect_incr()
            .returning(move |_, delta| Ok(counted.fetch_add(delta, Ordering::SeqCst) + delta));
        backend.expect_ttl().returning(|_| Ok(None));
        backend
            .expect_expire()
            .returning(|_, _| Err(RegistryError::cache("READONLY replica")));

        let limiter = AdmissionLimiter::new(Some(Arc::new(backend)), RateLimitConfig::default());
        for _ in 0..11 {
            assert!(limiter.allow("10.0.0.1").await);
        }

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(limiter.allow("10.0.0.1").await);
        assert_eq!(counter.load(Ordering::SeqCst), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_without_window_gets_one() {
        let backend = Arc::new(InMemoryCacheStore::new());
        let limiter = AdmissionLimiter::new(Some(backend.clone()), RateLimitConfig::default());
        let key = limiter.key_for("10.0.0.1");

        // counter stranded by an earlier expire that never landed
        backend.incr(&key, 10).await.unwrap();
        assert_eq!(backend.ttl(&key).await.unwrap(), None);

        assert!(!limiter.allow("10.0.0.1").await);
        assert_eq!(
            backend.ttl(&key).await.unwrap(),
            Some(Duration::from_secs(60))
        );

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.allow("10.0.0.1").await);
    }
}

//! Channel Registry Library
//!
//! Registry of upstream LLM provider channels for an API gateway.
//!
//! This library provides:
//! - Paginated channel listing behind a read-through cache
//! - Tag-grouped listing and search with concurrent per-tag fetches
//! - Batched multi-key channel ingestion with retried chunk writes
//! - Per-client admission limiting for channel creation
//! - Background status polling with transition notifications
//! - An operator command console
//!
//! # Features
//!
//! - **Stores**: PostgreSQL through sqlx, or in-memory
//! - **Cache**: Redis through deadpool-redis, or in-memory; fails open
//! - **Notifications**: webhook delivery with a log fallback
//! - **Probing**: upstream `/v1/models` checks with automatic disable and re-enable
//!
//! # Quick Start
//!
//! ```no_run
//! use channel_registry::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = RegistryServiceConfig::default();
//!     let store = Arc::new(InMemoryChannelStore::new());
//!     let cache: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
//!     let probe = Arc::new(HttpModelProbe::new(&config.probe)?);
//!
//!     let registry = ChannelRegistry::new(
//!         store,
//!         ChannelCache::new(cache.clone(), &config.cache),
//!         AdmissionLimiter::new(Some(cache), config.rate_limit.clone()),
//!         probe,
//!         &config,
//!     );
//!
//!     let page = registry.list_channels(&ListQuery::default()).await?;
//!     println!("{} channels", page.channels.len());
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod aggregator;
pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod ingest;
pub mod models;
pub mod notifier;
pub mod probe;
pub mod rate_limit;
pub mod registry;
pub mod retry;
pub mod store;
pub mod tester;

// Re-export commonly used types
pub use admin::{AdminCommand, AdminConsole, AdminSettings};
pub use aggregator::{TagAggregation, TagAggregator};
pub use cache::{CacheStore, ChannelCache, InMemoryCacheStore, RedisCacheStore};
pub use config::{Args, RegistryServiceConfig};
pub use error::{RegistryError, Result};
pub use health::{HealthMonitor, HealthMonitorImpl, HealthMonitorStats, TransitionEvent};
pub use ingest::BatchIngestor;
pub use models::{
    Channel, ChannelId, ChannelPage, ChannelStatus, ChannelTemplate, ChannelType, ListQuery,
    SearchFilter, SearchQuery, TagEdit,
};
pub use notifier::{
    LogTransport, Notification, NotificationDispatcher, NotificationTransport, Severity,
    WebhookTransport,
};
pub use probe::{HttpModelProbe, UpstreamProbe};
pub use rate_limit::{AdmissionLimiter, RateLimitResult};
pub use registry::ChannelRegistry;
pub use retry::{BackoffStrategy, RetryPolicy};
pub use store::{ChannelStore, InMemoryChannelStore, PgChannelStore};
pub use tester::{ChannelTester, TestReport};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Identity used for commands typed on the server's stdin
pub const CONSOLE_IDENTITY: &str = "console";

/// Notification target used when no webhook is configured
pub const LOG_TARGET: &str = "operators";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        cache::{CacheStore, ChannelCache, InMemoryCacheStore, RedisCacheStore},
        config::{Args, RegistryServiceConfig},
        health::{HealthMonitor, HealthMonitorImpl},
        models::{
            Channel, ChannelPage, ChannelStatus, ChannelTemplate, ChannelType, ListQuery,
            SearchFilter, SearchQuery, TagEdit,
        },
        notifier::{NotificationDispatcher, Severity},
        probe::{HttpModelProbe, UpstreamProbe},
        rate_limit::AdmissionLimiter,
        registry::ChannelRegistry,
        store::{ChannelStore, InMemoryChannelStore, PgChannelStore},
        tester::ChannelTester,
        RegistryError, Result,
    };
}

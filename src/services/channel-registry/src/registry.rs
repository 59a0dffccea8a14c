//! Channel registry facade
//!
//! Entry point for every caller-facing operation. Reads go through the
//! read-through cache, creation goes through the admission limiter and the
//! batch ingestor, and every mutation invalidates the cache namespace.

use crate::aggregator::TagAggregator;
use crate::cache::ChannelCache;
use crate::config::RegistryServiceConfig;
use crate::error::{RegistryError, Result};
use crate::ingest::{validate_region_config, BatchIngestor};
use crate::models::{
    Channel, ChannelId, ChannelPage, ChannelTemplate, ListQuery, SearchQuery, TagEdit,
};
use crate::probe::UpstreamProbe;
use crate::rate_limit::AdmissionLimiter;
use crate::store::ChannelStore;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Clone)]
pub struct ChannelRegistry {
    store: Arc<dyn ChannelStore>,
    cache: ChannelCache,
    aggregator: TagAggregator,
    ingestor: BatchIngestor,
    limiter: AdmissionLimiter,
    probe: Arc<dyn UpstreamProbe>,
    default_page_size: usize,
    default_base_url: String,
}

impl ChannelRegistry {
    pub fn new(
        store: Arc<dyn ChannelStore>,
        cache: ChannelCache,
        limiter: AdmissionLimiter,
        probe: Arc<dyn UpstreamProbe>,
        config: &RegistryServiceConfig,
    ) -> Self {
        Self {
            aggregator: TagAggregator::new(store.clone()),
            ingestor: BatchIngestor::new(store.clone(), cache.clone(), config.ingest.clone()),
            store,
            cache,
            limiter,
            probe,
            default_page_size: config.listing.default_page_size,
            default_base_url: config.probe.default_base_url.clone(),
        }
    }

    pub fn store(&self) -> Arc<dyn ChannelStore> {
        self.store.clone()
    }

    pub fn cache(&self) -> &ChannelCache {
        &self.cache
    }

    /// Paginated listing, served from the cache when possible.
    ///
    /// Tag mode pages over distinct tags and expands each into its channels.
    /// A partial tag aggregation is returned but never cached.
    #[instrument(skip(self))]
    pub async fn list_channels(&self, query: &ListQuery) -> Result<ChannelPage> {
        let query = query.normalized(self.default_page_size);

        if let Some(channels) = self.cache.get_channels(&query).await {
            return Ok(ChannelPage {
                channels,
                cached: true,
                failed_tags: Vec::new(),
            });
        }

        let page = if query.tag_mode {
            let aggregation = self
                .aggregator
                .aggregate_page(query.offset(), query.page_size, query.id_sort)
                .await?;
            ChannelPage {
                channels: aggregation.channels,
                cached: false,
                failed_tags: aggregation.failed_tags,
            }
        } else {
            ChannelPage {
                channels: self
                    .store
                    .list(query.offset(), query.page_size, false, query.id_sort)
                    .await?,
                cached: false,
                failed_tags: Vec::new(),
            }
        };

        if page.failed_tags.is_empty() {
            self.cache.put_channels(&query, &page.channels).await;
        } else {
            warn!(
                "Not caching partial listing, failed tags: {}",
                page.failed_tags.join(", ")
            );
        }

        Ok(page)
    }

    /// Keyword search; uncached
    #[instrument(skip(self))]
    pub async fn search_channels(&self, query: &SearchQuery) -> Result<ChannelPage> {
        if query.tag_mode {
            let aggregation = self
                .aggregator
                .aggregate_search(&query.filter, query.id_sort)
                .await?;
            return Ok(ChannelPage {
                channels: aggregation.channels,
                cached: false,
                failed_tags: aggregation.failed_tags,
            });
        }

        Ok(ChannelPage {
            channels: self
                .store
                .search_channels(&query.filter, query.id_sort)
                .await?,
            cached: false,
            failed_tags: Vec::new(),
        })
    }

    pub async fn get_channel(&self, id: ChannelId) -> Result<Channel> {
        self.store.get(id, false).await
    }

    /// Replace a channel; an empty key keeps the stored credential
    #[instrument(skip(self, channel), fields(id = channel.id))]
    pub async fn update_channel(&self, mut channel: Channel) -> Result<Channel> {
        self.ingestor.check_key_length(&channel.key)?;
        self.ingestor.check_models(&channel.models)?;
        if channel.channel_type.requires_region_config() {
            validate_region_config(&channel.other)?;
        }

        let existing = self.store.get(channel.id, true).await?;
        if channel.key.is_empty() {
            channel.key = existing.key;
        }
        channel.created_time = existing.created_time;

        self.store.update(&channel).await?;
        self.cache.invalidate().await;
        Ok(channel.redacted())
    }

    pub async fn delete_channel(&self, id: ChannelId) -> Result<()> {
        self.store.delete(id).await?;
        self.cache.invalidate().await;
        info!("Deleted channel #{}", id);
        Ok(())
    }

    pub async fn delete_disabled(&self) -> Result<u64> {
        let removed = self.store.delete_disabled().await?;
        self.cache.invalidate().await;
        info!("Deleted {} disabled channels", removed);
        Ok(removed)
    }

    pub async fn batch_delete(&self, ids: &[ChannelId]) -> Result<usize> {
        require_ids(ids)?;
        self.store.batch_delete(ids).await?;
        self.cache.invalidate().await;
        Ok(ids.len())
    }

    pub async fn batch_set_tag(&self, ids: &[ChannelId], tag: Option<String>) -> Result<usize> {
        require_ids(ids)?;
        self.store.batch_set_tag(ids, tag).await?;
        self.cache.invalidate().await;
        Ok(ids.len())
    }

    pub async fn disable_by_tag(&self, tag: &str) -> Result<()> {
        self.store.disable_by_tag(require_tag(tag)?).await?;
        self.cache.invalidate().await;
        Ok(())
    }

    pub async fn enable_by_tag(&self, tag: &str) -> Result<()> {
        self.store.enable_by_tag(require_tag(tag)?).await?;
        self.cache.invalidate().await;
        Ok(())
    }

    pub async fn edit_by_tag(&self, edit: &TagEdit) -> Result<()> {
        require_tag(&edit.tag)?;
        if let Some(models) = &edit.models {
            self.ingestor.check_models(models)?;
        }
        self.store.edit_by_tag(edit).await?;
        self.cache.invalidate().await;
        Ok(())
    }

    /// Admission check, then batched ingestion of the submission
    #[instrument(skip(self, template), fields(name = %template.name))]
    pub async fn create_channels(&self, client: &str, template: &ChannelTemplate) -> Result<usize> {
        self.limiter.admit(client).await?;
        self.ingestor.ingest(template).await
    }

    /// Models the stored channel's provider currently serves
    pub async fn fetch_upstream_models(&self, id: ChannelId) -> Result<Vec<String>> {
        let channel = self.store.get(id, true).await?;
        self.probe.probe(&channel).await
    }

    /// Models served at an arbitrary endpoint, defaulting to the configured base URL
    pub async fn probe_models(&self, base_url: Option<&str>, key: &str) -> Result<Vec<String>> {
        let base_url = base_url
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(&self.default_base_url);
        self.probe.fetch_models(base_url, key).await
    }
}

fn require_ids(ids: &[ChannelId]) -> Result<()> {
    if ids.is_empty() {
        return Err(RegistryError::validation("ids", "no channel ids given"));
    }
    Ok(())
}

fn require_tag(tag: &str) -> Result<&str> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(RegistryError::validation("tag", "tag cannot be empty"));
    }
    Ok(tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, InMemoryCacheStore};
    use crate::config::{CacheConfig, RateLimitConfig};
    use crate::models::{ChannelStatus, ChannelType, SearchFilter};
    use crate::probe::MockUpstreamProbe;
    use crate::store::{InMemoryChannelStore, MockChannelStore};
    use pretty_assertions::assert_eq;
    use tokio_test::assert_err;

    struct Fixture {
        store: Arc<InMemoryChannelStore>,
        cache: Arc<InMemoryCacheStore>,
        registry: ChannelRegistry,
    }

    fn fixture_with_probe(probe: MockUpstreamProbe) -> Fixture {
        let store = Arc::new(InMemoryChannelStore::new());
        let cache = Arc::new(InMemoryCacheStore::new());
        let registry = ChannelRegistry::new(
            store.clone(),
            ChannelCache::new(cache.clone(), &CacheConfig::default()),
            AdmissionLimiter::new(
                Some(cache.clone() as Arc<dyn CacheStore>),
                RateLimitConfig::default(),
            ),
            Arc::new(probe),
            &RegistryServiceConfig::default(),
        );
        Fixture {
            store,
            cache,
            registry,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_probe(MockUpstreamProbe::new())
    }

    fn submission(name: &str, keys: &str, tag: Option<&str>) -> ChannelTemplate {
        ChannelTemplate {
            name: name.to_string(),
            key: keys.to_string(),
            models: "gpt-4o".to_string(),
            group: "default".to_string(),
            tag: tag.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_list_is_cached_until_a_write() {
        let f = fixture();
        f.registry
            .create_channels("10.0.0.1", &submission("a", "k1\nk2", None))
            .await
            .unwrap();

        let query = ListQuery::default();
        let first = f.registry.list_channels(&query).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.channels.len(), 2);

        let second = f.registry.list_channels(&query).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.channels, first.channels);

        f.registry.delete_channel(2).await.unwrap();
        let third = f.registry.list_channels(&query).await.unwrap();
        assert!(!third.cached);
        assert_eq!(third.channels.len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_disable_by_tag_is_visible_in_tag_listing() {
        let f = fixture();
        let keys = (1..=5).map(|i| format!("sk-east-{}", i)).collect::<Vec<_>>().join("\n");
        assert_eq!(
            f.registry
                .create_channels("10.0.0.1", &submission("east", &keys, Some("prod-east")))
                .await
                .unwrap(),
            5
        );
        f.registry
            .create_channels("10.0.0.1", &submission("west", "sk-west", Some("prod-west")))
            .await
            .unwrap();

        let tagged = ListQuery {
            tag_mode: true,
            ..Default::default()
        };
        let before = f.registry.list_channels(&tagged).await.unwrap();
        assert_eq!(before.channels.len(), 6);

        f.registry.disable_by_tag("prod-east").await.unwrap();

        let after = f.registry.list_channels(&tagged).await.unwrap();
        assert!(!after.cached);
        let east: Vec<_> = after
            .channels
            .iter()
            .filter(|c| c.tag() == Some("prod-east"))
            .collect();
        assert_eq!(east.len(), 5);
        assert!(east.iter().all(|c| c.status == ChannelStatus::ManuallyDisabled));

        let members = f.store.list_by_tag("prod-east", false).await.unwrap();
        assert!(members.iter().all(|c| c.status.is_disabled()));
        assert_eq!(
            f.store.list_by_tag("prod-west", false).await.unwrap()[0].status,
            ChannelStatus::Enabled
        );
    }

    #[tokio::test]
    async fn test_partial_tag_listing_is_flagged_and_not_cached() {
        let mut store = MockChannelStore::new();
        store
            .expect_paginated_tags()
            .returning(|_, _| Ok(vec!["good".to_string(), "bad".to_string()]));
        store.expect_list_by_tag().returning(|tag, _| {
            if tag == "bad" {
                Err(RegistryError::store("timeout"))
            } else {
                Ok(vec![crate::models::test_channel(1, "g", ChannelStatus::Enabled)])
            }
        });

        let cache = Arc::new(InMemoryCacheStore::new());
        let registry = ChannelRegistry::new(
            Arc::new(store),
            ChannelCache::new(cache.clone(), &CacheConfig::default()),
            AdmissionLimiter::disabled(),
            Arc::new(MockUpstreamProbe::new()),
            &RegistryServiceConfig::default(),
        );

        let page = registry
            .list_channels(&ListQuery {
                tag_mode: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.channels.len(), 1);
        assert_eq!(page.failed_tags, vec!["bad".to_string()]);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_creation_is_rate_limited_per_client() {
        let f = fixture();
        for i in 0..10 {
            f.registry
                .create_channels("10.0.0.9", &submission("c", &format!("k{}", i), None))
                .await
                .unwrap();
        }
        let result = f
            .registry
            .create_channels("10.0.0.9", &submission("c", "k-extra", None))
            .await;
        assert!(matches!(result, Err(RegistryError::RateLimitExceeded { .. })));
        assert_eq!(f.store.len(), 10);
    }

    #[tokio::test]
    async fn test_update_keeps_stored_key_and_enforces_region_rule() {
        let f = fixture();
        f.registry
            .create_channels("10.0.0.1", &submission("a", "sk-secret", None))
            .await
            .unwrap();

        let mut channel = f.registry.get_channel(1).await.unwrap();
        assert!(channel.key.is_empty());
        channel.priority = 7;
        f.registry.update_channel(channel.clone()).await.unwrap();

        let stored = f.store.get(1, true).await.unwrap();
        assert_eq!(stored.key, "sk-secret");
        assert_eq!(stored.priority, 7);

        channel.channel_type = ChannelType::VertexAi;
        channel.other = String::new();
        assert!(matches!(
            f.registry.update_channel(channel).await,
            Err(RegistryError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_enforces_key_and_model_limits() {
        let f = fixture();
        f.registry
            .create_channels("10.0.0.1", &submission("a", "sk-secret", Some("pool")))
            .await
            .unwrap();

        let mut channel = f.registry.get_channel(1).await.unwrap();
        channel.key = "k".repeat(5000);
        assert!(matches!(
            f.registry.update_channel(channel.clone()).await,
            Err(RegistryError::Validation { ref field, .. }) if field == "key"
        ));

        channel.key = String::new();
        channel.models = format!("gpt-4o,{}", "m".repeat(1000));
        assert!(matches!(
            f.registry.update_channel(channel).await,
            Err(RegistryError::Validation { ref field, .. }) if field == "models"
        ));

        assert_err!(
            f.registry
                .edit_by_tag(&TagEdit {
                    tag: "pool".to_string(),
                    models: Some("x".repeat(256)),
                    ..Default::default()
                })
                .await
        );

        let stored = f.store.get(1, true).await.unwrap();
        assert_eq!(stored.key, "sk-secret");
        assert_eq!(stored.models, "gpt-4o");
    }

    #[tokio::test]
    async fn test_listing_far_past_the_end_is_empty() {
        let f = fixture();
        f.registry
            .create_channels("10.0.0.1", &submission("a", "k1\nk2", Some("pool")))
            .await
            .unwrap();

        for tag_mode in [false, true] {
            let page = f
                .registry
                .list_channels(&ListQuery {
                    page: i64::MAX,
                    page_size: 10,
                    tag_mode,
                    ..Default::default()
                })
                .await
                .unwrap();
            assert!(page.channels.is_empty());
        }
    }

    #[tokio::test]
    async fn test_bulk_operations_validate_input() {
        let f = fixture();
        assert_err!(f.registry.batch_delete(&[]).await);
        assert_err!(f.registry.batch_set_tag(&[], None).await);
        assert_err!(f.registry.disable_by_tag("  ").await);
        assert_err!(f.registry.edit_by_tag(&TagEdit::default()).await);
    }

    #[tokio::test]
    async fn test_tag_edit_and_batch_tagging() {
        let f = fixture();
        f.registry
            .create_channels("10.0.0.1", &submission("a", "k1\nk2\nk3", None))
            .await
            .unwrap();

        assert_eq!(
            f.registry
                .batch_set_tag(&[1, 2], Some("pool".to_string()))
                .await
                .unwrap(),
            2
        );
        f.registry
            .edit_by_tag(&TagEdit {
                tag: "pool".to_string(),
                priority: Some(9),
                weight: Some(3),
                ..Default::default()
            })
            .await
            .unwrap();

        let found = f
            .registry
            .search_channels(&SearchQuery {
                filter: SearchFilter::default(),
                id_sort: false,
                tag_mode: true,
            })
            .await
            .unwrap();
        assert_eq!(found.channels.len(), 2);
        assert!(found.channels.iter().all(|c| c.priority == 9 && c.weight == 3));

        f.registry.disable_by_tag("pool").await.unwrap();
        assert_eq!(f.registry.delete_disabled().await.unwrap(), 2);
        assert_eq!(f.registry.batch_delete(&[3]).await.unwrap(), 1);
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_probe_operations() {
        let mut probe = MockUpstreamProbe::new();
        probe
            .expect_fetch_models()
            .withf(|base_url, key| base_url == "https://api.openai.com" && key == "sk-x")
            .returning(|_, _| Ok(vec!["gpt-4o".to_string()]));
        probe
            .expect_probe()
            .withf(|channel| channel.key == "k1")
            .returning(|_| Ok(vec!["gpt-4o-mini".to_string()]));

        let f = fixture_with_probe(probe);
        f.registry
            .create_channels("10.0.0.1", &submission("a", "k1", None))
            .await
            .unwrap();

        assert_eq!(
            f.registry.probe_models(Some(" "), "sk-x").await.unwrap(),
            vec!["gpt-4o"]
        );
        assert_eq!(
            f.registry.fetch_upstream_models(1).await.unwrap(),
            vec!["gpt-4o-mini"]
        );
    }

    #[tokio::test]
    async fn test_rate_limit_counters_survive_cache_invalidation() {
        let f = fixture();
        f.registry
            .create_channels("10.0.0.1", &submission("a", "k1", None))
            .await
            .unwrap();
        assert_eq!(
            f.cache.get("ratelimit:addchannel:10.0.0.1").await.unwrap().as_deref(),
            Some("1")
        );
    }
}

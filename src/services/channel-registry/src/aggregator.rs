//! Concurrent per-tag channel aggregation

use crate::error::{RegistryError, Result};
use crate::models::{Channel, SearchFilter};
use crate::store::ChannelStore;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Merged result of a tag fan-out
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagAggregation {
    /// Channels of every tag whose fetch succeeded, grouped in tag order
    pub channels: Vec<Channel>,
    /// Tags whose fetch failed; none of their channels are present
    pub failed_tags: Vec<String>,
}

impl TagAggregation {
    pub fn partial_failure(&self) -> bool {
        !self.failed_tags.is_empty()
    }

    /// Warning describing the missing tags, if any
    pub fn warning(&self) -> Option<RegistryError> {
        self.partial_failure()
            .then(|| RegistryError::PartialAggregation {
                tags: self.failed_tags.clone(),
            })
    }
}

/// Fans tag-scoped store queries out over a set of tags
#[derive(Clone)]
pub struct TagAggregator {
    store: Arc<dyn ChannelStore>,
}

impl TagAggregator {
    pub fn new(store: Arc<dyn ChannelStore>) -> Self {
        Self { store }
    }

    /// Aggregate one page of distinct tags
    pub async fn aggregate_page(
        &self,
        offset: usize,
        limit: usize,
        sort_by_id: bool,
    ) -> Result<TagAggregation> {
        let tags = self.store.paginated_tags(offset, limit).await?;
        Ok(self.aggregate(tags, sort_by_id).await)
    }

    /// Aggregate every tag with a member matching the filter
    pub async fn aggregate_search(
        &self,
        filter: &SearchFilter,
        sort_by_id: bool,
    ) -> Result<TagAggregation> {
        let tags = self.store.search_tags(filter, sort_by_id).await?;
        Ok(self.aggregate(tags, sort_by_id).await)
    }

    /// Fetch every tag concurrently and merge once all fetches finish.
    ///
    /// A failed fetch drops that tag's channels and records the tag in
    /// `failed_tags`; it never aborts the other fetches.
    pub async fn aggregate(&self, tags: Vec<String>, sort_by_id: bool) -> TagAggregation {
        let tags: Vec<String> = tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        if tags.is_empty() {
            return TagAggregation::default();
        }

        let mut tasks = JoinSet::new();
        for (index, tag) in tags.iter().cloned().enumerate() {
            let store = self.store.clone();
            tasks.spawn(async move {
                let result = store.list_by_tag(&tag, sort_by_id).await;
                (index, result)
            });
        }

        let mut fetched: Vec<Option<Vec<Channel>>> = vec![None; tags.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(channels))) => fetched[index] = Some(channels),
                Ok((index, Err(e))) => {
                    warn!("Failed to fetch channels for tag '{}': {}", tags[index], e);
                }
                Err(e) => error!("Tag fetch task aborted: {}", e),
            }
        }

        let mut aggregation = TagAggregation::default();
        for (tag, result) in tags.into_iter().zip(fetched) {
            match result {
                Some(channels) => aggregation
                    .channels
                    .extend(channels.into_iter().map(|c| c.redacted())),
                None => aggregation.failed_tags.push(tag),
            }
        }

        debug!(
            "Aggregated {} channels, {} tags failed",
            aggregation.channels.len(),
            aggregation.failed_tags.len()
        );
        aggregation
    }
}

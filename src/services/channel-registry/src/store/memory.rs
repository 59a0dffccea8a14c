//! In-memory channel store backed by a concurrent map

use super::ChannelStore;
use crate::error::{RegistryError, Result};
use crate::models::{
    sort_channels, Channel, ChannelId, ChannelStatus, NewChannel, SearchFilter, TagEdit,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

/// Channel store keeping every record in process memory
#[derive(Debug, Default)]
pub struct InMemoryChannelStore {
    channels: DashMap<ChannelId, Channel>,
    next_id: AtomicI64,
}

impl InMemoryChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    fn allocate_id(&self) -> ChannelId {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn snapshot(&self) -> Vec<Channel> {
        self.channels.iter().map(|e| e.value().clone()).collect()
    }

    fn update_tagged<F>(&self, tag: &str, mut f: F) -> usize
    where
        F: FnMut(&mut Channel),
    {
        let mut touched = 0;
        for mut entry in self.channels.iter_mut() {
            if entry.value().tag() == Some(tag) {
                f(entry.value_mut());
                touched += 1;
            }
        }
        touched
    }
}

fn distinct_tags<'a>(channels: impl Iterator<Item = &'a Channel>) -> Vec<String> {
    channels
        .filter_map(|c| c.tag().map(str::to_string))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[async_trait]
impl ChannelStore for InMemoryChannelStore {
    async fn create(&self, channel: NewChannel) -> Result<Channel> {
        let channel = channel.into_channel(self.allocate_id());
        self.channels.insert(channel.id, channel.clone());
        Ok(channel)
    }

    async fn batch_create(&self, channels: Vec<NewChannel>) -> Result<()> {
        let count = channels.len();
        for channel in channels {
            let channel = channel.into_channel(self.allocate_id());
            self.channels.insert(channel.id, channel);
        }
        debug!("Inserted {} channels", count);
        Ok(())
    }

    async fn update(&self, channel: &Channel) -> Result<()> {
        match self.channels.get_mut(&channel.id) {
            Some(mut existing) => {
                *existing = channel.clone();
                Ok(())
            }
            None => Err(RegistryError::not_found(format!("channel {}", channel.id))),
        }
    }

    async fn update_status(
        &self,
        id: ChannelId,
        from: ChannelStatus,
        to: ChannelStatus,
    ) -> Result<bool> {
        match self.channels.get_mut(&id) {
            Some(mut channel) if channel.status == from => {
                channel.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: ChannelId) -> Result<()> {
        self.channels
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RegistryError::not_found(format!("channel {}", id)))
    }

    async fn delete_disabled(&self) -> Result<u64> {
        let mut removed = 0;
        self.channels.retain(|_, c| {
            let disabled = c.status.is_disabled();
            removed += u64::from(disabled);
            !disabled
        });
        Ok(removed)
    }

    async fn get(&self, id: ChannelId, with_key: bool) -> Result<Channel> {
        let channel = self
            .channels
            .get(&id)
            .map(|c| c.value().clone())
            .ok_or_else(|| RegistryError::not_found(format!("channel {}", id)))?;

        Ok(if with_key { channel } else { channel.redacted() })
    }

    async fn list(
        &self,
        offset: usize,
        limit: usize,
        select_all: bool,
        sort_by_id: bool,
    ) -> Result<Vec<Channel>> {
        let mut channels = self.snapshot();
        sort_channels(&mut channels, sort_by_id);

        if select_all {
            return Ok(channels);
        }

        Ok(channels
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|c| c.redacted())
            .collect())
    }

    async fn list_by_tag(&self, tag: &str, sort_by_id: bool) -> Result<Vec<Channel>> {
        let mut channels: Vec<Channel> = self
            .channels
            .iter()
            .filter(|e| e.value().tag() == Some(tag))
            .map(|e| e.value().clone())
            .collect();
        sort_channels(&mut channels, sort_by_id);
        Ok(channels)
    }

    async fn paginated_tags(&self, offset: usize, limit: usize) -> Result<Vec<String>> {
        let channels = self.snapshot();
        Ok(distinct_tags(channels.iter())
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn search_tags(&self, filter: &SearchFilter, _sort_by_id: bool) -> Result<Vec<String>> {
        let channels = self.snapshot();
        Ok(distinct_tags(channels.iter().filter(|c| filter.matches(c))))
    }

    async fn search_channels(
        &self,
        filter: &SearchFilter,
        sort_by_id: bool,
    ) -> Result<Vec<Channel>> {
        let mut channels: Vec<Channel> = self
            .channels
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().redacted())
            .collect();
        sort_channels(&mut channels, sort_by_id);
        Ok(channels)
    }

    async fn batch_delete(&self, ids: &[ChannelId]) -> Result<()> {
        for id in ids {
            self.channels.remove(id);
        }
        Ok(())
    }

    async fn batch_set_tag(&self, ids: &[ChannelId], tag: Option<String>) -> Result<()> {
        let tag = tag.filter(|t| !t.is_empty());
        for id in ids {
            if let Some(mut channel) = self.channels.get_mut(id) {
                channel.tag = tag.clone();
            }
        }
        Ok(())
    }

    async fn disable_by_tag(&self, tag: &str) -> Result<()> {
        let touched = self.update_tagged(tag, |c| c.status = ChannelStatus::ManuallyDisabled);
        debug!("Disabled {} channels tagged {}", touched, tag);
        Ok(())
    }

    async fn enable_by_tag(&self, tag: &str) -> Result<()> {
        let touched = self.update_tagged(tag, |c| c.status = ChannelStatus::Enabled);
        debug!("Enabled {} channels tagged {}", touched, tag);
        Ok(())
    }

    async fn edit_by_tag(&self, edit: &TagEdit) -> Result<()> {
        let touched = self.update_tagged(&edit.tag, |c| edit.apply(c));
        debug!("Edited {} channels tagged {}", touched, edit.tag);
        Ok(())
    }
}

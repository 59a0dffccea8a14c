//! Channel store adapters
//!
//! The registry treats durable storage as an external collaborator reached
//! through [`ChannelStore`]. Two adapters ship with the crate:
//! - [`PgChannelStore`] over a PostgreSQL pool
//! - [`InMemoryChannelStore`] for tests and single-process deployments

use crate::error::Result;
use crate::models::{Channel, ChannelId, ChannelStatus, NewChannel, SearchFilter, TagEdit};
use async_trait::async_trait;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryChannelStore;
pub use postgres::PgChannelStore;

/// Channel store trait for dependency injection
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Insert one record and return it with its assigned id
    async fn create(&self, channel: NewChannel) -> Result<Channel>;

    /// Insert a batch of records atomically
    async fn batch_create(&self, channels: Vec<NewChannel>) -> Result<()>;

    /// Replace a record
    async fn update(&self, channel: &Channel) -> Result<()>;

    /// Set a record's status only while it still holds `from`.
    ///
    /// Returns false when the record is gone or its status moved on.
    async fn update_status(
        &self,
        id: ChannelId,
        from: ChannelStatus,
        to: ChannelStatus,
    ) -> Result<bool>;

    /// Delete one record
    async fn delete(&self, id: ChannelId) -> Result<()>;

    /// Delete every manually or automatically disabled record
    async fn delete_disabled(&self) -> Result<u64>;

    /// Fetch one record; the credential is blanked unless `with_key`
    async fn get(&self, id: ChannelId, with_key: bool) -> Result<Channel>;

    /// Page over records; `select_all` ignores pagination and includes credentials
    async fn list(
        &self,
        offset: usize,
        limit: usize,
        select_all: bool,
        sort_by_id: bool,
    ) -> Result<Vec<Channel>>;

    /// Every record carrying `tag`
    async fn list_by_tag(&self, tag: &str, sort_by_id: bool) -> Result<Vec<Channel>>;

    /// Page over distinct non-empty tags
    async fn paginated_tags(&self, offset: usize, limit: usize) -> Result<Vec<String>>;

    /// Distinct non-empty tags of records matching the filter
    async fn search_tags(&self, filter: &SearchFilter, sort_by_id: bool) -> Result<Vec<String>>;

    /// Records matching the filter
    async fn search_channels(
        &self,
        filter: &SearchFilter,
        sort_by_id: bool,
    ) -> Result<Vec<Channel>>;

    /// Delete every listed record
    async fn batch_delete(&self, ids: &[ChannelId]) -> Result<()>;

    /// Set or clear the tag of every listed record
    async fn batch_set_tag(&self, ids: &[ChannelId], tag: Option<String>) -> Result<()>;

    /// Manually disable every record carrying `tag`
    async fn disable_by_tag(&self, tag: &str) -> Result<()>;

    /// Enable every record carrying `tag`
    async fn enable_by_tag(&self, tag: &str) -> Result<()>;

    /// Apply a shared configuration edit to every record carrying `edit.tag`
    async fn edit_by_tag(&self, edit: &TagEdit) -> Result<()>;
}

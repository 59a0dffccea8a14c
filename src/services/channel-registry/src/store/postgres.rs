//! PostgreSQL channel store

use super::ChannelStore;
use crate::config::PostgresConfig;
use crate::error::{RegistryError, Result};
use crate::models::{Channel, ChannelId, ChannelStatus, NewChannel, SearchFilter, TagEdit};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{debug, info};

const COLUMNS: &str = "id, channel_type, name, key, base_url, models, other, \"group\", tag, \
                       priority, weight, model_mapping, status, created_time";

/// Database row for the `channels` table
#[derive(Debug, sqlx::FromRow)]
struct ChannelRow {
    id: i64,
    channel_type: String,
    name: String,
    key: String,
    base_url: Option<String>,
    models: String,
    other: String,
    #[sqlx(rename = "group")]
    group: String,
    tag: Option<String>,
    priority: i64,
    weight: i64,
    model_mapping: Option<String>,
    status: i16,
    created_time: i64,
}

impl TryFrom<ChannelRow> for Channel {
    type Error = RegistryError;

    fn try_from(row: ChannelRow) -> Result<Self> {
        Ok(Channel {
            id: row.id,
            channel_type: row.channel_type.parse().map_err(RegistryError::store)?,
            name: row.name,
            key: row.key,
            base_url: row.base_url,
            models: row.models,
            other: row.other,
            group: row.group,
            tag: row.tag,
            priority: row.priority,
            weight: u32::try_from(row.weight).unwrap_or(u32::MAX),
            model_mapping: row.model_mapping,
            status: ChannelStatus::from_code(row.status),
            created_time: row.created_time,
        })
    }
}

fn rows_to_channels(rows: Vec<ChannelRow>) -> Result<Vec<Channel>> {
    rows.into_iter().map(Channel::try_from).collect()
}

/// LIMIT/OFFSET bind value; Postgres takes BIGINT
fn sql_count(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn order_clause(sort_by_id: bool) -> &'static str {
    if sort_by_id {
        "id DESC"
    } else {
        "priority DESC, id DESC"
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &SearchFilter) {
    if let Some(keyword) = filter.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        let like = format!("%{}%", keyword);
        qb.push(" AND (name LIKE ")
            .push_bind(like.clone())
            .push(" OR key = ")
            .push_bind(keyword.to_string())
            .push(" OR base_url LIKE ")
            .push_bind(like);
        if let Ok(id) = keyword.parse::<i64>() {
            qb.push(" OR id = ").push_bind(id);
        }
        qb.push(")");
    }

    if let Some(group) = filter.group.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
        qb.push(" AND (',' || \"group\" || ',') LIKE ")
            .push_bind(format!("%,{},%", group));
    }

    if let Some(model) = filter
        .model_keyword
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
    {
        qb.push(" AND models LIKE ").push_bind(format!("%{}%", model));
    }
}

/// PostgreSQL-backed channel store
#[derive(Clone)]
pub struct PgChannelStore {
    pool: PgPool,
}

impl PgChannelStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool and bootstrap the schema
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout))
            .connect(&config.url)
            .await?;

        let store = Self::new(pool);
        store.initialize().await?;
        Ok(store)
    }

    /// Create the channels table and its indexes
    pub async fn initialize(&self) -> Result<()> {
        let queries = [
            r#"
            CREATE TABLE IF NOT EXISTS channels (
                id BIGSERIAL PRIMARY KEY,
                channel_type VARCHAR(32) NOT NULL,
                name VARCHAR(255) NOT NULL,
                key TEXT NOT NULL,
                base_url TEXT,
                models TEXT NOT NULL DEFAULT '',
                other TEXT NOT NULL DEFAULT '',
                "group" VARCHAR(255) NOT NULL DEFAULT 'default',
                tag VARCHAR(255),
                priority BIGINT NOT NULL DEFAULT 0,
                weight BIGINT NOT NULL DEFAULT 0,
                model_mapping TEXT,
                status SMALLINT NOT NULL DEFAULT 1,
                created_time BIGINT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_channels_tag ON channels(tag)",
            "CREATE INDEX IF NOT EXISTS idx_channels_status ON channels(status)",
            "CREATE INDEX IF NOT EXISTS idx_channels_priority ON channels(priority)",
        ];

        for query in queries {
            sqlx::query(query).execute(&self.pool).await?;
        }

        info!("Channel store schema initialized");
        Ok(())
    }

    async fn set_status_by_tag(&self, tag: &str, status: ChannelStatus) -> Result<()> {
        let result = sqlx::query("UPDATE channels SET status = $1 WHERE tag = $2")
            .bind(status.code())
            .bind(tag)
            .execute(&self.pool)
            .await?;

        debug!(
            "Set status {} on {} channels tagged {}",
            status,
            result.rows_affected(),
            tag
        );
        Ok(())
    }
}

#[async_trait]
impl ChannelStore for PgChannelStore {
    async fn create(&self, channel: NewChannel) -> Result<Channel> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO channels (channel_type, name, key, base_url, models, other, "group",
                                  tag, priority, weight, model_mapping, status, created_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id
            "#,
        )
        .bind(channel.channel_type.as_str())
        .bind(&channel.name)
        .bind(&channel.key)
        .bind(&channel.base_url)
        .bind(&channel.models)
        .bind(&channel.other)
        .bind(&channel.group)
        .bind(&channel.tag)
        .bind(channel.priority)
        .bind(i64::from(channel.weight))
        .bind(&channel.model_mapping)
        .bind(channel.status.code())
        .bind(channel.created_time)
        .fetch_one(&self.pool)
        .await?;

        Ok(channel.into_channel(id))
    }

    async fn batch_create(&self, channels: Vec<NewChannel>) -> Result<()> {
        if channels.is_empty() {
            return Ok(());
        }

        let count = channels.len();
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO channels (channel_type, name, key, base_url, models, other, \"group\", \
             tag, priority, weight, model_mapping, status, created_time) ",
        );
        qb.push_values(channels, |mut row, c| {
            row.push_bind(c.channel_type.as_str())
                .push_bind(c.name)
                .push_bind(c.key)
                .push_bind(c.base_url)
                .push_bind(c.models)
                .push_bind(c.other)
                .push_bind(c.group)
                .push_bind(c.tag)
                .push_bind(c.priority)
                .push_bind(i64::from(c.weight))
                .push_bind(c.model_mapping)
                .push_bind(c.status.code())
                .push_bind(c.created_time);
        });

        qb.build().execute(&self.pool).await?;
        debug!("Inserted {} channels", count);
        Ok(())
    }

    async fn update(&self, channel: &Channel) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE channels
            SET channel_type = $1, name = $2, key = $3, base_url = $4, models = $5, other = $6,
                "group" = $7, tag = $8, priority = $9, weight = $10, model_mapping = $11,
                status = $12
            WHERE id = $13
            "#,
        )
        .bind(channel.channel_type.as_str())
        .bind(&channel.name)
        .bind(&channel.key)
        .bind(&channel.base_url)
        .bind(&channel.models)
        .bind(&channel.other)
        .bind(&channel.group)
        .bind(&channel.tag)
        .bind(channel.priority)
        .bind(i64::from(channel.weight))
        .bind(&channel.model_mapping)
        .bind(channel.status.code())
        .bind(channel.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::not_found(format!("channel {}", channel.id)));
        }
        Ok(())
    }

    async fn update_status(
        &self,
        id: ChannelId,
        from: ChannelStatus,
        to: ChannelStatus,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE channels SET status = $1 WHERE id = $2 AND status = $3")
            .bind(to.code())
            .bind(id)
            .bind(from.code())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, id: ChannelId) -> Result<()> {
        let result = sqlx::query("DELETE FROM channels WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::not_found(format!("channel {}", id)));
        }
        Ok(())
    }

    async fn delete_disabled(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM channels WHERE status IN ($1, $2)")
            .bind(ChannelStatus::ManuallyDisabled.code())
            .bind(ChannelStatus::AutoDisabled.code())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn get(&self, id: ChannelId, with_key: bool) -> Result<Channel> {
        let row: ChannelRow = sqlx::query_as(&format!("SELECT {} FROM channels WHERE id = $1", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RegistryError::not_found(format!("channel {}", id)))?;

        let channel = Channel::try_from(row)?;
        Ok(if with_key { channel } else { channel.redacted() })
    }

    async fn list(
        &self,
        offset: usize,
        limit: usize,
        select_all: bool,
        sort_by_id: bool,
    ) -> Result<Vec<Channel>> {
        let order = order_clause(sort_by_id);

        if select_all {
            let rows: Vec<ChannelRow> =
                sqlx::query_as(&format!("SELECT {} FROM channels ORDER BY {}", COLUMNS, order))
                    .fetch_all(&self.pool)
                    .await?;
            return rows_to_channels(rows);
        }

        let rows: Vec<ChannelRow> = sqlx::query_as(&format!(
            "SELECT {} FROM channels ORDER BY {} LIMIT $1 OFFSET $2",
            COLUMNS, order
        ))
        .bind(sql_count(limit))
        .bind(sql_count(offset))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows_to_channels(rows)?
            .into_iter()
            .map(|c| c.redacted())
            .collect())
    }

    async fn list_by_tag(&self, tag: &str, sort_by_id: bool) -> Result<Vec<Channel>> {
        let rows: Vec<ChannelRow> = sqlx::query_as(&format!(
            "SELECT {} FROM channels WHERE tag = $1 ORDER BY {}",
            COLUMNS,
            order_clause(sort_by_id)
        ))
        .bind(tag)
        .fetch_all(&self.pool)
        .await?;

        rows_to_channels(rows)
    }

    async fn paginated_tags(&self, offset: usize, limit: usize) -> Result<Vec<String>> {
        let tags: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT tag FROM channels WHERE tag IS NOT NULL AND tag <> '' \
             ORDER BY tag LIMIT $1 OFFSET $2",
        )
        .bind(sql_count(limit))
        .bind(sql_count(offset))
        .fetch_all(&self.pool)
        .await?;

        Ok(tags)
    }

    async fn search_tags(&self, filter: &SearchFilter, _sort_by_id: bool) -> Result<Vec<String>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT DISTINCT tag FROM channels WHERE tag IS NOT NULL AND tag <> ''",
        );
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY tag");

        let tags: Vec<String> = qb.build_query_scalar().fetch_all(&self.pool).await?;
        Ok(tags)
    }

    async fn search_channels(
        &self,
        filter: &SearchFilter,
        sort_by_id: bool,
    ) -> Result<Vec<Channel>> {
        let mut qb =
            QueryBuilder::<Postgres>::new(format!("SELECT {} FROM channels WHERE TRUE", COLUMNS));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY ").push(order_clause(sort_by_id));

        let rows: Vec<ChannelRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows_to_channels(rows)?
            .into_iter()
            .map(|c| c.redacted())
            .collect())
    }

    async fn batch_delete(&self, ids: &[ChannelId]) -> Result<()> {
        sqlx::query("DELETE FROM channels WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn batch_set_tag(&self, ids: &[ChannelId], tag: Option<String>) -> Result<()> {
        sqlx::query("UPDATE channels SET tag = $1 WHERE id = ANY($2)")
            .bind(tag.filter(|t| !t.is_empty()))
            .bind(ids.to_vec())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn disable_by_tag(&self, tag: &str) -> Result<()> {
        self.set_status_by_tag(tag, ChannelStatus::ManuallyDisabled)
            .await
    }

    async fn enable_by_tag(&self, tag: &str) -> Result<()> {
        self.set_status_by_tag(tag, ChannelStatus::Enabled).await
    }

    async fn edit_by_tag(&self, edit: &TagEdit) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE channels
            SET tag = CASE WHEN $1::TEXT IS NULL THEN tag ELSE NULLIF($1, '') END,
                model_mapping = COALESCE($2, model_mapping),
                models = COALESCE($3, models),
                "group" = COALESCE($4, "group"),
                priority = COALESCE($5, priority),
                weight = COALESCE($6, weight)
            WHERE tag = $7
            "#,
        )
        .bind(&edit.new_tag)
        .bind(&edit.model_mapping)
        .bind(&edit.models)
        .bind(&edit.groups)
        .bind(edit.priority)
        .bind(edit.weight.map(i64::from))
        .bind(&edit.tag)
        .execute(&self.pool)
        .await?;

        debug!(
            "Edited {} channels tagged {}",
            result.rows_affected(),
            edit.tag
        );
        Ok(())
    }
}

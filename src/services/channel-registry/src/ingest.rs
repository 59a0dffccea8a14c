//! Batched channel ingestion
//!
//! A submission is validated in full before the first write, so a bad entry
//! never leaves part of the same submission behind. Writes go out in chunks,
//! each retried under a [`RetryPolicy`]; chunks already flushed stay
//! committed when a later chunk fails for good.

use crate::cache::ChannelCache;
use crate::config::IngestConfig;
use crate::error::{RegistryError, Result};
use crate::models::{ChannelTemplate, NewChannel};
use crate::retry::RetryPolicy;
use crate::store::ChannelStore;
use std::sync::Arc;
use tracing::{error, info, instrument};
use validator::Validate;

/// Validates, splits and writes channel submissions
#[derive(Clone)]
pub struct BatchIngestor {
    store: Arc<dyn ChannelStore>,
    cache: ChannelCache,
    config: IngestConfig,
    retry: RetryPolicy,
}

impl BatchIngestor {
    pub fn new(store: Arc<dyn ChannelStore>, cache: ChannelCache, config: IngestConfig) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            store,
            cache,
            config,
            retry,
        }
    }

    /// Override the write retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Ingest a submission whose `key` may hold one credential per line.
    ///
    /// Returns the number of channels written.
    #[instrument(skip(self, template), fields(name = %template.name, channel_type = %template.channel_type))]
    pub async fn ingest(&self, template: &ChannelTemplate) -> Result<usize> {
        let records = self.prepare(template)?;
        let total = records.len();

        let mut committed = 0;
        for chunk in records.chunks(self.config.chunk_size.max(1)) {
            let written = self
                .retry
                .run("batch channel insert", |_| {
                    self.store.batch_create(chunk.to_vec())
                })
                .await;

            if let Err(e) = written {
                error!(
                    "Ingestion aborted after {} of {} channels: {}",
                    committed, total, e
                );
                if committed > 0 {
                    self.cache.invalidate().await;
                }
                return Err(RegistryError::Ingestion {
                    committed,
                    message: format!(
                        "failed after {} attempts: {}",
                        self.retry.max_attempts(),
                        e
                    ),
                });
            }
            committed += chunk.len();
        }

        self.cache.invalidate().await;
        info!("Ingested {} channels", committed);
        Ok(committed)
    }

    /// Run every validation step and derive the records to write
    pub fn prepare(&self, template: &ChannelTemplate) -> Result<Vec<NewChannel>> {
        template.validate()?;
        self.check_key_length(&template.key)?;

        let keys = self.split_keys(template)?;

        if template.channel_type.requires_region_config() {
            validate_region_config(&template.other)?;
        }

        keys.into_iter()
            .map(|key| {
                self.check_key_length(key)?;
                let record = template.with_key(key);
                self.check_models(&record.models)?;
                Ok(record)
            })
            .collect()
    }

    fn split_keys<'a>(&self, template: &'a ChannelTemplate) -> Result<Vec<&'a str>> {
        let keys: Vec<&str> = if template.channel_type.splits_keys() {
            template
                .key
                .lines()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .collect()
        } else {
            vec![template.key.trim()]
        };

        if keys.len() > self.config.max_batch_size {
            return Err(RegistryError::validation(
                "key",
                format!(
                    "too many keys: {} submitted, maximum is {}",
                    keys.len(),
                    self.config.max_batch_size
                ),
            ));
        }

        if keys.iter().all(|k| k.is_empty()) {
            return Err(RegistryError::validation("key", "channel key is required"));
        }

        Ok(keys)
    }

    /// Credential length limit, shared with direct channel updates
    pub fn check_key_length(&self, key: &str) -> Result<()> {
        if key.len() > self.config.max_key_length {
            return Err(RegistryError::validation(
                "key",
                format!(
                    "key too long, maximum length is {}",
                    self.config.max_key_length
                ),
            ));
        }
        Ok(())
    }

    /// Per-model name length limit over a comma-separated list
    pub fn check_models(&self, models: &str) -> Result<()> {
        match models
            .split(',')
            .find(|m| m.len() > self.config.max_model_name_length)
        {
            Some(model) => Err(RegistryError::validation(
                "models",
                format!(
                    "model name too long ({} > {}): {}...",
                    model.len(),
                    self.config.max_model_name_length,
                    model.chars().take(32).collect::<String>()
                ),
            )),
            None => Ok(()),
        }
    }
}

/// Region config rule for region-partitioned providers.
///
/// `other` must be non-empty; when it is a JSON object it must carry a
/// `default` region. A bare region name is accepted as is.
pub fn validate_region_config(other: &str) -> Result<()> {
    let other = other.trim();
    if other.is_empty() {
        return Err(RegistryError::validation(
            "other",
            "deployment region cannot be empty",
        ));
    }

    if let Ok(serde_json::Value::Object(regions)) = serde_json::from_str(other) {
        if regions.get("default").map_or(true, |v| v.is_null()) {
            return Err(RegistryError::validation(
                "other",
                "deployment region must contain a default entry",
            ));
        }
    }

    Ok(())
}

//! Channel Registry Models
//!
//! Core data structures for the channel registry: channel records, their
//! lifecycle status, provider kinds, query shapes and bulk-edit payloads.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

/// Store-assigned channel identifier
pub type ChannelId = i64;

/// A routable upstream endpoint record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    /// Unique channel identifier assigned by the store
    pub id: ChannelId,

    /// Provider kind
    #[serde(rename = "type")]
    pub channel_type: ChannelType,

    /// Display name
    pub name: String,

    /// Provider credential; one channel carries exactly one credential
    #[serde(default)]
    pub key: String,

    /// Optional base URL override
    #[serde(default)]
    pub base_url: Option<String>,

    /// Comma-separated list of model names served by this channel
    #[serde(default)]
    pub models: String,

    /// Provider-specific configuration (e.g. a region map)
    #[serde(default)]
    pub other: String,

    /// Comma-separated routing cohorts
    #[serde(default = "default_group")]
    pub group: String,

    /// Optional secondary grouping label
    #[serde(default)]
    pub tag: Option<String>,

    /// Ordering within a cohort, higher wins
    #[serde(default)]
    pub priority: i64,

    /// Relative selection likelihood among equal priority channels
    #[serde(default)]
    pub weight: u32,

    /// Optional JSON model-name rewrite map
    #[serde(default)]
    pub model_mapping: Option<String>,

    /// Lifecycle status
    #[serde(default)]
    pub status: ChannelStatus,

    /// Creation time as a unix timestamp
    #[serde(default)]
    pub created_time: i64,
}

fn default_group() -> String {
    "default".to_string()
}

impl Channel {
    /// Model names, trimmed, without empties
    pub fn model_list(&self) -> Vec<&str> {
        split_list(&self.models)
    }

    /// Cohort names, trimmed, without empties
    pub fn groups(&self) -> Vec<&str> {
        split_list(&self.group)
    }

    /// Non-empty tag, if any
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref().filter(|t| !t.is_empty())
    }

    /// Effective base URL: the override when set, the provider default otherwise
    pub fn effective_base_url(&self) -> Option<&str> {
        self.base_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or_else(|| self.channel_type.default_base_url())
    }

    /// Copy of this record with the credential blanked, for listing views
    pub fn redacted(&self) -> Self {
        Self {
            key: String::new(),
            ..self.clone()
        }
    }
}

fn split_list(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Channel lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// Status has not been established
    Unknown,
    /// Channel is routable
    #[default]
    Enabled,
    /// Disabled by an operator
    ManuallyDisabled,
    /// Disabled by an automatic health test
    AutoDisabled,
}

impl ChannelStatus {
    pub const ALL: [ChannelStatus; 4] = [
        ChannelStatus::Enabled,
        ChannelStatus::ManuallyDisabled,
        ChannelStatus::AutoDisabled,
        ChannelStatus::Unknown,
    ];

    /// Numeric code used by the persistent store
    pub fn code(self) -> i16 {
        match self {
            ChannelStatus::Unknown => 0,
            ChannelStatus::Enabled => 1,
            ChannelStatus::ManuallyDisabled => 2,
            ChannelStatus::AutoDisabled => 3,
        }
    }

    pub fn from_code(code: i16) -> Self {
        match code {
            1 => ChannelStatus::Enabled,
            2 => ChannelStatus::ManuallyDisabled,
            3 => ChannelStatus::AutoDisabled,
            _ => ChannelStatus::Unknown,
        }
    }

    pub fn is_enabled(self) -> bool {
        self == ChannelStatus::Enabled
    }

    pub fn is_disabled(self) -> bool {
        matches!(
            self,
            ChannelStatus::ManuallyDisabled | ChannelStatus::AutoDisabled
        )
    }

    /// Glyph used in rendered notifications
    pub fn glyph(self) -> &'static str {
        match self {
            ChannelStatus::Enabled => "🟢",
            ChannelStatus::ManuallyDisabled => "⛔",
            ChannelStatus::AutoDisabled => "🔴",
            ChannelStatus::Unknown => "❔",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelStatus::Unknown => "unknown",
            ChannelStatus::Enabled => "enabled",
            ChannelStatus::ManuallyDisabled => "manually_disabled",
            ChannelStatus::AutoDisabled => "auto_disabled",
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enabled" | "active" => Ok(ChannelStatus::Enabled),
            "manually_disabled" | "disabled" | "manual" => Ok(ChannelStatus::ManuallyDisabled),
            "auto_disabled" | "auto" => Ok(ChannelStatus::AutoDisabled),
            "unknown" => Ok(ChannelStatus::Unknown),
            other => Err(format!("unknown channel status: {}", other)),
        }
    }
}

/// Provider kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "azure")]
    AzureOpenAi,
    Anthropic,
    Gemini,
    /// Region-partitioned provider with a single structured credential
    VertexAi,
    AwsBedrock,
    Custom,
}

impl ChannelType {
    /// Whether `other` must carry a region map with a `default` entry
    pub fn requires_region_config(self) -> bool {
        matches!(self, ChannelType::VertexAi)
    }

    /// Whether a multi-line key blob yields one channel per line
    pub fn splits_keys(self) -> bool {
        !self.requires_region_config()
    }

    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            ChannelType::OpenAi => Some("https://api.openai.com"),
            ChannelType::Anthropic => Some("https://api.anthropic.com"),
            ChannelType::Gemini => Some("https://generativelanguage.googleapis.com"),
            ChannelType::AzureOpenAi
            | ChannelType::VertexAi
            | ChannelType::AwsBedrock
            | ChannelType::Custom => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelType::OpenAi => "openai",
            ChannelType::AzureOpenAi => "azure",
            ChannelType::Anthropic => "anthropic",
            ChannelType::Gemini => "gemini",
            ChannelType::VertexAi => "vertex_ai",
            ChannelType::AwsBedrock => "aws_bedrock",
            ChannelType::Custom => "custom",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(ChannelType::OpenAi),
            "azure" => Ok(ChannelType::AzureOpenAi),
            "anthropic" => Ok(ChannelType::Anthropic),
            "gemini" => Ok(ChannelType::Gemini),
            "vertex_ai" => Ok(ChannelType::VertexAi),
            "aws_bedrock" => Ok(ChannelType::AwsBedrock),
            "custom" => Ok(ChannelType::Custom),
            other => Err(format!("unknown channel type: {}", other)),
        }
    }
}

/// Channel submission; `key` may hold a newline-separated blob of credentials
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct ChannelTemplate {
    #[serde(rename = "type", default)]
    pub channel_type: ChannelType,

    #[validate(length(min = 1, message = "channel name is required"))]
    pub name: String,

    #[validate(length(min = 1, message = "channel key is required"))]
    pub key: String,

    #[validate(url(message = "base_url must be a valid URL"))]
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub models: String,

    #[serde(default)]
    pub other: String,

    #[serde(default = "default_group")]
    pub group: String,

    #[serde(default)]
    pub tag: Option<String>,

    #[serde(default)]
    pub priority: i64,

    #[serde(default)]
    pub weight: u32,

    #[serde(default)]
    pub model_mapping: Option<String>,
}

impl ChannelTemplate {
    /// Derive a store-ready record carrying a single credential
    pub fn with_key(&self, key: &str) -> NewChannel {
        NewChannel {
            channel_type: self.channel_type,
            name: self.name.clone(),
            key: key.to_string(),
            base_url: self.base_url.clone().filter(|u| !u.is_empty()),
            models: self.models.clone(),
            other: self.other.clone(),
            group: self.group.clone(),
            tag: self.tag.clone().filter(|t| !t.is_empty()),
            priority: self.priority,
            weight: self.weight,
            model_mapping: self.model_mapping.clone(),
            status: ChannelStatus::Enabled,
            created_time: Utc::now().timestamp(),
        }
    }
}

/// A validated channel record awaiting an id from the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewChannel {
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub name: String,
    pub key: String,
    pub base_url: Option<String>,
    pub models: String,
    pub other: String,
    pub group: String,
    pub tag: Option<String>,
    pub priority: i64,
    pub weight: u32,
    pub model_mapping: Option<String>,
    pub status: ChannelStatus,
    pub created_time: i64,
}

impl NewChannel {
    pub fn into_channel(self, id: ChannelId) -> Channel {
        Channel {
            id,
            channel_type: self.channel_type,
            name: self.name,
            key: self.key,
            base_url: self.base_url,
            models: self.models,
            other: self.other,
            group: self.group,
            tag: self.tag,
            priority: self.priority,
            weight: self.weight,
            model_mapping: self.model_mapping,
            status: self.status,
            created_time: self.created_time,
        }
    }
}

/// Paginated listing query
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListQuery {
    /// Zero-based page number; negative values clamp to zero
    #[serde(default, rename = "p")]
    pub page: i64,

    /// Page size; zero or negative falls back to the configured default
    #[serde(default)]
    pub page_size: i64,

    /// Order by id instead of priority
    #[serde(default)]
    pub id_sort: bool,

    /// Page over tags and expand every tag into its channels
    #[serde(default)]
    pub tag_mode: bool,
}

impl ListQuery {
    /// Clamp pagination to usable values
    pub fn normalized(&self, default_page_size: usize) -> NormalizedListQuery {
        let page = self.page.max(0) as usize;
        let page_size = if self.page_size > 0 {
            self.page_size as usize
        } else {
            default_page_size
        };

        NormalizedListQuery {
            page,
            page_size,
            id_sort: self.id_sort,
            tag_mode: self.tag_mode,
        }
    }
}

/// Listing query after pagination clamping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedListQuery {
    pub page: usize,
    pub page_size: usize,
    pub id_sort: bool,
    pub tag_mode: bool,
}

impl NormalizedListQuery {
    /// Row offset of the page, saturating for page numbers past any real table
    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.page_size)
    }
}

/// Keyword search filter
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchFilter {
    /// Matches id, name, key or base URL
    #[serde(default)]
    pub keyword: Option<String>,

    /// Matches a cohort name
    #[serde(default)]
    pub group: Option<String>,

    /// Matches a model name substring
    #[serde(default, rename = "model")]
    pub model_keyword: Option<String>,
}

impl SearchFilter {
    /// In-memory equivalent of the store's search predicate
    pub fn matches(&self, channel: &Channel) -> bool {
        let keyword_ok = match non_empty(&self.keyword) {
            None => true,
            Some(keyword) => {
                keyword.parse::<ChannelId>().ok() == Some(channel.id)
                    || channel.name.contains(keyword)
                    || channel.key == keyword
                    || channel
                        .base_url
                        .as_deref()
                        .map_or(false, |u| u.contains(keyword))
            }
        };

        let group_ok = match non_empty(&self.group) {
            None => true,
            Some(group) => channel.groups().iter().any(|g| *g == group),
        };

        let model_ok = match non_empty(&self.model_keyword) {
            None => true,
            Some(model) => channel.models.contains(model),
        };

        keyword_ok && group_ok && model_ok
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Search request as received from callers
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchQuery {
    #[serde(flatten)]
    pub filter: SearchFilter,

    #[serde(default)]
    pub id_sort: bool,

    #[serde(default)]
    pub tag_mode: bool,
}

/// Shared configuration applied to every channel carrying `tag`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TagEdit {
    pub tag: String,
    #[serde(default)]
    pub new_tag: Option<String>,
    #[serde(default)]
    pub model_mapping: Option<String>,
    #[serde(default)]
    pub models: Option<String>,
    #[serde(default)]
    pub groups: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub weight: Option<u32>,
}

impl TagEdit {
    /// Apply the edit to one member channel
    pub fn apply(&self, channel: &mut Channel) {
        if let Some(new_tag) = &self.new_tag {
            channel.tag = Some(new_tag.clone()).filter(|t| !t.is_empty());
        }
        if let Some(mapping) = &self.model_mapping {
            channel.model_mapping = Some(mapping.clone());
        }
        if let Some(models) = &self.models {
            channel.models = models.clone();
        }
        if let Some(groups) = &self.groups {
            channel.group = groups.clone();
        }
        if let Some(priority) = self.priority {
            channel.priority = priority;
        }
        if let Some(weight) = self.weight {
            channel.weight = weight;
        }
    }
}

/// Result of a listing or search call
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChannelPage {
    pub channels: Vec<Channel>,

    /// Served from the read-through cache
    pub cached: bool,

    /// Tags whose fetch failed during aggregation; their channels are absent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_tags: Vec<String>,
}

/// Order channels by id descending, or by priority then id descending
pub fn sort_channels(channels: &mut [Channel], sort_by_id: bool) {
    if sort_by_id {
        channels.sort_by(|a, b| b.id.cmp(&a.id));
    } else {
        channels.sort_by(|a, b| b.priority.cmp(&a.priority).then(b.id.cmp(&a.id)));
    }
}

#[cfg(test)]
pub(crate) fn test_channel(id: ChannelId, name: &str, status: ChannelStatus) -> Channel {
    Channel {
        id,
        channel_type: ChannelType::OpenAi,
        name: name.to_string(),
        key: format!("sk-{}", id),
        base_url: None,
        models: "gpt-4o,gpt-4o-mini".to_string(),
        other: String::new(),
        group: "default".to_string(),
        tag: None,
        priority: 0,
        weight: 1,
        model_mapping: None,
        status,
        created_time: 1_700_000_000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_codes_round_trip() {
        for status in ChannelStatus::ALL {
            assert_eq!(ChannelStatus::from_code(status.code()), status);
        }
        assert_eq!(ChannelStatus::from_code(42), ChannelStatus::Unknown);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("enabled".parse::<ChannelStatus>(), Ok(ChannelStatus::Enabled));
        assert_eq!("disabled".parse::<ChannelStatus>(), Ok(ChannelStatus::ManuallyDisabled));
        assert_eq!("AUTO".parse::<ChannelStatus>(), Ok(ChannelStatus::AutoDisabled));
        assert!("sideways".parse::<ChannelStatus>().is_err());
    }

    #[test]
    fn test_channel_type_serde_names() {
        let json = serde_json::to_string(&ChannelType::VertexAi).unwrap();
        assert_eq!(json, "\"vertex_ai\"");
        let parsed: ChannelType = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(parsed, ChannelType::OpenAi);
        assert_eq!("azure".parse::<ChannelType>(), Ok(ChannelType::AzureOpenAi));
    }

    #[test]
    fn test_region_config_only_for_vertex() {
        assert!(ChannelType::VertexAi.requires_region_config());
        assert!(!ChannelType::VertexAi.splits_keys());
        assert!(ChannelType::OpenAi.splits_keys());
    }

    #[test]
    fn test_list_helpers() {
        let mut channel = test_channel(1, "a", ChannelStatus::Enabled);
        channel.models = " gpt-4o, ,claude-3 ".to_string();
        channel.group = "default,vip".to_string();
        assert_eq!(channel.model_list(), vec!["gpt-4o", "claude-3"]);
        assert_eq!(channel.groups(), vec!["default", "vip"]);
    }

    #[test]
    fn test_effective_base_url() {
        let mut channel = test_channel(1, "a", ChannelStatus::Enabled);
        assert_eq!(channel.effective_base_url(), Some("https://api.openai.com"));
        channel.base_url = Some("https://proxy.internal".to_string());
        assert_eq!(channel.effective_base_url(), Some("https://proxy.internal"));
        channel.base_url = Some(String::new());
        channel.channel_type = ChannelType::Custom;
        assert_eq!(channel.effective_base_url(), None);
    }

    #[test]
    fn test_list_query_normalization() {
        let query = ListQuery {
            page: -3,
            page_size: -1,
            id_sort: true,
            tag_mode: false,
        };
        let normalized = query.normalized(10);
        assert_eq!(normalized.page, 0);
        assert_eq!(normalized.page_size, 10);
        assert_eq!(normalized.offset(), 0);

        let query = ListQuery {
            page: 2,
            page_size: 25,
            ..Default::default()
        };
        assert_eq!(query.normalized(10).offset(), 50);

        // an absent page_size deserializes to zero and means the default
        let query: ListQuery = serde_json::from_str(r#"{"p": 1}"#).unwrap();
        let normalized = query.normalized(10);
        assert_eq!(normalized.page_size, 10);
        assert_eq!(normalized.offset(), 10);
    }

    #[test]
    fn test_huge_page_number_saturates_offset() {
        let query = ListQuery {
            page: i64::MAX,
            page_size: 10,
            ..Default::default()
        };
        assert_eq!(query.normalized(10).offset(), usize::MAX);
    }

    #[test]
    fn test_search_filter_matches() {
        let mut channel = test_channel(7, "east-primary", ChannelStatus::Enabled);
        channel.group = "default,vip".to_string();

        let by_id = SearchFilter {
            keyword: Some("7".to_string()),
            ..Default::default()
        };
        assert!(by_id.matches(&channel));

        let by_group_and_model = SearchFilter {
            keyword: Some("east".to_string()),
            group: Some("vip".to_string()),
            model_keyword: Some("mini".to_string()),
        };
        assert!(by_group_and_model.matches(&channel));

        let wrong_group = SearchFilter {
            group: Some("internal".to_string()),
            ..Default::default()
        };
        assert!(!wrong_group.matches(&channel));
    }

    #[test]
    fn test_tag_edit_applies_only_present_fields() {
        let mut channel = test_channel(1, "a", ChannelStatus::Enabled);
        channel.tag = Some("prod".to_string());
        let edit = TagEdit {
            tag: "prod".to_string(),
            new_tag: Some("prod-east".to_string()),
            priority: Some(5),
            ..Default::default()
        };
        edit.apply(&mut channel);
        assert_eq!(channel.tag.as_deref(), Some("prod-east"));
        assert_eq!(channel.priority, 5);
        assert_eq!(channel.weight, 1);
        assert_eq!(channel.models, "gpt-4o,gpt-4o-mini");
    }

    #[test]
    fn test_sort_channels() {
        let mut a = test_channel(1, "a", ChannelStatus::Enabled);
        a.priority = 10;
        let b = test_channel(2, "b", ChannelStatus::Enabled);
        let c = test_channel(3, "c", ChannelStatus::Enabled);

        let mut channels = vec![a.clone(), b.clone(), c.clone()];
        sort_channels(&mut channels, false);
        let ids: Vec<_> = channels.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);

        sort_channels(&mut channels, true);
        let ids: Vec<_> = channels.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }
}

//! Upstream provider probe

use crate::config::ProbeConfig;
use crate::error::{RegistryError, Result};
use crate::models::Channel;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Live check against a channel's provider
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamProbe: Send + Sync {
    /// Model ids served at `base_url` for the given credential
    async fn fetch_models(&self, base_url: &str, key: &str) -> Result<Vec<String>>;

    /// Probe a stored channel; success means the provider accepted its credential
    async fn probe(&self, channel: &Channel) -> Result<Vec<String>>;
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// OpenAI-compatible `GET /v1/models` probe
#[derive(Debug, Clone)]
pub struct HttpModelProbe {
    client: reqwest::Client,
    default_base_url: String,
}

impl HttpModelProbe {
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| RegistryError::probe(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            default_base_url: config.default_base_url.clone(),
        })
    }

    /// Base URL for a channel: its override, its provider default, then the configured default
    pub fn base_url_for<'a>(&'a self, channel: &'a Channel) -> &'a str {
        channel
            .effective_base_url()
            .unwrap_or(self.default_base_url.as_str())
    }
}

#[async_trait]
impl UpstreamProbe for HttpModelProbe {
    async fn fetch_models(&self, base_url: &str, key: &str) -> Result<Vec<String>> {
        let url = format!("{}/v1/models", base_url.trim_end_matches('/'));

        let response = self
            .client
            .get(&url)
            .bearer_auth(key)
            .send()
            .await
            .map_err(|e| RegistryError::probe(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::probe(format!(
                "{} returned status {}",
                url, status
            )));
        }

        let body: ModelsResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::probe(format!("Invalid models response: {}", e)))?;

        let models: Vec<String> = body.data.into_iter().map(|m| m.id).collect();
        debug!("Fetched {} models from {}", models.len(), url);
        Ok(models)
    }

    async fn probe(&self, channel: &Channel) -> Result<Vec<String>> {
        self.fetch_models(self.base_url_for(channel), &channel.key)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{test_channel, ChannelStatus};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn probe() -> HttpModelProbe {
        HttpModelProbe::new(&ProbeConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_models_sends_bearer_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "data": [{"id": "gpt-4o"}, {"id": "gpt-4o-mini"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let models = probe()
            .fetch_models(&format!("{}/", server.uri()), "sk-test")
            .await
            .unwrap();
        assert_eq!(models, vec!["gpt-4o", "gpt-4o-mini"]);
    }

    #[tokio::test]
    async fn test_non_success_status_is_probe_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = probe().fetch_models(&server.uri(), "sk-revoked").await;
        assert!(matches!(result, Err(RegistryError::Probe { .. })));
    }

    #[tokio::test]
    async fn test_probe_uses_channel_base_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .and(header("authorization", "Bearer sk-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .expect(1)
            .mount(&server)
            .await;

        let mut channel = test_channel(9, "proxy", ChannelStatus::Enabled);
        channel.base_url = Some(server.uri());

        assert!(probe().probe(&channel).await.unwrap().is_empty());
    }

    #[test]
    fn test_base_url_fallback() {
        let probe = probe();
        let mut channel = test_channel(1, "custom", ChannelStatus::Enabled);
        channel.channel_type = crate::models::ChannelType::Custom;
        assert_eq!(probe.base_url_for(&channel), "https://api.openai.com");
    }
}

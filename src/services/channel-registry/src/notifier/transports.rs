//! Notification transports

use super::{Notification, NotificationTransport, Severity};
use crate::config::NotificationConfig;
use crate::error::{RegistryError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info, warn};

/// Delivers notifications as JSON POSTs; the target is the webhook URL
#[derive(Clone)]
pub struct WebhookTransport {
    client: Client,
    /// Sent as a bearer credential with every delivery
    token: Option<String>,
}

impl WebhookTransport {
    pub fn new(config: &NotificationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| RegistryError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            token: None,
        })
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }
}

#[async_trait]
impl NotificationTransport for WebhookTransport {
    async fn send(&self, target: &str, notification: &Notification) -> Result<()> {
        let payload = json!({
            "notification_id": notification.id,
            "title": notification.title,
            "content": notification.body,
            "severity": notification.severity,
            "timestamp": notification.created_at,
        });

        let mut request = self.client.post(target).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RegistryError::dispatch(target, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            info!("Notification {} delivered to {}", notification.id, target);
            Ok(())
        } else {
            error!("Webhook delivery to {} failed with status {}", target, status);
            Err(RegistryError::dispatch(
                target,
                format!(
                    "HTTP {} - {}",
                    status,
                    response.text().await.unwrap_or_default()
                ),
            ))
        }
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// Writes notifications to the log; used when no webhook is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

#[async_trait]
impl NotificationTransport for LogTransport {
    async fn send(&self, target: &str, notification: &Notification) -> Result<()> {
        match notification.severity {
            Severity::Critical | Severity::Warning => warn!(
                target_name = %target,
                severity = %notification.severity,
                "{}\n{}",
                notification.title,
                notification.body
            ),
            Severity::Info => info!(
                target_name = %target,
                severity = %notification.severity,
                "{}\n{}",
                notification.title,
                notification.body
            ),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::NotificationDispatcher;
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_webhook_posts_json_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/ops"))
            .and(body_partial_json(serde_json::json!({
                "title": "Channel east-1 is now auto_disabled",
                "severity": "critical"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let transport = WebhookTransport::new(&NotificationConfig::default()).unwrap();
        let notification = Notification::new(
            "Channel east-1 is now auto_disabled",
            "details",
            Severity::Critical,
        );

        transport
            .send(&format!("{}/hooks/ops", server.uri()), &notification)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_webhook_sends_bot_token_as_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer xoxb-ops"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let transport = WebhookTransport::new(&NotificationConfig::default())
            .unwrap()
            .with_bearer_token(Some("xoxb-ops".to_string()));
        transport
            .send(&server.uri(), &Notification::new("t", "b", Severity::Info))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_webhook_error_status_is_dispatch_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let transport = WebhookTransport::new(&NotificationConfig::default()).unwrap();
        let result = transport
            .send(&server.uri(), &Notification::new("t", "b", Severity::Info))
            .await;

        match result {
            Err(RegistryError::Dispatch { message, .. }) => assert!(message.contains("boom")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatcher_survives_unreachable_target() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let transport = WebhookTransport::new(&NotificationConfig::default()).unwrap();
        let dispatcher = NotificationDispatcher::new(
            Arc::new(transport),
            vec!["http://127.0.0.1:1/unreachable".to_string(), server.uri()],
        );

        let report = dispatcher.broadcast("t", "b", Severity::Warning).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_log_transport_always_succeeds() {
        let dispatcher =
            NotificationDispatcher::new(Arc::new(LogTransport), vec!["operators".to_string()]);
        let report = dispatcher.broadcast("t", "b", Severity::Info).await;
        assert_eq!(report.delivered, 1);
    }
}

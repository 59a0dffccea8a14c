//! Operator notifications
//!
//! [`NotificationDispatcher`] renders status transitions and command results
//! into [`Notification`]s and hands them to a [`NotificationTransport`] once
//! per configured target. Delivery failures are logged and counted, never
//! retried and never returned to the caller.
//!
//! The summary builders in this module back the administrative commands:
//! - [`channel_listing`] partitions channels by status
//! - [`ChannelStats`] aggregates totals and per-model counts

use crate::error::Result;
use crate::health::TransitionEvent;
use crate::models::{Channel, ChannelStatus};
use crate::tester::TestReport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub mod transports;

pub use transports::{LogTransport, WebhookTransport};

/// Notification severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Severity of a transition into `status`
    pub fn for_status(status: ChannelStatus) -> Self {
        match status {
            ChannelStatus::AutoDisabled => Severity::Critical,
            ChannelStatus::ManuallyDisabled | ChannelStatus::Unknown => Severity::Warning,
            ChannelStatus::Enabled => Severity::Info,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A rendered operator message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new<T: Into<String>, B: Into<String>>(title: T, body: B, severity: Severity) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            body: body.into(),
            severity,
            created_at: Utc::now(),
        }
    }
}

/// Delivers a notification to one operator target
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(&self, target: &str, notification: &Notification) -> Result<()>;

    /// Transport name for logs
    fn name(&self) -> &'static str;
}

/// Per-notification delivery outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Fans notifications out to every registered target
#[derive(Clone)]
pub struct NotificationDispatcher {
    transport: Arc<dyn NotificationTransport>,
    targets: Arc<Vec<String>>,
}

impl NotificationDispatcher {
    pub fn new(transport: Arc<dyn NotificationTransport>, targets: Vec<String>) -> Self {
        Self {
            transport,
            targets: Arc::new(targets),
        }
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Deliver to every target concurrently; failures are logged only
    pub async fn notify(&self, notification: &Notification) -> DeliveryReport {
        let deliveries = self
            .targets
            .iter()
            .map(|target| async move { (target, self.transport.send(target, notification).await) });

        let mut report = DeliveryReport::default();
        for (target, outcome) in join_all(deliveries).await {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        "Failed to deliver notification {} via {} to {}: {}",
                        notification.id,
                        self.transport.name(),
                        target,
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        debug!(
            "Notification {} delivered to {}/{} targets",
            notification.id,
            report.delivered,
            self.targets.len()
        );
        report
    }

    pub async fn notify_transition(&self, event: &TransitionEvent) -> DeliveryReport {
        self.notify(&render_transition(event)).await
    }

    /// Deliver an ad-hoc message
    pub async fn broadcast(&self, title: &str, body: &str, severity: Severity) -> DeliveryReport {
        self.notify(&Notification::new(title, body, severity)).await
    }
}

/// Render a status transition
pub fn render_transition(event: &TransitionEvent) -> Notification {
    let body = format!(
        "Channel #{} {}\n{} {} -> {} {}\nObserved at {}",
        event.channel_id,
        event.name,
        event.from.glyph(),
        event.from,
        event.to.glyph(),
        event.to,
        event.observed_at.format("%Y-%m-%d %H:%M:%S UTC"),
    );

    Notification::new(
        format!("Channel {} is now {}", event.name, event.to),
        body,
        Severity::for_status(event.to),
    )
}

/// Channel listing grouped by status; `only` restricts it to one status
pub fn channel_listing(channels: &[Channel], only: Option<ChannelStatus>) -> String {
    let mut out = String::new();

    for status in ChannelStatus::ALL {
        if only.map_or(false, |s| s != status) {
            continue;
        }

        let members: Vec<&Channel> = channels.iter().filter(|c| c.status == status).collect();
        if members.is_empty() {
            continue;
        }

        let _ = writeln!(out, "{} {} ({})", status.glyph(), status, members.len());
        for channel in members {
            let _ = writeln!(
                out,
                "  #{} {} [{}] {}",
                channel.id, channel.name, channel.channel_type, channel.models
            );
        }
    }

    if out.is_empty() {
        return "No channels".to_string();
    }
    out.truncate(out.trim_end().len());
    out
}

/// Aggregate channel counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub total: usize,
    pub active: usize,
    pub disabled: usize,
    /// Number of channels serving each model
    pub per_model: BTreeMap<String, usize>,
}

impl ChannelStats {
    pub fn from_channels(channels: &[Channel]) -> Self {
        let mut stats = ChannelStats {
            total: channels.len(),
            ..Default::default()
        };

        for channel in channels {
            if channel.status.is_enabled() {
                stats.active += 1;
            } else if channel.status.is_disabled() {
                stats.disabled += 1;
            }
            for model in channel.model_list() {
                *stats.per_model.entry(model.to_string()).or_default() += 1;
            }
        }

        stats
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "Channels: {} total, {} active, {} disabled",
            self.total, self.active, self.disabled
        );
        if !self.per_model.is_empty() {
            out.push_str("\nModels:");
            for (model, count) in &self.per_model {
                let _ = write!(out, "\n  {}: {}", model, count);
            }
        }
        out
    }
}

pub fn render_test_report(report: &TestReport) -> String {
    format!(
        "Channel test finished: {} tested, {} passed, {} failed\n{} auto-disabled, {} re-enabled",
        report.tested, report.passed, report.failed, report.disabled, report.enabled
    )
}

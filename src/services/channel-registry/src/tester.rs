//! Full channel test pass
//!
//! Probes every channel with bounded concurrency and reconciles automatic
//! status: failing enabled channels become auto-disabled, passing
//! auto-disabled channels are re-enabled. Operator-disabled channels are
//! never re-enabled here.

use crate::cache::ChannelCache;
use crate::error::{RegistryError, Result};
use crate::models::{Channel, ChannelStatus};
use crate::probe::UpstreamProbe;
use crate::store::ChannelStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

/// Outcome counts of one test pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub tested: usize,
    pub passed: usize,
    pub failed: usize,
    /// Channels moved to auto-disabled
    pub disabled: usize,
    /// Auto-disabled channels moved back to enabled
    pub enabled: usize,
}

impl TestReport {
    pub fn status_changed(&self) -> bool {
        self.disabled + self.enabled > 0
    }
}

#[derive(Clone)]
pub struct ChannelTester {
    store: Arc<dyn ChannelStore>,
    probe: Arc<dyn UpstreamProbe>,
    cache: ChannelCache,
    concurrency: usize,
}

impl ChannelTester {
    pub fn new(
        store: Arc<dyn ChannelStore>,
        probe: Arc<dyn UpstreamProbe>,
        cache: ChannelCache,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            probe,
            cache,
            concurrency: concurrency.max(1),
        }
    }

    #[instrument(skip(self))]
    pub async fn test_all(&self, include_disabled: bool) -> Result<TestReport> {
        let channels: Vec<Channel> = self
            .store
            .list(0, 0, true, false)
            .await?
            .into_iter()
            .filter(|c| include_disabled || c.status.is_enabled())
            .collect();

        info!("Testing {} channels", channels.len());

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for channel in channels {
            let probe = self.probe.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => probe.probe(&channel).await.map(|_| ()),
                    Err(e) => Err(RegistryError::probe(e.to_string())),
                };
                (channel, outcome)
            });
        }

        let mut report = TestReport::default();
        while let Some(joined) = tasks.join_next().await {
            let (channel, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    error!("Channel test task aborted: {}", e);
                    continue;
                }
            };

            report.tested += 1;
            let next_status = match outcome {
                Ok(()) => {
                    report.passed += 1;
                    (channel.status == ChannelStatus::AutoDisabled).then_some(ChannelStatus::Enabled)
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("Channel #{} {} failed its test: {}", channel.id, channel.name, e);
                    channel
                        .status
                        .is_enabled()
                        .then_some(ChannelStatus::AutoDisabled)
                }
            };

            if let Some(status) = next_status {
                if self.set_status(&channel, status).await {
                    match status {
                        ChannelStatus::Enabled => report.enabled += 1,
                        _ => report.disabled += 1,
                    }
                }
            }
        }

        if report.status_changed() {
            self.cache.invalidate().await;
        }

        info!(
            tested = report.tested,
            passed = report.passed,
            failed = report.failed,
            "Channel test pass finished"
        );
        Ok(report)
    }

    /// Move the channel from the status seen before probing; a concurrent change wins
    async fn set_status(&self, channel: &Channel, status: ChannelStatus) -> bool {
        match self
            .store
            .update_status(channel.id, channel.status, status)
            .await
        {
            Ok(true) => {
                info!("Channel #{} {} set to {}", channel.id, channel.name, status);
                true
            }
            Ok(false) => {
                info!(
                    "Channel #{} {} changed during its test, leaving it as is",
                    channel.id, channel.name
                );
                false
            }
            Err(e) => {
                error!("Failed to set channel #{} to {}: {}", channel.id, status, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChannelTemplate;
    use crate::probe::MockUpstreamProbe;
    use crate::store::InMemoryChannelStore;

    async fn seed(store: &InMemoryChannelStore, statuses: &[ChannelStatus]) {
        for (i, status) in statuses.iter().enumerate() {
            let mut channel = ChannelTemplate {
                name: format!("ch-{}", i + 1),
                key: "sk".to_string(),
                ..Default::default()
            }
            .with_key(&format!("sk-{}", i + 1));
            channel.status = *status;
            store.create(channel).await.unwrap();
        }
    }

    fn probe_failing(bad_id: i64) -> Arc<dyn UpstreamProbe> {
        let mut probe = MockUpstreamProbe::new();
        probe.expect_probe().returning(move |channel| {
            if channel.id == bad_id {
                Err(RegistryError::probe("401 Unauthorized"))
            } else {
                Ok(vec!["gpt-4o".to_string()])
            }
        });
        Arc::new(probe)
    }

    #[tokio::test]
    async fn test_reconciles_automatic_status_only() {
        let store = Arc::new(InMemoryChannelStore::new());
        seed(
            &store,
            &[
                ChannelStatus::Enabled,
                ChannelStatus::Enabled,
                ChannelStatus::AutoDisabled,
                ChannelStatus::ManuallyDisabled,
            ],
        )
        .await;

        let tester = ChannelTester::new(store.clone(), probe_failing(2), ChannelCache::disabled(), 2);
        let report = tester.test_all(true).await.unwrap();

        assert_eq!(
            report,
            TestReport {
                tested: 4,
                passed: 3,
                failed: 1,
                disabled: 1,
                enabled: 1,
            }
        );
        assert_eq!(store.get(2, false).await.unwrap().status, ChannelStatus::AutoDisabled);
        assert_eq!(store.get(3, false).await.unwrap().status, ChannelStatus::Enabled);
        assert_eq!(
            store.get(4, false).await.unwrap().status,
            ChannelStatus::ManuallyDisabled
        );
    }

    #[tokio::test]
    async fn test_skips_disabled_channels_unless_requested() {
        let store = Arc::new(InMemoryChannelStore::new());
        seed(&store, &[ChannelStatus::Enabled, ChannelStatus::AutoDisabled]).await;

        let tester = ChannelTester::new(store.clone(), probe_failing(0), ChannelCache::disabled(), 4);
        let report = tester.test_all(false).await.unwrap();

        assert_eq!(report.tested, 1);
        assert!(!report.status_changed());
        assert_eq!(store.get(2, false).await.unwrap().status, ChannelStatus::AutoDisabled);
    }

    /// Upstream that passes, but an operator disables the channel mid-request
    struct OperatorEditDuringCheck {
        store: Arc<InMemoryChannelStore>,
    }

    #[async_trait::async_trait]
    impl UpstreamProbe for OperatorEditDuringCheck {
        async fn fetch_models(&self, _base_url: &str, _key: &str) -> Result<Vec<String>> {
            Ok(vec!["gpt-4o".to_string()])
        }

        async fn probe(&self, channel: &Channel) -> Result<Vec<String>> {
            let mut edited = self.store.get(channel.id, true).await?;
            edited.status = ChannelStatus::ManuallyDisabled;
            edited.priority = 99;
            self.store.update(&edited).await?;
            Ok(vec!["gpt-4o".to_string()])
        }
    }

    #[tokio::test]
    async fn test_operator_edit_during_test_is_kept() {
        let store = Arc::new(InMemoryChannelStore::new());
        seed(&store, &[ChannelStatus::AutoDisabled]).await;

        let upstream = Arc::new(OperatorEditDuringCheck {
            store: store.clone(),
        });
        let tester = ChannelTester::new(store.clone(), upstream, ChannelCache::disabled(), 1);
        let report = tester.test_all(true).await.unwrap();

        assert_eq!(report.passed, 1);
        assert_eq!(report.enabled, 0);
        let channel = store.get(1, true).await.unwrap();
        assert_eq!(channel.status, ChannelStatus::ManuallyDisabled);
        assert_eq!(channel.priority, 99);
    }
}

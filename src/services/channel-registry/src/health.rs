//! Channel Health Monitor
//!
//! Polls the channel store on a fixed interval and diffs every channel's
//! status against the previous poll. Differences become
//! [`TransitionEvent`]s which are handed to the notification dispatcher on
//! their own task, so a slow transport never delays the next poll.
//!
//! The first observation of a channel id never emits: there is nothing to
//! diff against after a restart. A failed store fetch leaves the snapshot
//! untouched and the next tick simply tries again.

use crate::error::{RegistryError, Result};
use crate::models::{Channel, ChannelId, ChannelStatus};
use crate::notifier::NotificationDispatcher;
use crate::store::ChannelStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A status change between two consecutive polls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub channel_id: ChannelId,
    pub name: String,
    pub from: ChannelStatus,
    pub to: ChannelStatus,
    pub observed_at: DateTime<Utc>,
}

/// Last observed status per channel id
#[derive(Debug, Default)]
pub struct StatusTracker {
    snapshot: HashMap<ChannelId, ChannelStatus>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }

    pub fn status_of(&self, id: ChannelId) -> Option<ChannelStatus> {
        self.snapshot.get(&id).copied()
    }

    /// Record one complete poll and return the transitions it reveals.
    ///
    /// Ids absent from `channels` are forgotten.
    pub fn observe(
        &mut self,
        channels: &[Channel],
        observed_at: DateTime<Utc>,
    ) -> Vec<TransitionEvent> {
        let mut events = Vec::new();

        for channel in channels {
            let previous = self.snapshot.insert(channel.id, channel.status);
            if let Some(from) = previous.filter(|from| *from != channel.status) {
                events.push(TransitionEvent {
                    channel_id: channel.id,
                    name: channel.name.clone(),
                    from,
                    to: channel.status,
                    observed_at,
                });
            }
        }

        if self.snapshot.len() > channels.len() {
            let present: std::collections::HashSet<ChannelId> =
                channels.iter().map(|c| c.id).collect();
            self.snapshot.retain(|id, _| present.contains(id));
        }

        events
    }
}

/// Health monitoring statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HealthMonitorStats {
    /// Completed polls
    pub polls: u64,

    /// Polls whose store fetch failed
    pub failed_polls: u64,

    /// Transition events emitted
    pub transitions: u64,

    /// Channel ids currently in the snapshot
    pub tracked_channels: usize,

    /// Time of the last successful poll
    pub last_poll_at: Option<DateTime<Utc>>,
}

/// Health monitor trait for dependency injection
#[async_trait]
pub trait HealthMonitor: Send + Sync {
    /// Spawn the polling loop
    async fn start_monitoring(&self) -> Result<()>;

    /// Cancel the polling loop and wait for it to exit
    async fn stop_monitoring(&self) -> Result<()>;

    /// Run one poll immediately
    async fn poll_once(&self) -> Result<Vec<TransitionEvent>>;

    async fn get_monitor_stats(&self) -> Result<HealthMonitorStats>;
}

pub struct HealthMonitorImpl {
    /// Channel store polled each interval
    store: Arc<dyn ChannelStore>,

    /// Receives transition events
    dispatcher: NotificationDispatcher,

    /// Poll interval
    interval: Duration,

    /// Status snapshot
    tracker: Arc<Mutex<StatusTracker>>,

    /// Monitoring statistics
    stats: Arc<RwLock<HealthMonitorStats>>,

    /// Cancellation for the running loop
    cancel: Arc<Mutex<Option<CancellationToken>>>,

    /// Running loop task
    task_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl HealthMonitorImpl {
    pub fn new(
        store: Arc<dyn ChannelStore>,
        dispatcher: NotificationDispatcher,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            interval,
            tracker: Arc::new(Mutex::new(StatusTracker::new())),
            stats: Arc::new(RwLock::new(HealthMonitorStats::default())),
            cancel: Arc::new(Mutex::new(None)),
            task_handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.cancel.lock().is_some()
    }

    /// Number of channel ids in the snapshot
    pub fn snapshot_len(&self) -> usize {
        self.tracker.lock().len()
    }

    async fn monitoring_loop(&self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    // failures are logged by poll_once and retried next tick
                    let _ = self.poll_once().await;
                }
            }
        }

        info!("Health monitoring loop stopped");
    }

    fn dispatch(&self, events: &[TransitionEvent]) {
        for event in events {
            info!(
                channel_id = event.channel_id,
                from = %event.from,
                to = %event.to,
                "Channel status changed"
            );

            let dispatcher = self.dispatcher.clone();
            let event = event.clone();
            tokio::spawn(async move {
                dispatcher.notify_transition(&event).await;
            });
        }
    }
}

#[async_trait]
impl HealthMonitor for HealthMonitorImpl {
    async fn start_monitoring(&self) -> Result<()> {
        let token = {
            let mut cancel = self.cancel.lock();
            if cancel.is_some() {
                return Err(RegistryError::config("Health monitoring is already running"));
            }
            let token = CancellationToken::new();
            *cancel = Some(token.clone());
            token
        };

        let monitor = self.clone();
        let handle = tokio::spawn(async move {
            monitor.monitoring_loop(token).await;
        });
        *self.task_handle.lock() = Some(handle);

        info!(
            "Health monitoring started with a {}s interval",
            self.interval.as_secs()
        );
        Ok(())
    }

    async fn stop_monitoring(&self) -> Result<()> {
        let token = self.cancel.lock().take();
        let Some(token) = token else {
            return Ok(());
        };
        token.cancel();

        let handle = self.task_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Health monitoring task ended abnormally: {}", e);
            }
        }

        info!("Health monitoring stopped");
        Ok(())
    }

    async fn poll_once(&self) -> Result<Vec<TransitionEvent>> {
        let channels = match self.store.list(0, 0, true, false).await {
            Ok(channels) => channels,
            Err(e) => {
                error!("Health poll failed to fetch channels: {}", e);
                self.stats.write().failed_polls += 1;
                return Err(e);
            }
        };

        let now = Utc::now();
        let (events, tracked) = {
            let mut tracker = self.tracker.lock();
            let events = tracker.observe(&channels, now);
            (events, tracker.len())
        };

        {
            let mut stats = self.stats.write();
            stats.polls += 1;
            stats.transitions += events.len() as u64;
            stats.tracked_channels = tracked;
            stats.last_poll_at = Some(now);
        }

        debug!(
            "Health poll observed {} channels, {} transitions",
            channels.len(),
            events.len()
        );

        self.dispatch(&events);
        Ok(events)
    }

    async fn get_monitor_stats(&self) -> Result<HealthMonitorStats> {
        Ok(self.stats.read().clone())
    }
}

impl Clone for HealthMonitorImpl {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            dispatcher: self.dispatcher.clone(),
            interval: self.interval,
            tracker: Arc::clone(&self.tracker),
            stats: Arc::clone(&self.stats),
            cancel: Arc::clone(&self.cancel),
            task_handle: Arc::clone(&self.task_handle),
        }
    }
}

//! Operator command surface
//!
//! Commands arrive as chat-style text (`!channels disabled`) from an
//! authenticated author. Only identities held by [`AdminSettings`] may run
//! them; replies are plain text rendered by the notifier's summary builders.

use crate::config::AdminConfig;
use crate::error::{RegistryError, Result};
use crate::models::ChannelStatus;
use crate::notifier::{self, ChannelStats, NotificationDispatcher, Severity};
use crate::store::ChannelStore;
use crate::tester::ChannelTester;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, warn};

const HELP: &str = "Available commands:
!testall - Test all channels
!channels [status] - List channels, optionally only those with a status
!stats - Show channel statistics
!addadmin <user_id> - Add an admin
!removeadmin <user_id> - Remove an admin
!help - Show this help message";

/// Operator identities and bot token, owned by the process root
#[derive(Debug, Default)]
pub struct AdminSettings {
    admins: RwLock<BTreeSet<String>>,
    bot_token: Option<String>,
}

impl AdminSettings {
    pub fn new(config: &AdminConfig) -> Self {
        Self {
            admins: RwLock::new(config.admin_ids.iter().cloned().collect()),
            bot_token: config.bot_token.clone().filter(|t| !t.is_empty()),
        }
    }

    pub fn is_admin(&self, id: &str) -> bool {
        self.admins.read().contains(id)
    }

    /// Returns false when `id` was already an admin
    pub fn add_admin(&self, id: &str) -> bool {
        self.admins.write().insert(id.to_string())
    }

    /// Returns false when `id` was not an admin
    pub fn remove_admin(&self, id: &str) -> bool {
        self.admins.write().remove(id)
    }

    pub fn admins(&self) -> Vec<String> {
        self.admins.read().iter().cloned().collect()
    }

    /// Credential attached to webhook deliveries; blank tokens count as unset
    pub fn bot_token(&self) -> Option<String> {
        self.bot_token.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    TestAll,
    Channels(Option<ChannelStatus>),
    Stats,
    AddAdmin(String),
    RemoveAdmin(String),
    Help,
}

impl AdminCommand {
    /// Parse a command line.
    ///
    /// Text that is not a known command yields `Ok(None)`; a known command
    /// with the wrong arguments yields a validation error carrying its usage.
    pub fn parse(text: &str) -> Result<Option<Self>> {
        let parts: Vec<&str> = text.split_whitespace().collect();
        let Some(first) = parts.first() else {
            return Ok(None);
        };
        let args = &parts[1..];

        let command = match first.to_ascii_lowercase().as_str() {
            "!testall" => AdminCommand::TestAll,
            "!stats" => AdminCommand::Stats,
            "!help" => AdminCommand::Help,
            "!channels" => match args {
                [] => AdminCommand::Channels(None),
                [status] => AdminCommand::Channels(Some(
                    status
                        .parse()
                        .map_err(|e: String| usage("!channels [status]", e))?,
                )),
                _ => return Err(usage("!channels [status]", "too many arguments")),
            },
            "!addadmin" => match args {
                [id] => AdminCommand::AddAdmin(id.to_string()),
                _ => return Err(usage("!addadmin <user_id>", "expected one user id")),
            },
            "!removeadmin" => match args {
                [id] => AdminCommand::RemoveAdmin(id.to_string()),
                _ => return Err(usage("!removeadmin <user_id>", "expected one user id")),
            },
            _ => return Ok(None),
        };

        Ok(Some(command))
    }
}

fn usage(usage: &str, detail: impl Into<String>) -> RegistryError {
    RegistryError::validation("command", format!("{} (usage: {})", detail.into(), usage))
}

/// Executes operator commands against the registry
#[derive(Clone)]
pub struct AdminConsole {
    settings: Arc<AdminSettings>,
    store: Arc<dyn ChannelStore>,
    tester: ChannelTester,
    dispatcher: NotificationDispatcher,
}

impl AdminConsole {
    pub fn new(
        settings: Arc<AdminSettings>,
        store: Arc<dyn ChannelStore>,
        tester: ChannelTester,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            settings,
            store,
            tester,
            dispatcher,
        }
    }

    /// Reply to a message, or `None` when the message is not a command
    pub async fn handle(&self, author: &str, text: &str) -> Option<String> {
        let command = match AdminCommand::parse(text) {
            Ok(Some(command)) => command,
            Ok(None) => return None,
            Err(e) if !self.settings.is_admin(author) => {
                warn!("Rejected malformed command from non-admin {}: {}", author, e);
                return Some("You don't have permission to use this bot.".to_string());
            }
            Err(RegistryError::Validation { message, .. }) => return Some(message),
            Err(e) => return Some(e.to_string()),
        };

        if !self.settings.is_admin(author) {
            warn!("Rejected {:?} from non-admin {}", command, author);
            return Some("You don't have permission to use this bot.".to_string());
        }

        info!("Running {:?} for {}", command, author);
        Some(self.execute(command).await)
    }

    async fn execute(&self, command: AdminCommand) -> String {
        match command {
            AdminCommand::TestAll => {
                let console = self.clone();
                tokio::spawn(async move { console.run_test_pass().await });
                "Testing all channels... You will be notified of the results.".to_string()
            }
            AdminCommand::Channels(status) => match self.store.list(0, 0, true, false).await {
                Ok(channels) => notifier::channel_listing(&channels, status),
                Err(e) => format!("Error getting channels: {}", e),
            },
            AdminCommand::Stats => match self.store.list(0, 0, true, false).await {
                Ok(channels) => ChannelStats::from_channels(&channels).render(),
                Err(e) => format!("Error getting channels: {}", e),
            },
            AdminCommand::AddAdmin(id) => {
                if self.settings.add_admin(&id) {
                    format!("Added user {} as admin", id)
                } else {
                    format!("User {} is already an admin", id)
                }
            }
            AdminCommand::RemoveAdmin(id) => {
                if self.settings.remove_admin(&id) {
                    format!("Removed user {} from admins", id)
                } else {
                    format!("User {} is not an admin", id)
                }
            }
            AdminCommand::Help => HELP.to_string(),
        }
    }

    /// Test every channel and report the outcome through the dispatcher
    pub async fn run_test_pass(&self) {
        match self.tester.test_all(true).await {
            Ok(report) => {
                let severity = if report.failed > 0 {
                    Severity::Warning
                } else {
                    Severity::Info
                };
                self.dispatcher
                    .broadcast(
                        "Channel test finished",
                        &notifier::render_test_report(&report),
                        severity,
                    )
                    .await;
            }
            Err(e) => {
                error!("Channel test pass failed: {}", e);
                self.dispatcher
                    .broadcast(
                        "Channel test failed",
                        &format!("Error testing channels: {}", e),
                        Severity::Critical,
                    )
                    .await;
            }
        }
    }
}

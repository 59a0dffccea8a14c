//! Channel Registry Server
//!
//! Wires the channel store, cache, limiter, probe and notifier into a
//! registry, runs the status monitor and optionally reads operator commands
//! from stdin until shutdown.

use anyhow::{Context, Result};
use channel_registry::{
    admin::{AdminConsole, AdminSettings},
    cache::{CacheStore, ChannelCache, InMemoryCacheStore, RedisCacheStore},
    config::{Args, RegistryServiceConfig},
    health::{HealthMonitor, HealthMonitorImpl},
    models::ListQuery,
    notifier::{LogTransport, NotificationDispatcher, NotificationTransport, WebhookTransport},
    probe::HttpModelProbe,
    rate_limit::AdmissionLimiter,
    registry::ChannelRegistry,
    store::{ChannelStore, InMemoryChannelStore, PgChannelStore},
    tester::ChannelTester,
    CONSOLE_IDENTITY, LOG_TARGET,
};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Telemetry and observability setup
mod telemetry {
    use anyhow::Result;
    use channel_registry::config::RegistryServiceConfig;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    /// Initialize tracing and logging
    pub fn init_tracing(config: &RegistryServiceConfig) -> Result<()> {
        let env_filter = EnvFilter::try_new(&config.logging.level)
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let fmt_layer = match config.logging.format.as_str() {
            "json" => fmt::layer().json().boxed(),
            _ => fmt::layer().pretty().boxed(),
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;

        Ok(())
    }
}

/// Backend setup
mod backends {
    use super::*;

    pub async fn create_store(config: &RegistryServiceConfig) -> Result<Arc<dyn ChannelStore>> {
        match config.database.backend.as_str() {
            "postgres" => {
                let store = PgChannelStore::connect(&config.database.postgres)
                    .await
                    .context("Failed to initialize PostgreSQL channel store")?;
                Ok(Arc::new(store))
            }
            _ => {
                warn!("Using in-memory channel store; channels are lost on restart");
                Ok(Arc::new(InMemoryChannelStore::new()))
            }
        }
    }

    /// Shared cache backend, or `None` when the cache is off or unreachable
    pub async fn create_cache(config: &RegistryServiceConfig) -> Option<Arc<dyn CacheStore>> {
        if !config.cache.enabled {
            info!("Listing cache disabled by configuration");
            return None;
        }

        match RedisCacheStore::connect(&config.cache.redis_url).await {
            Ok(store) => Some(Arc::new(store) as Arc<dyn CacheStore>),
            Err(e) => {
                warn!("Redis unavailable, running without listing cache: {}", e);
                None
            }
        }
    }

    pub fn create_dispatcher(
        config: &RegistryServiceConfig,
        settings: &AdminSettings,
    ) -> Result<NotificationDispatcher> {
        if config.notifications.webhook_targets.is_empty() {
            info!("No webhook targets configured, notifications go to the log");
            return Ok(NotificationDispatcher::new(
                Arc::new(LogTransport),
                vec![LOG_TARGET.to_string()],
            ));
        }

        let transport: Arc<dyn NotificationTransport> = Arc::new(
            WebhookTransport::new(&config.notifications)
                .context("Failed to create webhook transport")?
                .with_bearer_token(settings.bot_token()),
        );
        Ok(NotificationDispatcher::new(
            transport,
            config.notifications.webhook_targets.clone(),
        ))
    }
}

/// Read operator commands from stdin until EOF or shutdown
async fn run_console(console: AdminConsole) {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(reply) = console.handle(CONSOLE_IDENTITY, &line).await {
                    println!("{}", reply);
                }
            }
            Ok(None) => {
                info!("Console input closed");
                break;
            }
            Err(e) => {
                error!("Failed to read console input: {}", e);
                break;
            }
        }
    }
}

/// Graceful shutdown handling
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Parse command-line arguments
    let args = Args::parse();

    // Load configuration
    let config = RegistryServiceConfig::load(&args).context("Failed to load configuration")?;

    // Initialize telemetry
    telemetry::init_tracing(&config)?;

    info!(
        "Starting Channel Registry Server v{}",
        channel_registry::VERSION
    );
    info!("Configuration loaded from: {:?}", args.config);

    let store = backends::create_store(&config).await?;
    let cache_backend = backends::create_cache(&config).await;

    let cache = match &cache_backend {
        Some(backend) => ChannelCache::new(backend.clone(), &config.cache),
        None => ChannelCache::disabled(),
    };

    // Without a shared backend the limiter counts per process
    let limiter_backend = cache_backend
        .clone()
        .unwrap_or_else(|| Arc::new(InMemoryCacheStore::new()) as Arc<dyn CacheStore>);
    let limiter = AdmissionLimiter::new(Some(limiter_backend), config.rate_limit.clone());

    let probe = Arc::new(HttpModelProbe::new(&config.probe).context("Failed to create probe")?);
    let settings = Arc::new(AdminSettings::new(&config.admin));
    if settings.bot_token().is_none() {
        info!("No bot token configured; webhook deliveries are unauthenticated");
    }
    let dispatcher = backends::create_dispatcher(&config, &settings)?;

    let registry = ChannelRegistry::new(
        store.clone(),
        cache.clone(),
        limiter,
        probe.clone(),
        &config,
    );
    let tester = ChannelTester::new(store.clone(), probe, cache, config.probe.concurrency);

    // Warm the first listing page
    match registry.list_channels(&ListQuery::default()).await {
        Ok(page) => info!("Registry ready, first page holds {} channels", page.channels.len()),
        Err(e) => warn!("Failed to warm channel listing: {}", e),
    }

    info!("Initializing health monitor...");
    let health_monitor = HealthMonitorImpl::new(
        registry.store(),
        dispatcher.clone(),
        config.health.interval(),
    );
    if config.health.enabled {
        health_monitor
            .start_monitoring()
            .await
            .context("Failed to start health monitoring")?;
    }

    let console_task = if config.admin.console {
        settings.add_admin(CONSOLE_IDENTITY);
        let console = AdminConsole::new(settings.clone(), store, tester, dispatcher);
        info!("Operator console ready, type !help for commands");
        Some(tokio::spawn(run_console(console)))
    } else {
        None
    };

    shutdown_signal().await;

    info!("Shutting down Channel Registry Server...");

    if let Some(task) = console_task {
        task.abort();
    }

    if health_monitor.is_running() {
        if let Err(e) = health_monitor.stop_monitoring().await {
            warn!("Failed to stop health monitoring gracefully: {}", e);
        }
    }

    info!("Channel Registry Server shutdown complete");
    Ok(())
}

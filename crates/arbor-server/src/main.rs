//! The Arbor collaboration server.
//!
//! Boot order: configuration, logging, stores (with degradation), services,
//! gateway, background tasks, listener. Shutdown tears down in reverse and
//! flushes pending activity batches.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use arbor_activity::{ActivityConfig, ActivityService};
use arbor_collab::{CollabConfig, CollaborationService};
use arbor_config::Config;
use arbor_ephemeral::{EphemeralStore, MemoryStore, RedisStore};
use arbor_events::EventBus;
use arbor_gateway::{Gateway, SchedulerConfig};
use arbor_session::{ActivityStore, MemoryActivityStore, MemorySessionStore, SessionStore};
use arbor_telemetry::{LogConfig, setup_logging};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Real-time collaboration server for branching-conversation canvases.
#[derive(Debug, Parser)]
#[command(name = "arbor-server", version, about)]
struct Args {
    /// Path to a TOML config file; environment variables override it.
    #[arg(long, env = "ARBOR_CONFIG")]
    config: Option<PathBuf>,

    /// Run entirely on in-memory stores (single instance, nothing durable).
    #[arg(long)]
    memory_stores: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = arbor_config::load(args.config.as_deref()).context("loading configuration")?;

    let log_format = config
        .logging
        .format
        .parse()
        .context("parsing logging.format")?;
    setup_logging(&LogConfig::new(config.logging.level.clone()).with_format(log_format))
        .context("installing logging")?;
    info!(port = config.server.port, "arbor server starting");

    let (ephemeral, durable, activities) = build_stores(&config, args.memory_stores).await?;

    let bus = EventBus::new();
    let collab = CollaborationService::new(ephemeral, durable, collab_config(&config));
    let activity = ActivityService::new(activities, bus.clone(), activity_config(&config));
    let gateway = Gateway::new(collab, activity.clone(), bus);

    let shutdown = CancellationToken::new();
    gateway
        .start_background(SchedulerConfig::default(), shutdown.clone())
        .await
        .map_err(|e| anyhow::anyhow!("starting background tasks: {e}"))?;

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, gateway.router())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            serve_shutdown.cancel();
        })
        .await
        .context("serving")?;

    // Drain pending activity batches before exit.
    activity.flush_all().await;
    info!("arbor server stopped");
    Ok(())
}

/// Connect the production stores.
///
/// The durable store is authoritative and required; the ephemeral store
/// falls back to an in-process twin (single-instance semantics) when
/// unreachable, so presence and locks keep working locally while the
/// cluster is down.
async fn build_stores(
    config: &Config,
    memory_stores: bool,
) -> anyhow::Result<(
    Arc<dyn EphemeralStore>,
    Arc<dyn SessionStore>,
    Arc<dyn ActivityStore>,
)> {
    if memory_stores {
        warn!("running on in-memory stores; nothing is durable");
        return Ok((
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySessionStore::new()),
            Arc::new(MemoryActivityStore::new()),
        ));
    }

    let ephemeral: Arc<dyn EphemeralStore> = match RedisStore::connect(
        &config.ephemeral.url,
        config.ephemeral.ready_timeout(),
    )
    .await
    {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(%err, url = %config.ephemeral.url, "ephemeral store unreachable, degrading to in-process state");
            Arc::new(MemoryStore::new())
        },
    };

    let (sessions, activities) =
        arbor_session::connect_mongo(&config.durable.url, &config.durable.database)
            .await
            .context("connecting durable store")?;

    Ok((ephemeral, Arc::new(sessions), Arc::new(activities)))
}

fn collab_config(config: &Config) -> CollabConfig {
    CollabConfig {
        presence_ttl: Duration::from_secs(config.presence.presence_ttl_seconds),
        heartbeat_ttl: Duration::from_secs(config.presence.heartbeat_ttl_seconds),
        cursor_ttl: Duration::from_secs(config.presence.cursor_ttl_seconds),
        typing_ttl: Duration::from_secs(config.presence.typing_ttl_seconds),
        cursor_throttle: Duration::from_secs(config.presence.cursor_throttle_seconds),
        lock_duration: Duration::from_secs(config.presence.lock_timeout_seconds),
        session_timeout: Duration::from_secs(config.sessions.session_timeout_minutes * 60),
    }
}

fn activity_config(config: &Config) -> ActivityConfig {
    ActivityConfig {
        batch_window: config.activity.batch_window(),
        batch_max: config.activity.batch_max,
        retention_days: config.activity.retention_days,
        ..ActivityConfig::default()
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "failed to listen for shutdown signal");
        // Without a signal handler, park forever rather than exit early.
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

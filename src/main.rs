//! zoom-presence daemon.
//!
//! Loads `~/.zoom-presence/config.yaml`, attaches one presence sensor per
//! configured account and contact, and reads decoded webhook events as
//! newline-delimited JSON on stdin. Sensor states are recorded in SQLite
//! and restored on the next start.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

use zoom_presence::adapters::zoom::ZoomApi;
use zoom_presence::dispatcher::Dispatcher;
use zoom_presence::limiter::FetchLimiter;
use zoom_presence::{
    DaemonConfig, EventBus, Platform, ProfileFetcher, SqliteStateStore, StateStore, ZoomEvent,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zoom_presence=info".into()),
        )
        .with_target(false)
        .init();

    info!("Zoom presence v{}", env!("CARGO_PKG_VERSION"));

    let config = DaemonConfig::from_env().context("Failed to load configuration")?;
    let token = config
        .access_token
        .clone()
        .context("No Zoom access token: set access_token or ZOOM_ACCESS_TOKEN")?;

    // ── State Store ─────────────────────────────────────────────────
    let db_path = config.state_db_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store: Arc<dyn StateStore> =
        Arc::new(SqliteStateStore::open(&db_path).context("Failed to open state store")?);

    // ── Zoom API ────────────────────────────────────────────────────
    let fetcher: Arc<dyn ProfileFetcher> = Arc::new(ZoomApi::new(
        &config.api_base,
        token,
        Duration::from_secs(config.request_timeout_secs),
    )?);

    // ── Platform ────────────────────────────────────────────────────
    let dispatcher = Arc::new(Dispatcher::new());
    let events = EventBus::new();
    let platform = Platform::new(
        fetcher,
        store,
        events.clone(),
        FetchLimiter::new(config.parallel_updates),
        Duration::from_secs(config.poll_interval_secs),
        Duration::from_secs(config.coordinator_interval_secs),
    );

    let mut setups = Vec::new();
    for entry_config in config.entries.iter().cloned() {
        let (entry, contacts) = entry_config.into_entry(Arc::clone(&dispatcher));
        setups.push(platform.setup_entry(entry, &contacts).await);
    }
    if setups.is_empty() {
        warn!("No entries configured — nothing to track");
    }

    // ── Event Feed ──────────────────────────────────────────────────
    let feed = tokio::spawn(read_event_feed(events));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    feed.abort();
    for setup in setups {
        setup.unload().await;
    }
    Ok(())
}

/// Fire every JSON line on stdin as a webhook event.
async fn read_event_feed(events: EventBus) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<ZoomEvent>(line) {
                    Ok(event) => {
                        let listeners = events.fire(event);
                        debug!(listeners, "Zoom event delivered");
                    }
                    Err(e) => warn!("Ignoring malformed event line: {}", e),
                }
            }
            Ok(None) => {
                info!("Event feed closed");
                break;
            }
            Err(e) => {
                error!("Event feed read failed: {}", e);
                break;
            }
        }
    }
}

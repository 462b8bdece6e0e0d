//! Keel Telegram Relay
//!
//! Polls Keel for update approvals, announces them in Telegram chats and keeps
//! the announcements in sync with votes cast anywhere.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use keel_relay::bot::Bot;
use keel_relay::keel::KeelClient;
use keel_relay::sync::SyncEngine;
use keel_relay::telegram::TelegramClient;
use keel_relay::webhook::{self, WebhookState};
use keel_relay_core::ChatFilters;
use keel_relay_core::config::load_config;
use keel_relay_core::tracing_init::{default_filter, init_tracing_with_metrics};

#[derive(Parser, Debug)]
#[command(name = "keel-telegram-relay")]
#[command(version, about = "Relay Keel update approvals to Telegram")]
struct Args {
    /// Path to the TOML config file.
    #[arg(long, env = "KEEL_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug"). Overrides the config file.
    #[arg(long, env = "KEEL_RELAY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "KEEL_RELAY_LOG_JSON")]
    log_json: bool,

    /// OpenTelemetry OTLP endpoint for traces and metrics export
    /// (e.g. `http://localhost:4317`). Requires the `metrics` feature.
    #[cfg(feature = "metrics")]
    #[arg(long, env = "KEEL_RELAY_METRICS_ENDPOINT")]
    metrics_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    #[cfg(feature = "metrics")]
    let metrics_endpoint = args.metrics_endpoint.as_deref();
    #[cfg(not(feature = "metrics"))]
    let metrics_endpoint: Option<&str> = None;

    // Hold the guard so the OTel pipeline stays alive for the process lifetime.
    let metrics_guard = init_tracing_with_metrics(
        &default_filter(&config.log_level),
        args.log_json,
        metrics_endpoint,
    );

    config.validate()?;
    let config = Arc::new(config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        keel = %config.keel.base_url(),
        chats = config.telegram.chat_ids.len(),
        interval_secs = config.monitor.interval_secs,
        "Starting keel-telegram-relay"
    );

    let filters = Arc::new(ChatFilters::new(
        &config.telegram.chat_ids,
        &config.telegram.filters,
    )?);
    let telegram = Arc::new(TelegramClient::new(&config.telegram).context("Telegram client")?);
    let keel = KeelClient::new(&config.keel).context("Keel client")?;

    let (sync, sync_task) = SyncEngine::new(
        Arc::new(keel.clone()),
        Arc::clone(&telegram),
        Arc::clone(&filters),
    )
    .with_skip_settled(config.monitor.skip_settled)
    .spawn(config.monitor.interval());

    let bot_username = match telegram.get_me().await {
        Ok(me) => me.username,
        Err(e) => {
            warn!(error = %e, "Could not look up bot identity, accepting /cmd@any");
            None
        }
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let bot = Arc::new(
        Bot::new(
            Arc::clone(&telegram),
            keel,
            Arc::clone(&filters),
            sync.clone(),
            Arc::clone(&config),
        )
        .with_bot_username(bot_username),
    );
    let poller = bot.spawn_poller(shutdown_rx.clone());

    let webhook_task = if config.webhook.enabled {
        let router = webhook::build_router(WebhookState {
            chat: Arc::clone(&telegram),
            filters: Arc::clone(&filters),
        });
        let addr = config.webhook.addr;
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = webhook::serve(addr, router, rx).await {
                warn!(addr = %addr, error = %e, "Webhook server failed");
            }
        }))
    } else {
        info!("Webhook server disabled");
        None
    };
    drop(shutdown_rx);

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    info!("Relay ready");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = sync.shutdown().await {
        warn!(error = %e, "Sync engine already stopped");
    }
    let _ = sync_task.await;
    let _ = poller.await;
    if let Some(handle) = webhook_task {
        let _ = handle.await;
    }

    #[cfg(feature = "metrics")]
    if let Some(guard) = metrics_guard
        && let Err(e) = guard.shutdown()
    {
        warn!(error = %e, "Failed to flush telemetry");
    }
    #[cfg(not(feature = "metrics"))]
    let _ = metrics_guard;

    info!("Relay stopped");
    Ok(())
}

//! Inbound webhook server for Keel notifications.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use keel_relay_core::{ChatFilters, metrics};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::render::{ActionMenu, notification_text};
use crate::sync::ChatDelivery;

/// Notification body posted by Keel's webhook sender.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeelNotification {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub level: String,
    pub message: String,
    pub identifier: String,
}

/// Shared handler state.
pub struct WebhookState<C> {
    pub chat: Arc<C>,
    pub filters: Arc<ChatFilters>,
}

impl<C> Clone for WebhookState<C> {
    fn clone(&self) -> Self {
        Self {
            chat: Arc::clone(&self.chat),
            filters: Arc::clone(&self.filters),
        }
    }
}

pub fn build_router<C: ChatDelivery>(state: WebhookState<C>) -> Router {
    Router::new()
        .route("/v1/webhooks/keel", post(keel_notification::<C>))
        .route("/health", get(health))
        .with_state(state)
}

/// `GET /health`
async fn health() -> &'static str {
    "ok"
}

/// `POST /v1/webhooks/keel`: relay the notification to every chat whose
/// filters let the identifier through.
async fn keel_notification<C: ChatDelivery>(
    State(state): State<WebhookState<C>>,
    Json(notification): Json<KeelNotification>,
) -> &'static str {
    metrics::record_notification();
    if notification.identifier.is_empty() {
        debug!(name = %notification.name, "Notification without identifier, not relaying");
        return "OK";
    }

    let text = notification_text(
        &notification.name,
        &notification.level,
        &notification.identifier,
        &notification.kind,
        &notification.message,
    );
    let menu = ActionMenu::empty();
    for &chat_id in state.filters.chat_ids() {
        if state.filters.is_suppressed(chat_id, &notification.identifier) {
            continue;
        }
        match state.chat.send_message(chat_id, &text, &menu).await {
            Ok(_) => debug!(chat_id, identifier = %notification.identifier, "Relayed notification"),
            Err(e) => warn!(
                chat_id,
                identifier = %notification.identifier,
                error = %e,
                "Failed to relay notification"
            ),
        }
    }
    "OK"
}

/// Serve `router` on `addr` until `shutdown` flips.
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Webhook server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}

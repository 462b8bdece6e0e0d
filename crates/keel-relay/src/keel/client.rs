//! Keel REST API v1 client.
//!
//! Uses reqwest with HTTP basic auth to read approvals, resources, tracked
//! images and stats, and to vote on approvals.

use keel_relay_core::ApprovalRecord;
use keel_relay_core::config::KeelConfig;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::sync::ApprovalSource;

use super::types::{
    Action, ApprovalActionRequest, ApprovalFilter, DailyStats, Resource, TrackedImage,
};

/// Keel API client errors.
#[derive(Debug, Error)]
pub enum KeelError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Keel API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to decode Keel response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl KeelError {
    /// Short text suitable for a chat reply.
    pub fn user_message(&self) -> String {
        match self {
            Self::Api { message, .. } if !message.trim().is_empty() => message.trim().to_string(),
            Self::Api { .. } => "Unknown error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Keel REST API v1 client.
#[derive(Debug, Clone)]
pub struct KeelClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl KeelClient {
    /// Create a new Keel API client.
    pub fn new(config: &KeelConfig) -> Result<Self, KeelError> {
        if config.host.is_empty() {
            return Err(KeelError::Config("host is empty".into()));
        }
        if config.username.is_empty() {
            return Err(KeelError::Config("username is empty".into()));
        }

        // reqwest is built with rustls-no-provider; `Err` means already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Point the client at an arbitrary base URL (mock servers).
    #[cfg(test)]
    pub(crate) fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Build the API v1 URL for a given path.
    pub(crate) fn api_url(&self, path: &str) -> String {
        format!("{}/v1{}", self.base_url, path)
    }

    /// Turn a non-success response into [`KeelError::Api`] carrying the body.
    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, KeelError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let message = if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("Unknown").to_string()
        } else {
            body.trim().to_string()
        };
        Err(KeelError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// GET `path` and decode the body. Empty and `null` bodies decode to `T::default()`.
    async fn get_json<T>(&self, path: &str) -> Result<T, KeelError>
    where
        T: DeserializeOwned + Default,
    {
        let url = self.api_url(path);
        debug!(%url, "Keel GET");
        let resp = self
            .http
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        let body = Self::check_status(resp).await?.bytes().await?;
        decode_body(&body)
    }

    // =========================================================================
    // Approvals
    // =========================================================================

    /// All approvals known to Keel.
    pub async fn approvals(&self) -> Result<Vec<ApprovalRecord>, KeelError> {
        self.get_json("/approvals").await
    }

    /// Approvals matching `filter`. Keel has no server-side filtering.
    pub async fn fetch_approvals(
        &self,
        filter: ApprovalFilter,
    ) -> Result<Vec<ApprovalRecord>, KeelError> {
        let mut approvals = self.approvals().await?;
        approvals.retain(|a| filter.matches(a));
        Ok(approvals)
    }

    /// POST a vote or deletion for one approval. The response body is ignored.
    pub async fn approval_action(
        &self,
        id: &str,
        identifier: &str,
        voter: &str,
        action: Action,
    ) -> Result<(), KeelError> {
        let url = self.api_url("/approvals");
        debug!(approval_id = id, identifier, voter, action = action.as_str(), "Keel approval action");
        let body = ApprovalActionRequest {
            id,
            identifier,
            voter,
            action,
        };
        let resp = self
            .http
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .await?;
        Self::check_status(resp).await?;
        Ok(())
    }

    // =========================================================================
    // Resources, tracking and stats
    // =========================================================================

    pub async fn resources(&self) -> Result<Vec<Resource>, KeelError> {
        self.get_json("/resources").await
    }

    pub async fn tracked_images(&self) -> Result<Vec<TrackedImage>, KeelError> {
        self.get_json("/tracked").await
    }

    pub async fn stats(&self) -> Result<Vec<DailyStats>, KeelError> {
        self.get_json("/stats").await
    }
}

impl ApprovalSource for KeelClient {
    async fn fetch_approvals(
        &self,
        filter: ApprovalFilter,
    ) -> Result<Vec<ApprovalRecord>, KeelError> {
        Self::fetch_approvals(self, filter).await
    }
}

pub(crate) fn decode_body<T>(body: &[u8]) -> Result<T, KeelError>
where
    T: DeserializeOwned + Default,
{
    let trimmed = body.trim_ascii();
    if trimmed.is_empty() || trimmed == b"null" {
        return Ok(T::default());
    }
    Ok(serde_json::from_slice(trimmed)?)
}

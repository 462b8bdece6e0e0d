//! Keel REST API response and request types.
//!
//! Approval records live in `keel_relay_core::approval`; this module holds
//! the remaining `/v1` payloads.

use std::collections::BTreeMap;

use keel_relay_core::approval::null_as_default;
use keel_relay_core::{ApprovalRecord, Provider};
use serde::{Deserialize, Serialize};

/// Action posted to `/v1/approvals`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Approve,
    Reject,
    Delete,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Delete => "delete",
        }
    }

    /// Past tense for chat replies.
    pub const fn past_tense(self) -> &'static str {
        match self {
            Self::Approve => "Approved",
            Self::Reject => "Rejected",
            Self::Delete => "Deleted",
        }
    }
}

/// Body of `POST /v1/approvals`.
#[derive(Debug, Serialize)]
pub struct ApprovalActionRequest<'a> {
    pub id: &'a str,
    pub identifier: &'a str,
    pub voter: &'a str,
    pub action: Action,
}

/// Client-side filter for approval listings. `None` matches either value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApprovalFilter {
    pub rejected: Option<bool>,
    pub archived: Option<bool>,
}

impl ApprovalFilter {
    /// Every approval, settled or not.
    pub const ALL: Self = Self {
        rejected: None,
        archived: None,
    };

    /// Approvals that can still be voted on.
    pub const DECIDABLE: Self = Self {
        rejected: Some(false),
        archived: Some(false),
    };

    pub fn matches(&self, approval: &ApprovalRecord) -> bool {
        self.rejected.is_none_or(|r| approval.rejected == r)
            && self.archived.is_none_or(|a| approval.archived == a)
    }
}

/// Replica counts reported for a workload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct K8sStatus {
    pub replicas: i64,
    pub updated_replicas: i64,
    pub ready_replicas: i64,
    pub available_replicas: i64,
    pub unavailable_replicas: i64,
}

/// Workload tracked by Keel, from `GET /v1/resources`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(default)]
    pub provider: Provider,
    pub identifier: String,
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub policy: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub images: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub status: K8sStatus,
}

/// Image tracking settings, from `GET /v1/tracked`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedImage {
    pub image: String,
    #[serde(default)]
    pub trigger: String,
    #[serde(default)]
    pub poll_schedule: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub policy: String,
    #[serde(default)]
    pub registry: String,
}

/// Per-day audit counters, from `GET /v1/stats`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DailyStats {
    /// Unix timestamp of the day.
    pub timestamp: i64,
    pub webhooks_received: u64,
    pub approvals_approved: u64,
    pub approvals_rejected: u64,
    pub updates: u64,
}

//! Keel approval records.
//!
//! An approval is a change request that needs `votes_required` votes before
//! Keel rolls out the update. Records are read from `GET /v1/approvals`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Update provider that raised the approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Kubernetes,
    Helm,
    #[serde(other)]
    Unknown,
}

/// A pending or resolved approval request as reported by Keel.
///
/// `id` is the durable identity. `identifier` (`<kind>/<namespace>/<name>:<version>`)
/// is for display and lookup only and may recur under a new `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRecord {
    pub id: String,
    pub identifier: String,
    #[serde(default)]
    pub provider: Provider,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub current_version: String,
    #[serde(default)]
    pub new_version: String,
    #[serde(default)]
    pub digest: String,
    pub votes_required: u32,
    pub votes_received: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub voters: Vec<String>,
    pub archived: bool,
    pub rejected: bool,
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mutually exclusive lifecycle classification of an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApprovalState {
    /// Approved and archived by Keel; the update went out.
    Archived,
    /// Rejected by a voter.
    Rejected,
    /// Still collecting votes.
    Pending,
    /// Enough votes, waiting for Keel to archive it.
    Approved,
}

impl ApprovalState {
    /// Archived and Rejected approvals can no longer change.
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Archived | Self::Rejected)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Archived => "Archived",
            Self::Rejected => "Rejected",
            Self::Pending => "Pending",
            Self::Approved => "Approved",
        }
    }
}

impl ApprovalRecord {
    /// Classify the record. Archived wins over Rejected, which wins over the vote tally.
    pub const fn state(&self) -> ApprovalState {
        if self.archived {
            ApprovalState::Archived
        } else if self.rejected {
            ApprovalState::Rejected
        } else if self.votes_received < self.votes_required {
            ApprovalState::Pending
        } else {
            ApprovalState::Approved
        }
    }

    /// Neither archived nor rejected, so voters may still act on it.
    pub const fn is_decidable(&self) -> bool {
        !self.archived && !self.rejected
    }
}

/// Keel is written in Go and serializes empty slices as `null`.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

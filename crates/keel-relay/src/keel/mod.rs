//! Keel API integration.
//!
//! Provides a reqwest-based client for the Keel REST API v1,
//! covering approvals, resources, tracked images and stats.

mod client;
pub mod types;


pub use client::{KeelClient, KeelError};
pub use types::{Action, ApprovalFilter, DailyStats, K8sStatus, Resource, TrackedImage};

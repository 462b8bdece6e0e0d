//! Keel Telegram relay core library
//!
//! Shared functionality for the relay:
//! - Approval records and their classification
//! - Configuration resolution (defaults, TOML file, environment)
//! - Per-chat identifier filter rules
//! - Common error types, tracing and metrics setup

pub mod approval;
pub mod config;
pub mod error;
pub mod filters;
pub mod metrics;
pub mod tracing_init;

pub use approval::{ApprovalRecord, ApprovalState, Provider};
pub use config::Config;
pub use error::{Error, Result};
pub use filters::{ChatFilters, FilterRule};

/// Telegram chat identifier (negative for groups and channels).
pub type ChatId = i64;

/// Telegram message identifier, unique within one chat.
pub type MessageId = i64;

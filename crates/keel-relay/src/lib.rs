//! Keel Telegram Relay Library
//!
//! Relays Keel update approvals and webhook notifications to Telegram:
//! - Keel REST API client (approvals, votes, resources, stats)
//! - Telegram Bot API client
//! - Sync engine keeping sent notifications in line with Keel
//! - Notification rendering
//! - Chat commands and inline button handling
//! - Inbound webhook server

pub mod bot;
pub mod keel;
pub mod render;
pub mod sync;
pub mod telegram;
pub mod webhook;

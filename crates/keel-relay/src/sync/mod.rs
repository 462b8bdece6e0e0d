//! Approval state synchronization.
//!
//! The engine polls Keel, notifies configured chats about approvals that
//! newly appeared, and keeps already-sent notifications in sync with the
//! upstream state. It talks to the outside world only through the
//! [`ApprovalSource`] and [`ChatDelivery`] traits.

pub mod diff;
pub mod engine;
pub mod registry;

use std::future::Future;

use keel_relay_core::{ApprovalRecord, ChatId, MessageId};

use crate::keel::{ApprovalFilter, KeelError};
use crate::render::ActionMenu;
use crate::telegram::TelegramError;

pub use diff::new_items;
pub use engine::{SyncEngine, SyncError, SyncHandle, TickReport};
pub use registry::MessageRegistry;

/// Where a notification landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Read access to the approval repository.
pub trait ApprovalSource: Send + Sync + 'static {
    fn fetch_approvals(
        &self,
        filter: ApprovalFilter,
    ) -> impl Future<Output = Result<Vec<ApprovalRecord>, KeelError>> + Send;
}

/// Chat send/edit capability.
pub trait ChatDelivery: Send + Sync + 'static {
    /// Send an HTML message with the given buttons.
    fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        menu: &ActionMenu,
    ) -> impl Future<Output = Result<MessageRef, TelegramError>> + Send;

    /// Replace text and buttons of an earlier message.
    fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        menu: &ActionMenu,
    ) -> impl Future<Output = Result<(), TelegramError>> + Send;
}

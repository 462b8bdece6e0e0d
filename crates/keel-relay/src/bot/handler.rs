//! Dispatch of incoming messages and button clicks.

use chrono::Utc;
use keel_relay_core::{ChatId, MessageId, metrics};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::Bot;
use super::commands::{self, Command, ListOptions, Parsed, Target};
use super::format;
use crate::keel::{Action, ApprovalFilter, KeelError};
use crate::render::CallbackAction;
use crate::telegram::{
    CallbackQuery, MAX_MESSAGE_LEN, Message, TelegramError, Update, User, split_html,
    split_message,
};

const NO_PERMISSION: &str = "Sorry, you do not have permissions to use this bot.";

/// Failure while serving one command.
#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Keel(#[from] KeelError),

    #[error(transparent)]
    Telegram(#[from] TelegramError),

    #[error("Invalid filter regex: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("No matching approval found for '{0}'")]
    NotFound(String),
}

impl BotError {
    fn reply_text(&self) -> String {
        match self {
            Self::Keel(e) => format!("Error: {}", e.user_message()),
            other => other.to_string(),
        }
    }
}

impl Bot {
    pub(crate) async fn handle_update(&self, update: Update) {
        if let Some(query) = update.callback_query {
            self.handle_callback(query).await;
        } else if let Some(message) = update.message {
            self.handle_message(message).await;
        }
    }

    async fn handle_message(&self, message: Message) {
        if message.is_forwarded() || message.is_reply() {
            return;
        }
        let Some(text) = message.text.as_deref() else {
            return;
        };
        let chat_id = message.chat.id;
        let is_admin = self.is_admin(message.from.as_ref());

        let command = match commands::parse(text, self.bot_username.as_deref()) {
            Parsed::NotACommand => return,
            Parsed::Unknown(name) => {
                if is_admin {
                    debug!(chat_id, command = %name, "Unknown command, sending help");
                    self.reply(chat_id, message.message_id, commands::HELP).await;
                }
                return;
            }
            Parsed::BadArguments(usage) => {
                if is_admin {
                    self.reply(chat_id, message.message_id, usage).await;
                }
                return;
            }
            Parsed::Command(command) => command,
        };

        if !is_admin {
            debug!(chat_id, command = command.name(), "Ignoring command from non-admin");
            if command == Command::Start {
                self.reply(chat_id, message.message_id, NO_PERMISSION).await;
            }
            return;
        }
        if !command.admin_only() && !self.filters.is_configured(chat_id) {
            debug!(chat_id, command = command.name(), "Ignoring command from unconfigured chat");
            return;
        }

        info!(chat_id, command = command.name(), "Handling command");
        if let Err(e) = self.dispatch(&command, &message).await {
            warn!(chat_id, command = command.name(), error = %e, "Command failed");
            self.reply(chat_id, message.message_id, &e.reply_text()).await;
        }
    }

    async fn dispatch(&self, command: &Command, message: &Message) -> Result<(), BotError> {
        let chat_id = message.chat.id;
        let reply_to = message.message_id;
        match command {
            Command::Start => {
                let name = message.from.as_ref().map_or("", |u| u.first_name.as_str());
                let text = format!(
                    "Welcome {name},\nthis is your keel-telegram-relay instance, ready to go!"
                );
                self.telegram.send_text(chat_id, &text, None).await?;
            }
            Command::List(options) => self.list_approvals(chat_id, reply_to, *options).await?,
            Command::Approve(target) => {
                self.approval_command(message, target, Action::Approve)
                    .await?;
            }
            Command::Reject(target) => {
                self.approval_command(message, target, Action::Reject)
                    .await?;
            }
            Command::Delete(target) => {
                self.approval_command(message, target, Action::Delete)
                    .await?;
            }
            Command::Resources { filter } => {
                let filter = filter.as_deref().map(Regex::new).transpose()?;
                let resources = self.keel.resources().await?;
                let matching: Vec<_> = resources
                    .iter()
                    .filter(|r| filter.as_ref().is_none_or(|re| format::resource_matches(r, re)))
                    .collect();
                debug!(chat_id, count = matching.len(), "Listing resources");
                self.send_chunked(chat_id, reply_to, &format::resource_list(&matching), false)
                    .await?;
            }
            Command::Tracked => {
                let tracked = self.keel.tracked_images().await?;
                self.send_chunked(chat_id, reply_to, &format::tracked_list(&tracked), false)
                    .await?;
            }
            Command::Stats => {
                let stats = self.keel.stats().await?;
                self.send_chunked(chat_id, reply_to, &format::stats_list(&stats), false)
                    .await?;
            }
            Command::ChatId => {
                self.telegram
                    .send_text(chat_id, &chat_id.to_string(), Some(reply_to))
                    .await?;
            }
            Command::Help => {
                self.telegram
                    .send_text(chat_id, commands::HELP, Some(reply_to))
                    .await?;
            }
            Command::Version => {
                self.telegram
                    .send_text(chat_id, env!("CARGO_PKG_VERSION"), Some(reply_to))
                    .await?;
            }
            Command::Config => {
                self.send_chunked(chat_id, reply_to, &self.config.to_redacted_toml(), false)
                    .await?;
            }
        }
        Ok(())
    }

    async fn list_approvals(
        &self,
        chat_id: ChatId,
        reply_to: MessageId,
        options: ListOptions,
    ) -> Result<(), BotError> {
        let mut approvals = self.keel.approvals().await?;
        approvals.retain(|a| !self.filters.is_suppressed(chat_id, &a.identifier));
        let text = format::approval_list(&approvals, options, Utc::now());
        self.send_chunked(chat_id, reply_to, &text, true).await
    }

    /// `/approve`, `/reject` and `/delete`. Votes only consider decidable
    /// approvals; deletion considers all of them.
    async fn approval_command(
        &self,
        message: &Message,
        target: &Target,
        action: Action,
    ) -> Result<(), BotError> {
        let chat_id = message.chat.id;
        let filter = match action {
            Action::Delete => ApprovalFilter::ALL,
            Action::Approve | Action::Reject => ApprovalFilter::DECIDABLE,
        };
        let mut approvals = self.keel.fetch_approvals(filter).await?;
        approvals.retain(|a| !self.filters.is_suppressed(chat_id, &a.identifier));

        let approval = format::resolve_target(&approvals, &target.key)
            .ok_or_else(|| BotError::NotFound(target.key.clone()))?;
        let voter = target
            .voter
            .clone()
            .unwrap_or_else(|| voter_name(message.from.as_ref()));

        self.keel
            .approval_action(&approval.id, &approval.identifier, &voter, action)
            .await?;
        metrics::record_approval_action(action.as_str());
        info!(
            approval_id = %approval.id,
            identifier = %approval.identifier,
            voter = %voter,
            action = action.as_str(),
            "Approval action issued from chat"
        );

        let text = format!("{} {}", action.past_tense(), approval.identifier);
        self.telegram
            .send_text(chat_id, &text, Some(message.message_id))
            .await?;
        self.refresh_messages().await;
        Ok(())
    }

    async fn handle_callback(&self, query: CallbackQuery) {
        let data = query.data.as_deref().unwrap_or_default();
        let action = match CallbackAction::parse(data) {
            Some(CallbackAction::Noop) => {
                self.answer(&query.id, None).await;
                return;
            }
            Some(CallbackAction::Approve(id)) => (Action::Approve, id),
            Some(CallbackAction::Reject(id)) => (Action::Reject, id),
            None => {
                debug!(data, "Unknown callback data");
                self.answer(&query.id, Some("Unknown button")).await;
                return;
            }
        };

        let chat_id = query.message.as_ref().map(|m| m.chat.id);
        let allowed = self.is_admin(Some(&query.from))
            && chat_id.is_some_and(|id| self.filters.is_configured(id));
        if !allowed {
            debug!(user = ?query.from.username, ?chat_id, "Rejecting button click");
            self.answer(&query.id, Some(NO_PERMISSION)).await;
            return;
        }

        let (action, approval_id) = action;
        let answer = match self.vote_by_id(&approval_id, action, &query.from).await {
            Ok(identifier) => {
                metrics::record_approval_action(action.as_str());
                format!("{} '{identifier}'", action.past_tense())
            }
            Err(e) => {
                warn!(approval_id = %approval_id, action = action.as_str(), error = %e, "Button action failed");
                match &e {
                    BotError::Keel(keel @ KeelError::Api { .. }) => keel.user_message(),
                    BotError::NotFound(_) => "Approval no longer exists".to_string(),
                    _ => "Unknown error".to_string(),
                }
            }
        };
        self.answer(&query.id, Some(&answer)).await;
        self.refresh_messages().await;
    }

    /// Vote on the approval with `approval_id`. Returns its identifier.
    async fn vote_by_id(
        &self,
        approval_id: &str,
        action: Action,
        from: &User,
    ) -> Result<String, BotError> {
        let approvals = self.keel.approvals().await?;
        let approval = approvals
            .iter()
            .find(|a| a.id == approval_id)
            .ok_or_else(|| BotError::NotFound(approval_id.to_string()))?;
        self.keel
            .approval_action(
                &approval.id,
                &approval.identifier,
                &voter_name(Some(from)),
                action,
            )
            .await?;
        info!(
            approval_id,
            identifier = %approval.identifier,
            voter = %from.full_name(),
            action = action.as_str(),
            "Approval action issued from button"
        );
        Ok(approval.identifier.clone())
    }

    /// Ask the sync engine to re-render registered messages now.
    async fn refresh_messages(&self) {
        if let Err(e) = self.sync.trigger_reconciliation().await {
            warn!(error = %e, "Could not trigger reconciliation");
        }
    }

    async fn send_chunked(
        &self,
        chat_id: ChatId,
        reply_to: MessageId,
        text: &str,
        html: bool,
    ) -> Result<(), BotError> {
        let chunks = if html {
            split_html(text, MAX_MESSAGE_LEN)
        } else {
            split_message(text, MAX_MESSAGE_LEN)
        };
        for chunk in chunks {
            if html {
                self.telegram
                    .send_html(chat_id, &chunk, &crate::render::ActionMenu::empty(), Some(reply_to))
                    .await?;
            } else {
                self.telegram
                    .send_text(chat_id, &chunk, Some(reply_to))
                    .await?;
            }
        }
        Ok(())
    }

    async fn reply(&self, chat_id: ChatId, reply_to: MessageId, text: &str) {
        if let Err(e) = self.telegram.send_text(chat_id, text, Some(reply_to)).await {
            warn!(chat_id, error = %e, "Failed to send reply");
        }
    }

    async fn answer(&self, query_id: &str, text: Option<&str>) {
        if let Err(e) = self.telegram.answer_callback_query(query_id, text).await {
            warn!(error = %e, "Failed to answer callback query");
        }
    }
}

/// Name recorded as voter: the user's full name, else their username.
fn voter_name(user: Option<&User>) -> String {
    user.map(User::full_name)
        .filter(|n| !n.trim().is_empty())
        .or_else(|| user.and_then(|u| u.username.clone()))
        .unwrap_or_else(|| "unknown".to_string())
}

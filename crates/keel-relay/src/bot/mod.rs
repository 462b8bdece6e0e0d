//! Telegram bot front end: update polling, commands and button clicks.

pub mod commands;
pub mod format;
mod handler;

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use keel_relay_core::{ChatFilters, Config};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::keel::KeelClient;
use crate::sync::SyncHandle;
use crate::telegram::{TelegramClient, User};

pub use handler::BotError;

/// Pause after a failed `getUpdates` before polling again.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Command and callback handler shared by all update tasks.
pub struct Bot {
    telegram: Arc<TelegramClient>,
    keel: KeelClient,
    filters: Arc<ChatFilters>,
    admins: HashSet<String>,
    sync: SyncHandle,
    config: Arc<Config>,
    bot_username: Option<String>,
}

impl Bot {
    pub fn new(
        telegram: Arc<TelegramClient>,
        keel: KeelClient,
        filters: Arc<ChatFilters>,
        sync: SyncHandle,
        config: Arc<Config>,
    ) -> Self {
        let admins = config
            .telegram
            .admin_usernames
            .iter()
            .map(|name| name.trim_start_matches('@').to_string())
            .collect();
        Self {
            telegram,
            keel,
            filters,
            admins,
            sync,
            config,
            bot_username: None,
        }
    }

    /// Username of this bot, for `/command@botname` addressing.
    #[must_use]
    pub fn with_bot_username(mut self, username: Option<String>) -> Self {
        self.bot_username = username;
        self
    }

    pub(crate) fn is_admin(&self, user: Option<&User>) -> bool {
        user.and_then(|u| u.username.as_deref())
            .is_some_and(|name| self.admins.contains(name))
    }

    /// Long-poll Telegram until `shutdown` flips, handling each update on
    /// its own task.
    pub fn spawn_poller(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(bot = ?self.bot_username, "Polling Telegram for updates");
            let mut offset: Option<i64> = None;
            loop {
                let updates = tokio::select! {
                    res = self.telegram.get_updates(offset) => res,
                    _ = shutdown.changed() => {
                        info!("Update poller shutting down");
                        return;
                    }
                };

                match updates {
                    Ok(updates) => {
                        for update in updates {
                            offset = Some(update.update_id + 1);
                            let bot = Arc::clone(&self);
                            tokio::spawn(async move { bot.handle_update(update).await });
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to fetch updates");
                        tokio::select! {
                            () = tokio::time::sleep(POLL_RETRY_DELAY) => {}
                            _ = shutdown.changed() => {
                                debug!("Update poller shutting down during backoff");
                                return;
                            }
                        }
                    }
                }
            }
        })
    }
}

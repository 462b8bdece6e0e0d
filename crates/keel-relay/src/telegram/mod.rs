//! Telegram Bot API integration.

mod client;
pub mod types;


pub use client::{MAX_MESSAGE_LEN, TelegramClient, TelegramError, split_html, split_message};
pub use types::{CallbackQuery, Chat, Message, Update, User};

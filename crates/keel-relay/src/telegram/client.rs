//! Telegram Bot API client.
//!
//! Thin reqwest wrapper over the handful of Bot API methods the relay uses.
//! Every call is a JSON `POST` to `<api_url>/bot<token>/<method>`.

use std::time::Duration;

use keel_relay_core::config::TelegramConfig;
use keel_relay_core::{ChatId, MessageId};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use super::types::{
    AnswerCallbackQueryRequest, ApiResponse, EditMessageTextRequest, GetUpdatesRequest,
    InlineKeyboardMarkup, Message, ReplyParameters, SendMessageRequest, Update, User,
};
use crate::render::ActionMenu;
use crate::sync::{ChatDelivery, MessageRef};

/// Telegram rejects longer message texts.
pub const MAX_MESSAGE_LEN: usize = 4096;
/// Telegram rejects longer callback answers.
const MAX_CALLBACK_ANSWER_LEN: usize = 200;
/// Slack on top of the long-poll timeout before reqwest gives up.
const POLL_GRACE: Duration = Duration::from_secs(10);
const PARSE_MODE_HTML: &str = "HTML";
/// Longest entity looked for when splitting HTML, e.g. `&#128512;`.
const MAX_ENTITY_LEN: usize = 10;

/// Telegram API client errors.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram API error ({code}): {description}")]
    Api {
        code: u16,
        description: String,
        retry_after: Option<u64>,
    },

    #[error("Failed to decode Telegram response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TelegramError {
    /// Failures that will not go away by retrying the same call: the message
    /// is gone or too old to edit, the chat does not exist, or the bot was
    /// blocked or removed. Rate limits, server errors and network problems
    /// are transient.
    pub const fn is_permanent(&self) -> bool {
        match self {
            Self::Api { code, .. } => matches!(*code, 400 | 403 | 404),
            Self::Config(_) => true,
            Self::Http(_) | Self::Decode(_) => false,
        }
    }

    /// Telegram answers an edit with identical content with a 400.
    pub fn is_not_modified(&self) -> bool {
        matches!(self, Self::Api { code: 400, description, .. }
            if description.contains("message is not modified"))
    }
}

/// Telegram Bot API client.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    poll_timeout_secs: u64,
}

impl TelegramClient {
    /// Create a new client for the configured bot.
    pub fn new(config: &TelegramConfig) -> Result<Self, TelegramError> {
        if config.bot_token.is_empty() {
            return Err(TelegramError::Config("bot_token is empty".into()));
        }
        if config.api_url.is_empty() {
            return Err(TelegramError::Config("api_url is empty".into()));
        }

        // reqwest is built with rustls-no-provider; `Err` means already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        let base_url = format!(
            "{}/bot{}",
            config.api_url.trim_end_matches('/'),
            config.bot_token
        );
        Ok(Self {
            http,
            base_url,
            poll_timeout_secs: config.poll_timeout_secs,
        })
    }

    pub(crate) fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }

    /// Invoke a Bot API method and unwrap the response envelope.
    async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, TelegramError>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        self.call_with_timeout(method, params, None).await
    }

    /// [`Self::call`] with a per-request timeout replacing the client default.
    ///
    /// Transport errors are stripped of their URL, which embeds the bot token.
    async fn call_with_timeout<P, R>(
        &self,
        method: &str,
        params: &P,
        timeout: Option<Duration>,
    ) -> Result<R, TelegramError>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        let mut request = self.http.post(self.method_url(method)).json(params);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let resp = request.send().await.map_err(redact_url)?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(redact_url)?;

        let envelope: ApiResponse<R> = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => {
                return Err(TelegramError::Decode(format!("{method}: {e}")));
            }
            Err(_) => {
                return Err(TelegramError::Api {
                    code: status.as_u16(),
                    description: String::from_utf8_lossy(&body).trim().to_string(),
                    retry_after: None,
                });
            }
        };

        if !envelope.ok {
            let err = TelegramError::Api {
                code: envelope.error_code.unwrap_or_else(|| status.as_u16()),
                description: envelope.description.unwrap_or_default(),
                retry_after: envelope.parameters.and_then(|p| p.retry_after),
            };
            debug!(method, error = %err, "Telegram call failed");
            return Err(err);
        }
        envelope
            .result
            .ok_or_else(|| TelegramError::Decode(format!("{method}: missing result")))
    }

    /// Identity of the bot, used to recognise `/command@botname`.
    pub async fn get_me(&self) -> Result<User, TelegramError> {
        self.call("getMe", &serde_json::json!({})).await
    }

    /// Send an HTML message, optionally with buttons and as a reply.
    pub async fn send_html(
        &self,
        chat_id: ChatId,
        text: &str,
        menu: &ActionMenu,
        reply_to: Option<MessageId>,
    ) -> Result<Message, TelegramError> {
        self.send(chat_id, text, Some(PARSE_MODE_HTML), menu, reply_to)
            .await
    }

    /// Send plain text as a reply.
    pub async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<Message, TelegramError> {
        self.send(chat_id, text, None, &ActionMenu::empty(), reply_to)
            .await
    }

    async fn send(
        &self,
        chat_id: ChatId,
        text: &str,
        parse_mode: Option<&str>,
        menu: &ActionMenu,
        reply_to: Option<MessageId>,
    ) -> Result<Message, TelegramError> {
        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode,
            reply_markup: (!menu.is_empty()).then(|| InlineKeyboardMarkup::from(menu)),
            reply_parameters: reply_to.map(|message_id| ReplyParameters {
                message_id,
                allow_sending_without_reply: true,
            }),
        };
        self.call("sendMessage", &request).await
    }

    /// Replace the text and buttons of a message. Editing to identical
    /// content succeeds.
    pub async fn edit_html(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        menu: &ActionMenu,
    ) -> Result<(), TelegramError> {
        let request = EditMessageTextRequest {
            chat_id,
            message_id,
            text,
            parse_mode: PARSE_MODE_HTML,
            reply_markup: InlineKeyboardMarkup::from(menu),
        };
        match self
            .call::<_, serde_json::Value>("editMessageText", &request)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_modified() => {
                debug!(chat_id, message_id, "Message already up to date");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Acknowledge a button click, optionally showing `text` to the user.
    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), TelegramError> {
        let text = text.map(|t| truncate_chars(t, MAX_CALLBACK_ANSWER_LEN));
        let request = AnswerCallbackQueryRequest {
            callback_query_id,
            text,
        };
        let _: bool = self.call("answerCallbackQuery", &request).await?;
        Ok(())
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>, TelegramError> {
        let request = GetUpdatesRequest {
            offset,
            timeout: self.poll_timeout_secs,
            allowed_updates: &["message", "callback_query"],
        };
        let timeout = Duration::from_secs(self.poll_timeout_secs) + POLL_GRACE;
        let updates: Vec<Update> = self
            .call_with_timeout("getUpdates", &request, Some(timeout))
            .await?;
        if !updates.is_empty() {
            debug!(count = updates.len(), ?offset, "Received updates");
        }
        Ok(updates)
    }
}

impl ChatDelivery for TelegramClient {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        menu: &ActionMenu,
    ) -> Result<MessageRef, TelegramError> {
        let message = self.send_html(chat_id, text, menu, None).await?;
        Ok(MessageRef {
            chat_id: message.chat.id,
            message_id: message.message_id,
        })
    }

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        menu: &ActionMenu,
    ) -> Result<(), TelegramError> {
        self.edit_html(chat_id, message_id, text, menu).await
    }
}

fn redact_url(err: reqwest::Error) -> TelegramError {
    TelegramError::Http(err.without_url())
}

/// Cut `text` to at most `max` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => {
            warn!(len = text.chars().count(), max, "Truncating text");
            &text[..idx]
        }
        None => text,
    }
}

/// Split `text` into chunks Telegram accepts, breaking on line boundaries
/// where possible.
pub fn split_message(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > max && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > max {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Split Telegram HTML into chunks of at most `max` characters.
///
/// Breaks on line boundaries like [`split_message`]. An over-long line is
/// never cut inside a tag or an entity, and tags still open at a cut are
/// closed at the end of the chunk and re-opened at the start of the next.
pub fn split_html(text: &str, max: usize) -> Vec<String> {
    let mut splitter = HtmlSplitter::new(max);
    for line in text.split_inclusive('\n') {
        splitter.push_line(line);
    }
    splitter.finish()
}

struct HtmlSplitter {
    max: usize,
    chunks: Vec<String>,
    current: String,
    current_len: usize,
    /// Length of the re-opened tags `current` starts with.
    prefix_len: usize,
    /// Tags open at the end of `current`, outermost first: (name, opening tag).
    open: Vec<(String, String)>,
}

impl HtmlSplitter {
    const fn new(max: usize) -> Self {
        Self {
            max,
            chunks: Vec::new(),
            current: String::new(),
            current_len: 0,
            prefix_len: 0,
            open: Vec::new(),
        }
    }

    const fn has_content(&self) -> bool {
        self.current_len > self.prefix_len
    }

    fn fits(&self, len: usize, open_after: &[(String, String)]) -> bool {
        self.current_len + len + closing_len(open_after) <= self.max
    }

    fn push_line(&mut self, line: &str) {
        let len = line.chars().count();
        let mut after = self.open.clone();
        for atom in html_atoms(line) {
            track_tag(&mut after, atom);
        }
        if !self.fits(len, &after) && self.has_content() {
            self.flush();
        }
        if self.fits(len, &after) {
            self.current.push_str(line);
            self.current_len += len;
            self.open = after;
            return;
        }
        for atom in html_atoms(line) {
            self.push_atom(atom);
        }
    }

    fn push_atom(&mut self, atom: &str) {
        let len = atom.chars().count();
        let mut after = self.open.clone();
        track_tag(&mut after, atom);
        if !self.fits(len, &after) && self.has_content() {
            self.flush();
        }
        self.current.push_str(atom);
        self.current_len += len;
        self.open = after;
    }

    fn flush(&mut self) {
        let mut chunk = std::mem::take(&mut self.current);
        for (name, _) in self.open.iter().rev() {
            chunk.push_str("</");
            chunk.push_str(name);
            chunk.push('>');
        }
        self.chunks.push(chunk);

        self.current = self.open.iter().map(|(_, tag)| tag.as_str()).collect();
        self.current_len = self.current.chars().count();
        self.prefix_len = self.current_len;
    }

    fn finish(mut self) -> Vec<String> {
        if self.has_content() {
            self.chunks.push(self.current);
        }
        self.chunks
    }
}

fn closing_len(open: &[(String, String)]) -> usize {
    open.iter().map(|(name, _)| name.chars().count() + 3).sum()
}

/// Indivisible pieces of HTML text: whole tags, whole entities, single chars.
fn html_atoms(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        let first = rest.chars().next()?;
        let end = match first {
            '<' => rest.find('>').map_or(1, |i| i + 1),
            '&' => rest
                .char_indices()
                .take(MAX_ENTITY_LEN)
                .take_while(|(_, c)| !c.is_whitespace())
                .find(|&(_, c)| c == ';')
                .map_or(1, |(i, _)| i + 1),
            c => c.len_utf8(),
        };
        let (atom, tail) = rest.split_at(end);
        rest = tail;
        Some(atom)
    })
}

/// Update the open-tag stack for `atom` if it is a tag.
fn track_tag(open: &mut Vec<(String, String)>, atom: &str) {
    let Some(inner) = atom
        .strip_prefix('<')
        .and_then(|a| a.strip_suffix('>'))
    else {
        return;
    };
    if let Some(name) = inner.strip_prefix('/') {
        let name = name.trim();
        if let Some(pos) = open.iter().rposition(|(n, _)| n == name) {
            open.truncate(pos);
        }
        return;
    }
    if let Some(name) = inner.split_whitespace().next()
        && !inner.ends_with('/')
    {
        open.push((name.to_string(), atom.to_string()));
    }
}

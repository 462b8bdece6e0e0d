//! Configuration resolution for the relay.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. TOML config file (explicit path, or `<config_dir>/keel-telegram-relay/config.toml`)
//! 3. Environment variables (`KEEL_RELAY_*`)
//!
//! CLI flags are applied by the binary on top of the result.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ChatId;
use crate::error::{Error, Result};
use crate::filters::FilterRule;

const REDACTED: &str = "********";

/// Complete relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub telegram: TelegramConfig,
    pub keel: KeelConfig,
    pub monitor: MonitorConfig,
    pub webhook: WebhookConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            telegram: TelegramConfig::default(),
            keel: KeelConfig::default(),
            monitor: MonitorConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub api_url: String,
    /// Usernames (without `@`) allowed to use the bot.
    pub admin_usernames: Vec<String>,
    /// Chats that receive notifications and may issue commands.
    pub chat_ids: Vec<ChatId>,
    pub filters: Vec<FilterRule>,
    /// Long-poll timeout for `getUpdates`.
    pub poll_timeout_secs: u64,
    /// Timeout for every other Bot API call.
    pub timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_url: "https://api.telegram.org".to_string(),
            admin_usernames: Vec::new(),
            chat_ids: Vec::new(),
            filters: Vec::new(),
            poll_timeout_secs: 30,
            timeout_secs: 5,
        }
    }
}

impl TelegramConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Keel HTTP endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeelConfig {
    pub host: String,
    pub port: u16,
    pub ssl: bool,
    pub username: String,
    pub password: String,
    pub timeout_secs: u64,
}

impl Default for KeelConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9300,
            ssl: true,
            username: String::new(),
            password: String::new(),
            timeout_secs: 5,
        }
    }
}

impl KeelConfig {
    pub fn base_url(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Approval monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    /// Stop editing messages of archived/rejected approvals after their first
    /// successful terminal edit.
    pub skip_settled: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            skip_settled: false,
        }
    }
}

impl MonitorConfig {
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Inbound webhook server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub addr: SocketAddr,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
        }
    }
}

impl Config {
    /// Check required values and that every filter regex compiles.
    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.is_empty() {
            return Err(Error::Config("telegram.bot_token is required".into()));
        }
        if self.telegram.admin_usernames.is_empty() {
            return Err(Error::Config("telegram.admin_usernames must not be empty".into()));
        }
        if self.telegram.chat_ids.is_empty() {
            return Err(Error::Config("telegram.chat_ids must not be empty".into()));
        }
        if self.keel.host.is_empty() {
            return Err(Error::Config("keel.host is required".into()));
        }
        if self.keel.username.is_empty() || self.keel.password.is_empty() {
            return Err(Error::Config(
                "keel.username and keel.password are required".into(),
            ));
        }
        if self.telegram.timeout_secs == 0 || self.keel.timeout_secs == 0 {
            return Err(Error::Config("request timeouts must be positive".into()));
        }
        if self.monitor.interval_secs == 0 {
            return Err(Error::Config("monitor.interval_secs must be positive".into()));
        }
        for rule in &self.telegram.filters {
            rule.compile()?;
        }
        Ok(())
    }

    /// Copy of the configuration with secrets masked, safe to print.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.telegram.bot_token.is_empty() {
            copy.telegram.bot_token = REDACTED.to_string();
        }
        if !copy.keel.password.is_empty() {
            copy.keel.password = REDACTED.to_string();
        }
        copy
    }

    /// Render the redacted configuration as TOML.
    pub fn to_redacted_toml(&self) -> String {
        toml::to_string_pretty(&self.redacted())
            .unwrap_or_else(|e| format!("<failed to render config: {e}>"))
    }
}

/// Load configuration with hierarchical resolution.
///
/// An explicit `path` must exist. Without one, the default location is used
/// when present. Environment overrides are applied last. The result is not
/// validated; call [`Config::validate`].
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(p) => load_config_file(p)?,
        None => match default_config_path() {
            Some(p) if p.exists() => load_config_file(&p)?,
            _ => Config::default(),
        },
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;

    Ok(config)
}

/// Default config file location.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("keel-telegram-relay").join("config.toml"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    toml::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn split_list(val: &str) -> impl Iterator<Item = &str> {
    val.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_env<T>(key: &str, val: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    val.trim()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid {key} value '{val}': {e}")))
}

/// Apply `KEEL_RELAY_*` overrides. `lookup` resolves a variable name.
///
/// A value that does not parse is an error rather than silently ignored.
pub fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(val) = lookup("KEEL_RELAY_LOG_LEVEL") {
        config.log_level = val;
    }
    if let Some(val) = lookup("KEEL_RELAY_TELEGRAM_BOT_TOKEN") {
        config.telegram.bot_token = val;
    }
    if let Some(val) = lookup("KEEL_RELAY_TELEGRAM_ADMIN_USERNAMES") {
        config.telegram.admin_usernames = split_list(&val).map(str::to_string).collect();
    }
    if let Some(val) = lookup("KEEL_RELAY_TELEGRAM_CHAT_IDS") {
        config.telegram.chat_ids = split_list(&val)
            .map(|id| parse_env("KEEL_RELAY_TELEGRAM_CHAT_IDS", id))
            .collect::<Result<_>>()?;
    }
    if let Some(val) = lookup("KEEL_RELAY_TELEGRAM_POLL_TIMEOUT_SECS") {
        config.telegram.poll_timeout_secs =
            parse_env("KEEL_RELAY_TELEGRAM_POLL_TIMEOUT_SECS", &val)?;
    }
    if let Some(val) = lookup("KEEL_RELAY_TELEGRAM_TIMEOUT_SECS") {
        config.telegram.timeout_secs = parse_env("KEEL_RELAY_TELEGRAM_TIMEOUT_SECS", &val)?;
    }
    if let Some(val) = lookup("KEEL_RELAY_KEEL_HOST") {
        config.keel.host = val;
    }
    if let Some(val) = lookup("KEEL_RELAY_KEEL_PORT") {
        config.keel.port = parse_env("KEEL_RELAY_KEEL_PORT", &val)?;
    }
    if let Some(val) = lookup("KEEL_RELAY_KEEL_SSL") {
        config.keel.ssl = parse_env("KEEL_RELAY_KEEL_SSL", &val)?;
    }
    if let Some(val) = lookup("KEEL_RELAY_KEEL_USERNAME") {
        config.keel.username = val;
    }
    if let Some(val) = lookup("KEEL_RELAY_KEEL_PASSWORD") {
        config.keel.password = val;
    }
    if let Some(val) = lookup("KEEL_RELAY_KEEL_TIMEOUT_SECS") {
        config.keel.timeout_secs = parse_env("KEEL_RELAY_KEEL_TIMEOUT_SECS", &val)?;
    }
    if let Some(val) = lookup("KEEL_RELAY_MONITOR_INTERVAL_SECS") {
        config.monitor.interval_secs = parse_env("KEEL_RELAY_MONITOR_INTERVAL_SECS", &val)?;
    }
    if let Some(val) = lookup("KEEL_RELAY_MONITOR_SKIP_SETTLED") {
        config.monitor.skip_settled = parse_env("KEEL_RELAY_MONITOR_SKIP_SETTLED", &val)?;
    }
    if let Some(val) = lookup("KEEL_RELAY_WEBHOOK_ENABLED") {
        config.webhook.enabled = parse_env("KEEL_RELAY_WEBHOOK_ENABLED", &val)?;
    }
    if let Some(val) = lookup("KEEL_RELAY_WEBHOOK_ADDR") {
        config.webhook.addr = parse_env("KEEL_RELAY_WEBHOOK_ADDR", &val)?;
    }
    Ok(())
}

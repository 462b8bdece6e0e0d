//! Error types for the relay core library.

use thiserror::Error;

/// Result type alias using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error. Fatal, only raised during startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A chat filter rule carries a regex that does not compile.
    #[error("Invalid filter for chat {chat_id}: {pattern}: {source}")]
    InvalidFilter {
        chat_id: i64,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

use crate::message::MessageKind;

/// Core error type for the bot.
///
/// The adapter crate maps Discord API errors into this type so the core can
/// handle failures consistently (user-facing report vs placeholder vs abort).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    /// The message is a system message (boost, pin, thread marker, ...) and
    /// cannot go through the relocation pipeline.
    #[error("message of kind {0:?} cannot be relocated")]
    Ineligible(MessageKind),

    /// The final proxy send failed; the source message was left untouched.
    #[error("proxy send failed: {0}")]
    ProxySend(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Any other chat-platform failure (permissions, outages, bad payloads).
    #[error("platform error: {0}")]
    Platform(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

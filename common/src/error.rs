use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("gave up after {retries} reconnect attempts without an address")]
    RetriesExhausted { retries: u32 },
    #[error("failed to register for {class} notifications: {reason}")]
    Subscribe { class: &'static str, reason: String },
    #[error("station request failed: {0}")]
    Station(String),
    #[error("notification channel closed before an outcome was signalled")]
    ChannelClosed,
    #[error("attachment state lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind command listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("failed to accept client: {0}")]
    Accept(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to drive output: {0}")]
    Drive(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
}

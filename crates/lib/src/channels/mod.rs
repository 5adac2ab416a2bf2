//! Communication channels (Telegram).
//!
//! The [`Channel`] trait is what the router needs from a transport: send a reply and fetch an
//! uploaded file. Inbound updates arrive through the gateway webhook and are normalized into
//! [`InboundMessage`].

mod inbound;
mod telegram;

pub use inbound::{Attachment, InboundMessage};
pub use telegram::{TelegramChannel, TelegramUpdate};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("telegram bot token not configured")]
    NotConfigured,
    /// Transport failure. The URL (which carries the bot token) is stripped.
    #[error("telegram request failed: {0}")]
    Request(reqwest::Error),
    #[error("telegram api error: {0}")]
    Api(String),
    #[error("telegram returned no file path for file {0}")]
    MissingFile(String),
}

impl From<reqwest::Error> for ChannelError {
    fn from(err: reqwest::Error) -> Self {
        ChannelError::Request(err.without_url())
    }
}

/// Outbound side of a chat transport.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel id (e.g. "telegram").
    fn id(&self) -> &str;

    /// Send a text message to a conversation (e.g. Telegram chat_id).
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), ChannelError>;

    /// Fetch the bytes of an uploaded file.
    async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>, ChannelError>;
}

//! Telegram channel: webhook update parsing, sendMessage, and file download via Bot API.

use crate::channels::inbound::{Attachment, InboundMessage};
use crate::channels::{Channel, ChannelError};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
/// Telegram rejects longer messages; measured in UTF-16 code units.
const MAX_MESSAGE_UNITS: usize = 4096;
const SEND_TIMEOUT: Duration = Duration::from_secs(15);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Telegram update payload (webhook POST body).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    #[serde(default)]
    pub update_id: Option<i64>,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub edited_message: Option<TelegramMessage>,
    #[serde(default)]
    pub callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    #[serde(default)]
    pub text: Option<String>,
    /// Text sent along with a document.
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub document: Option<TelegramDocument>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TelegramDocument {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Inline button press; `data` stands in for the message text.
#[derive(Debug, Deserialize)]
pub struct TelegramCallbackQuery {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

impl TelegramUpdate {
    /// Normalize the first present message-like object (message, edited message, callback).
    /// None when the update carries none of them.
    pub fn into_inbound(self) -> Option<InboundMessage> {
        if let Some(msg) = self.message.or(self.edited_message) {
            return Some(message_to_inbound(msg));
        }
        let callback = self.callback_query?;
        let msg = callback.message?;
        Some(InboundMessage {
            conversation_id: msg.chat.id.to_string(),
            text: callback.data.unwrap_or_default(),
            attachment: None,
        })
    }
}

fn message_to_inbound(msg: TelegramMessage) -> InboundMessage {
    let attachment = msg.document.map(|d| Attachment {
        file_name: d.file_name.unwrap_or_else(|| d.file_id.clone()),
        file_id: d.file_id,
        mime_type: d.mime_type,
    });
    InboundMessage {
        conversation_id: msg.chat.id.to_string(),
        text: msg.text.or(msg.caption).unwrap_or_default(),
        attachment,
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramFile {
    #[serde(default)]
    file_path: Option<String>,
}

/// Telegram Bot API client.
pub struct TelegramChannel {
    id: String,
    token: Option<String>,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(token: Option<String>, api_base: Option<String>) -> Self {
        let api_base = api_base
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| TELEGRAM_API_BASE.to_string());
        Self {
            id: "telegram".to_string(),
            token,
            api_base,
            client: reqwest::Client::new(),
        }
    }

    fn token(&self) -> Result<&str, ChannelError> {
        self.token.as_deref().ok_or(ChannelError::NotConfigured)
    }

    /// Send a text message to a chat via sendMessage (form fields chat_id, text).
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let token = self.token()?;
        let url = format!("{}/bot{}/sendMessage", self.api_base, token);
        let text = clamp_message(text);
        let res = self
            .client
            .post(&url)
            .timeout(SEND_TIMEOUT)
            .form(&[("chat_id", chat_id), ("text", text.as_str())])
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ChannelError::Api(format!("sendMessage failed: {} {}", status, body)));
        }
        Ok(())
    }

    /// Resolve a file id to its download path (getFile).
    pub async fn get_file_path(&self, file_id: &str) -> Result<String, ChannelError> {
        let token = self.token()?;
        let url = format!("{}/bot{}/getFile", self.api_base, token);
        let res = self
            .client
            .get(&url)
            .query(&[("file_id", file_id)])
            .timeout(SEND_TIMEOUT)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ChannelError::Api(format!("getFile failed: {} {}", status, body)));
        }
        let data: ApiResponse<TelegramFile> = res.json().await?;
        if !data.ok {
            return Err(ChannelError::Api(
                data.description
                    .unwrap_or_else(|| "getFile returned ok: false".to_string()),
            ));
        }
        data.result
            .and_then(|f| f.file_path)
            .ok_or_else(|| ChannelError::MissingFile(file_id.to_string()))
    }

    /// Download a file by the path returned from getFile.
    pub async fn download_file(&self, file_path: &str) -> Result<Vec<u8>, ChannelError> {
        let token = self.token()?;
        let url = format!("{}/file/bot{}/{}", self.api_base, token, file_path);
        let res = self
            .client
            .get(&url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            return Err(ChannelError::Api(format!("file download failed: {}", status)));
        }
        Ok(res.bytes().await?.to_vec())
    }
}

/// Cut text to Telegram's message limit.
fn clamp_message(text: &str) -> String {
    if text.encode_utf16().count() <= MAX_MESSAGE_UNITS {
        return text.to_string();
    }
    let mut out = String::new();
    let mut units = 0;
    for c in text.chars() {
        units += c.len_utf16();
        if units > MAX_MESSAGE_UNITS - 1 {
            break;
        }
        out.push(c);
    }
    out.push('…');
    out
}

#[async_trait]
impl Channel for TelegramChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), ChannelError> {
        TelegramChannel::send_message(self, conversation_id, text).await
    }

    async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>, ChannelError> {
        let path = self.get_file_path(&attachment.file_id).await?;
        self.download_file(&path).await
    }
}

//! Inbound message from a channel, normalized for the router.

/// Uploaded file reference. The bytes are fetched from the channel on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_id: String,
    /// Declared file name (decides the spreadsheet format).
    pub file_name: String,
    pub mime_type: Option<String>,
}

/// One delivery from a channel. Text may be empty when only a file was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub conversation_id: String,
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl InboundMessage {
    pub fn from_text(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            text: text.into(),
            attachment: None,
        }
    }
}

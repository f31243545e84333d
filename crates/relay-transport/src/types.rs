use serde::Serialize;
use std::fmt;

/// Numeric chat identifier.
pub type ChatId = i64;

/// A configured target: numeric id (`-1001234567890`) or handle (`@group`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum ChannelRef {
    Id(ChatId),
    Handle(String),
}

impl ChannelRef {
    /// Anything that parses as a signed 64-bit integer is an id.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<ChatId>() {
            Ok(id) => Self::Id(id),
            Err(_) => Self::Handle(raw.to_string()),
        }
    }

    /// Canonical key used by the ledger and prefix map.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Handle(handle) => f.write_str(handle),
        }
    }
}

impl From<&str> for ChannelRef {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<ChatId> for ChannelRef {
    fn from(id: ChatId) -> Self {
        Self::Id(id)
    }
}

/// Reference to a message that exists on the messaging service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub chat_id: ChatId,
    pub message_id: i64,
}

/// Metadata of a resolved chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChatId,
    pub title: String,
}

/// A message observed on a subscribed chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    pub message_id: i64,
    /// Id of the message this one replies to, if any.
    pub reply_to_id: Option<i64>,
    /// Authored by a bot account.
    pub is_automated_sender: bool,
    /// Handle for forwarding this message.
    pub handle: MessageHandle,
}

impl InboundMessage {
    pub fn new(chat_id: ChatId, message_id: i64) -> Self {
        Self {
            chat_id,
            message_id,
            reply_to_id: None,
            is_automated_sender: false,
            handle: MessageHandle {
                chat_id,
                message_id,
            },
        }
    }

    pub fn replying_to(mut self, message_id: i64) -> Self {
        self.reply_to_id = Some(message_id);
        self
    }

    pub fn from_bot(mut self) -> Self {
        self.is_automated_sender = true;
        self
    }
}

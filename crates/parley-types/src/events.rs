use serde::{Deserialize, Serialize};

use crate::{ChatId, MessageId, UserId};

/// Events sent FROM client TO server over the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundEvent {
    /// Plain text message
    Message { chat_id: ChatId, text: String },

    /// Reference to a file that was uploaded out of band
    File {
        chat_id: ChatId,
        file_url: String,
        #[serde(default)]
        file_name: String,
    },

    /// Set (or replace) the sender's reaction on a message
    Reaction {
        chat_id: ChatId,
        message_id: MessageId,
        emoji: String,
    },
}

impl InboundEvent {
    pub fn chat_id(&self) -> ChatId {
        match self {
            Self::Message { chat_id, .. }
            | Self::File { chat_id, .. }
            | Self::Reaction { chat_id, .. } => *chat_id,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Message { .. } => EventKind::Message,
            Self::File { .. } => EventKind::File,
            Self::Reaction { .. } => EventKind::Reaction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Message,
    File,
    Reaction,
}

/// One user's reaction on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEntry {
    pub user_id: UserId,
    pub emoji: String,
}

/// Broadcast payload sent FROM server TO every online chat member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub sent_at: String,
    pub chat_id: ChatId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    /// Full reaction set of the target message, never a delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactions: Option<Vec<ReactionEntry>>,
}

impl OutboundEvent {
    fn base(kind: EventKind, chat_id: ChatId, sender_id: UserId, username: &str, sent_at: &str) -> Self {
        Self {
            kind,
            sender_id,
            username: Some(username.to_string()),
            text: None,
            sent_at: sent_at.to_string(),
            chat_id,
            file_url: None,
            file_name: None,
            message_id: None,
            emoji: None,
            reactions: None,
        }
    }

    pub fn message(chat_id: ChatId, sender_id: UserId, username: &str, text: String, sent_at: &str) -> Self {
        Self {
            text: Some(text),
            ..Self::base(EventKind::Message, chat_id, sender_id, username, sent_at)
        }
    }

    pub fn file(
        chat_id: ChatId,
        sender_id: UserId,
        username: &str,
        file_url: String,
        file_name: String,
        sent_at: &str,
    ) -> Self {
        Self {
            file_url: Some(file_url),
            file_name: Some(file_name),
            ..Self::base(EventKind::File, chat_id, sender_id, username, sent_at)
        }
    }

    pub fn reaction(
        chat_id: ChatId,
        sender_id: UserId,
        username: &str,
        message_id: MessageId,
        emoji: String,
        reactions: Option<Vec<ReactionEntry>>,
        sent_at: &str,
    ) -> Self {
        Self {
            message_id: Some(message_id),
            emoji: Some(emoji),
            reactions,
            ..Self::base(EventKind::Reaction, chat_id, sender_id, username, sent_at)
        }
    }
}

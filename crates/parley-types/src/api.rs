use serde::{Deserialize, Serialize};

use crate::events::{EventKind, ReactionEntry};
use crate::{ChatId, MessageId, UserId};

// -- JWT Claims --

/// JWT claims shared by parley-api (REST middleware) and parley-gateway
/// (WebSocket handshake).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: UserId,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: UserId,
    pub username: String,
    pub token: String,
}

// -- Chats --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePrivateChatRequest {
    pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupChatRequest {
    pub name: String,
    #[serde(default)]
    pub member_ids: Vec<UserId>,
}

/// One row of chat history. File messages are split back out of the
/// sentinel-prefixed text column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub username: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    pub sent_at: String,
    pub reactions: Vec<ReactionEntry>,
}

// -- Users and contacts --

/// Partial profile update. Absent fields are left unchanged; an empty
/// `nickname` clears it.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Add a contact by username or nickname.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddContactRequest {
    pub username: String,
}

// -- Reactions and read state --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddReactionRequest {
    pub emoji: String,
}

// -- Keys --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePublicKeyRequest {
    pub public_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackfillResponse {
    pub generated: usize,
    pub failed: usize,
}

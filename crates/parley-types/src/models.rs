use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ChatId, UserId};

/// Prefix on the `messages.text` column marking a file message.
/// The remainder of the column is the file URL.
pub const FILE_SENTINEL: &str = "[file]";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub name: String,
    pub is_group: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Only present on the caller's own profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub created_at: String,
}

/// A user as seen in contact lists and search results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    pub is_contact: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCount {
    pub chat_id: ChatId,
    pub count: u64,
}

/// A user's registered public key. Only the public half ever reaches the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserKeyRecord {
    pub user_id: UserId,
    pub public_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatParticipantKey {
    pub user_id: UserId,
    pub username: String,
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEncryptionStatus {
    pub chat_id: ChatId,
    pub total_members: usize,
    pub members_with_keys: usize,
    pub encryption_enabled: bool,
    pub encryption_percentage: f64,
}

impl ChatEncryptionStatus {
    pub fn new(chat_id: ChatId, total_members: usize, members_with_keys: usize) -> Self {
        let encryption_percentage = if total_members == 0 {
            0.0
        } else {
            members_with_keys as f64 / total_members as f64 * 100.0
        };

        Self {
            chat_id,
            total_members,
            members_with_keys,
            encryption_enabled: total_members > 0 && members_with_keys == total_members,
            encryption_percentage,
        }
    }
}

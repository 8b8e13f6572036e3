//! Database row types. These map directly to SQLite rows.
//! Distinct from parley-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub email: String,
    pub nickname: Option<String>,
    pub created_at: String,
}

/// A user row joined against the searcher's contact list.
pub struct UserSummaryRow {
    pub id: i64,
    pub username: String,
    pub nickname: Option<String>,
    pub is_contact: bool,
}

pub struct ChatRow {
    pub id: i64,
    pub name: String,
    pub is_group: bool,
}

pub struct MessageRow {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: i64,
    pub sender_username: String,
    pub text: String,
    pub sent_at: String,
}

pub struct ReactionRow {
    pub message_id: i64,
    pub user_id: i64,
    pub emoji: String,
    pub reacted_at: String,
}

pub struct UnreadRow {
    pub chat_id: i64,
    pub count: i64,
}

use std::sync::Arc;

use anyhow::{Result, anyhow};

use parley_db::Database;
use parley_types::events::ReactionEntry;
use parley_types::{ChatId, MessageId, UserId};

/// Everything the hub needs from storage: membership and user lookup,
/// plus message and reaction persistence. Calls are blocking.
pub trait ChatBackend: Send + Sync + 'static {
    fn chat_members(&self, chat_id: ChatId) -> Result<Vec<UserId>>;

    fn is_member(&self, chat_id: ChatId, user_id: UserId) -> Result<bool>;

    fn username(&self, user_id: UserId) -> Result<Option<String>>;

    fn insert_message(&self, chat_id: ChatId, sender_id: UserId, text: &str, sent_at: &str) -> Result<MessageId>;

    /// The chat that owns `message_id`, if the message exists.
    fn message_chat(&self, message_id: MessageId) -> Result<Option<ChatId>>;

    fn upsert_reaction(&self, message_id: MessageId, user_id: UserId, emoji: &str, reacted_at: &str) -> Result<()>;

    fn reactions(&self, message_id: MessageId) -> Result<Vec<ReactionEntry>>;
}

pub type SharedBackend = Arc<dyn ChatBackend>;

impl ChatBackend for Database {
    fn chat_members(&self, chat_id: ChatId) -> Result<Vec<UserId>> {
        self.get_chat_members(chat_id)
    }

    fn is_member(&self, chat_id: ChatId, user_id: UserId) -> Result<bool> {
        self.is_chat_member(chat_id, user_id)
    }

    fn username(&self, user_id: UserId) -> Result<Option<String>> {
        self.get_username_by_id(user_id)
    }

    fn insert_message(&self, chat_id: ChatId, sender_id: UserId, text: &str, sent_at: &str) -> Result<MessageId> {
        Database::insert_message(self, chat_id, sender_id, text, sent_at)
    }

    fn message_chat(&self, message_id: MessageId) -> Result<Option<ChatId>> {
        self.get_message_chat(message_id)
    }

    fn upsert_reaction(&self, message_id: MessageId, user_id: UserId, emoji: &str, reacted_at: &str) -> Result<()> {
        Database::upsert_reaction(self, message_id, user_id, emoji, reacted_at)
    }

    fn reactions(&self, message_id: MessageId) -> Result<Vec<ReactionEntry>> {
        Ok(self
            .get_reactions(message_id)?
            .into_iter()
            .map(|r| ReactionEntry {
                user_id: r.user_id,
                emoji: r.emoji,
            })
            .collect())
    }
}

/// Run a blocking backend call off the async runtime.
pub(crate) async fn run_blocking<T, F>(backend: &SharedBackend, f: F) -> Result<T>
where
    F: FnOnce(&dyn ChatBackend) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let backend = backend.clone();
    tokio::task::spawn_blocking(move || f(backend.as_ref()))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
}

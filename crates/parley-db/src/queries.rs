use crate::models::{ChatRow, MessageRow, ReactionRow, UnreadRow, UserRow};
use crate::Database;
use anyhow::{Result, anyhow};
use rusqlite::Connection;

impl Database {
    // -- Users --

    /// Insert a user and return the new id.
    pub fn create_user(&self, username: &str, password_hash: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, password) VALUES (?1, ?2)",
                (username, password_hash),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username = ?1", username))
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", id))
    }

    pub fn get_username_by_id(&self, id: i64) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT username FROM users WHERE id = ?1", [id], |row| row.get(0))
                .optional()
        })
    }

    // -- Chats --

    /// Return the existing private chat between two users, or create it.
    pub fn create_private_chat(&self, user_a: i64, user_b: i64) -> Result<ChatRow> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let existing: Option<i64> = tx
                .query_row(
                    "SELECT c.id FROM chats c
                     JOIN chat_members m1 ON m1.chat_id = c.id AND m1.user_id = ?1
                     JOIN chat_members m2 ON m2.chat_id = c.id AND m2.user_id = ?2
                     WHERE c.is_group = 0
                     LIMIT 1",
                    [user_a, user_b],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(id) = existing {
                return Ok(ChatRow {
                    id,
                    name: String::new(),
                    is_group: false,
                });
            }

            tx.execute("INSERT INTO chats (name, is_group) VALUES ('', 0)", [])?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "INSERT OR IGNORE INTO chat_members (chat_id, user_id) VALUES (?1, ?2), (?1, ?3)",
                [id, user_a, user_b],
            )?;
            tx.commit()?;

            Ok(ChatRow {
                id,
                name: String::new(),
                is_group: false,
            })
        })
    }

    /// Create a named group chat. The creator is always a member.
    pub fn create_group_chat(&self, name: &str, creator_id: i64, member_ids: &[i64]) -> Result<ChatRow> {
        if name.trim().is_empty() {
            return Err(anyhow!("Group name is required"));
        }

        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("INSERT INTO chats (name, is_group) VALUES (?1, 1)", [name])?;
            let id = tx.last_insert_rowid();

            {
                let mut stmt =
                    tx.prepare("INSERT OR IGNORE INTO chat_members (chat_id, user_id) VALUES (?1, ?2)")?;
                for member in std::iter::once(&creator_id).chain(member_ids) {
                    stmt.execute([id, *member])?;
                }
            }
            tx.commit()?;

            Ok(ChatRow {
                id,
                name: name.to_string(),
                is_group: true,
            })
        })
    }

    pub fn get_user_chats(&self, user_id: i64) -> Result<Vec<ChatRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.name, c.is_group FROM chats c
                 JOIN chat_members m ON m.chat_id = c.id
                 WHERE m.user_id = ?1
                 ORDER BY c.id DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ChatRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        is_group: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn get_chat_members(&self, chat_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT user_id FROM chat_members WHERE chat_id = ?1 ORDER BY user_id")?;
            let rows = stmt
                .query_map([chat_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            Ok(rows)
        })
    }

    pub fn is_chat_member(&self, chat_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM chat_members WHERE chat_id = ?1 AND user_id = ?2)",
                [chat_id, user_id],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    // -- Messages --

    /// Insert a message row and return its id.
    pub fn insert_message(&self, chat_id: i64, sender_id: i64, text: &str, sent_at: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (chat_id, sender_id, text, sent_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![chat_id, sender_id, text, sent_at],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// The chat a message was posted in, or `None` if no such message exists.
    pub fn get_message_chat(&self, message_id: i64) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT chat_id FROM messages WHERE id = ?1", [message_id], |row| row.get(0))
                .optional()
        })
    }

    /// Newest-first page of a chat's messages.
    pub fn get_messages(&self, chat_id: i64, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, chat_id, limit))
    }

    // -- Reactions --

    /// One reaction per (message, user): a second reaction replaces the first.
    pub fn upsert_reaction(&self, message_id: i64, user_id: i64, emoji: &str, reacted_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO message_reactions (message_id, user_id, emoji, reacted_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(message_id, user_id)
                 DO UPDATE SET emoji = excluded.emoji, reacted_at = excluded.reacted_at",
                rusqlite::params![message_id, user_id, emoji, reacted_at],
            )?;
            Ok(())
        })
    }

    pub fn get_reactions(&self, message_id: i64) -> Result<Vec<ReactionRow>> {
        self.get_reactions_for_messages(&[message_id])
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn get_reactions_for_messages(&self, message_ids: &[i64]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, user_id, emoji, reacted_at FROM message_reactions
                 WHERE message_id IN ({})
                 ORDER BY reacted_at, user_id",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(message_ids), |row| {
                    Ok(ReactionRow {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                        emoji: row.get(2)?,
                        reacted_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Read markers --

    /// Move the user's read marker to the newest message in the chat.
    /// Returns the new marker, or `None` if the chat has no messages yet.
    pub fn mark_chat_read(&self, user_id: i64, chat_id: i64) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let newest: Option<String> = conn.query_row(
                "SELECT MAX(sent_at) FROM messages WHERE chat_id = ?1",
                [chat_id],
                |row| row.get(0),
            )?;

            if let Some(last_read) = &newest {
                conn.execute(
                    "INSERT INTO chat_reads (user_id, chat_id, last_read) VALUES (?1, ?2, ?3)
                     ON CONFLICT(user_id, chat_id) DO UPDATE SET last_read = excluded.last_read",
                    rusqlite::params![user_id, chat_id, last_read],
                )?;
            }
            Ok(newest)
        })
    }

    /// Per-chat count of messages from others newer than the user's read
    /// marker. Chats with nothing unread are omitted.
    pub fn get_unread_counts(&self, user_id: i64) -> Result<Vec<UnreadRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.chat_id, COUNT(*) FROM messages m
                 JOIN chat_members cm ON cm.chat_id = m.chat_id AND cm.user_id = ?1
                 LEFT JOIN chat_reads cr ON cr.chat_id = m.chat_id AND cr.user_id = ?1
                 WHERE m.sender_id != ?1
                   AND (cr.last_read IS NULL OR m.sent_at > cr.last_read)
                 GROUP BY m.chat_id
                 ORDER BY m.chat_id",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(UnreadRow {
                        chat_id: row.get(0)?,
                        count: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_user<P: rusqlite::ToSql>(conn: &Connection, predicate: &str, value: P) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, password, email, nickname, created_at FROM users WHERE {}",
        predicate
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                email: row.get(3)?,
                nickname: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_messages(conn: &Connection, chat_id: i64, limit: u32) -> Result<Vec<MessageRow>> {
    // JOIN users to fetch the sender's username in a single query
    let mut stmt = conn.prepare(
        "SELECT m.id, m.chat_id, m.sender_id, u.username, m.text, m.sent_at
         FROM messages m
         LEFT JOIN users u ON m.sender_id = u.id
         WHERE m.chat_id = ?1
         ORDER BY m.sent_at DESC, m.id DESC
         LIMIT ?2",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![chat_id, limit], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                chat_id: row.get(1)?,
                sender_id: row.get(2)?,
                sender_username: row.get::<_, Option<String>>(3)?.unwrap_or_else(|| "unknown".to_string()),
                text: row.get(4)?,
                sent_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

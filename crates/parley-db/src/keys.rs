//! Per-user public key storage.
//!
//! Only public keys are ever stored. Keys are validated structurally before
//! any write, so a rejected key never creates or touches a row.

use anyhow::Result;
use thiserror::Error;
use tracing::{info, warn};

use parley_crypto::{CryptoError, KeyPair, validate_public_key};
use parley_types::models::{ChatEncryptionStatus, ChatParticipantKey, UserKeyRecord};

use crate::queries::OptionalExt;
use crate::{Database, now_timestamp, parse_timestamp};

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("invalid public key: {0}")]
    InvalidKey(#[from] CryptoError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Outcome of one backfill run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    pub generated: usize,
    pub failed: usize,
}

impl Database {
    /// Upsert a user's public key. `created_at` survives updates.
    pub fn save_user_key(&self, user_id: i64, public_key: &str) -> Result<(), KeyStoreError> {
        validate_public_key(public_key)?;

        let now = now_timestamp();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_keys (user_id, public_key, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(user_id)
                 DO UPDATE SET public_key = excluded.public_key, updated_at = excluded.updated_at",
                rusqlite::params![user_id, public_key, now],
            )?;
            Ok(())
        })?;

        Ok(())
    }

    pub fn get_user_key(&self, user_id: i64) -> Result<Option<UserKeyRecord>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT user_id, public_key, created_at, updated_at FROM user_keys WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
        })?;

        row.map(|(user_id, public_key, created_at, updated_at)| {
            Ok(UserKeyRecord {
                user_id,
                public_key,
                created_at: parse_timestamp(&created_at)?,
                updated_at: parse_timestamp(&updated_at)?,
            })
        })
        .transpose()
    }

    pub fn user_has_key(&self, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM user_keys WHERE user_id = ?1)",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    /// Returns true if a key was removed.
    pub fn delete_user_key(&self, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM user_keys WHERE user_id = ?1", [user_id])?;
            Ok(removed > 0)
        })
    }

    pub fn users_without_keys(&self) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id FROM users u
                 LEFT JOIN user_keys k ON k.user_id = u.id
                 WHERE k.user_id IS NULL
                 ORDER BY u.id",
            )?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
    }

    /// Public keys of every chat member that has registered one.
    pub fn chat_participant_keys(&self, chat_id: i64) -> Result<Vec<ChatParticipantKey>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.user_id, u.username, k.public_key
                 FROM chat_members m
                 JOIN user_keys k ON k.user_id = m.user_id
                 JOIN users u ON u.id = m.user_id
                 WHERE m.chat_id = ?1
                 ORDER BY u.username",
            )?;
            let rows = stmt
                .query_map([chat_id], |row| {
                    Ok(ChatParticipantKey {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        public_key: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn chat_encryption_status(&self, chat_id: i64) -> Result<ChatEncryptionStatus> {
        let (total, keyed) = self.with_conn(|conn| {
            let counts = conn.query_row(
                "SELECT COUNT(*), COUNT(k.user_id)
                 FROM chat_members m
                 LEFT JOIN user_keys k ON k.user_id = m.user_id
                 WHERE m.chat_id = ?1",
                [chat_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )?;
            Ok(counts)
        })?;

        Ok(ChatEncryptionStatus::new(chat_id, total as usize, keyed as usize))
    }

    /// Generate and store a key pair for every user that has none.
    ///
    /// Safe to re-run: users keyed by an earlier (possibly interrupted) run
    /// are no longer returned by `users_without_keys`. Per-user failures are
    /// logged and counted, not propagated.
    pub fn backfill_missing_keys(&self) -> Result<BackfillReport> {
        let users = self.users_without_keys()?;
        info!("Found {} users without keys", users.len());

        let mut report = BackfillReport::default();
        for user_id in users {
            let pair = match KeyPair::generate() {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Key generation failed for user {}: {}", user_id, e);
                    report.failed += 1;
                    continue;
                }
            };

            match self.save_user_key(user_id, &pair.public().to_base64()) {
                Ok(()) => {
                    info!("Generated key for user {}", user_id);
                    report.generated += 1;
                }
                Err(e) => {
                    warn!("Saving key failed for user {}: {}", user_id, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

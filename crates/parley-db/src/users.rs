//! Profiles, user search and per-user contact lists.

use anyhow::Result;
use thiserror::Error;

use crate::Database;
use crate::models::UserSummaryRow;
use crate::queries::OptionalExt;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("nickname {0} is already taken")]
    NicknameTaken(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Fields to change on a profile. `None` leaves a field untouched;
/// `nickname: Some(None)` clears the nickname.
#[derive(Debug, Default)]
pub struct ProfileChanges {
    pub email: Option<String>,
    pub nickname: Option<Option<String>>,
    pub password_hash: Option<String>,
}

impl Database {
    /// Apply `changes` in one transaction. A nickname must not collide with
    /// another user's nickname or username.
    pub fn update_profile(&self, user_id: i64, changes: &ProfileChanges) -> Result<(), ProfileError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            if let Some(Some(nickname)) = &changes.nickname {
                let taken: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM users
                                   WHERE (nickname = ?1 OR username = ?1) AND id != ?2)",
                    rusqlite::params![nickname, user_id],
                    |row| row.get(0),
                )?;
                if taken {
                    return Ok(Err(ProfileError::NicknameTaken(nickname.clone())));
                }
            }

            if let Some(email) = &changes.email {
                tx.execute("UPDATE users SET email = ?1 WHERE id = ?2", rusqlite::params![email, user_id])?;
            }
            if let Some(nickname) = &changes.nickname {
                tx.execute(
                    "UPDATE users SET nickname = ?1 WHERE id = ?2",
                    rusqlite::params![nickname, user_id],
                )?;
            }
            if let Some(hash) = &changes.password_hash {
                tx.execute("UPDATE users SET password = ?1 WHERE id = ?2", rusqlite::params![hash, user_id])?;
            }

            tx.commit()?;
            Ok(Ok(()))
        })?
    }

    /// Case-insensitive substring match on username or nickname, excluding
    /// the searcher, flagged with whether each hit is already a contact.
    pub fn search_users(&self, searcher_id: i64, query: &str, limit: u32) -> Result<Vec<UserSummaryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.nickname, c.contact_id IS NOT NULL
                 FROM users u
                 LEFT JOIN contacts c ON c.contact_id = u.id AND c.user_id = ?1
                 WHERE u.id != ?1
                   AND (instr(lower(u.username), lower(?2)) > 0
                        OR instr(lower(coalesce(u.nickname, '')), lower(?2)) > 0)
                 ORDER BY u.username
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![searcher_id, query, limit], summary_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Resolve a username or nickname to a user id.
    pub fn find_user_by_handle(&self, handle: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id FROM users WHERE username = ?1 OR nickname = ?1 LIMIT 1",
                [handle],
                |row| row.get(0),
            )
            .optional()
        })
    }

    // -- Contacts --

    /// Returns false if the contact was already on the list.
    pub fn add_contact(&self, user_id: i64, contact_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO contacts (user_id, contact_id) VALUES (?1, ?2)",
                [user_id, contact_id],
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn get_contacts(&self, user_id: i64) -> Result<Vec<UserSummaryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.nickname, 1
                 FROM contacts c
                 JOIN users u ON u.id = c.contact_id
                 WHERE c.user_id = ?1
                 ORDER BY u.username",
            )?;
            let rows = stmt
                .query_map([user_id], summary_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns false if there was nothing to remove.
    pub fn remove_contact(&self, user_id: i64, contact_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM contacts WHERE user_id = ?1 AND contact_id = ?2",
                [user_id, contact_id],
            )?;
            Ok(removed > 0)
        })
    }
}

fn summary_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserSummaryRow> {
    Ok(UserSummaryRow {
        id: row.get(0)?,
        username: row.get(1)?,
        nickname: row.get(2)?,
        is_contact: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_users(names: &[&str]) -> (Database, Vec<i64>) {
        let db = Database::open_in_memory().unwrap();
        let ids = names
            .iter()
            .map(|name| db.create_user(name, "hash").unwrap())
            .collect();
        (db, ids)
    }

    #[test]
    fn profile_update_is_partial() {
        let (db, ids) = db_with_users(&["alice"]);
        db.update_profile(
            ids[0],
            &ProfileChanges {
                email: Some("a@example.com".into()),
                nickname: Some(Some("ally".into())),
                ..Default::default()
            },
        )
        .unwrap();

        db.update_profile(
            ids[0],
            &ProfileChanges {
                password_hash: Some("new-hash".into()),
                ..Default::default()
            },
        )
        .unwrap();

        let user = db.get_user_by_id(ids[0]).unwrap().unwrap();
        assert_eq!(user.email, "a@example.com");
        assert_eq!(user.nickname.as_deref(), Some("ally"));
        assert_eq!(user.password, "new-hash");

        db.update_profile(
            ids[0],
            &ProfileChanges {
                nickname: Some(None),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(db.get_user_by_id(ids[0]).unwrap().unwrap().nickname.is_none());
    }

    #[test]
    fn nickname_cannot_shadow_another_user() {
        let (db, ids) = db_with_users(&["alice", "bob"]);
        let claim = |user_id: i64, nickname: &str| {
            db.update_profile(
                user_id,
                &ProfileChanges {
                    nickname: Some(Some(nickname.into())),
                    ..Default::default()
                },
            )
        };

        assert!(claim(ids[0], "ally").is_ok());
        assert!(matches!(claim(ids[1], "ally"), Err(ProfileError::NicknameTaken(_))));
        assert!(matches!(claim(ids[1], "alice"), Err(ProfileError::NicknameTaken(_))));
        // re-saving your own nickname is fine
        assert!(claim(ids[0], "ally").is_ok());
    }

    #[test]
    fn search_matches_username_or_nickname() {
        let (db, ids) = db_with_users(&["alice", "Alfred", "bob"]);
        db.update_profile(
            ids[2],
            &ProfileChanges {
                nickname: Some(Some("bobal".into())),
                ..Default::default()
            },
        )
        .unwrap();
        db.add_contact(ids[0], ids[2]).unwrap();

        let hits = db.search_users(ids[0], "AL", 20).unwrap();
        let names: Vec<&str> = hits.iter().map(|h| h.username.as_str()).collect();
        assert_eq!(names, vec!["Alfred", "bob"]);
        assert!(!hits[0].is_contact);
        assert!(hits[1].is_contact);

        assert_eq!(db.search_users(ids[0], "al", 1).unwrap().len(), 1);
        // wildcards are literal
        assert!(db.search_users(ids[0], "%", 20).unwrap().is_empty());
    }

    #[test]
    fn contacts_add_list_remove() {
        let (db, ids) = db_with_users(&["alice", "bob", "carol"]);
        assert!(db.add_contact(ids[0], ids[2]).unwrap());
        assert!(db.add_contact(ids[0], ids[1]).unwrap());
        assert!(!db.add_contact(ids[0], ids[1]).unwrap());

        let contacts = db.get_contacts(ids[0]).unwrap();
        let names: Vec<&str> = contacts.iter().map(|c| c.username.as_str()).collect();
        assert_eq!(names, vec!["bob", "carol"]);
        assert!(contacts.iter().all(|c| c.is_contact));

        // contact lists are one-directional
        assert!(db.get_contacts(ids[1]).unwrap().is_empty());

        assert!(db.remove_contact(ids[0], ids[1]).unwrap());
        assert!(!db.remove_contact(ids[0], ids[1]).unwrap());
        assert_eq!(db.get_contacts(ids[0]).unwrap().len(), 1);
    }

    #[test]
    fn handle_lookup() {
        let (db, ids) = db_with_users(&["alice"]);
        db.update_profile(
            ids[0],
            &ProfileChanges {
                nickname: Some(Some("ally".into())),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(db.find_user_by_handle("alice").unwrap(), Some(ids[0]));
        assert_eq!(db.find_user_by_handle("ally").unwrap(), Some(ids[0]));
        assert_eq!(db.find_user_by_handle("nobody").unwrap(), None);
    }
}

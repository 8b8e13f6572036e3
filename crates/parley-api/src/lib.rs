//! REST handlers: account registration and login, profiles and contacts,
//! chats with history and read state, reactions, and public-key exchange.

pub mod auth;
pub mod chats;
pub mod contacts;
pub mod keys;
pub mod middleware;
pub mod reactions;
pub mod users;

use axum::http::StatusCode;
use tracing::error;

use parley_db::Database;

pub use auth::{AppState, AppStateInner};

/// Run a blocking database call off the async runtime, mapping any failure
/// to 500.
pub(crate) async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("Database error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

/// 403 unless `user_id` belongs to `chat_id`.
pub(crate) async fn require_member(state: &AppState, chat_id: i64, user_id: i64) -> Result<(), StatusCode> {
    if blocking(state, move |db| db.is_chat_member(chat_id, user_id)).await? {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::warn;

use parley_db::Database;
use parley_gateway::connection::{MAX_EMOJI_LEN, sanitize};
use parley_types::api::{AddReactionRequest, Claims};
use parley_types::events::{OutboundEvent, ReactionEntry};
use parley_types::{ChatId, MessageId};

use crate::auth::AppState;
use crate::{blocking, require_member};

fn reaction_entries(db: &Database, message_id: MessageId) -> anyhow::Result<Vec<ReactionEntry>> {
    Ok(db
        .get_reactions(message_id)?
        .into_iter()
        .map(|r| ReactionEntry {
            user_id: r.user_id,
            emoji: r.emoji,
        })
        .collect())
}

/// Resolve the message's chat and check the caller belongs to it.
async fn message_chat_for(state: &AppState, message_id: MessageId, user_id: i64) -> Result<ChatId, StatusCode> {
    let chat_id = blocking(state, move |db| db.get_message_chat(message_id))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;
    require_member(state, chat_id, user_id).await?;
    Ok(chat_id)
}

/// Set the caller's reaction on a message, replacing any previous one, and
/// push the updated set to the chat's online members.
pub async fn add_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddReactionRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let emoji = sanitize(req.emoji.trim());
    if emoji.is_empty() || emoji.len() > MAX_EMOJI_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }

    let user_id = claims.sub;
    let chat_id = message_chat_for(&state, message_id, user_id).await?;

    let reacted_at = parley_db::now_timestamp();
    let stored = emoji.clone();
    let at = reacted_at.clone();
    let reactions = blocking(&state, move |db| {
        db.upsert_reaction(message_id, user_id, &stored, &at)?;
        reaction_entries(db, message_id)
    })
    .await?;

    let event = OutboundEvent::reaction(
        chat_id,
        user_id,
        &claims.username,
        message_id,
        emoji,
        Some(reactions.clone()),
        &reacted_at,
    );
    if let Err(e) = state.router.broadcast_event(&event).await {
        warn!("Failed to encode reaction event: {}", e);
    }

    Ok(Json(reactions))
}

pub async fn list_reactions(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    message_chat_for(&state, message_id, claims.sub).await?;
    let reactions = blocking(&state, move |db| reaction_entries(db, message_id)).await?;
    Ok(Json(reactions))
}

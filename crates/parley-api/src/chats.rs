use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;

use parley_db::models::{ChatRow, MessageRow};
use parley_types::api::{Claims, CreateGroupChatRequest, CreatePrivateChatRequest, HistoryMessage};
use parley_types::events::{EventKind, ReactionEntry};
use parley_types::models::{Chat, FILE_SENTINEL, UnreadCount};
use parley_types::{ChatId, MessageId};

use crate::auth::AppState;
use crate::{blocking, require_member};

const MAX_HISTORY: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

fn to_chat(row: ChatRow) -> Chat {
    Chat {
        id: row.id,
        name: row.name,
        is_group: row.is_group,
    }
}

pub async fn list_chats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub;
    let rows = blocking(&state, move |db| db.get_user_chats(user_id)).await?;
    Ok(Json(rows.into_iter().map(to_chat).collect::<Vec<_>>()))
}

pub async fn create_private_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePrivateChatRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let me = claims.sub;
    let other = req.user_id;
    if other == me {
        return Err(StatusCode::BAD_REQUEST);
    }

    let row = blocking(&state, move |db| {
        if db.get_user_by_id(other)?.is_none() {
            return Ok(None);
        }
        db.create_private_chat(me, other).map(Some)
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok((StatusCode::CREATED, Json(to_chat(row))))
}

pub async fn create_group_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupChatRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let name = req.name.trim().to_string();
    if name.is_empty() || name.len() > 100 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let creator = claims.sub;
    let members = req.member_ids;
    let row = blocking(&state, move |db| {
        for id in &members {
            if db.get_user_by_id(*id)?.is_none() {
                return Ok(None);
            }
        }
        db.create_group_chat(&name, creator, &members).map(Some)
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;

    info!("{} created group chat {} ({})", claims.username, row.name, row.id);
    Ok((StatusCode::CREATED, Json(to_chat(row))))
}

/// Newest-first page of a chat's history, each message with its current
/// reaction set.
pub async fn get_history(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Query(query): Query<HistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    require_member(&state, chat_id, claims.sub).await?;

    let limit = query.limit.clamp(1, MAX_HISTORY);
    let (rows, reaction_rows) = blocking(&state, move |db| {
        let rows = db.get_messages(chat_id, limit)?;
        let ids: Vec<MessageId> = rows.iter().map(|r| r.id).collect();
        let reactions = db.get_reactions_for_messages(&ids)?;
        Ok((rows, reactions))
    })
    .await?;

    let mut reaction_map: HashMap<MessageId, Vec<ReactionEntry>> = HashMap::new();
    for r in reaction_rows {
        reaction_map.entry(r.message_id).or_default().push(ReactionEntry {
            user_id: r.user_id,
            emoji: r.emoji,
        });
    }

    let messages: Vec<HistoryMessage> = rows
        .into_iter()
        .map(|row| {
            let reactions = reaction_map.remove(&row.id).unwrap_or_default();
            to_history(row, reactions)
        })
        .collect();

    Ok(Json(messages))
}

/// Unread message counts for every chat the caller belongs to. Chats with
/// nothing unread are omitted.
pub async fn get_unread(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub;
    let rows = blocking(&state, move |db| db.get_unread_counts(user_id)).await?;
    let counts: Vec<UnreadCount> = rows
        .into_iter()
        .map(|r| UnreadCount {
            chat_id: r.chat_id,
            count: r.count.max(0) as u64,
        })
        .collect();
    Ok(Json(counts))
}

/// Mark everything currently in the chat as read. A chat with no messages
/// leaves the read marker untouched.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub;
    require_member(&state, chat_id, user_id).await?;
    blocking(&state, move |db| db.mark_chat_read(user_id, chat_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn to_history(row: MessageRow, reactions: Vec<ReactionEntry>) -> HistoryMessage {
    let (kind, text, file_url) = match row.text.strip_prefix(FILE_SENTINEL) {
        Some(url) => (EventKind::File, None, Some(url.to_string())),
        None => (EventKind::Message, Some(row.text), None),
    };

    HistoryMessage {
        id: row.id,
        chat_id: row.chat_id,
        sender_id: row.sender_id,
        username: row.sender_username,
        kind,
        text,
        file_url,
        sent_at: row.sent_at,
        reactions,
    }
}

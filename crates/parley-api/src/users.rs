use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, info};

use parley_db::models::{UserRow, UserSummaryRow};
use parley_db::{ProfileChanges, ProfileError};
use parley_types::UserId;
use parley_types::api::{Claims, UpdateProfileRequest};
use parley_types::models::{UserProfile, UserSummary};

use crate::auth::{AppState, hash_password};
use crate::blocking;

const MAX_SEARCH_RESULTS: u32 = 20;
const MAX_QUERY_LEN: usize = 64;
const MAX_EMAIL_LEN: usize = 254;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

pub(crate) fn to_profile(row: UserRow, include_email: bool) -> UserProfile {
    UserProfile {
        id: row.id,
        username: row.username,
        nickname: row.nickname,
        email: include_email.then_some(row.email),
        created_at: row.created_at,
    }
}

pub(crate) fn to_summary(row: UserSummaryRow) -> UserSummary {
    UserSummary {
        id: row.id,
        username: row.username,
        nickname: row.nickname,
        is_contact: row.is_contact,
    }
}

/// 3..=32 ASCII letters, digits or underscores.
fn valid_nickname(nickname: &str) -> bool {
    (3..=32).contains(&nickname.len()) && nickname.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub async fn get_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub;
    let row = blocking(&state, move |db| db.get_user_by_id(user_id))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(to_profile(row, true)))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let row = blocking(&state, move |db| db.get_user_by_id(user_id))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(to_profile(row, false)))
}

/// Partial update of the caller's own profile. The username is fixed at
/// registration since it is baked into issued tokens.
pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let mut changes = ProfileChanges::default();

    if let Some(email) = req.email {
        let email = email.trim().to_string();
        if email.len() > MAX_EMAIL_LEN || (!email.is_empty() && !email.contains('@')) {
            return Err(StatusCode::BAD_REQUEST);
        }
        changes.email = Some(email);
    }

    if let Some(nickname) = req.nickname {
        let nickname = nickname.trim().to_string();
        if nickname.is_empty() {
            changes.nickname = Some(None);
        } else if valid_nickname(&nickname) {
            changes.nickname = Some(Some(nickname));
        } else {
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    if let Some(password) = req.password {
        if password.len() < 8 {
            return Err(StatusCode::BAD_REQUEST);
        }
        changes.password_hash = Some(hash_password(&password)?);
    }

    let user_id = claims.sub;
    let db = state.clone();
    let row = tokio::task::spawn_blocking(move || -> Result<Option<UserRow>, ProfileError> {
        db.db.update_profile(user_id, &changes)?;
        Ok(db.db.get_user_by_id(user_id)?)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| match e {
        ProfileError::NicknameTaken(_) => StatusCode::CONFLICT,
        ProfileError::Storage(e) => {
            error!("Updating profile of user {} failed: {}", user_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    })?
    .ok_or(StatusCode::NOT_FOUND)?;

    info!("{} ({}) updated their profile", claims.username, user_id);
    Ok(Json(to_profile(row, true)))
}

pub async fn search_users(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let q = query.q.trim().to_string();
    if q.is_empty() || q.len() > MAX_QUERY_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }

    let searcher = claims.sub;
    let rows = blocking(&state, move |db| db.search_users(searcher, &q, MAX_SEARCH_RESULTS)).await?;
    Ok(Json(rows.into_iter().map(to_summary).collect::<Vec<_>>()))
}

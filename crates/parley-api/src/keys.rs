use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info, warn};

use parley_db::KeyStoreError;
use parley_types::api::{BackfillResponse, Claims, UpdatePublicKeyRequest};
use parley_types::models::UserKeyRecord;
use parley_types::{ChatId, UserId};

use crate::auth::AppState;
use crate::{blocking, require_member};

/// Fetch one user's public key. 404 if they have not registered one.
pub async fn get_public_key(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let record = blocking(&state, move |db| db.get_user_key(user_id))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(record))
}

/// Register or rotate the caller's public key.
pub async fn put_my_public_key(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdatePublicKeyRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub;
    let db = state.clone();
    let public_key = req.public_key;

    tokio::task::spawn_blocking(move || -> Result<UserKeyRecord, KeyStoreError> {
        db.db.save_user_key(user_id, &public_key)?;
        db.db
            .get_user_key(user_id)?
            .ok_or_else(|| KeyStoreError::Storage(anyhow::anyhow!("key for user {} vanished after save", user_id)))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map(|record| {
        info!("{} ({}) updated their public key", claims.username, user_id);
        Json(record)
    })
    .map_err(|e| match e {
        KeyStoreError::InvalidKey(reason) => {
            warn!("{} ({}) submitted an invalid key: {}", claims.username, user_id, reason);
            StatusCode::BAD_REQUEST
        }
        KeyStoreError::Storage(e) => {
            error!("Saving key for user {} failed: {}", user_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    })
}

pub async fn delete_my_public_key(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub;
    if blocking(&state, move |db| db.delete_user_key(user_id)).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

/// Public keys of every member of a chat that has one. Caller must be a member.
pub async fn get_participant_keys(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    require_member(&state, chat_id, claims.sub).await?;
    let keys = blocking(&state, move |db| db.chat_participant_keys(chat_id)).await?;
    Ok(Json(keys))
}

pub async fn get_encryption_status(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    require_member(&state, chat_id, claims.sub).await?;
    let status = blocking(&state, move |db| db.chat_encryption_status(chat_id)).await?;
    Ok(Json(status))
}

/// Generate a key pair for every user without one. Safe to re-run.
pub async fn backfill_keys(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    info!("{} ({}) triggered key backfill", claims.username, claims.sub);
    let report = blocking(&state, |db| db.backfill_missing_keys()).await?;
    info!(
        "Key backfill finished: {} generated, {} failed",
        report.generated, report.failed
    );

    Ok(Json(BackfillResponse {
        generated: report.generated,
        failed: report.failed,
    }))
}

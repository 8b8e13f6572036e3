use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use parley_types::UserId;
use parley_types::api::{AddContactRequest, Claims};
use parley_types::models::UserSummary;

use crate::auth::AppState;
use crate::blocking;
use crate::users::to_summary;

pub async fn list_contacts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub;
    let rows = blocking(&state, move |db| db.get_contacts(user_id)).await?;
    Ok(Json(rows.into_iter().map(to_summary).collect::<Vec<_>>()))
}

enum AddOutcome {
    Unknown,
    IsSelf,
    AlreadyAdded,
    Added(UserSummary),
}

/// Add a contact by username or nickname. Contact lists are one-directional.
pub async fn add_contact(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddContactRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let handle = req.username.trim().to_string();
    if handle.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let me = claims.sub;
    let outcome = blocking(&state, move |db| {
        let Some(contact_id) = db.find_user_by_handle(&handle)? else {
            return Ok(AddOutcome::Unknown);
        };
        if contact_id == me {
            return Ok(AddOutcome::IsSelf);
        }
        if !db.add_contact(me, contact_id)? {
            return Ok(AddOutcome::AlreadyAdded);
        }
        Ok(match db.get_user_by_id(contact_id)? {
            Some(row) => AddOutcome::Added(UserSummary {
                id: row.id,
                username: row.username,
                nickname: row.nickname,
                is_contact: true,
            }),
            None => AddOutcome::Unknown,
        })
    })
    .await?;

    match outcome {
        AddOutcome::Unknown => Err(StatusCode::NOT_FOUND),
        AddOutcome::IsSelf => Err(StatusCode::BAD_REQUEST),
        AddOutcome::AlreadyAdded => Err(StatusCode::CONFLICT),
        AddOutcome::Added(contact) => {
            info!("{} ({}) added contact {}", claims.username, me, contact.username);
            Ok((StatusCode::CREATED, Json(contact)))
        }
    }
}

pub async fn remove_contact(
    State(state): State<AppState>,
    Path(contact_id): Path<UserId>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let me = claims.sub;
    if blocking(&state, move |db| db.remove_contact(me, contact_id)).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

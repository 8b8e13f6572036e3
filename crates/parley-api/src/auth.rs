use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info};

use parley_db::Database;
use parley_gateway::{ChatRouter, CredentialVerifier};
use parley_types::UserId;
use parley_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::blocking;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub router: ChatRouter,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let username = req.username.trim().to_string();
    if username.len() < 3 || username.len() > 32 {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.password.len() < 8 {
        return Err(StatusCode::BAD_REQUEST);
    }

    // usernames share a namespace with nicknames
    let name = username.clone();
    if blocking(&state, move |db| db.find_user_by_handle(&name))
        .await?
        .is_some()
    {
        return Err(StatusCode::CONFLICT);
    }

    let password_hash = hash_password(&req.password)?;

    let name = username.clone();
    let user_id = blocking(&state, move |db| db.create_user(&name, &password_hash)).await?;

    let token = create_token(&state.jwt_secret, state.token_ttl_hours, user_id, &username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    info!("Registered user {} ({})", username, user_id);
    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let name = req.username.trim().to_string();
    let user = blocking(&state, move |db| db.get_user_by_username(&name))
        .await?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let parsed_hash = PasswordHash::new(&user.password).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let token = create_token(&state.jwt_secret, state.token_ttl_hours, user.id, &user.username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(LoginResponse {
        user_id: user.id,
        username: user.username,
        token,
    }))
}

/// Argon2id with a per-user random salt.
pub(crate) fn hash_password(password: &str) -> Result<String, StatusCode> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Password hashing failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

pub fn create_token(secret: &str, ttl_hours: i64, user_id: UserId, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::hours(ttl_hours)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    use super::*;
    use crate::testing::test_state;

    fn register_req(username: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.into(),
            password: password.into(),
        }
    }

    #[test]
    fn token_carries_identity() {
        let token = create_token("s3cret", 24, 7, "alice").unwrap();
        let data = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(b"s3cret"),
            &Validation::default(),
        )
        .unwrap();
        assert_eq!(data.claims.sub, 7);
        assert_eq!(data.claims.username, "alice");
    }

    #[tokio::test]
    async fn register_then_login() {
        let state = test_state();

        let res = register(State(state.clone()), Json(register_req("alice", "password123")))
            .await
            .unwrap()
            .into_response();
        assert_eq!(res.status(), StatusCode::CREATED);

        let res = login(
            State(state.clone()),
            Json(LoginRequest {
                username: "alice".into(),
                password: "password123".into(),
            }),
        )
        .await
        .unwrap()
        .into_response();
        assert_eq!(res.status(), StatusCode::OK);

        let stored = state.db.get_user_by_username("alice").unwrap().unwrap();
        assert_ne!(stored.password, "password123");
    }

    #[tokio::test]
    async fn register_rejects_bad_input_and_duplicates() {
        let state = test_state();

        let short_name = register(State(state.clone()), Json(register_req("al", "password123"))).await;
        assert_eq!(short_name.err(), Some(StatusCode::BAD_REQUEST));

        let short_pw = register(State(state.clone()), Json(register_req("alice", "short"))).await;
        assert_eq!(short_pw.err(), Some(StatusCode::BAD_REQUEST));

        assert!(register(State(state.clone()), Json(register_req("alice", "password123"))).await.is_ok());
        let dup = register(State(state.clone()), Json(register_req("alice", "password456"))).await;
        assert_eq!(dup.err(), Some(StatusCode::CONFLICT));

        let bob = state.db.create_user("bob", "h").unwrap();
        state
            .db
            .update_profile(
                bob,
                &parley_db::ProfileChanges {
                    nickname: Some(Some("bobby".into())),
                    ..Default::default()
                },
            )
            .unwrap();
        let shadow = register(State(state), Json(register_req("bobby", "password123"))).await;
        assert_eq!(shadow.err(), Some(StatusCode::CONFLICT));
    }

    #[tokio::test]
    async fn login_rejects_wrong_password_and_unknown_user() {
        let state = test_state();
        assert!(register(State(state.clone()), Json(register_req("alice", "password123"))).await.is_ok());

        let wrong = login(
            State(state.clone()),
            Json(LoginRequest {
                username: "alice".into(),
                password: "nope-nope".into(),
            }),
        )
        .await;
        assert_eq!(wrong.err(), Some(StatusCode::UNAUTHORIZED));

        let unknown = login(
            State(state),
            Json(LoginRequest {
                username: "bob".into(),
                password: "password123".into(),
            }),
        )
        .await;
        assert_eq!(unknown.err(), Some(StatusCode::UNAUTHORIZED));
    }
}

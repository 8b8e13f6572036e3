use axum::http::{HeaderMap, header};
use jsonwebtoken::{DecodingKey, Validation, decode};
use thiserror::Error;

use parley_types::UserId;
use parley_types::api::Claims;

use crate::backend::{SharedBackend, run_blocking};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credential supplied")]
    Missing,

    #[error("credential rejected")]
    Invalid,

    #[error("user {0} does not exist")]
    UnknownUser(UserId),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Turns a bearer credential into the claims it carries. Shared by the
/// gateway handshake and the REST auth middleware.
pub trait CredentialVerifier: Send + Sync + 'static {
    fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}

/// HS256 JWT verification against a shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }
}

impl CredentialVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| AuthError::Invalid)
    }
}

/// The identity bound to an authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub user_id: UserId,
    pub username: String,
}

/// Pick the bearer credential from the `token` query parameter, falling back
/// to the `Authorization: Bearer` header.
pub fn bearer_token<'a>(query_token: Option<&'a str>, headers: &'a HeaderMap) -> Option<&'a str> {
    query_token.filter(|t| !t.is_empty()).or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .filter(|t| !t.is_empty())
    })
}

/// Handshake: verify the credential exactly once and resolve the display name.
pub async fn authenticate(
    verifier: &dyn CredentialVerifier,
    backend: &SharedBackend,
    token: Option<&str>,
) -> Result<SessionUser, AuthError> {
    let token = token.ok_or(AuthError::Missing)?;
    let user_id = verifier.verify(token)?.sub;

    let username = run_blocking(backend, move |b| b.username(user_id))
        .await?
        .ok_or(AuthError::UnknownUser(user_id))?;

    Ok(SessionUser { user_id, username })
}

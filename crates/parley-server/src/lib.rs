//! Router assembly for the Parley server: REST routes, the WebSocket
//! gateway with its one-time handshake, and the shared state behind them.

pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use parley_api::auth::{self, AppState, AppStateInner};
use parley_api::middleware::require_auth;
use parley_api::{chats, contacts, keys, reactions, users};
use parley_db::Database;
use parley_gateway::auth::{authenticate, bearer_token};
use parley_gateway::connection::handle_connection;
use parley_gateway::{AuthError, ChatRouter, ConnectionRegistry, CredentialVerifier, JwtVerifier, SharedBackend};

use crate::config::Config;

#[derive(Clone)]
pub struct ServerState {
    pub app: AppState,
    pub router: ChatRouter,
    pub verifier: Arc<dyn CredentialVerifier>,
}

impl ServerState {
    /// REST and gateway share one registry and one credential verifier.
    pub fn new(db: Arc<Database>, config: &Config) -> Self {
        let backend: SharedBackend = db.clone();
        let router = ChatRouter::new(ConnectionRegistry::new(), backend);
        let verifier: Arc<dyn CredentialVerifier> = Arc::new(JwtVerifier::new(&config.jwt_secret));
        Self {
            app: Arc::new(AppStateInner {
                db,
                jwt_secret: config.jwt_secret.clone(),
                token_ttl_hours: config.token_ttl_hours,
                verifier: verifier.clone(),
                router: router.clone(),
            }),
            router,
            verifier,
        }
    }
}

pub fn app(state: ServerState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.app.clone());

    let protected_routes = Router::new()
        .route("/chats", get(chats::list_chats))
        .route("/chats/private", post(chats::create_private_chat))
        .route("/chats/group", post(chats::create_group_chat))
        .route("/chats/unread", get(chats::get_unread))
        .route("/chats/{chat_id}/messages", get(chats::get_history))
        .route("/chats/{chat_id}/read", post(chats::mark_read))
        .route(
            "/messages/{message_id}/reactions",
            get(reactions::list_reactions).post(reactions::add_reaction),
        )
        .route("/users/me", get(users::get_me).put(users::update_me))
        .route("/users/search", get(users::search_users))
        .route("/users/{user_id}", get(users::get_user))
        .route("/contacts", get(contacts::list_contacts).post(contacts::add_contact))
        .route("/contacts/{contact_id}", delete(contacts::remove_contact))
        .route("/chats/{chat_id}/participants-keys", get(keys::get_participant_keys))
        .route("/chats/{chat_id}/encryption-status", get(keys::get_encryption_status))
        .route("/users/{user_id}/public-key", get(keys::get_public_key))
        .route(
            "/users/me/public-key",
            put(keys::put_my_public_key).delete(keys::delete_my_public_key),
        )
        .route("/keys/backfill", post(keys::backfill_keys))
        .layer(middleware::from_fn_with_state(state.app.clone(), require_auth))
        .with_state(state.app.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// Authenticate once, before the upgrade. A rejected credential never
/// reaches the session loop.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = bearer_token(query.token.as_deref(), &headers);

    let user = match authenticate(state.verifier.as_ref(), state.router.backend(), token).await {
        Ok(user) => user,
        Err(AuthError::Backend(e)) => {
            error!("Gateway handshake failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(e) => {
            warn!("Gateway handshake rejected: {}", e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_connection(socket, state.router, user))
}

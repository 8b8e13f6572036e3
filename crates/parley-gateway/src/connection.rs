use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, Stream, StreamExt};
use tracing::{debug, info, warn};

use parley_types::events::{InboundEvent, OutboundEvent};
use parley_types::models::FILE_SENTINEL;

use crate::auth::SessionUser;
use crate::backend::run_blocking;
use crate::registry::SessionHandle;
use crate::router::ChatRouter;

/// Upper bound on message text, in UTF-8 bytes, measured after escaping.
pub const MAX_TEXT_LEN: usize = 1000;

/// Upper bound on a reaction emoji, in UTF-8 bytes, measured after escaping.
pub const MAX_EMOJI_LEN: usize = 32;

const MAX_FILE_URL_LEN: usize = 2048;

/// Escape the four HTML metacharacters. `&` passes through unchanged.
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Drive one authenticated socket until either side goes away.
///
/// The credential was verified at the HTTP upgrade layer, so the session is
/// registered immediately. A previous session for the same user is evicted:
/// dropping its handle ends that connection's writer, which in turn tears
/// down its reader.
pub async fn handle_connection(socket: WebSocket, router: ChatRouter, user: SessionUser) {
    let (mut sink, stream) = socket.split();

    let (handle, mut outbound) = SessionHandle::new();
    let conn_id = handle.conn_id();
    if let Some(evicted) = router.registry().register(user.user_id, handle).await {
        info!(
            "{} ({}) reconnected, evicting conn {}",
            user.username,
            user.user_id,
            evicted.conn_id()
        );
    }
    info!("{} ({}) connected to gateway (conn {})", user.username, user.user_id, conn_id);

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let recv_router = router.clone();
    let recv_user = user.clone();
    let mut recv_task = tokio::spawn(async move {
        run_session(stream, &recv_router, &recv_user).await;
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    router.registry().unregister_connection(user.user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", user.username, user.user_id);
}

/// Read loop: one inbound event at a time, strictly in arrival order.
///
/// Malformed frames are skipped. Returns when the peer closes or the
/// transport fails.
pub async fn run_session<S>(mut stream: S, router: &ChatRouter, user: &SessionUser)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!("{} ({}) read error: {}", user.username, user.user_id, e);
                break;
            }
        };

        match msg {
            Message::Text(text) => match serde_json::from_str::<InboundEvent>(text.as_str()) {
                Ok(event) => {
                    if let Some(outbound) = process_event(router, user, event).await {
                        if let Err(e) = router.broadcast_event(&outbound).await {
                            warn!("Failed to encode {:?} event: {}", outbound.kind, e);
                        }
                    }
                }
                Err(e) => {
                    debug!(
                        "{} ({}) bad event: {} -- raw: {}",
                        user.username,
                        user.user_id,
                        e,
                        truncate(text.as_str(), 200)
                    );
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// Validate, sanitize and persist one event. Returns the event to broadcast,
/// or `None` if it was dropped.
async fn process_event(router: &ChatRouter, user: &SessionUser, event: InboundEvent) -> Option<OutboundEvent> {
    let chat_id = event.chat_id();
    if chat_id <= 0 {
        return None;
    }

    let user_id = user.user_id;
    match run_blocking(router.backend(), move |b| b.is_member(chat_id, user_id)).await {
        Ok(true) => {}
        Ok(false) => {
            debug!("{} ({}) is not a member of chat {}, dropping", user.username, user_id, chat_id);
            return None;
        }
        Err(e) => {
            warn!("Membership check for chat {} failed: {}", chat_id, e);
            return None;
        }
    }

    let sent_at = parley_db::now_timestamp();

    match event {
        InboundEvent::Message { text, .. } => {
            let text = sanitize(&text);
            if text.is_empty() || text.len() > MAX_TEXT_LEN {
                return None;
            }

            let stored = text.clone();
            let at = sent_at.clone();
            if let Err(e) = run_blocking(router.backend(), move |b| b.insert_message(chat_id, user_id, &stored, &at)).await {
                warn!("Failed to persist message in chat {}: {}", chat_id, e);
            }

            Some(OutboundEvent::message(chat_id, user_id, &user.username, text, &sent_at))
        }

        InboundEvent::File { file_url, file_name, .. } => {
            let file_url = file_url.trim().to_string();
            if file_url.is_empty() || file_url.len() > MAX_FILE_URL_LEN {
                return None;
            }
            let file_name = sanitize(&file_name);

            let stored = format!("{}{}", FILE_SENTINEL, file_url);
            let at = sent_at.clone();
            if let Err(e) = run_blocking(router.backend(), move |b| b.insert_message(chat_id, user_id, &stored, &at)).await {
                warn!("Failed to persist file message in chat {}: {}", chat_id, e);
            }

            Some(OutboundEvent::file(chat_id, user_id, &user.username, file_url, file_name, &sent_at))
        }

        InboundEvent::Reaction { message_id, emoji, .. } => {
            let emoji = sanitize(emoji.trim());
            if message_id <= 0 || emoji.is_empty() || emoji.len() > MAX_EMOJI_LEN {
                return None;
            }

            // The target message must live in the chat the sender is a member of.
            match run_blocking(router.backend(), move |b| b.message_chat(message_id)).await {
                Ok(Some(owner)) if owner == chat_id => {}
                Ok(_) => {
                    debug!(
                        "{} ({}) reacted to message {} outside chat {}, dropping",
                        user.username, user_id, message_id, chat_id
                    );
                    return None;
                }
                Err(e) => {
                    warn!("Message lookup for {} failed: {}", message_id, e);
                    return None;
                }
            }

            let stored = emoji.clone();
            let at = sent_at.clone();
            if let Err(e) =
                run_blocking(router.backend(), move |b| b.upsert_reaction(message_id, user_id, &stored, &at)).await
            {
                warn!("Failed to persist reaction on message {}: {}", message_id, e);
            }

            let reactions = match run_blocking(router.backend(), move |b| b.reactions(message_id)).await {
                Ok(reactions) => Some(reactions),
                Err(e) => {
                    warn!("Failed to load reactions for message {}: {}", message_id, e);
                    None
                }
            };

            Some(OutboundEvent::reaction(
                chat_id,
                user_id,
                &user.username,
                message_id,
                emoji,
                reactions,
                &sent_at,
            ))
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::stream;
    use tokio::sync::mpsc::Receiver;

    use super::*;
    use crate::backend::SharedBackend;
    use crate::backend::testing::FakeBackend;
    use crate::registry::{ConnectionRegistry, Frame};
    use parley_db::Database;
    use parley_types::events::{EventKind, ReactionEntry};

    fn user(id: i64) -> SessionUser {
        SessionUser {
            user_id: id,
            username: format!("user{}", id),
        }
    }

    fn frames(raw: &[&str]) -> impl Stream<Item = Result<Message, axum::Error>> + Unpin {
        let items: Vec<Result<Message, axum::Error>> =
            raw.iter().map(|s| Ok(Message::Text(s.to_string().into()))).collect();
        stream::iter(items)
    }

    async fn setup(chat_id: i64, members: &[i64]) -> (ChatRouter, Arc<FakeBackend>, Receiver<Frame>) {
        let backend = Arc::new(FakeBackend::with_chat(chat_id, members));
        let router = ChatRouter::new(ConnectionRegistry::new(), backend.clone());
        let (handle, rx) = SessionHandle::new();
        router.registry().register(members[0], handle).await;
        (router, backend, rx)
    }

    /// Store a message directly and return its id.
    fn seed_message(backend: &FakeBackend, chat_id: i64, sender_id: i64) -> i64 {
        let mut state = backend.state.lock().unwrap();
        state.messages.push((chat_id, sender_id, "seed".into()));
        state.messages.len() as i64
    }

    fn drain(rx: &mut Receiver<Frame>) -> Vec<OutboundEvent> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(frame.as_str()).unwrap());
        }
        out
    }

    #[test]
    fn sanitize_escapes_html_metacharacters() {
        assert_eq!(sanitize("<script>"), "&lt;script&gt;");
        assert_eq!(sanitize(r#"a "b" 'c'"#), "a &quot;b&quot; &#39;c&#39;");
        assert_eq!(sanitize("fish & chips"), "fish & chips");
        assert_eq!(sanitize("привет 👋"), "привет 👋");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("héllo", 2), "h");
    }

    #[tokio::test]
    async fn message_is_escaped_stored_and_broadcast() {
        let (router, backend, mut rx) = setup(5, &[1, 2]).await;
        let (other, mut rx_other) = SessionHandle::new();
        router.registry().register(2, other).await;

        run_session(
            frames(&[r#"{"type":"message","chat_id":5,"text":"<script>"}"#]),
            &router,
            &user(1),
        )
        .await;

        assert_eq!(
            backend.state.lock().unwrap().messages,
            vec![(5, 1, "&lt;script&gt;".to_string())]
        );

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Message);
        assert_eq!(events[0].text.as_deref(), Some("&lt;script&gt;"));
        assert_eq!(events[0].username.as_deref(), Some("user1"));
        assert_eq!(events[0].sender_id, 1);
        assert!(events[0].sent_at.ends_with('Z'));

        assert_eq!(drain(&mut rx_other), events);
    }

    #[tokio::test]
    async fn oversized_or_empty_text_is_dropped() {
        let (router, backend, mut rx) = setup(5, &[1]).await;
        let long = format!(r#"{{"type":"message","chat_id":5,"text":"{}"}}"#, "a".repeat(1001));
        let exact = format!(r#"{{"type":"message","chat_id":5,"text":"{}"}}"#, "a".repeat(1000));
        // 200 quotes escape to 1200 bytes.
        let escaped_over = format!(
            r#"{{"type":"message","chat_id":5,"text":"{}"}}"#,
            "\\\"".repeat(200)
        );

        run_session(
            frames(&[
                long.as_str(),
                r#"{"type":"message","chat_id":5,"text":""}"#,
                escaped_over.as_str(),
                exact.as_str(),
            ]),
            &router,
            &user(1),
        )
        .await;

        let state = backend.state.lock().unwrap();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].2.len(), 1000);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn malformed_events_do_not_end_the_loop() {
        let (router, backend, mut rx) = setup(5, &[1]).await;

        run_session(
            frames(&[
                "not json",
                r#"{"type":"message","text":"no chat"}"#,
                r#"{"type":"message","chat_id":0,"text":"zero"}"#,
                r#"{"type":"teleport","chat_id":5}"#,
                r#"{"type":"message","chat_id":5,"text":"ok"}"#,
            ]),
            &router,
            &user(1),
        )
        .await;

        assert_eq!(backend.state.lock().unwrap().messages.len(), 1);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].text.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn second_reaction_replaces_first() {
        let (router, backend, mut rx) = setup(5, &[1]).await;
        let message_id = seed_message(&backend, 5, 1);
        let thumbs = format!(r#"{{"type":"reaction","chat_id":5,"message_id":{},"emoji":"👍"}}"#, message_id);
        let heart = format!(r#"{{"type":"reaction","chat_id":5,"message_id":{},"emoji":"❤️"}}"#, message_id);

        run_session(
            frames(&[thumbs.as_str(), heart.as_str()]),
            &router,
            &user(1),
        )
        .await;

        {
            let state = backend.state.lock().unwrap();
            assert_eq!(state.reactions.len(), 1);
            assert_eq!(state.reactions.get(&(message_id, 1)).map(String::as_str), Some("❤️"));
        }

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, EventKind::Reaction);
        assert_eq!(events[1].message_id, Some(message_id));
        assert_eq!(
            events[1].reactions,
            Some(vec![ReactionEntry {
                user_id: 1,
                emoji: "❤️".into()
            }])
        );
    }

    #[tokio::test]
    async fn invalid_reactions_are_dropped() {
        let (router, backend, mut rx) = setup(5, &[1]).await;
        seed_message(&backend, 5, 1);

        run_session(
            frames(&[
                r#"{"type":"reaction","chat_id":5,"message_id":0,"emoji":"👍"}"#,
                r#"{"type":"reaction","chat_id":5,"message_id":1,"emoji":"  "}"#,
                r#"{"type":"reaction","chat_id":5,"message_id":2,"emoji":"👍"}"#,
            ]),
            &router,
            &user(1),
        )
        .await;

        assert!(backend.state.lock().unwrap().reactions.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn reaction_on_message_from_another_chat_is_dropped() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let alice = db.create_user("alice", "h").unwrap();
        let bob = db.create_user("bob", "h").unwrap();
        let mallory = db.create_user("mallory", "h").unwrap();
        let private = db.create_private_chat(alice, bob).unwrap();
        let lobby = db.create_group_chat("lobby", mallory, &[alice]).unwrap();
        let message_id = db.insert_message(private.id, alice, "hi", "2024-01-01T00:00:00Z").unwrap();
        db.upsert_reaction(message_id, bob, "🔥", "2024-01-01T00:00:01Z").unwrap();

        let backend: SharedBackend = db.clone();
        let router = ChatRouter::new(ConnectionRegistry::new(), backend);
        let (alice_handle, mut rx_alice) = SessionHandle::new();
        let (mallory_handle, mut rx_mallory) = SessionHandle::new();
        router.registry().register(alice, alice_handle).await;
        router.registry().register(mallory, mallory_handle).await;

        let cross = format!(
            r#"{{"type":"reaction","chat_id":{},"message_id":{},"emoji":"x"}}"#,
            lobby.id, message_id
        );
        run_session(
            frames(&[cross.as_str()]),
            &router,
            &SessionUser {
                user_id: mallory,
                username: "mallory".into(),
            },
        )
        .await;

        let stored = db.get_reactions(message_id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].user_id, bob);
        assert!(drain(&mut rx_mallory).is_empty());
        assert!(drain(&mut rx_alice).is_empty());
    }

    #[tokio::test]
    async fn file_is_stored_with_sentinel() {
        let (router, backend, mut rx) = setup(5, &[1]).await;

        run_session(
            frames(&[
                r#"{"type":"file","chat_id":5,"file_url":"/uploads/a.png","file_name":"<a>.png"}"#,
                r#"{"type":"file","chat_id":5,"file_url":""}"#,
            ]),
            &router,
            &user(1),
        )
        .await;

        assert_eq!(
            backend.state.lock().unwrap().messages,
            vec![(5, 1, "[file]/uploads/a.png".to_string())]
        );

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::File);
        assert_eq!(events[0].file_url.as_deref(), Some("/uploads/a.png"));
        assert_eq!(events[0].file_name.as_deref(), Some("&lt;a&gt;.png"));
        assert!(events[0].text.is_none());
    }

    #[tokio::test]
    async fn persistence_failure_still_broadcasts() {
        let (router, backend, mut rx) = setup(5, &[1]).await;
        backend.state.lock().unwrap().fail_writes = true;

        run_session(
            frames(&[r#"{"type":"message","chat_id":5,"text":"still here"}"#]),
            &router,
            &user(1),
        )
        .await;

        assert!(backend.state.lock().unwrap().messages.is_empty());
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].text.as_deref(), Some("still here"));
    }

    #[tokio::test]
    async fn non_member_events_are_dropped() {
        let (router, backend, mut rx) = setup(5, &[1]).await;

        run_session(
            frames(&[r#"{"type":"message","chat_id":5,"text":"intruder"}"#]),
            &router,
            &user(99),
        )
        .await;

        assert!(backend.state.lock().unwrap().messages.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn transport_error_ends_the_loop() {
        let (router, backend, mut rx) = setup(5, &[1]).await;
        let items: Vec<Result<Message, axum::Error>> = vec![
            Ok(Message::Text(r#"{"type":"message","chat_id":5,"text":"one"}"#.into())),
            Err(axum::Error::new(std::io::Error::other("reset"))),
            Ok(Message::Text(r#"{"type":"message","chat_id":5,"text":"two"}"#.into())),
        ];

        run_session(stream::iter(items), &router, &user(1)).await;

        assert_eq!(backend.state.lock().unwrap().messages.len(), 1);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn close_frame_ends_the_loop() {
        let (router, backend, _rx) = setup(5, &[1]).await;
        let items: Vec<Result<Message, axum::Error>> = vec![
            Ok(Message::Close(None)),
            Ok(Message::Text(r#"{"type":"message","chat_id":5,"text":"late"}"#.into())),
        ];

        run_session(stream::iter(items), &router, &user(1)).await;

        assert!(backend.state.lock().unwrap().messages.is_empty());
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use parley_types::UserId;

/// One encoded event, ready to be written to a socket.
pub type Frame = Utf8Bytes;

/// Frames a session may have queued before it counts as too slow to keep.
pub const SESSION_QUEUE_CAPACITY: usize = 256;

/// Sending half of one physical connection's outbound queue.
///
/// The connection's writer task owns the receiving half; once that task
/// exits, every `send` on this handle fails.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    conn_id: Uuid,
    tx: mpsc::Sender<Frame>,
}

impl SessionHandle {
    pub fn new() -> (Self, mpsc::Receiver<Frame>) {
        Self::with_capacity(SESSION_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                conn_id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Queue a frame without waiting. Fails if the writer has gone away or
    /// its queue is full.
    pub fn send(&self, frame: Frame) -> Result<(), Frame> {
        self.tx.try_send(frame).map_err(|e| e.into_inner())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// userID -> live session. Never holds two entries for the same user.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    sessions: Arc<RwLock<HashMap<UserId, SessionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle` as the user's session. Returns the evicted handle, if any.
    pub async fn register(&self, user_id: UserId, handle: SessionHandle) -> Option<SessionHandle> {
        self.sessions.write().await.insert(user_id, handle)
    }

    /// Remove the user's session regardless of which connection owns it.
    pub async fn unregister(&self, user_id: UserId) -> Option<SessionHandle> {
        self.sessions.write().await.remove(&user_id)
    }

    /// Remove the user's session, but only if `conn_id` still owns it.
    pub async fn unregister_connection(&self, user_id: UserId, conn_id: Uuid) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.get(&user_id).is_some_and(|h| h.conn_id == conn_id) {
            sessions.remove(&user_id);
            return true;
        }
        false
    }

    pub async fn lookup(&self, user_id: UserId) -> Option<SessionHandle> {
        self.sessions.read().await.get(&user_id).cloned()
    }

    /// Visit the sessions of `user_ids` that are online; absent users are skipped.
    pub async fn for_each<F>(&self, user_ids: &[UserId], mut f: F)
    where
        F: FnMut(UserId, &SessionHandle),
    {
        let sessions = self.sessions.read().await;
        for user_id in user_ids {
            if let Some(handle) = sessions.get(user_id) {
                f(*user_id, handle);
            }
        }
    }

    pub async fn online_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

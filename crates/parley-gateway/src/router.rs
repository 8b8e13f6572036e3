use anyhow::Result;
use tracing::{debug, info, warn};

use parley_types::ChatId;
use parley_types::events::OutboundEvent;

use crate::backend::{SharedBackend, run_blocking};
use crate::registry::{ConnectionRegistry, Frame};

/// Fans encoded events out to the online members of a chat.
#[derive(Clone)]
pub struct ChatRouter {
    registry: ConnectionRegistry,
    backend: SharedBackend,
}

impl ChatRouter {
    pub fn new(registry: ConnectionRegistry, backend: SharedBackend) -> Self {
        Self { registry, backend }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    /// Deliver `frame` to every member of `chat_id` with a live session.
    /// Returns the number of sessions the frame was queued on.
    ///
    /// Offline members are skipped. A session whose writer has gone away, or
    /// whose queue is full, is pruned from the registry; dropping its handle
    /// ends that connection. If membership cannot be resolved the
    /// broadcast is abandoned.
    pub async fn broadcast(&self, chat_id: ChatId, frame: Frame) -> usize {
        let members = match run_blocking(&self.backend, move |b| b.chat_members(chat_id)).await {
            Ok(members) => members,
            Err(e) => {
                warn!("Broadcast to chat {} abandoned, membership lookup failed: {}", chat_id, e);
                return 0;
            }
        };

        let mut delivered = 0;
        let mut stale = Vec::new();
        self.registry
            .for_each(&members, |user_id, handle| {
                if handle.send(frame.clone()).is_ok() {
                    delivered += 1;
                } else {
                    stale.push((user_id, handle.conn_id()));
                }
            })
            .await;

        for (user_id, conn_id) in stale {
            if self.registry.unregister_connection(user_id, conn_id).await {
                info!("Pruned stale session for user {} (conn {})", user_id, conn_id);
            }
        }

        debug!(
            "Chat {} broadcast reached {}/{} members",
            chat_id,
            delivered,
            members.len()
        );
        delivered
    }

    /// Encode and broadcast an event to its chat.
    pub async fn broadcast_event(&self, event: &OutboundEvent) -> Result<usize> {
        let frame = Frame::from(serde_json::to_string(event)?);
        Ok(self.broadcast(event.chat_id, frame).await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::testing::FakeBackend;
    use crate::registry::SessionHandle;

    fn router_for(backend: FakeBackend) -> (ChatRouter, Arc<FakeBackend>) {
        let backend = Arc::new(backend);
        let router = ChatRouter::new(ConnectionRegistry::new(), backend.clone());
        (router, backend)
    }

    #[tokio::test]
    async fn delivers_only_to_online_members() {
        let (router, _) = router_for(FakeBackend::with_chat(9, &[1, 2, 3]));
        let (a, mut rx_a) = SessionHandle::new();
        let (c, mut rx_c) = SessionHandle::new();
        let (outsider, mut rx_outsider) = SessionHandle::new();
        router.registry().register(1, a).await;
        router.registry().register(3, c).await;
        router.registry().register(4, outsider).await;

        let delivered = router.broadcast(9, Frame::from("ping".to_string())).await;
        assert_eq!(delivered, 2);

        assert_eq!(rx_a.try_recv().unwrap().as_str(), "ping");
        assert_eq!(rx_c.try_recv().unwrap().as_str(), "ping");
        assert!(rx_a.try_recv().is_err());
        assert!(rx_outsider.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_sessions_are_pruned() {
        let (router, _) = router_for(FakeBackend::with_chat(9, &[1, 2]));
        let (alive, mut rx_alive) = SessionHandle::new();
        let (dead, rx_dead) = SessionHandle::new();
        router.registry().register(1, alive).await;
        router.registry().register(2, dead).await;
        drop(rx_dead);

        assert_eq!(router.broadcast(9, Frame::from("x".to_string())).await, 1);
        assert!(rx_alive.try_recv().is_ok());
        assert!(router.registry().lookup(2).await.is_none());
        assert!(router.registry().lookup(1).await.is_some());
    }

    #[tokio::test]
    async fn slow_session_is_pruned_when_its_queue_fills() {
        let (router, _) = router_for(FakeBackend::with_chat(9, &[1, 2]));
        let (fast, mut rx_fast) = SessionHandle::new();
        let (slow, mut rx_slow) = SessionHandle::with_capacity(1);
        router.registry().register(1, fast).await;
        router.registry().register(2, slow).await;

        assert_eq!(router.broadcast(9, Frame::from("a".to_string())).await, 2);
        assert_eq!(router.broadcast(9, Frame::from("b".to_string())).await, 1);

        assert!(router.registry().lookup(2).await.is_none());
        assert_eq!(rx_fast.try_recv().unwrap().as_str(), "a");
        assert_eq!(rx_fast.try_recv().unwrap().as_str(), "b");

        // the registry held the only sender, so the writer sees end-of-queue
        assert_eq!(rx_slow.recv().await.unwrap().as_str(), "a");
        assert!(rx_slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn membership_failure_abandons_broadcast() {
        let backend = FakeBackend::with_chat(9, &[1]);
        backend.state.lock().unwrap().fail_members = true;
        let (router, _) = router_for(backend);
        let (a, mut rx_a) = SessionHandle::new();
        router.registry().register(1, a).await;

        assert_eq!(router.broadcast(9, Frame::from("x".to_string())).await, 0);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn per_chat_order_is_preserved() {
        let (router, _) = router_for(FakeBackend::with_chat(9, &[1]));
        let (a, mut rx_a) = SessionHandle::new();
        router.registry().register(1, a).await;

        for i in 0..10 {
            router.broadcast(9, Frame::from(i.to_string())).await;
        }
        for i in 0..10 {
            assert_eq!(rx_a.try_recv().unwrap().as_str(), i.to_string());
        }
    }

    #[tokio::test]
    async fn broadcast_event_encodes_json() {
        let (router, _) = router_for(FakeBackend::with_chat(5, &[1]));
        let (a, mut rx_a) = SessionHandle::new();
        router.registry().register(1, a).await;

        let event = OutboundEvent::message(5, 1, "user1", "hi".into(), "2024-01-01T00:00:00Z");
        assert_eq!(router.broadcast_event(&event).await.unwrap(), 1);

        let frame = rx_a.try_recv().unwrap();
        let decoded: OutboundEvent = serde_json::from_str(frame.as_str()).unwrap();
        assert_eq!(decoded, event);
    }
}

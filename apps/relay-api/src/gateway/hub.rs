//! The hub: single authority over membership and routing.
//!
//! All membership changes happen inside one task ([`HubLoop::run`]), which
//! processes admit, evict and route events one at a time. The membership
//! table sits behind a read/write lock only so that directory queries can run
//! alongside the loop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use relay_common::{Envelope, UserEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::fanout::{self, Recipients};
use super::registry::{Registry, RoomInfo};
use super::session::{OutboundPayload, Session};

/// Pending route events the hub accepts before senders start waiting.
pub const ROUTE_QUEUE_CAPACITY: usize = 1024;

/// How long a delivery may wait for queue space before the recipient is
/// evicted.
pub const DELIVERY_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("room already exists: {0}")]
    RoomExists(String),
    #[error("hub is not running")]
    Closed,
}

/// Startup policy for the hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Allow joining rooms that were never created; they vanish when empty.
    pub allow_dynamic_rooms: bool,
    pub delivery_deadline: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            allow_dynamic_rooms: false,
            delivery_deadline: DELIVERY_DEADLINE,
        }
    }
}

/// Shared handle to the hub. Cheap to clone behind an `Arc`.
pub struct Hub {
    registry: RwLock<Registry>,
    config: HubConfig,
    admit_tx: mpsc::UnboundedSender<Arc<Session>>,
    evict_tx: mpsc::UnboundedSender<Arc<Session>>,
    route_tx: mpsc::Sender<Envelope>,
    stopped: CancellationToken,
}

/// The receiving side of the hub's inboxes. Run it on its own task.
pub struct HubLoop {
    hub: Arc<Hub>,
    admit_rx: mpsc::UnboundedReceiver<Arc<Session>>,
    evict_rx: mpsc::UnboundedReceiver<Arc<Session>>,
    route_rx: mpsc::Receiver<Envelope>,
}

impl Hub {
    pub fn new(config: HubConfig) -> (Arc<Self>, HubLoop) {
        let (admit_tx, admit_rx) = mpsc::unbounded_channel();
        let (evict_tx, evict_rx) = mpsc::unbounded_channel();
        let (route_tx, route_rx) = mpsc::channel(ROUTE_QUEUE_CAPACITY);

        let hub = Arc::new(Self {
            registry: RwLock::new(Registry::new()),
            config,
            admit_tx,
            evict_tx,
            route_tx,
            stopped: CancellationToken::new(),
        });
        let event_loop = HubLoop {
            hub: Arc::clone(&hub),
            admit_rx,
            evict_rx,
            route_rx,
        };
        (hub, event_loop)
    }

    /// Create the hub and run its loop on a new task.
    pub fn spawn(config: HubConfig) -> Arc<Self> {
        let (hub, event_loop) = Self::new(config);
        tokio::spawn(event_loop.run());
        hub
    }

    /// Queue a session for admission. Callers check
    /// [`Hub::is_room_allowed`] first.
    pub fn admit(&self, session: Arc<Session>) {
        if let Err(mpsc::error::SendError(session)) = self.admit_tx.send(session) {
            tracing::warn!(session_id = %session.id, "hub stopped, dropping admission");
            session.close();
        }
    }

    /// Queue a session for eviction. Never blocks.
    pub fn evict(&self, session: Arc<Session>) {
        if let Err(mpsc::error::SendError(session)) = self.evict_tx.send(session) {
            session.close();
        }
    }

    /// Hand an envelope to the router. Waits while the route inbox is full.
    pub async fn route(&self, envelope: Envelope) -> Result<(), HubError> {
        self.route_tx
            .send(envelope)
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Whether a client may join `name`.
    pub fn is_room_allowed(&self, name: &str) -> bool {
        self.config.allow_dynamic_rooms || self.registry.read().is_predefined(name)
    }

    /// Create a predefined room.
    pub fn create_room(&self, name: &str) -> Result<(), HubError> {
        self.registry.write().create_room(name)?;
        tracing::info!(room = %name, "room created");
        Ok(())
    }

    /// Directory listing: predefined rooms, then active dynamic rooms when
    /// the policy allows them.
    pub fn list_rooms(&self) -> Vec<RoomInfo> {
        self.registry.read().list_rooms(self.config.allow_dynamic_rooms)
    }

    pub fn session_count(&self) -> usize {
        self.registry.read().session_count()
    }

    pub fn room_count(&self) -> usize {
        self.registry.read().room_count()
    }

    /// Close every admitted session and clear the membership table. Safe to
    /// call more than once.
    pub fn shutdown(&self) {
        tracing::info!("shutting down hub");

        let drained = self.registry.write().drain();
        let closing = drained.len();
        for session in drained {
            if let Some(notice) = serialize(&Envelope::system_event(session.room.clone(), "shutdown", None)) {
                // Best effort: a full queue just misses the notice.
                session.try_enqueue(notice);
            }
            session.close();
        }

        self.stopped.cancel();
        tracing::info!(closed = closing, "hub shutdown complete");
    }
}

impl HubLoop {
    /// Process hub events until the hub is shut down.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                _ = self.hub.stopped.cancelled() => break,
                Some(session) = self.admit_rx.recv() => self.admit(session).await,
                Some(session) = self.evict_rx.recv() => {
                    if let Some(leave) = self.remove(&session) {
                        self.dispatch(leave).await;
                    }
                }
                Some(envelope) = self.route_rx.recv() => self.dispatch(envelope).await,
                else => break,
            }
        }
        tracing::debug!("hub loop stopped");
    }

    async fn admit(&self, session: Arc<Session>) {
        // An evicted session is never re-admitted.
        if session.is_closed() {
            return;
        }
        let inserted = self.hub.registry.write().insert(Arc::clone(&session));
        if !inserted {
            return;
        }

        tracing::info!(
            session_id = %session.id,
            name = %session.name,
            room = %session.room,
            "client connected"
        );

        let join = Envelope::user_event(session.room.clone(), UserEvent::Join, session.name.clone());
        self.dispatch(join).await;
    }

    /// Remove a session from all membership state and close it. Returns the
    /// leave notice to broadcast when the room still has members.
    fn remove(&self, session: &Arc<Session>) -> Option<Envelope> {
        let removal = self.hub.registry.write().remove(session)?;
        session.close();

        tracing::info!(
            session_id = %session.id,
            name = %session.name,
            room = %session.room,
            room_deleted = removal.room_deleted,
            "client disconnected"
        );

        (removal.remaining > 0)
            .then(|| Envelope::user_event(session.room.clone(), UserEvent::Leave, session.name.clone()))
    }

    /// Route an envelope and any leave notices caused by evicting stalled
    /// recipients along the way.
    async fn dispatch(&self, envelope: Envelope) {
        let mut pending = VecDeque::from([envelope]);

        while let Some(envelope) = pending.pop_front() {
            let Some(payload) = serialize(&envelope) else {
                continue;
            };

            let recipients = {
                let registry = self.hub.registry.read();
                Recipients::for_envelope(&envelope).resolve(&registry)
            };
            let targeted = recipients.len();

            let report = fanout::deliver(recipients, payload, self.hub.config.delivery_deadline).await;

            if report.stalled.is_empty() {
                continue;
            }
            tracing::info!(
                room = %envelope.room,
                kind = envelope.kind(),
                delivered = report.delivered,
                targeted,
                timeouts = report.stalled.len(),
                "partial delivery"
            );
            for session in report.stalled {
                tracing::warn!(
                    session_id = %session.id,
                    name = %session.name,
                    room = %session.room,
                    "send timeout, removing unresponsive client"
                );
                if let Some(leave) = self.remove(&session) {
                    pending.push_back(leave);
                }
            }
        }
    }
}

fn serialize(envelope: &Envelope) -> Option<OutboundPayload> {
    match serde_json::to_string(envelope) {
        Ok(json) => Some(json.into()),
        Err(err) => {
            tracing::error!(?err, kind = envelope.kind(), "failed to serialize envelope");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use relay_common::protocol::ChatData;
    use relay_common::Payload;
    use serde_json::Value;
    use tokio::time;

    use super::*;

    const WAIT: Duration = Duration::from_secs(2);

    fn spawn_hub(allow_dynamic_rooms: bool, rooms: &[&str]) -> Arc<Hub> {
        let hub = Hub::spawn(HubConfig {
            allow_dynamic_rooms,
            delivery_deadline: Duration::from_millis(50),
        });
        for room in rooms {
            hub.create_room(room).unwrap();
        }
        hub
    }

    async fn recv(rx: &mut mpsc::Receiver<OutboundPayload>) -> Value {
        let payload = time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for envelope")
            .expect("queue closed");
        serde_json::from_str(&payload).unwrap()
    }

    async fn assert_silent(rx: &mut mpsc::Receiver<OutboundPayload>) {
        let next = time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(next.is_err(), "unexpected envelope: {next:?}");
    }

    /// Admit a session and wait until it sees its own join notice.
    async fn join(hub: &Hub, name: &str, room: &str) -> (Arc<Session>, mpsc::Receiver<OutboundPayload>) {
        let (session, mut rx) = Session::new(name, room);
        hub.admit(Arc::clone(&session));
        let notice = recv(&mut rx).await;
        assert_eq!(notice["type"], "user_event");
        assert_eq!(notice["data"]["event"], "join");
        assert_eq!(notice["data"]["user"], name);
        (session, rx)
    }

    fn chat(session: &Session, text: &str) -> Envelope {
        Envelope::chat(
            session.room.clone(),
            ChatData {
                from: session.name.clone(),
                from_id: session.id.clone(),
                text: text.to_string(),
                mention: Vec::new(),
            },
        )
    }

    async fn wait_for_sessions(hub: &Hub, count: usize) {
        time::timeout(WAIT, async {
            while hub.session_count() != count {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("session count never settled");
    }

    #[tokio::test]
    async fn admitted_session_sees_own_join_and_existing_members_see_it() {
        let hub = spawn_hub(false, &["lobby"]);
        let (_alice, mut alice_rx) = join(&hub, "alice", "lobby").await;
        let (_bob, _bob_rx) = join(&hub, "bob", "lobby").await;

        let notice = recv(&mut alice_rx).await;
        assert_eq!(notice["data"]["event"], "join");
        assert_eq!(notice["data"]["user"], "bob");
        assert_eq!(notice["room"], "lobby");
    }

    #[tokio::test]
    async fn broadcast_stays_inside_the_room() {
        let hub = spawn_hub(true, &[]);
        let (alice, mut alice_rx) = join(&hub, "alice", "lobby").await;
        let (_bob, mut bob_rx) = join(&hub, "bob", "lobby").await;
        let (_carol, mut carol_rx) = join(&hub, "carol", "elsewhere").await;
        recv(&mut alice_rx).await; // bob's join

        hub.route(chat(&alice, "hello")).await.unwrap();

        for rx in [&mut alice_rx, &mut bob_rx] {
            let msg = recv(rx).await;
            assert_eq!(msg["type"], "chat");
            assert_eq!(msg["data"]["from"], "alice");
            assert_eq!(msg["data"]["text"], "hello");
            assert_silent(rx).await;
        }
        assert_silent(&mut carol_rx).await;
    }

    #[tokio::test]
    async fn mention_reaches_target_and_sender_only() {
        let hub = spawn_hub(false, &["lobby"]);
        let (alice, mut alice_rx) = join(&hub, "alice", "lobby").await;
        let (_bob, mut bob_rx) = join(&hub, "bob", "lobby").await;
        let (_carol, mut carol_rx) = join(&hub, "carol", "lobby").await;
        recv(&mut alice_rx).await; // bob joined
        recv(&mut alice_rx).await; // carol joined
        recv(&mut bob_rx).await; // carol joined

        hub.route(chat(&alice, "@bob hi")).await.unwrap();

        let to_bob = recv(&mut bob_rx).await;
        assert_eq!(to_bob["data"]["text"], "@bob hi");
        let echo = recv(&mut alice_rx).await;
        assert_eq!(echo["data"]["text"], "@bob hi");

        assert_silent(&mut alice_rx).await;
        assert_silent(&mut bob_rx).await;
        assert_silent(&mut carol_rx).await;
    }

    #[tokio::test]
    async fn mention_crosses_rooms() {
        let hub = spawn_hub(true, &[]);
        let (alice, mut alice_rx) = join(&hub, "alice", "lobby").await;
        let (_bob, mut bob_rx) = join(&hub, "bob", "side").await;

        hub.route(chat(&alice, "@bob over here")).await.unwrap();

        let to_bob = recv(&mut bob_rx).await;
        assert_eq!(to_bob["room"], "lobby");
        recv(&mut alice_rx).await;
    }

    #[tokio::test]
    async fn self_mention_arrives_once_per_name_match() {
        let hub = spawn_hub(false, &["lobby"]);
        let (alice, mut alice_rx) = join(&hub, "alice", "lobby").await;

        hub.route(chat(&alice, "@alice note to self")).await.unwrap();

        for _ in 0..2 {
            let copy = recv(&mut alice_rx).await;
            assert_eq!(copy["data"]["text"], "@alice note to self");
        }
        assert_silent(&mut alice_rx).await;
    }

    #[tokio::test]
    async fn route_waits_when_inbox_is_full() {
        let (hub, event_loop) = Hub::new(HubConfig::default());
        let (alice, _rx) = Session::new("alice", "lobby");

        for i in 0..ROUTE_QUEUE_CAPACITY {
            hub.route(chat(&alice, &format!("msg {i}"))).await.unwrap();
        }

        let blocked = time::timeout(Duration::from_millis(50), hub.route(chat(&alice, "one more"))).await;
        assert!(blocked.is_err(), "route should wait for inbox space");

        tokio::spawn(event_loop.run());
        time::timeout(WAIT, hub.route(chat(&alice, "after drain")))
            .await
            .expect("route should proceed once the loop drains")
            .unwrap();
    }

    #[tokio::test]
    async fn admission_after_stop_closes_session() {
        let (hub, event_loop) = Hub::new(HubConfig::default());
        drop(event_loop);

        let (alice, _rx) = Session::new("alice", "lobby");
        hub.admit(Arc::clone(&alice));

        assert!(alice.is_closed());
        assert_eq!(hub.session_count(), 0);
    }

    #[tokio::test]
    async fn eviction_notifies_remaining_members() {
        let hub = spawn_hub(false, &["lobby"]);
        let (alice, mut alice_rx) = join(&hub, "alice", "lobby").await;
        let (bob, mut bob_rx) = join(&hub, "bob", "lobby").await;
        recv(&mut alice_rx).await; // bob joined

        hub.evict(Arc::clone(&bob));

        let notice = recv(&mut alice_rx).await;
        assert_eq!(notice["type"], "user_event");
        assert_eq!(notice["data"]["event"], "leave");
        assert_eq!(notice["data"]["user"], "bob");
        assert!(bob.is_closed());
        assert!(!alice.is_closed());
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn double_eviction_is_a_noop() {
        let hub = spawn_hub(false, &["lobby"]);
        let (_alice, mut alice_rx) = join(&hub, "alice", "lobby").await;
        let (bob, _bob_rx) = join(&hub, "bob", "lobby").await;
        recv(&mut alice_rx).await; // bob joined

        hub.evict(Arc::clone(&bob));
        hub.evict(Arc::clone(&bob));

        let notice = recv(&mut alice_rx).await;
        assert_eq!(notice["data"]["event"], "leave");
        assert_silent(&mut alice_rx).await;
        assert_eq!(hub.session_count(), 1);
    }

    #[tokio::test]
    async fn last_member_leaving_dynamic_room_removes_it() {
        let hub = spawn_hub(true, &["lobby"]);
        let (scratch, _rx) = join(&hub, "alice", "scratch").await;
        assert_eq!(hub.list_rooms().len(), 2);

        hub.evict(scratch);
        wait_for_sessions(&hub, 0).await;

        let rooms = hub.list_rooms();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].name, "lobby");
    }

    #[tokio::test]
    async fn last_member_leaving_predefined_room_keeps_it() {
        let hub = spawn_hub(false, &["lobby"]);
        let (alice, _rx) = join(&hub, "alice", "lobby").await;
        assert_eq!(hub.list_rooms()[0].user_count, 1);

        hub.evict(alice);
        wait_for_sessions(&hub, 0).await;

        let rooms = hub.list_rooms();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].name, "lobby");
        assert_eq!(rooms[0].user_count, 0);
    }

    #[tokio::test]
    async fn room_admission_follows_policy() {
        let strict = spawn_hub(false, &["lobby"]);
        assert!(strict.is_room_allowed("lobby"));
        assert!(!strict.is_room_allowed("anything"));

        let open = spawn_hub(true, &[]);
        assert!(open.is_room_allowed("lobby"));
        assert!(open.is_room_allowed("anything"));
    }

    #[tokio::test]
    async fn create_room_rejects_duplicates() {
        let hub = spawn_hub(false, &["lobby"]);
        assert!(matches!(hub.create_room("lobby"), Err(HubError::RoomExists(_))));
        hub.create_room("games").unwrap();
        assert!(hub.is_room_allowed("games"));
    }

    #[tokio::test]
    async fn stalled_recipient_is_evicted_without_blocking_others() {
        let hub = spawn_hub(false, &["lobby"]);
        let (alice, mut alice_rx) = join(&hub, "alice", "lobby").await;

        // Capacity 1: the join notice fills the queue and nobody drains it.
        let (slow, _slow_rx) = Session::with_capacity("slow", "lobby", 1);
        hub.admit(Arc::clone(&slow));
        let notice = recv(&mut alice_rx).await;
        assert_eq!(notice["data"]["user"], "slow");

        let (_bob, mut bob_rx) = join(&hub, "bob", "lobby").await;
        recv(&mut alice_rx).await; // bob joined
        // slow could not take bob's join notice and was evicted.
        let leave = recv(&mut alice_rx).await;
        assert_eq!(leave["data"]["event"], "leave");
        assert_eq!(leave["data"]["user"], "slow");
        assert!(slow.is_closed());

        hub.route(chat(&alice, "still here")).await.unwrap();
        let leave_for_bob = recv(&mut bob_rx).await;
        assert_eq!(leave_for_bob["data"]["event"], "leave");
        let msg = recv(&mut bob_rx).await;
        assert_eq!(msg["data"]["text"], "still here");
        assert_eq!(hub.session_count(), 2);
        assert_eq!(hub.list_rooms()[0].user_count, 2);
    }

    #[tokio::test]
    async fn closed_session_is_not_admitted() {
        let hub = spawn_hub(false, &["lobby"]);
        let (session, _rx) = Session::new("ghost", "lobby");
        session.close();
        hub.admit(session);

        let (_alice, _alice_rx) = join(&hub, "alice", "lobby").await;
        assert_eq!(hub.session_count(), 1);
    }

    #[tokio::test]
    async fn shutdown_closes_every_session() {
        let hub = spawn_hub(true, &["lobby"]);
        let (alice, _alice_rx) = join(&hub, "alice", "lobby").await;
        let (bob, mut bob_rx) = join(&hub, "bob", "scratch").await;

        hub.shutdown();
        hub.shutdown();

        assert!(alice.is_closed());
        assert!(bob.is_closed());
        assert_eq!(hub.session_count(), 0);
        assert_eq!(hub.list_rooms().len(), 1);

        let notice = recv(&mut bob_rx).await;
        assert_eq!(notice["type"], "system_event");
        assert_eq!(notice["data"]["event"], "shutdown");
        assert!(matches!(
            hub.route(chat(&alice, "late")).await,
            Ok(()) | Err(HubError::Closed)
        ));
    }

    #[test]
    fn serialized_envelope_matches_wire_shape() {
        let env = Envelope::user_event("lobby", UserEvent::Join, "alice");
        let payload = serialize(&env).unwrap();
        let parsed: Envelope = serde_json::from_str(&payload).unwrap();
        assert!(matches!(parsed.payload, Payload::UserEvent(_)));
    }
}

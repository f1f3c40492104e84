//! Per-connection session state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relay_common::protocol::{parse_mention, ChatData};
use relay_common::Envelope;
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use super::events::{decode_frame, FrameError};

/// Capacity of a session's outbound queue, in serialized envelopes.
pub const OUTBOUND_CAPACITY: usize = 1024;

/// Serialized envelope queued for one session. Shared by every recipient of a
/// routing pass.
pub type OutboundPayload = Arc<str>;

/// Outcome of one attempt to enqueue onto a session's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The session was already closed; nothing to do.
    Closed,
    /// The queue stayed full for the whole deadline.
    TimedOut,
}

/// State for a single connected client.
pub struct Session {
    /// Opaque random identifier (`session-` prefixed hex).
    pub id: String,
    /// Display name chosen by the client. Not unique.
    pub name: String,
    /// The room this session was admitted to.
    pub room: String,
    outbound: mpsc::Sender<OutboundPayload>,
    closing: AtomicBool,
    closed: CancellationToken,
}

impl Session {
    /// Create a session with the default outbound capacity. The receiver is
    /// the session's outbound queue, drained by its write pump.
    pub fn new(
        name: impl Into<String>,
        room: impl Into<String>,
    ) -> (Arc<Self>, mpsc::Receiver<OutboundPayload>) {
        Self::with_capacity(name, room, OUTBOUND_CAPACITY)
    }

    pub fn with_capacity(
        name: impl Into<String>,
        room: impl Into<String>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<OutboundPayload>) {
        let (outbound, rx) = mpsc::channel(capacity);
        let session = Self {
            id: relay_common::id::session_id(),
            name: name.into(),
            room: room.into(),
            outbound,
            closing: AtomicBool::new(false),
            closed: CancellationToken::new(),
        };
        (Arc::new(session), rx)
    }

    /// Close the session. Only the first call has any effect; returns whether
    /// this call was that one.
    ///
    /// Closing signals both pumps: the write pump stops accepting new
    /// envelopes, flushes what is queued, sends a close frame and drops its
    /// half of the socket; the read pump stops reading.
    pub fn close(&self) -> bool {
        if self.closing.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.closed.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Resolves once [`Session::close`] has been called.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Enqueue a payload, waiting at most `deadline` for queue space.
    pub async fn enqueue(&self, payload: OutboundPayload, deadline: Duration) -> Delivery {
        if self.is_closed() {
            return Delivery::Closed;
        }
        match time::timeout(deadline, self.outbound.send(payload)).await {
            Ok(Ok(())) => Delivery::Delivered,
            Ok(Err(_)) => Delivery::Closed,
            Err(_) => Delivery::TimedOut,
        }
    }

    /// Enqueue without waiting. Used for best-effort notices.
    pub fn try_enqueue(&self, payload: OutboundPayload) -> bool {
        self.outbound.try_send(payload).is_ok()
    }

    /// Decode and validate one raw client frame, producing the chat envelope
    /// to hand to the hub.
    pub fn accept_frame(&self, raw: &str) -> Result<Envelope, FrameError> {
        let message = decode_frame(raw)?;
        let mention = parse_mention(&message.text)
            .map(|target| vec![target.to_string()])
            .unwrap_or_default();

        Ok(Envelope::chat(
            self.room.clone(),
            ChatData {
                from: self.name.clone(),
                from_id: self.id.clone(),
                text: message.text,
                mention,
            },
        ))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("room", &self.room)
            .field("closed", &self.is_closed())
            .finish()
    }
}

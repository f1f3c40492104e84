//! Routing decision and per-recipient delivery.
//!
//! A chat whose text starts with `@name` goes straight to every session named
//! `name` plus the sender's own name, in any room. Everything else goes to the
//! envelope's room. Each recipient is attempted independently with its own
//! deadline; recipients that stay full past it are handed back for eviction.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use relay_common::{Envelope, Payload};

use super::registry::Registry;
use super::session::{Delivery, OutboundPayload, Session};

/// Who an envelope is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipients<'a> {
    /// Mention routing: sessions named `target`, plus sessions named `sender`.
    Direct { target: &'a str, sender: &'a str },
    /// Room broadcast.
    Room(&'a str),
}

impl<'a> Recipients<'a> {
    pub fn for_envelope(envelope: &'a Envelope) -> Self {
        if let Payload::Chat(chat) = &envelope.payload {
            if let Some(target) = envelope.mention_target() {
                return Recipients::Direct {
                    target,
                    sender: &chat.from,
                };
            }
        }
        Recipients::Room(&envelope.room)
    }

    /// Resolve against the current membership. Direct recipients are matched
    /// by name for the target and again for the sender, so a session that
    /// matches both (a self-mention) is listed twice.
    pub fn resolve(&self, registry: &Registry) -> Vec<Arc<Session>> {
        match self {
            Recipients::Room(room) => registry.room_members(room),
            Recipients::Direct { target, sender } => {
                let mut recipients = registry.sessions_named(target);
                recipients.extend(registry.sessions_named(sender));
                recipients
            }
        }
    }
}

/// Summary of one routing pass.
#[derive(Debug, Default)]
pub struct FanoutReport {
    pub delivered: usize,
    /// Recipients whose queue stayed full for the whole deadline.
    pub stalled: Vec<Arc<Session>>,
}

/// Deliver `payload` to every recipient concurrently, each bounded by
/// `deadline`.
pub async fn deliver(
    recipients: Vec<Arc<Session>>,
    payload: OutboundPayload,
    deadline: Duration,
) -> FanoutReport {
    let attempts = recipients.into_iter().map(|session| {
        let payload = Arc::clone(&payload);
        async move {
            let outcome = session.enqueue(payload, deadline).await;
            (session, outcome)
        }
    });

    let mut report = FanoutReport::default();
    for (session, outcome) in join_all(attempts).await {
        match outcome {
            Delivery::Delivered => report.delivered += 1,
            Delivery::Closed => {
                tracing::debug!(session_id = %session.id, "skipping closed session");
            }
            Delivery::TimedOut => report.stalled.push(session),
        }
    }
    report
}

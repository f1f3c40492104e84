//! Wire format exchanged between the relay and its clients.
//!
//! Clients send [`ClientMessage`] frames. The relay answers with
//! [`Envelope`] frames of the shape `{type, room, timestamp, data}`, where
//! `type` selects the shape of `data`.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The only message type a client may send.
pub const CHAT_TYPE: &str = "chat";

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A frame received from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
}

impl ClientMessage {
    pub fn chat(text: impl Into<String>) -> Self {
        Self {
            kind: CHAT_TYPE.to_string(),
            text: text.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A message sent from the relay to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub room: String,
    /// Whole seconds, rendered as RFC 3339 (`2025-01-01T00:00:00Z`).
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: Payload,
}

/// Typed body of an [`Envelope`]; serialized as the `type` and `data` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Chat(ChatData),
    UserEvent(UserEventData),
    SystemEvent(SystemEventData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatData {
    pub from: String,
    #[serde(rename = "fromId")]
    pub from_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mention: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserEvent {
    Join,
    Leave,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEventData {
    pub event: UserEvent,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEventData {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
}

impl Envelope {
    /// Build a chat envelope stamped with the current time.
    pub fn chat(room: impl Into<String>, data: ChatData) -> Self {
        Self::now(room, Payload::Chat(data))
    }

    /// Build a join/leave notice for `user`.
    pub fn user_event(room: impl Into<String>, event: UserEvent, user: impl Into<String>) -> Self {
        Self::now(
            room,
            Payload::UserEvent(UserEventData {
                event,
                user: user.into(),
            }),
        )
    }

    pub fn system_event(
        room: impl Into<String>,
        event: impl Into<String>,
        details: Option<Map<String, Value>>,
    ) -> Self {
        Self::now(
            room,
            Payload::SystemEvent(SystemEventData {
                event: event.into(),
                details,
            }),
        )
    }

    fn now(room: impl Into<String>, payload: Payload) -> Self {
        Self {
            room: room.into(),
            timestamp: Utc::now().trunc_subsecs(0),
            payload,
        }
    }

    /// The `type` field this envelope serializes with.
    pub fn kind(&self) -> &'static str {
        match self.payload {
            Payload::Chat(_) => "chat",
            Payload::UserEvent(_) => "user_event",
            Payload::SystemEvent(_) => "system_event",
        }
    }

    /// Mention target of a chat envelope, parsed from its text.
    pub fn mention_target(&self) -> Option<&str> {
        match &self.payload {
            Payload::Chat(chat) => parse_mention(&chat.text),
            _ => None,
        }
    }
}

/// Extract the `@name` target from the start of a chat text.
///
/// The target runs up to the first space, or to the end of the text when there
/// is none. Returns `None` when the text does not start with `@`.
pub fn parse_mention(text: &str) -> Option<&str> {
    let rest = text.strip_prefix('@')?;
    Some(rest.split_once(' ').map_or(rest, |(target, _)| target))
}

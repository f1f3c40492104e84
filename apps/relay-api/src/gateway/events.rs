//! Inbound frame decoding and validation.

use relay_common::protocol::CHAT_TYPE;
use relay_common::ClientMessage;

/// Maximum chat text length, in bytes.
pub const MAX_TEXT_BYTES: usize = 4096;

/// Why a client frame was dropped. None of these close the connection.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid json: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unsupported message type: {0:?}")]
    UnsupportedType(String),
    #[error("empty message")]
    Empty,
    #[error("message too long ({0} bytes)")]
    TooLong(usize),
    #[error("invalid characters in message")]
    ControlCharacter,
}

/// Decode a raw text frame and check it against the message rules.
pub fn decode_frame(raw: &str) -> Result<ClientMessage, FrameError> {
    let message: ClientMessage = serde_json::from_str(raw)?;
    validate(&message)?;
    Ok(message)
}

pub fn validate(message: &ClientMessage) -> Result<(), FrameError> {
    if message.kind != CHAT_TYPE {
        return Err(FrameError::UnsupportedType(message.kind.clone()));
    }
    if message.text.is_empty() {
        return Err(FrameError::Empty);
    }
    if message.text.len() > MAX_TEXT_BYTES {
        return Err(FrameError::TooLong(message.text.len()));
    }
    if message.text.chars().any(is_disallowed_control) {
        return Err(FrameError::ControlCharacter);
    }
    Ok(())
}

fn is_disallowed_control(c: char) -> bool {
    c < ' ' && !matches!(c, '\t' | '\n' | '\r')
}

use rand::Rng;

/// Number of random bytes behind a session id (128 bits).
pub const SESSION_ID_BYTES: usize = 16;

/// Generates `bytes` random bytes, hex-encoded and joined to `prefix` with a dash.
///
/// # Examples
/// ```
/// let id = relay_common::id::prefixed_hex("session", 4);
/// assert!(id.starts_with("session-"));
/// assert_eq!(id.len(), "session-".len() + 8);
/// ```
pub fn prefixed_hex(prefix: &str, bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(&mut buf[..]);
    let hex: String = buf.iter().map(|b| format!("{b:02x}")).collect();
    format!("{prefix}-{hex}")
}

/// Opaque identifier for one connected client.
pub fn session_id() -> String {
    prefixed_hex("session", SESSION_ID_BYTES)
}

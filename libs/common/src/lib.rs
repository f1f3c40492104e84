pub mod id;
pub mod protocol;

pub use protocol::{ChatData, ClientMessage, Envelope, Payload, SystemEventData, UserEvent, UserEventData};

//! Real-time room relay: sessions, membership and routing.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `server` | WebSocket upgrade, admission checks, per-session read/write pumps |
//! | `session` | Session identity, outbound queue, close-once |
//! | `events` | Inbound frame validation |
//! | `hub` | Event loop owning membership: admit, evict, route, shutdown |
//! | `registry` | Membership table and room directory |
//! | `fanout` | Broadcast vs. mention routing, per-recipient delivery deadline |

pub mod events;
pub mod fanout;
pub mod hub;
pub mod registry;
pub mod server;
pub mod session;

pub use hub::{Hub, HubConfig, HubError};
pub use registry::RoomInfo;
pub use session::Session;

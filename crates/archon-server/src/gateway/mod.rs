//! Realtime gateway: connections, rooms and event fan-out.
//!
//! - [`handshake`]: identity check before the upgrade
//! - [`membership`]: connection and room tables behind one lock
//! - [`session`]: per-socket reader/writer with heartbeat
//! - [`broadcast`]: presence and room-scoped delivery
//! - [`protocol`]: JSON frame format

pub mod broadcast;
pub mod connection;
pub mod handshake;
pub mod membership;
pub mod protocol;
pub mod session;

pub use broadcast::Broadcaster;
pub use connection::{ClientConnection, ConnectionId, ConnectionState};
pub use membership::Gateway;
pub use protocol::{ClientCommand, Presence, SearchCompleted, ServerEvent, UploadProgress};
pub use session::{Heartbeat, run_session};

//! Presence and room-scoped event fan-out.
//!
//! Broadcasting is best-effort. An invalid room or identity drops the event
//! with a warning; nothing here returns an error to the caller.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use archon_core::validation::{Identity, RoomName};

use super::membership::Gateway;
use super::protocol::{SearchCompleted, ServerEvent, UploadProgress};
use crate::metrics::BROADCAST_EVENTS_TOTAL;

/// Cloneable handle for pushing events to connected clients.
#[derive(Clone)]
pub struct Broadcaster {
    gateway: Arc<Gateway>,
}

impl Broadcaster {
    /// Broadcaster over `gateway`.
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Send `document:upload_progress` to the members of `project_id`.
    ///
    /// Returns the number of connections it was queued for.
    pub fn upload_progress(&self, project_id: &str, progress: UploadProgress) -> usize {
        self.to_room(project_id, ServerEvent::UploadProgress(progress))
    }

    /// Send `search:completed` to the members of `project_id`.
    pub fn search_completed(&self, project_id: &str, done: SearchCompleted) -> usize {
        self.to_room(project_id, ServerEvent::SearchCompleted(done))
    }

    /// Send `user:join` (or `user:leave`) for `user_id` to every connection.
    pub fn presence(&self, user_id: &str, joined: bool) -> usize {
        let identity = match Identity::parse(user_id) {
            Ok(identity) => identity,
            Err(e) => {
                warn!(user_id, error = %e, "broadcast dropped");
                return 0;
            }
        };
        let event = ServerEvent::presence(identity, joined);
        let recipients = self.gateway.broadcast_all(&event);
        record(&event, recipients, None);
        recipients
    }

    fn to_room(&self, project_id: &str, event: ServerEvent) -> usize {
        let room = match RoomName::parse(project_id) {
            Ok(room) => room,
            Err(e) => {
                warn!(room = project_id, event = event.name(), error = %e, "broadcast dropped");
                return 0;
            }
        };
        let recipients = self.gateway.broadcast_room(&room, &event);
        record(&event, recipients, Some(&room));
        recipients
    }
}

fn record(event: &ServerEvent, recipients: usize, room: Option<&RoomName>) {
    debug!(event = event.name(), room = ?room.map(RoomName::as_str), recipients, "broadcast sent");
    counter!(BROADCAST_EVENTS_TOTAL, "kind" => event.kind()).increment(1);
}

//! Wire format of the realtime channel.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! Payload keys are camelCase.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use archon_core::validation::{Identity, InvalidName, RoomName};

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

/// Raw room request as sent by the client.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRequest {
    /// Project whose room to join or leave.
    pub project_id: String,
}

/// Events a client may send.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Subscribe to a project room.
    #[serde(rename = "project_join")]
    ProjectJoin(RoomRequest),
    /// Unsubscribe from a project room.
    #[serde(rename = "project_leave")]
    ProjectLeave(RoomRequest),
}

/// A validated inbound command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientCommand {
    /// Join `room`.
    Join(RoomName),
    /// Leave `room`.
    Leave(RoomName),
}

/// Why an inbound frame was ignored.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Not JSON, unknown event or wrong payload shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Well-formed frame naming an invalid room.
    #[error(transparent)]
    InvalidRoom(#[from] InvalidName),
}

/// Parse and validate one inbound text frame.
pub fn parse_frame(text: &str) -> Result<ClientCommand, FrameError> {
    let event: ClientEvent = serde_json::from_str(text)?;
    Ok(match event {
        ClientEvent::ProjectJoin(req) => ClientCommand::Join(RoomName::parse(&req.project_id)?),
        ClientEvent::ProjectLeave(req) => ClientCommand::Leave(RoomName::parse(&req.project_id)?),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

/// Payload of `user:join` / `user:leave`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    /// The identity that came or went.
    pub user_id: Identity,
}

/// Payload of `document:upload_progress`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    /// Document being processed.
    pub doc_id: String,
    /// Free-form status label, e.g. `"processing"` or `"done"`.
    pub status: String,
    /// Failure description, if the upload failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload of `search:completed`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCompleted {
    /// The query that finished.
    pub query: String,
    /// Opaque result list.
    #[serde(default)]
    pub results: Vec<serde_json::Value>,
}

/// Events the server pushes to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// An identity connected (global).
    #[serde(rename = "user:join")]
    UserJoin(Presence),
    /// An identity disconnected (global).
    #[serde(rename = "user:leave")]
    UserLeave(Presence),
    /// Document processing progress (room-scoped).
    #[serde(rename = "document:upload_progress")]
    UploadProgress(UploadProgress),
    /// A search finished (room-scoped).
    #[serde(rename = "search:completed")]
    SearchCompleted(SearchCompleted),
}

impl ServerEvent {
    /// Presence event for `identity`.
    pub fn presence(identity: Identity, joined: bool) -> Self {
        let presence = Presence { user_id: identity };
        if joined {
            Self::UserJoin(presence)
        } else {
            Self::UserLeave(presence)
        }
    }

    /// Metrics label for the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserJoin(_) | Self::UserLeave(_) => "presence",
            Self::UploadProgress(_) => "upload_progress",
            Self::SearchCompleted(_) => "search_completed",
        }
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserJoin(_) => "user:join",
            Self::UserLeave(_) => "user:leave",
            Self::UploadProgress(_) => "document:upload_progress",
            Self::SearchCompleted(_) => "search:completed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn parses_join_and_leave() {
        let join = parse_frame(r#"{"event":"project_join","data":{"projectId":"p1"}}"#).unwrap();
        assert_eq!(join, ClientCommand::Join(RoomName::parse("p1").unwrap()));
        let leave = parse_frame(r#"{"event":"project_leave","data":{"projectId":"p1"}}"#).unwrap();
        assert_eq!(leave, ClientCommand::Leave(RoomName::parse("p1").unwrap()));
    }

    #[test]
    fn rejects_malformed_frames() {
        for frame in [
            "",
            "not json",
            "[]",
            r#"{"event":"project_join"}"#,
            r#"{"event":"project_join","data":{}}"#,
            r#"{"event":"project_delete","data":{"projectId":"p1"}}"#,
            r#"{"event":"project_join","data":{"projectId":5}}"#,
        ] {
            assert_matches!(parse_frame(frame), Err(FrameError::Malformed(_)), "frame {frame:?}");
        }
    }

    #[test]
    fn rejects_invalid_room_names() {
        for room in ["", "p 1", "project:1", "x".repeat(51).as_str()] {
            let frame = json!({"event": "project_join", "data": {"projectId": room}}).to_string();
            assert_matches!(parse_frame(&frame), Err(FrameError::InvalidRoom(_)), "room {room:?}");
        }
    }

    #[test]
    fn presence_wire_shape() {
        let event = ServerEvent::presence(Identity::parse("u1").unwrap(), true);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "user:join", "data": {"userId": "u1"}})
        );
        let event = ServerEvent::presence(Identity::parse("u1").unwrap(), false);
        assert_eq!(event.name(), "user:leave");
        assert_eq!(event.kind(), "presence");
    }

    #[test]
    fn upload_progress_wire_shape() {
        let event = ServerEvent::UploadProgress(UploadProgress {
            doc_id: "d1".into(),
            status: "done".into(),
            error: None,
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "document:upload_progress", "data": {"docId": "d1", "status": "done"}})
        );

        let failed: UploadProgress =
            serde_json::from_value(json!({"docId": "d2", "status": "failed", "error": "too big"}))
                .unwrap();
        assert_eq!(failed.error.as_deref(), Some("too big"));
    }

    #[test]
    fn search_completed_wire_shape() {
        let event = ServerEvent::SearchCompleted(SearchCompleted {
            query: "rust".into(),
            results: vec![json!({"id": "d1"})],
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "search:completed");
        assert_eq!(value["data"]["query"], "rust");
        assert_eq!(value["data"]["results"][0]["id"], "d1");
        assert_eq!(event.kind(), "search_completed");
    }
}

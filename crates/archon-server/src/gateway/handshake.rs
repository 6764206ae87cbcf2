//! Connect-time identity check.
//!
//! Runs before the WebSocket upgrade: a rejected handshake never creates a
//! connection, joins a room or triggers a broadcast.

use serde::Deserialize;

use archon_core::validation::Identity;

use crate::errors::GatewayError;

/// Query string of `GET /ws`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct HandshakeQuery {
    /// Identity of the connecting user.
    pub user_id: Option<String>,
}

/// Validate the handshake and return the authenticated identity.
pub fn authenticate(query: &HandshakeQuery) -> Result<Identity, GatewayError> {
    let raw = query
        .user_id
        .as_deref()
        .ok_or_else(|| GatewayError::HandshakeRejected {
            reason: "missing user_id".into(),
        })?;
    Identity::parse(raw).map_err(|_| GatewayError::HandshakeRejected {
        reason: "invalid user_id".into(),
    })
}

/// Refuse new connections once `current` reaches `max`.
pub fn check_capacity(current: usize, max: usize) -> Result<(), GatewayError> {
    if current >= max {
        Err(GatewayError::CapacityExceeded { max })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn query(user_id: Option<&str>) -> HandshakeQuery {
        HandshakeQuery {
            user_id: user_id.map(str::to_owned),
        }
    }

    #[test]
    fn accepts_valid_identity() {
        let identity = authenticate(&query(Some("user_42-a"))).unwrap();
        assert_eq!(identity.as_str(), "user_42-a");
    }

    #[test]
    fn rejects_missing_identity() {
        assert_matches!(
            authenticate(&query(None)),
            Err(GatewayError::HandshakeRejected { reason }) if reason == "missing user_id"
        );
    }

    #[test]
    fn rejects_malformed_identity() {
        let long = "u".repeat(51);
        for bad in ["", "bad id", "u1;drop", "ü", long.as_str()] {
            assert_matches!(
                authenticate(&query(Some(bad))),
                Err(GatewayError::HandshakeRejected { .. }),
                "identity {bad:?}"
            );
        }
    }

    #[test]
    fn capacity_limit() {
        assert!(check_capacity(0, 1).is_ok());
        assert_eq!(
            check_capacity(1, 1),
            Err(GatewayError::CapacityExceeded { max: 1 })
        );
    }
}

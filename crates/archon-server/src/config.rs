//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gateway::membership::DEFAULT_SEND_QUEUE_CAPACITY;
use crate::gateway::session::{Heartbeat, MIN_PING_INTERVAL};

/// Configuration for the Archon gateway server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// CORS origins. `"*"` allows any origin.
    pub allowed_origins: Vec<String>,
    /// Maximum concurrent WebSocket connections.
    ///
    /// Soft limit: it is checked before the upgrade and the connection is
    /// registered after it, so handshakes racing each other can briefly
    /// exceed it.
    pub max_connections: usize,
    /// Seconds between server Ping frames. Values below 1 run as 1.
    pub ping_interval_secs: u64,
    /// Seconds of silence before a client is dropped. Values below 1 run as 1.
    pub pong_timeout_secs: u64,
    /// Outbound frames buffered per connection.
    pub send_queue_capacity: usize,
}

impl ServerConfig {
    /// Ping interval as a `Duration`, at least [`MIN_PING_INTERVAL`].
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs).max(MIN_PING_INTERVAL)
    }

    /// Pong timeout as a `Duration`, at least [`MIN_PING_INTERVAL`].
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs).max(MIN_PING_INTERVAL)
    }

    /// Heartbeat timing for sessions.
    pub fn heartbeat(&self) -> Heartbeat {
        Heartbeat {
            ping_interval: self.ping_interval(),
            pong_timeout: self.pong_timeout(),
        }
    }

    /// Whether any origin may connect.
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            allowed_origins: vec!["*".into()],
            max_connections: 1000,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.max_connections, 1000);
        assert_eq!(cfg.send_queue_capacity, 256);
        assert!(cfg.allows_any_origin());
    }

    #[test]
    fn heartbeat_durations() {
        let cfg = ServerConfig {
            ping_interval_secs: 5,
            pong_timeout_secs: 12,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.ping_interval(), Duration::from_secs(5));
        assert_eq!(cfg.heartbeat().pong_timeout, Duration::from_secs(12));
    }

    #[test]
    fn zero_heartbeat_is_clamped() {
        let cfg = ServerConfig {
            ping_interval_secs: 0,
            pong_timeout_secs: 0,
            ..ServerConfig::default()
        };
        let hb = cfg.heartbeat();
        assert_eq!(hb.ping_interval, Duration::from_secs(1));
        assert_eq!(hb.pong_timeout, Duration::from_secs(1));
    }

    #[test]
    fn explicit_origins_are_not_wildcard() {
        let cfg = ServerConfig {
            allowed_origins: vec!["http://localhost:3000".into()],
            ..ServerConfig::default()
        };
        assert!(!cfg.allows_any_origin());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ServerConfig = serde_json::from_str(r#"{"port": 7000}"#).unwrap();
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.pong_timeout_secs, 60);
    }
}

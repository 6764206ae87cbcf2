//! Settings structures.
//!
//! Every struct uses `#[serde(default)]`, so a partial settings file only
//! needs the keys it changes.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArchonSettings {
    /// Realtime gateway listener.
    pub server: ServerSettings,
    /// Downstream API used by the typed facade.
    pub upstream: UpstreamSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Realtime gateway listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Allowed CORS origins; `*` allows any.
    pub allowed_origins: Vec<String>,
    /// Maximum simultaneous realtime connections.
    pub max_connections: usize,
    /// Interval between server pings, in seconds.
    pub ping_interval_secs: u64,
    /// Silence after which a connection is considered dead, in seconds.
    pub pong_timeout_secs: u64,
    /// Outbound frames buffered per connection before events are dropped.
    pub send_queue_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7000,
            allowed_origins: vec!["*".to_string()],
            max_connections: 1000,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
            send_queue_capacity: 256,
        }
    }
}

/// Downstream API settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamSettings {
    /// Base URL endpoint paths are appended to.
    pub base_url: String,
    /// Retries for `GET`.
    pub get_retries: u32,
    /// Retries for `POST`.
    pub post_retries: u32,
    /// Retries for uploads.
    pub upload_retries: u32,
    /// Per-attempt deadline for `GET`/`POST`, in milliseconds.
    pub timeout_ms: u64,
    /// Per-attempt deadline for uploads, in milliseconds.
    pub upload_timeout_ms: u64,
    /// Base backoff delay, in milliseconds.
    pub base_delay_ms: u64,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            get_retries: 3,
            post_retries: 2,
            upload_retries: 2,
            timeout_ms: 5000,
            upload_timeout_ms: 30_000,
            base_delay_ms: 100,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl ArchonSettings {
    /// Reject combinations the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        if server.max_connections == 0 {
            return Err(invalid("server.maxConnections must be at least 1"));
        }
        if server.send_queue_capacity == 0 {
            return Err(invalid("server.sendQueueCapacity must be at least 1"));
        }
        if server.ping_interval_secs == 0 {
            return Err(invalid("server.pingIntervalSecs must be at least 1"));
        }
        if server.pong_timeout_secs <= server.ping_interval_secs {
            return Err(invalid(
                "server.pongTimeoutSecs must be greater than server.pingIntervalSecs",
            ));
        }
        if server.allowed_origins.is_empty() {
            return Err(invalid("server.allowedOrigins must not be empty"));
        }
        let base = &self.upstream.base_url;
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(invalid(format!(
                "upstream.baseUrl must be an http(s) URL, got {base:?}"
            )));
        }
        if self.upstream.timeout_ms == 0 || self.upstream.upload_timeout_ms == 0 {
            return Err(invalid("upstream timeouts must be at least 1ms"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> SettingsError {
    SettingsError::InvalidValue(message.into())
}

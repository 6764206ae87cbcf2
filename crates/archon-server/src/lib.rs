//! # archon-server
//!
//! Axum HTTP + `WebSocket` gateway for Archon clients.
//!
//! - `GET /ws?user_id=..`: identity and capacity checked before the upgrade
//! - Project rooms joined and left over JSON frames
//! - Presence (`user:join` / `user:leave`) fanned out to everyone; document
//!   and search events delivered only to a project's room
//! - Heartbeat via Ping frames, bounded per-connection queues
//! - Health, presence and Prometheus endpoints
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod gateway;
pub mod health;
pub mod metrics;
pub mod server;

pub use config::ServerConfig;
pub use errors::GatewayError;
pub use gateway::{Broadcaster, Gateway};
pub use server::{AppState, ArchonServer, ServerHandle};

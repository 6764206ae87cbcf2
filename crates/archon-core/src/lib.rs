//! # archon-core
//!
//! Foundation types shared by the Archon request core and realtime gateway.
//!
//! - **Errors**: [`errors::RequestError`], the single failure type surfaced by
//!   the resilient request core, and its [`errors::ErrorKind`] taxonomy
//! - **Retry**: [`retry::RetryPolicy`] and exponential backoff with bounded jitter
//! - **Validation**: strict patterns for identities, room names, endpoint paths
//!   and user-entered names
//! - **Logging**: `tracing` subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod logging;
pub mod retry;
pub mod validation;

pub use errors::{ErrorKind, RequestError};
pub use retry::RetryPolicy;

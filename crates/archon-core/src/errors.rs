//! Failure taxonomy for outbound requests.
//!
//! Every failure the resilient request core can produce is reported as one
//! [`RequestError`]. Callers branch on [`RequestError::kind`] and, for
//! upstream failures, on [`RequestError::status`]. A `None` status is the
//! sentinel for failures that never produced an HTTP response (bad target,
//! timeout, connection error, cancellation).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// ErrorKind
// ─────────────────────────────────────────────────────────────────────────────

/// Classification tag carried by every [`RequestError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The target was malformed; no attempt was made.
    InvalidTarget,
    /// An attempt exceeded its deadline.
    Timeout,
    /// Connection-level failure (DNS, refused, reset, TLS, body read).
    TransportFailure,
    /// The remote answered with a non-success status.
    UpstreamStatus,
    /// The caller abandoned the call.
    Cancelled,
}

impl ErrorKind {
    /// Stable snake_case label, used as a metrics label and log field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidTarget => "invalid_target",
            Self::Timeout => "timeout",
            Self::TransportFailure => "transport_failure",
            Self::UpstreamStatus => "upstream_status",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RequestError
// ─────────────────────────────────────────────────────────────────────────────

/// Unified error returned by the request core and the typed facade.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    /// The target URL or endpoint path failed validation.
    #[error("invalid target: {message}")]
    InvalidTarget {
        /// What was wrong with the target.
        message: String,
    },

    /// The final attempt did not settle within its deadline.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout {
        /// The per-attempt deadline that was exceeded.
        timeout_ms: u64,
    },

    /// The final attempt failed below HTTP.
    #[error("transport failure: {message}")]
    Transport {
        /// Error description from the transport.
        message: String,
    },

    /// The final attempt completed with a non-success status.
    #[error("upstream returned {status}: {message}")]
    UpstreamStatus {
        /// HTTP status code of the final attempt.
        status: u16,
        /// Canonical reason phrase or body excerpt.
        message: String,
    },

    /// The caller's cancellation token fired before the call settled.
    #[error("request cancelled")]
    Cancelled,
}

impl RequestError {
    /// Build an [`RequestError::InvalidTarget`].
    #[must_use]
    pub fn invalid_target(message: impl Into<String>) -> Self {
        Self::InvalidTarget {
            message: message.into(),
        }
    }

    /// Build a [`RequestError::Transport`].
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Taxonomy tag.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTarget { .. } => ErrorKind::InvalidTarget,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Transport { .. } => ErrorKind::TransportFailure,
            Self::UpstreamStatus { .. } => ErrorKind::UpstreamStatus,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// HTTP status of the final attempt, if one was obtained.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::UpstreamStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether another attempt could succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Transport { .. } | Self::UpstreamStatus { .. }
        )
    }
}

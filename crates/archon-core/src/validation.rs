//! Strict input patterns.
//!
//! Identities and room names share one pattern: 1–50 ASCII letters, digits,
//! hyphens or underscores. Endpoint paths accepted by the typed facade are
//! absolute, made of the same segment alphabet, with an optional query.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static SCOPED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,50}$").expect("static pattern"));

static ENDPOINT_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/[A-Za-z0-9_-]+(?:/[A-Za-z0-9_-]+)*(?:\?[^\s#]*)?$").expect("static pattern")
});

static DISPLAY_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)^[\w\s-]{1,100}$").expect("static pattern"));

/// Whether `value` is a valid connection identity or room name.
pub fn is_scoped_name(value: &str) -> bool {
    SCOPED_NAME.is_match(value)
}

/// Whether `path` is an acceptable facade endpoint.
pub fn is_endpoint_path(path: &str) -> bool {
    ENDPOINT_PATH.is_match(path)
}

/// Whether `value` is an acceptable user-entered name, description or query.
pub fn is_display_name(value: &str) -> bool {
    DISPLAY_NAME.is_match(value)
}

/// Value that failed a strict pattern.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid {what}: {value:?}")]
pub struct InvalidName {
    /// What the value was supposed to be.
    pub what: &'static str,
    /// The rejected value.
    pub value: String,
}

/// Opaque identity of a realtime connection (the handshake `user_id`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Validate and wrap an identity.
    pub fn parse(value: &str) -> Result<Self, InvalidName> {
        if is_scoped_name(value) {
            Ok(Self(value.to_owned()))
        } else {
            Err(InvalidName {
                what: "identity",
                value: value.to_owned(),
            })
        }
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Name of a subscription room.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomName(String);

impl RoomName {
    /// Validate and wrap a room name.
    pub fn parse(value: &str) -> Result<Self, InvalidName> {
        if is_scoped_name(value) {
            Ok(Self(value.to_owned()))
        } else {
            Err(InvalidName {
                what: "room name",
                value: value.to_owned(),
            })
        }
    }

    /// The room name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! string_newtype_impls {
    ($ty:ident) => {
        impl TryFrom<String> for $ty {
            type Error = InvalidName;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_newtype_impls!(Identity);
string_newtype_impls!(RoomName);

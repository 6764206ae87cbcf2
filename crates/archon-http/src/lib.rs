//! # archon-http
//!
//! Outbound HTTP for Archon collaborators.
//!
//! - [`RequestCore::execute`]: validates the target, races every attempt
//!   against its deadline, retries failures with exponential backoff and
//!   jitter, and reports one [`RequestError`] after the last attempt
//! - [`HttpTransport`]: the seam between the retry loop and the network;
//!   [`ReqwestTransport`] is the production implementation
//! - [`ApiClient`]: typed `get` / `post` / `upload` facade with endpoint
//!   validation and an explicit [`CredentialStore`]
//! - [`api`]: project, document and search calls built on the facade

#![deny(unsafe_code)]

pub mod api;
pub mod client;
pub mod execute;
pub mod transport;

pub use archon_core::{ErrorKind, RequestError, RetryPolicy};
pub use client::{ApiClient, CallOverrides, ClientConfig, CredentialStore};
pub use execute::{RequestCore, RequestOptions};
pub use transport::{
    AttemptRequest, HttpResponse, HttpTransport, MultipartBody, MultipartPart, RequestBody,
    ReqwestTransport, TransportError,
};

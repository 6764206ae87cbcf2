//! The seam between the retry loop and the network.
//!
//! The request core hands one [`AttemptRequest`] per attempt to an
//! [`HttpTransport`]. Bodies are owned values so they can be replayed on
//! every attempt (a `reqwest` multipart form is consumed when sent).

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Request side
// ─────────────────────────────────────────────────────────────────────────────

/// One named part of a multipart body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultipartPart {
    /// Form field name.
    pub name: String,
    /// File name reported to the server, if the part is a file.
    pub file_name: Option<String>,
    /// MIME type of the part, if known.
    pub content_type: Option<String>,
    /// Raw part content.
    pub data: Bytes,
}

/// Replayable `multipart/form-data` body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MultipartBody {
    /// Parts in insertion order.
    pub parts: Vec<MultipartPart>,
}

impl MultipartBody {
    /// Empty form.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plain text field.
    #[must_use]
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(MultipartPart {
            name: name.into(),
            file_name: None,
            content_type: None,
            data: Bytes::from(value.into()),
        });
        self
    }

    /// Append a file field.
    #[must_use]
    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: Option<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        self.parts.push(MultipartPart {
            name: name.into(),
            file_name: Some(file_name.into()),
            content_type,
            data: data.into(),
        });
        self
    }

    fn to_form(&self) -> Result<reqwest::multipart::Form, TransportError> {
        let mut form = reqwest::multipart::Form::new();
        for part in &self.parts {
            let mut p = reqwest::multipart::Part::bytes(part.data.to_vec());
            if let Some(ref file_name) = part.file_name {
                p = p.file_name(file_name.clone());
            }
            if let Some(ref content_type) = part.content_type {
                p = p.mime_str(content_type).map_err(|e| TransportError {
                    message: format!("invalid part content type {content_type:?}: {e}"),
                })?;
            }
            form = form.part(part.name.clone(), p);
        }
        Ok(form)
    }
}

/// Body of an outbound request.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// JSON body (`Content-Type: application/json`).
    Json(serde_json::Value),
    /// Raw bytes with an explicit content type.
    Bytes {
        /// `Content-Type` header value.
        content_type: String,
        /// Body content.
        data: Bytes,
    },
    /// `multipart/form-data` body.
    Multipart(MultipartBody),
}

/// Everything a transport needs to perform one attempt.
#[derive(Clone, Debug)]
pub struct AttemptRequest {
    /// HTTP method.
    pub method: Method,
    /// Validated absolute target.
    pub url: Url,
    /// Extra headers, applied in order.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: RequestBody,
}

// ─────────────────────────────────────────────────────────────────────────────
// Response side
// ─────────────────────────────────────────────────────────────────────────────

/// A fully read HTTP response.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Response with the given status and body and no headers.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Canonical reason phrase for the status, or an empty string.
    pub fn reason(&self) -> &'static str {
        StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("")
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    /// Body as UTF-8 text, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Connection-level failure reported by a transport.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    /// Error description.
    pub message: String,
}

impl TransportError {
    /// Build a transport error from anything printable.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport trait + reqwest implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Performs a single HTTP attempt. No retries, no deadline: both belong to
/// the request core.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send the request and read the full response.
    async fn send(&self, request: &AttemptRequest) -> Result<HttpResponse, TransportError>;
}

/// [`HttpTransport`] backed by a shared `reqwest::Client`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with default client settings.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(concat!("archon/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &AttemptRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Bytes { content_type, data } => builder
                .header(reqwest::header::CONTENT_TYPE, content_type.as_str())
                .body(data.clone()),
            RequestBody::Multipart(form) => builder.multipart(form.to_form()?),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::new(format!("HTTP request failed: {e}")))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::new(format!("Failed to read response body: {e}")))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

//! Project, document and search helpers on top of [`ApiClient`].
//!
//! User-entered names are checked before anything is sent; a rejected input
//! is reported as [`RequestError::InvalidTarget`] with no network attempt.

use bytes::Bytes;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use archon_core::RequestError;
use archon_core::validation::is_display_name;

use crate::client::ApiClient;
use crate::transport::{HttpResponse, MultipartBody};

/// Largest accepted document upload in bytes.
pub const MAX_UPLOAD_BYTES: usize = 5_000_000;

/// Characters left unescaped in a query component (RFC 3986 unreserved plus `!*'()`).
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Body of `POST /projects`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPayload {
    /// Project name.
    pub name: String,
    /// Free-text description.
    pub description: String,
}

/// A project as returned by the API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Project id.
    pub id: String,
    /// Project name.
    pub name: String,
    /// Free-text description.
    pub description: String,
}

/// Result of a document upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Document id.
    pub id: String,
    /// Stored document name.
    pub name: String,
}

/// One search hit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Document id.
    pub id: String,
    /// Document title.
    pub title: String,
    /// Matching excerpt.
    pub snippet: String,
}

/// Errors from the typed helpers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request itself failed or was rejected.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The response body did not match the expected shape.
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// The underlying request error, if that is what failed.
    pub fn as_request(&self) -> Option<&RequestError> {
        match self {
            Self::Request(err) => Some(err),
            Self::Decode(_) => None,
        }
    }
}

fn check_name(value: &str, what: &str) -> Result<(), RequestError> {
    if is_display_name(value) {
        Ok(())
    } else {
        Err(RequestError::invalid_target(format!("Invalid {what}")))
    }
}

fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, ApiError> {
    Ok(response.json()?)
}

/// Create a project.
pub async fn create_project(client: &ApiClient, payload: &ProjectPayload) -> Result<Project, ApiError> {
    check_name(&payload.name, "project name")?;
    check_name(&payload.description, "project description")?;
    let body = serde_json::to_value(payload)?;
    let response = client.post("/projects", body).await?;
    decode(&response)
}

/// Upload a document into a project.
///
/// Empty files and files over [`MAX_UPLOAD_BYTES`] are rejected locally.
pub async fn upload_document(
    client: &ApiClient,
    project_id: &str,
    file_name: &str,
    data: impl Into<Bytes>,
) -> Result<UploadResponse, ApiError> {
    check_name(project_id, "project ID")?;
    let data = data.into();
    if data.is_empty() || data.len() > MAX_UPLOAD_BYTES {
        return Err(RequestError::invalid_target(format!(
            "Invalid file: {} bytes",
            data.len()
        ))
        .into());
    }
    let form = MultipartBody::new().file("file", file_name, None, data);
    let response = client
        .upload(&format!("/projects/{project_id}/documents"), form)
        .await?;
    decode(&response)
}

/// Full-text search across documents.
pub async fn search_documents(client: &ApiClient, query: &str) -> Result<Vec<SearchResult>, ApiError> {
    check_name(query, "query")?;
    let encoded = utf8_percent_encode(query, QUERY_COMPONENT);
    let response = client.get(&format!("/search?query={encoded}")).await?;
    decode(&response)
}

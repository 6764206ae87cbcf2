//! Typed request facade.
//!
//! [`ApiClient`] turns endpoint paths into validated absolute targets,
//! attaches the bearer credential from its [`CredentialStore`] and hands the
//! call to the [`RequestCore`] under a per-method [`RetryPolicy`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use archon_core::validation::is_endpoint_path;
use archon_core::{RequestError, RetryPolicy};

use crate::execute::{RequestCore, RequestOptions};
use crate::transport::{HttpResponse, HttpTransport, MultipartBody, RequestBody};

/// Default retries for `GET`.
pub const DEFAULT_GET_RETRIES: u32 = 3;
/// Default retries for `POST`.
pub const DEFAULT_POST_RETRIES: u32 = 2;
/// Default retries for uploads.
pub const DEFAULT_UPLOAD_RETRIES: u32 = 2;
/// Default per-attempt deadline for `GET` and `POST`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);
/// Default per-attempt deadline for uploads.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_millis(30_000);

// ─────────────────────────────────────────────────────────────────────────────
// Credentials
// ─────────────────────────────────────────────────────────────────────────────

/// Shared slot for the opaque bearer credential.
///
/// Clones share the slot. Last writer wins.
#[derive(Clone, Debug, Default)]
pub struct CredentialStore {
    token: Arc<RwLock<Option<String>>>,
}

impl CredentialStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a credential, replacing any previous one.
    pub fn set(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    /// Remove the credential.
    pub fn clear(&self) {
        *self.token.write() = None;
    }

    /// Current credential, if any.
    pub fn get(&self) -> Option<String> {
        self.token.read().clone()
    }

    fn authorization(&self) -> Option<String> {
        self.token.read().as_deref().map(|t| format!("Bearer {t}"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Facade configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL the endpoint paths are appended to.
    pub base_url: String,
    /// Credential context shared with whoever logs the user in.
    pub credentials: CredentialStore,
    /// Policy for `get`.
    pub get: RetryPolicy,
    /// Policy for `post`.
    pub post: RetryPolicy,
    /// Policy for `upload`.
    pub upload: RetryPolicy,
}

impl ClientConfig {
    /// Configuration with default policies for `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            credentials: CredentialStore::new(),
            get: RetryPolicy::new(DEFAULT_GET_RETRIES, DEFAULT_TIMEOUT),
            post: RetryPolicy::new(DEFAULT_POST_RETRIES, DEFAULT_TIMEOUT),
            upload: RetryPolicy::new(DEFAULT_UPLOAD_RETRIES, DEFAULT_UPLOAD_TIMEOUT),
        }
    }

    /// Use an existing credential store.
    #[must_use]
    pub fn with_credentials(mut self, credentials: CredentialStore) -> Self {
        self.credentials = credentials;
        self
    }
}

/// Per-call overrides of the method's default policy.
#[derive(Clone, Debug, Default)]
pub struct CallOverrides {
    /// Replace the retry count.
    pub max_retries: Option<u32>,
    /// Replace the per-attempt deadline.
    pub attempt_timeout: Option<Duration>,
    /// Abandon the call when this token is cancelled.
    pub cancel: Option<CancellationToken>,
}

impl CallOverrides {
    fn apply(&self, mut policy: RetryPolicy) -> RetryPolicy {
        if let Some(retries) = self.max_retries {
            policy.max_retries = retries;
        }
        if let Some(timeout) = self.attempt_timeout {
            policy.attempt_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        }
        policy
    }
}

/// Check a facade endpoint path.
pub fn validate_endpoint(path: &str) -> Result<(), RequestError> {
    if is_endpoint_path(path) {
        Ok(())
    } else {
        Err(RequestError::invalid_target(format!("Invalid endpoint: {path:?}")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Typed facade over the request core.
#[derive(Clone)]
pub struct ApiClient {
    core: RequestCore,
    config: ClientConfig,
}

impl ApiClient {
    /// Client over the default reqwest transport.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            core: RequestCore::reqwest(),
            config,
        }
    }

    /// Client over a custom transport.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            core: RequestCore::new(transport),
            config,
        }
    }

    /// The credential store this client reads on every call.
    pub fn credentials(&self) -> &CredentialStore {
        &self.config.credentials
    }

    /// The active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// `GET path`.
    pub async fn get(&self, path: &str) -> Result<HttpResponse, RequestError> {
        self.get_with(path, &CallOverrides::default()).await
    }

    /// `GET path` with overrides.
    pub async fn get_with(
        &self,
        path: &str,
        overrides: &CallOverrides,
    ) -> Result<HttpResponse, RequestError> {
        self.call(Method::GET, path, RequestBody::Empty, self.config.get, overrides)
            .await
    }

    /// `POST path` with a JSON body.
    pub async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<HttpResponse, RequestError> {
        self.post_with(path, body, &CallOverrides::default()).await
    }

    /// `POST path` with a JSON body and overrides.
    pub async fn post_with(
        &self,
        path: &str,
        body: serde_json::Value,
        overrides: &CallOverrides,
    ) -> Result<HttpResponse, RequestError> {
        self.call(Method::POST, path, RequestBody::Json(body), self.config.post, overrides)
            .await
    }

    /// Multipart `POST path`.
    pub async fn upload(
        &self,
        path: &str,
        form: MultipartBody,
    ) -> Result<HttpResponse, RequestError> {
        self.upload_with(path, form, &CallOverrides::default()).await
    }

    /// Multipart `POST path` with overrides.
    pub async fn upload_with(
        &self,
        path: &str,
        form: MultipartBody,
        overrides: &CallOverrides,
    ) -> Result<HttpResponse, RequestError> {
        self.call(
            Method::POST,
            path,
            RequestBody::Multipart(form),
            self.config.upload,
            overrides,
        )
        .await
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
        policy: RetryPolicy,
        overrides: &CallOverrides,
    ) -> Result<HttpResponse, RequestError> {
        if let Err(err) = validate_endpoint(path) {
            warn!(path, %method, "endpoint rejected");
            return Err(err);
        }

        let mut options = RequestOptions {
            method,
            headers: Vec::new(),
            body,
            cancel: overrides.cancel.clone(),
        };
        if let Some(auth) = self.config.credentials.authorization() {
            options.headers.push(("Authorization".to_owned(), auth));
        }

        let target = format!("{}{path}", self.config.base_url.trim_end_matches('/'));
        self.core
            .execute(&target, &options, overrides.apply(policy))
            .await
    }
}

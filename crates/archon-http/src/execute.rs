//! # Resilient request core
//!
//! Wraps one logical HTTP call in validation, a per-attempt deadline and
//! exponential-backoff retry.
//!
//! 1. The target must parse as an absolute `http`/`https` URL with a host;
//!    otherwise the call fails with [`RequestError::InvalidTarget`] before
//!    any attempt is made.
//! 2. Attempts are numbered `0..=max_retries` and run strictly in sequence.
//!    Each one races the transport against its deadline; a timed-out
//!    attempt is dropped (cancelling the in-flight call).
//! 3. A non-2xx status is a failure like any other. Failures before the
//!    last attempt wait `base * 2^attempt + U[0, base)` and try again; the
//!    last failure is returned as-is (status preserved).
//! 4. Dropping the returned future abandons the call and releases its
//!    timers. An optional [`CancellationToken`] does the same cooperatively
//!    and yields [`RequestError::Cancelled`].
//!
//! The core caches nothing and shares no state between calls. Retrying a
//! state-mutating call is the caller's decision.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, Url};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use archon_core::{RequestError, RetryPolicy};

use crate::transport::{AttemptRequest, HttpResponse, HttpTransport, ReqwestTransport, RequestBody};

/// Per-call request options.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    /// HTTP method (default `GET`).
    pub method: Method,
    /// Extra headers.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: RequestBody,
    /// Token that abandons the call when cancelled.
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    /// `GET` with no body.
    pub fn get() -> Self {
        Self::default()
    }

    /// `POST` with a JSON body.
    pub fn post_json(body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            body: RequestBody::Json(body),
            ..Self::default()
        }
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Validate a request target.
pub fn parse_target(target: &str) -> Result<Url, RequestError> {
    let url =
        Url::parse(target).map_err(|e| RequestError::invalid_target(format!("Invalid URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RequestError::invalid_target(format!(
            "unsupported scheme: {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(RequestError::invalid_target("URL has no host"));
    }
    Ok(url)
}

/// The resilient request core. Cheap to clone; holds only the transport.
#[derive(Clone)]
pub struct RequestCore {
    transport: Arc<dyn HttpTransport>,
}

impl RequestCore {
    /// Core over the given transport.
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Core over a default [`ReqwestTransport`].
    pub fn reqwest() -> Self {
        Self::new(Arc::new(ReqwestTransport::new()))
    }

    /// Execute one logical request under `policy`.
    pub async fn execute(
        &self,
        target: &str,
        options: &RequestOptions,
        policy: RetryPolicy,
    ) -> Result<HttpResponse, RequestError> {
        let url = match parse_target(target) {
            Ok(url) => url,
            Err(err) => {
                warn!(url = target, error = %err, attempts = 0u32, "request rejected");
                metrics::counter!("http_requests_failed_total", "kind" => err.kind().as_str())
                    .increment(1);
                return Err(err);
            }
        };

        let max_attempts = policy.max_attempts();
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            if options.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                debug!(url = %url, attempt, "request cancelled before attempt");
                return Err(RequestError::Cancelled);
            }

            debug!(
                attempt,
                max_attempts,
                method = %options.method,
                url = %url,
                "attempt started"
            );
            metrics::counter!("http_attempts_total").increment(1);

            let request = AttemptRequest {
                method: options.method.clone(),
                url: url.clone(),
                headers: options.headers.clone(),
                body: options.body.clone(),
            };

            let err = match self
                .attempt(&request, policy.attempt_timeout(), options.cancel.as_ref())
                .await
            {
                Ok(response) if response.is_success() => {
                    info!(
                        url = %url,
                        attempts = attempt + 1,
                        status = response.status,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "request succeeded"
                    );
                    return Ok(response);
                }
                Ok(response) => RequestError::UpstreamStatus {
                    status: response.status,
                    message: response.reason().to_owned(),
                },
                Err(RequestError::Cancelled) => {
                    debug!(url = %url, attempt, "request cancelled during attempt");
                    return Err(RequestError::Cancelled);
                }
                Err(err) => err,
            };

            if attempt + 1 >= max_attempts {
                warn!(
                    url = %url,
                    attempts = attempt + 1,
                    kind = %err.kind(),
                    status = ?err.status(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %err,
                    "request failed"
                );
                metrics::counter!("http_requests_failed_total", "kind" => err.kind().as_str())
                    .increment(1);
                return Err(err);
            }

            let delay = policy.delay_for(attempt);
            warn!(
                url = %url,
                attempt,
                kind = %err.kind(),
                status = ?err.status(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed, retrying"
            );
            metrics::counter!("http_retries_total", "kind" => err.kind().as_str()).increment(1);

            backoff(delay, options.cancel.as_ref()).await?;
            attempt += 1;
        }
    }

    /// One attempt raced against its deadline and the cancellation token.
    async fn attempt(
        &self,
        request: &AttemptRequest,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<HttpResponse, RequestError> {
        let call = tokio::time::timeout(timeout, self.transport.send(request));
        let outcome = match cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => return Err(RequestError::Cancelled),
                outcome = call => outcome,
            },
            None => call.await,
        };
        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(RequestError::transport(err.message)),
            Err(_elapsed) => Err(RequestError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

/// Wait between attempts, waking early if the call is cancelled.
async fn backoff(delay: Duration, cancel: Option<&CancellationToken>) -> Result<(), RequestError> {
    match cancel {
        Some(token) => tokio::select! {
            () = tokio::time::sleep(delay) => Ok(()),
            () = token.cancelled() => Err(RequestError::Cancelled),
        },
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    use archon_core::ErrorKind;
    use archon_core::logging::capture_logs;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::transport::TransportError;

    /// What the scripted transport does on one attempt.
    #[derive(Clone)]
    enum Step {
        Status(u16),
        Fail,
        Hang,
    }

    /// Plays back a script of outcomes, repeating the last step forever.
    struct ScriptedTransport {
        steps: Mutex<VecDeque<Step>>,
        last: Step,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            let last = steps.last().cloned().unwrap_or(Step::Fail);
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                last,
                calls: AtomicU32::new(0),
            })
        }

        fn always(step: Step) -> Arc<Self> {
            Self::new(vec![step])
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, _request: &AttemptRequest) -> Result<HttpResponse, TransportError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().pop_front().unwrap_or(self.last.clone());
            match step {
                Step::Status(status) => Ok(HttpResponse::new(status, "")),
                Step::Fail => Err(TransportError::new("connection refused")),
                Step::Hang => std::future::pending().await,
            }
        }
    }

    fn core_over(transport: &Arc<ScriptedTransport>) -> RequestCore {
        RequestCore::new(transport.clone())
    }

    fn policy(max_retries: u32, timeout_ms: u64) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(timeout_ms))
    }

    const TARGET: &str = "https://example.com/api";

    // -- target validation --

    #[tokio::test]
    async fn invalid_target_makes_no_attempt() {
        for target in ["not-a-url", "", "/relative/path", "ftp://example.com", "http://", "mailto:a@b.c"] {
            let transport = ScriptedTransport::always(Step::Status(200));
            let err = core_over(&transport)
                .execute(target, &RequestOptions::get(), policy(3, 100))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidTarget, "target {target:?}");
            assert_eq!(err.status(), None);
            assert_eq!(transport.calls(), 0, "target {target:?}");
        }
    }

    #[test]
    fn parse_target_accepts_http_and_https() {
        assert!(parse_target("http://localhost:8080/x").is_ok());
        assert!(parse_target("https://example.com").is_ok());
    }

    // -- attempt counting --

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_makes_retries_plus_one_attempts() {
        for retries in 0..5 {
            let transport = ScriptedTransport::always(Step::Fail);
            let err = core_over(&transport)
                .execute(TARGET, &RequestOptions::get(), policy(retries, 100))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::TransportFailure);
            assert_eq!(transport.calls(), retries + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_attempt_k_stops_retrying() {
        for k in 0..4u32 {
            let mut steps = vec![Step::Status(500); k as usize];
            steps.push(Step::Status(200));
            let transport = ScriptedTransport::new(steps);
            let resp = core_over(&transport)
                .execute(TARGET, &RequestOptions::get(), policy(5, 100))
                .await
                .unwrap();
            assert_eq!(resp.status, 200);
            assert_eq!(transport.calls(), k + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_try_success_returns_immediately() {
        let transport = ScriptedTransport::always(Step::Status(201));
        let started = Instant::now();
        let resp = core_over(&transport)
            .execute(TARGET, &RequestOptions::get(), policy(3, 100))
            .await
            .unwrap();
        assert_eq!(resp.status, 201);
        assert_eq!(transport.calls(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    // -- failure classification --

    #[tokio::test(start_paused = true)]
    async fn final_status_is_preserved() {
        let transport = ScriptedTransport::new(vec![Step::Fail, Step::Status(503)]);
        let err = core_over(&transport)
            .execute(TARGET, &RequestOptions::get(), policy(1, 100))
            .await
            .unwrap_err();
        assert_matches!(
            err,
            RequestError::UpstreamStatus { status: 503, ref message } if message == "Service Unavailable"
        );
        assert_eq!(err.status(), Some(503));
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_status_does_not_leak_into_final_error() {
        let transport = ScriptedTransport::new(vec![Step::Status(500), Step::Fail]);
        let err = core_over(&transport)
            .execute(TARGET, &RequestOptions::get(), policy(1, 100))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
        assert_eq!(err.status(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_times_out() {
        let transport = ScriptedTransport::always(Step::Hang);
        let err = core_over(&transport)
            .execute(TARGET, &RequestOptions::get(), policy(1, 10))
            .await
            .unwrap_err();
        assert_eq!(err, RequestError::Timeout { timeout_ms: 10 });
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_then_success() {
        let transport = ScriptedTransport::new(vec![Step::Hang, Step::Status(200)]);
        let resp = core_over(&transport)
            .execute(TARGET, &RequestOptions::get(), policy(2, 10))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(transport.calls(), 2);
    }

    // -- backoff timing --

    #[tokio::test(start_paused = true)]
    async fn one_retry_waits_at_least_one_backoff() {
        let transport = ScriptedTransport::always(Step::Status(500));
        let started = Instant::now();
        let _ = core_over(&transport)
            .execute(TARGET, &RequestOptions::get(), policy(1, 10))
            .await
            .unwrap_err();
        assert_eq!(transport.calls(), 2);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(200), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn total_wait_follows_exponential_schedule() {
        let transport = ScriptedTransport::always(Step::Fail);
        let started = Instant::now();
        let _ = core_over(&transport)
            .execute(TARGET, &RequestOptions::get(), policy(3, 10))
            .await
            .unwrap_err();
        // 100 + 200 + 400 plus at most 3 * 99 of jitter
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(700), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1000), "elapsed {elapsed:?}");
    }

    // -- cancellation --

    #[tokio::test(start_paused = true)]
    async fn cancelled_token_prevents_any_attempt() {
        let transport = ScriptedTransport::always(Step::Status(200));
        let token = CancellationToken::new();
        token.cancel();
        let err = core_over(&transport)
            .execute(TARGET, &RequestOptions::get().with_cancel(token), policy(3, 100))
            .await
            .unwrap_err();
        assert_eq!(err, RequestError::Cancelled);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_retrying() {
        let transport = ScriptedTransport::always(Step::Fail);
        let token = CancellationToken::new();
        let canceller = token.clone();
        let _handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let err = core_over(&transport)
            .execute(TARGET, &RequestOptions::get().with_cancel(token), policy(5, 10))
            .await
            .unwrap_err();
        assert_eq!(err, RequestError::Cancelled);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_attempt_abandons_call() {
        let transport = ScriptedTransport::always(Step::Hang);
        let token = CancellationToken::new();
        let canceller = token.clone();
        let _handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            canceller.cancel();
        });
        let err = core_over(&transport)
            .execute(TARGET, &RequestOptions::get().with_cancel(token), policy(5, 1000))
            .await
            .unwrap_err();
        assert_eq!(err, RequestError::Cancelled);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_call_starts_no_further_attempts() {
        let transport = ScriptedTransport::always(Step::Fail);
        let request_core = core_over(&transport);
        let options = RequestOptions::get();
        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            request_core.execute(TARGET, &options, policy(5, 10)),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(transport.calls(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.calls(), 1);
    }

    // -- observability --

    #[tokio::test(start_paused = true)]
    async fn lifecycle_events_reconstruct_attempt_history() {
        let (logs, _guard) = capture_logs();
        let transport = ScriptedTransport::new(vec![Step::Fail, Step::Status(502), Step::Status(200)]);
        let _ = core_over(&transport)
            .execute(TARGET, &RequestOptions::get(), policy(3, 100))
            .await
            .unwrap();

        let started = logs.with_message("attempt started");
        assert_eq!(started.len(), 3);
        let attempts: Vec<_> = started.iter().filter_map(|e| e.field("attempt")).collect();
        assert_eq!(attempts, ["0", "1", "2"]);

        let retries = logs.with_message("attempt failed, retrying");
        assert_eq!(retries.len(), 2);
        assert_eq!(retries[0].field("kind"), Some("transport_failure"));
        assert_eq!(retries[1].field("kind"), Some("upstream_status"));
        assert!(retries.iter().all(|e| e.field("delay_ms").is_some()));

        let done = logs.with_message("request succeeded");
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].field("attempts"), Some("3"));
        assert!(logs.with_message("request failed").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_is_logged_once() {
        let (logs, _guard) = capture_logs();
        let transport = ScriptedTransport::always(Step::Status(500));
        let _ = core_over(&transport)
            .execute(TARGET, &RequestOptions::get(), policy(1, 100))
            .await
            .unwrap_err();
        let failed = logs.with_message("request failed");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].field("attempts"), Some("2"));
        assert_eq!(failed[0].field("kind"), Some("upstream_status"));
    }

    #[tokio::test]
    async fn rejected_target_is_logged_with_zero_attempts() {
        let (logs, _guard) = capture_logs();
        let transport = ScriptedTransport::always(Step::Status(200));
        let _ = core_over(&transport)
            .execute("not-a-url", &RequestOptions::get(), policy(3, 100))
            .await
            .unwrap_err();
        let rejected = logs.with_message("request rejected");
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].field("attempts"), Some("0"));
        assert!(logs.with_message("attempt started").is_empty());
    }

    // -- options --

    #[test]
    fn options_builders() {
        let opts = RequestOptions::post_json(serde_json::json!({"a": 1})).header("X-Trace", "t1");
        assert_eq!(opts.method, Method::POST);
        assert_eq!(opts.headers, vec![("X-Trace".to_owned(), "t1".to_owned())]);
        assert_eq!(opts.body, RequestBody::Json(serde_json::json!({"a": 1})));
        assert!(opts.cancel.is_none());
        assert_eq!(RequestOptions::get().method, Method::GET);
    }
}

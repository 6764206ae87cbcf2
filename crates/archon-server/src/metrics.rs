//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup, before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket connections registered total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Registered WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Upgrade requests refused before the socket opened (counter, labels: reason).
pub const WS_HANDSHAKE_REJECTIONS_TOTAL: &str = "ws_handshake_rejections_total";
/// Frames dropped on a full or closed outbound queue (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Server events fanned out (counter, labels: kind).
pub const BROADCAST_EVENTS_TOTAL: &str = "broadcast_events_total";
/// Outbound HTTP attempts (counter). Recorded by `archon-http`.
pub const HTTP_ATTEMPTS_TOTAL: &str = "http_attempts_total";
/// Outbound HTTP retries (counter, labels: kind). Recorded by `archon-http`.
pub const HTTP_RETRIES_TOTAL: &str = "http_retries_total";
/// Outbound HTTP requests that finally failed (counter, labels: kind).
/// Recorded by `archon-http`.
pub const HTTP_REQUESTS_FAILED_TOTAL: &str = "http_requests_failed_total";

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::with_local_recorder;

    #[test]
    fn render_includes_recorded_counters() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        with_local_recorder(&recorder, || {
            metrics::counter!(WS_CONNECTIONS_TOTAL).increment(2);
            metrics::counter!(BROADCAST_EVENTS_TOTAL, "kind" => "presence").increment(1);
        });

        let output = render(&handle);
        assert!(output.contains("ws_connections_total 2"));
        assert!(output.contains(r#"broadcast_events_total{kind="presence"} 1"#));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_HANDSHAKE_REJECTIONS_TOTAL,
            WS_BROADCAST_DROPS_TOTAL,
            BROADCAST_EVENTS_TOTAL,
            HTTP_ATTEMPTS_TOTAL,
            HTTP_RETRIES_TOTAL,
            HTTP_REQUESTS_FAILED_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}

//! Telemetry glue for the HTTP surface that fronts the core. The router
//! itself lives outside this crate; it mounts [`trace_request`] so every
//! request gets an `x-request-id`, shows up in the `api.*` metrics, and
//! leaves a sanitized access entry in the log index queryable by that id.

use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::logging::{LogEntry, LogIndex, LogLevel};
use crate::metrics::MetricsCollector;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Handles the middleware needs, carved out of the runtime.
#[derive(Clone)]
pub struct RequestTelemetry {
    pub metrics: MetricsCollector,
    pub logs: LogIndex,
}

/// Mount with `axum::middleware::from_fn_with_state(telemetry, trace_request)`.
///
/// Assigns a request id when the caller did not send one, times the
/// request, records `api.requests`/`api.latency` (and `api.errors` on
/// 5xx), and writes an access entry whose `trace_id` is the request id,
/// so `logs query --trace-id` reconstructs a single request across
/// components. The id is echoed on the response.
pub async fn trace_request(
    State(telemetry): State<RequestTelemetry>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let mut response = next.run(request).await;

    let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
    let status = response.status().as_u16();
    telemetry
        .metrics
        .record_api_request(&path, status, latency_ms)
        .await;

    let level = if status >= 500 {
        LogLevel::Error
    } else {
        LogLevel::Info
    };
    telemetry
        .logs
        .write(
            LogEntry::new(
                level,
                "api",
                component_of(&path),
                &format!("{method} {path} -> {status}"),
            )
            .with_trace(&request_id)
            .with_fields(serde_json::json!({
                "status": status,
                "latency_ms": latency_ms,
            })),
        )
        .await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// First path segment names the component in the log index.
fn component_of(path: &str) -> &str {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or("root")
}

#[cfg(test)]
mod tests {
    use axum::{routing::get, Router};
    use tower::ServiceExt;

    use crate::logging::LogQuery;
    use crate::metrics::domain;
    use crate::shared_store::SharedStore;

    use super::*;

    fn telemetry() -> RequestTelemetry {
        let store = SharedStore::in_memory();
        RequestTelemetry {
            metrics: MetricsCollector::new(store.clone(), 1),
            logs: LogIndex::new(store),
        }
    }

    fn app(telemetry: RequestTelemetry) -> Router {
        Router::new()
            .route("/campaigns", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(
                telemetry,
                trace_request,
            ))
    }

    #[tokio::test]
    async fn requests_emit_metrics_and_an_indexed_access_entry() {
        let telemetry = telemetry();
        let response = app(telemetry.clone())
            .oneshot(
                Request::builder()
                    .uri("/campaigns")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .expect("response carries a request id")
            .to_str()
            .unwrap()
            .to_string();

        assert_eq!(telemetry.metrics.get(domain::API_REQUESTS, 1).await.len(), 1);
        assert_eq!(telemetry.metrics.get(domain::API_LATENCY, 1).await.len(), 1);
        assert!(telemetry.metrics.get(domain::API_ERRORS, 1).await.is_empty());

        let entries = telemetry
            .logs
            .query(&LogQuery {
                trace_id: Some(request_id),
                ..Default::default()
            })
            .await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].service, "api");
        assert_eq!(entries[0].component, "campaigns");
        assert!(entries[0].message.contains("GET /campaigns -> 200"));
    }

    #[tokio::test]
    async fn an_incoming_request_id_is_kept() {
        let telemetry = telemetry();
        let response = app(telemetry.clone())
            .oneshot(
                Request::builder()
                    .uri("/campaigns")
                    .header(REQUEST_ID_HEADER, "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-42");
        let entries = telemetry
            .logs
            .query(&LogQuery {
                trace_id: Some("req-42".to_string()),
                ..Default::default()
            })
            .await;
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn component_falls_back_to_root() {
        assert_eq!(component_of("/campaigns/123/send"), "campaigns");
        assert_eq!(component_of("/"), "root");
        assert_eq!(component_of(""), "root");
    }
}

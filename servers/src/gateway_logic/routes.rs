//! # Gateway Routes
//!
//! | Route                | Admission | Purpose |
//! |----------------------|-----------|---------|
//! | `POST /api/v1/query` | yes       | accept a query, forward its update to the hub |
//! | `GET /health`        | no        | liveness |
//! | `GET /ready`         | no        | readiness |
//! | `GET /metrics`       | no        | Prometheus text format |

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use lib_common::admission::{CounterStore, Gate};
use lib_common::core::envelope::{StreamStatus, StreamUpdate};
use lib_common::resolve_identity;

use crate::gateway_logic::middleware::{admission, track_metrics};
use crate::gateway_logic::notifier::HubNotifier;
use crate::shared::headers::identity_from;
use crate::shared::health::HealthResponse;

/// Text returned for an accepted query.
pub const QUERY_ACCEPTED: &str = "Query accepted for processing";

/// # Application State
pub struct AppState<S> {
    pub gate: Gate<S>,
    pub notifier: Option<HubNotifier>,
    pub metrics: PrometheusHandle,
}

pub fn router<S: CounterStore>(state: Arc<AppState<S>>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let api = Router::new()
        .route("/api/v1/query", post(query_handler::<S>).fallback(method_not_allowed))
        .route_layer(middleware::from_fn_with_state(state.clone(), admission::<S>));

    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler::<S>))
        .merge(api)
        .layer(middleware::from_fn(track_metrics))
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    prompt: String,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    response: &'static str,
    request_id: String,
    timestamp: DateTime<Utc>,
}

fn next_request_id() -> String {
    let now = Utc::now();
    format!("req_{}", now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp_micros() * 1000))
}

async fn query_handler<S: CounterStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request: QueryRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => return (StatusCode::BAD_REQUEST, "Invalid JSON").into_response(),
    };
    if request.prompt.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "Prompt is required").into_response();
    }

    let header_identity = identity_from(&headers);
    let identity = resolve_identity(request.user_id.as_deref().or(header_identity.as_deref())).to_string();
    let request_id = next_request_id();
    info!(request_id = %request_id, identity = %identity, prompt_len = request.prompt.len(), "query accepted");

    if let Some(notifier) = &state.notifier {
        let update = StreamUpdate {
            request_id: request_id.clone(),
            content: QUERY_ACCEPTED.to_string(),
            status: StreamStatus::Complete,
        };
        notifier.spawn_notify(update, identity);
    }

    Json(QueryResponse {
        response: QUERY_ACCEPTED,
        request_id,
        timestamp: Utc::now(),
    })
    .into_response()
}

async fn method_not_allowed() -> impl IntoResponse {
    (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

async fn ready_handler() -> Json<HealthResponse> {
    Json(HealthResponse::ready())
}

async fn metrics_handler<S: CounterStore>(State(state): State<Arc<AppState<S>>>) -> String {
    state.metrics.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::metrics::detached_handle;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use lib_common::admission::{AdmissionConfig, AdmissionController, MemoryCounterStore, StoreFailurePolicy};
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(store: &MemoryCounterStore, limit: u32, policy: StoreFailurePolicy) -> Router {
        let config = AdmissionConfig::new(limit, Duration::from_secs(60)).unwrap();
        let gate = Gate::new(AdmissionController::new(store.clone(), config), policy);
        router(Arc::new(AppState {
            gate,
            notifier: None,
            metrics: detached_handle(),
        }))
    }

    fn query(identity: &str, body: &str) -> Request<Body> {
        Request::post("/api/v1/query")
            .header("x-user-id", identity)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn text_body(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn accepted_query_returns_request_id() {
        let store = MemoryCounterStore::new();
        let response = app(&store, 5, StoreFailurePolicy::FailClosed)
            .oneshot(query("alice", r#"{"prompt":"hello"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&text_body(response).await).unwrap();
        assert!(body["request_id"].as_str().unwrap().starts_with("req_"));
        assert_eq!(body["response"], QUERY_ACCEPTED);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn over_limit_gets_429_with_retry_after() {
        let store = MemoryCounterStore::new();
        let app = app(&store, 1, StoreFailurePolicy::FailClosed);

        let first = app.clone().oneshot(query("bob", r#"{"prompt":"a"}"#)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.clone().oneshot(query("bob", r#"{"prompt":"b"}"#)).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers()[header::RETRY_AFTER], "60");
        assert_eq!(text_body(second).await, "Rate limit exceeded");

        // Another identity has its own window.
        let other = app.oneshot(query("carol", r#"{"prompt":"c"}"#)).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_identity_counts_as_anonymous() {
        let store = MemoryCounterStore::new();
        let request = Request::post("/api/v1/query")
            .body(Body::from(r#"{"prompt":"hi"}"#))
            .unwrap();
        let response = app(&store, 5, StoreFailurePolicy::FailClosed).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.len("rate_limit:anonymous"), 1);
    }

    #[tokio::test]
    async fn store_outage_is_503_when_failing_closed() {
        let store = MemoryCounterStore::new();
        store.set_unreachable(true);
        let response = app(&store, 5, StoreFailurePolicy::FailClosed)
            .oneshot(query("alice", r#"{"prompt":"hi"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn store_outage_passes_when_failing_open() {
        let store = MemoryCounterStore::new();
        store.set_unreachable(true);
        let response = app(&store, 5, StoreFailurePolicy::FailOpen)
            .oneshot(query("alice", r#"{"prompt":"hi"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn bad_bodies_are_400() {
        let store = MemoryCounterStore::new();
        let app = app(&store, 10, StoreFailurePolicy::FailClosed);

        let invalid = app.clone().oneshot(query("alice", "{nope")).await.unwrap();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        assert_eq!(text_body(invalid).await, "Invalid JSON");

        let empty = app.oneshot(query("alice", r#"{"prompt":"  "}"#)).await.unwrap();
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
        assert_eq!(text_body(empty).await, "Prompt is required");
    }

    #[tokio::test]
    async fn get_on_query_is_405() {
        let store = MemoryCounterStore::new();
        let request = Request::get("/api/v1/query").body(Body::empty()).unwrap();
        let response = app(&store, 10, StoreFailurePolicy::FailClosed).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn probes_are_not_rate_limited() {
        let store = MemoryCounterStore::new();
        let app = app(&store, 1, StoreFailurePolicy::FailClosed);
        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(Request::get("/health").header("x-user-id", "probe").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let ready = app
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&text_body(ready).await).unwrap();
        assert_eq!(body["status"], "READY");
        assert_eq!(store.len("rate_limit:probe"), 0);
    }
}

//! # Hub Routes
//!
//! | Route             | Purpose |
//! |-------------------|---------|
//! | `GET /ws`         | upgrade to a push-channel session |
//! | `POST /broadcast` | fan an envelope out to every session |
//! | `GET /health`     | liveness, with the session count |
//! | `GET /ready`      | readiness |
//! | `GET /metrics`    | Prometheus text format |

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use lib_common::core::envelope::Envelope;
use lib_common::core::hub::{BroadcastReport, Hub};
use lib_common::core::session::{SessionConfig, run_session};

use crate::hub_logic::ws;
use crate::shared::headers::identity_from;
use crate::shared::health::HealthResponse;

/// # Application State
pub struct AppState {
    pub hub: Hub,
    pub session: SessionConfig,
    pub metrics: PrometheusHandle,
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/broadcast", post(broadcast_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .with_state(state)
}

/// # WebSocket Upgrade Handler
///
/// Every origin is accepted. The session runs detached once registered.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let identity = identity_from(&headers);
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = ws::split(socket);
        let tasks = run_session(&state.hub, sink, stream, identity.as_deref(), &state.session).await;
        debug!(session_id = %tasks.id, "websocket session established");
    })
}

async fn broadcast_handler(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<Envelope>,
) -> Json<BroadcastReport> {
    let report = state.hub.broadcast(&envelope).await;
    info!(kind = %envelope.kind, delivered = report.delivered, evicted = report.evicted, "broadcast applied");
    Json(report)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse::ok().with_sessions(state.hub.session_count().await))
}

async fn ready_handler() -> Json<HealthResponse> {
    Json(HealthResponse::ready())
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::metrics::detached_handle;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use lib_common::core::hub::{HubConfig, SessionHandle, SessionId};
    use serde_json::Value;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn state() -> Arc<AppState> {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        Arc::new(AppState {
            hub,
            session: SessionConfig::default(),
            metrics: detached_handle(),
        })
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_session_count() {
        let state = state();
        let (tx, _rx) = mpsc::channel(4);
        state.hub.register(SessionHandle::new(SessionId::next(), "probe", tx)).await;

        let response = router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "OK");
        assert_eq!(body["sessions"], 1);
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn ready_has_no_session_count() {
        let response = router(state())
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["status"], "READY");
        assert!(body.get("sessions").is_none());
    }

    #[tokio::test]
    async fn broadcast_endpoint_delivers_to_sessions() {
        let state = state();
        let (tx, mut rx) = mpsc::channel(4);
        state.hub.register(SessionHandle::new(SessionId::next(), "reader", tx)).await;
        let _welcome = rx.recv().await.unwrap();

        let request = Request::post("/broadcast")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"type":"note","data":{"n":1}}"#))
            .unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["delivered"], 1);
        assert_eq!(body["evicted"], 0);

        let pushed: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(pushed["type"], "note");
        assert_eq!(pushed["data"]["n"], 1);
    }

    #[tokio::test]
    async fn broadcast_rejects_envelope_without_type() {
        let request = Request::post("/broadcast")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"data":1}"#))
            .unwrap();
        let response = router(state()).oneshot(request).await.unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn plain_get_on_ws_is_not_an_upgrade() {
        let response = router(state())
            .oneshot(Request::get("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}

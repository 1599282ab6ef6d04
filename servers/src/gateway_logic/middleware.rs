//! # Gateway Middleware
//!
//! - [`admission`] guards the API routes: the request only reaches its handler
//!   when the gate admits the caller named by `X-User-ID`.
//! - [`track_metrics`] wraps every route and records count and latency.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{MatchedPath, Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, histogram};

use lib_common::admission::{CounterStore, Denial, GateOutcome};
use lib_common::resolve_identity;
use lib_common::telemetry::{API_REQUESTS_TOTAL, API_REQUEST_DURATION_SECONDS};

use crate::gateway_logic::routes::AppState;
use crate::shared::headers::identity_from;

/// Whole seconds, rounded up, for the `Retry-After` header.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 { secs + 1 } else { secs }
}

pub async fn admission<S: CounterStore>(
    State(state): State<Arc<AppState<S>>>,
    request: Request,
    next: Next,
) -> Response {
    let raw = identity_from(request.headers());
    let identity = resolve_identity(raw.as_deref());

    match state.gate.check(identity).await {
        GateOutcome::Proceed => next.run(request).await,
        GateOutcome::Denied(Denial::Rejected { retry_after }) => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after_secs(retry_after).to_string())],
            "Rate limit exceeded",
        )
            .into_response(),
        GateOutcome::Denied(Denial::Unavailable(_)) => {
            (StatusCode::SERVICE_UNAVAILABLE, "Rate limit check failed").into_response()
        }
    }
}

pub async fn track_metrics(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    counter!(API_REQUESTS_TOTAL, "method" => method.clone(), "endpoint" => endpoint.clone(), "status" => status)
        .increment(1);
    histogram!(API_REQUEST_DURATION_SECONDS, "method" => method, "endpoint" => endpoint)
        .record(start.elapsed().as_secs_f64());
    response
}

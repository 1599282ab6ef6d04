//! # Metric Names
//!
//! Every counter, gauge and histogram the workspace records, in one place so
//! the hub, the gateway and the dashboards agree on spelling. Recording goes
//! through the `metrics` facade; the servers install the Prometheus exporter.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Session registrations, labelled `status` = `connected` | `disconnected`.
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Currently registered sessions.
pub const WS_ACTIVE_CONNECTIONS: &str = "ws_active_connections";
/// Messages moved over sessions, labelled `type` and `direction`.
pub const WS_MESSAGES_TOTAL: &str = "ws_messages_total";
/// Sessions removed without a clean close, labelled `reason`.
pub const WS_EVICTIONS_TOTAL: &str = "ws_evictions_total";
/// Gateway requests, labelled `method`, `endpoint` and `status`.
pub const API_REQUESTS_TOTAL: &str = "api_requests_total";
/// Gateway request latency in seconds, labelled `method` and `endpoint`.
pub const API_REQUEST_DURATION_SECONDS: &str = "api_request_duration_seconds";
/// Admission gate results, labelled `outcome` = `allowed` | `rejected` | `unavailable`.
pub const ADMISSION_DECISIONS_TOTAL: &str = "admission_decisions_total";

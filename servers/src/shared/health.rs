//! # Health Endpoints
//!
//! `GET /health` and `GET /ready` answer as soon as the process is up. They sit
//! outside admission so probes are never rate limited.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Version reported by the probes.
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Probe body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `OK` or `READY`.
    pub status: &'static str,
    /// Time of the answer.
    pub timestamp: DateTime<Utc>,
    /// Service version.
    pub version: &'static str,
    /// Registered sessions, reported by the hub only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions: Option<usize>,
}

impl HealthResponse {
    /// Liveness answer.
    pub fn ok() -> Self {
        Self::with_status("OK")
    }

    /// Readiness answer.
    pub fn ready() -> Self {
        Self::with_status("READY")
    }

    fn with_status(status: &'static str) -> Self {
        Self {
            status,
            timestamp: Utc::now(),
            version: SERVICE_VERSION,
            sessions: None,
        }
    }

    /// Adds the hub's session count.
    pub fn with_sessions(mut self, sessions: usize) -> Self {
        self.sessions = Some(sessions);
        self
    }
}

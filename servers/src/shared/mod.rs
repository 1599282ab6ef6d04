//! Pieces both services mount the same way: health and readiness probes, the
//! Prometheus endpoint and the shutdown signal.

pub mod headers;
pub mod health;
pub mod metrics;
pub mod shutdown;

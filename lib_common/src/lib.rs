//! # lib_common
//!
//! Shared building blocks for the live update services, gated by folder:
//!
//! | Feature       | Module                     | Contents |
//! |---------------|----------------------------|----------|
//! | `core`        | [`core`]                   | connection hub, client sessions, transport boundary, envelope |
//! | `admission`   | [`admission`]              | sliding-window admission controller and gate |
//! | `connections` | [`connections`]            | Redis-backed counter store |
//! | `loggers`     | [`loggers`]                | `tracing` subscriber setup and log cleanup |
//!
//! [`identity`] and [`telemetry`] are always available.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "admission")]
pub mod admission;
#[cfg(feature = "connections")]
pub mod connections;
#[cfg(feature = "core")]
pub mod core;
pub mod identity;
#[cfg(feature = "loggers")]
pub mod loggers;
pub mod telemetry;

pub use identity::{ANONYMOUS_IDENTITY, resolve_identity};

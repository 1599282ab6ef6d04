//! # Admission Module
//!
//! Sliding-window request admission over a shared counter store.
//!
//! - **`store`**: the atomic slide step every backend implements, plus an
//!   in-process store.
//! - **`limiter`**: the per-identity decision (`is_allowed`) with validated
//!   limits and a bounded store round trip.
//! - **`gate`**: request wrapping, caller classes and the store failure policy.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Request wrapping and store failure policy.
pub mod gate;
/// The per-identity sliding window decision.
pub mod limiter;
/// Counter store abstraction and in-memory backend.
pub mod store;

pub use gate::{Denial, Gate, GateOutcome, StoreFailurePolicy};
pub use limiter::{AdmissionConfig, AdmissionConfigError, AdmissionController, AdmissionError, Clock, ManualClock, SystemClock};
pub use store::{CounterStore, MemoryCounterStore, StoreError};

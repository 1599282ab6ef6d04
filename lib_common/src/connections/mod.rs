//! # Connections Module
//!
//! This module handles persistent connections to external services.

/// Redis-backed counter store for request admission.
pub mod cache_redis;

pub use cache_redis::RedisCounterStore;

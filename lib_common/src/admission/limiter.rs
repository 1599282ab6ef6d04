//! # Sliding Window Admission Controller
//!
//! Decides whether an identity may make one more request. Each decision is a
//! single atomic slide step against the shared [`CounterStore`]: the request
//! is recorded whether or not it is admitted, and it is admitted only when the
//! count observed before recording is below the limit.
//!
//! The store call is bounded by a timeout. A store that is down or slow yields
//! [`AdmissionError`], which is never the same thing as "over the limit"; what
//! to do about it is the caller's policy (see `admission::gate`).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::admission::store::{CounterStore, StoreError};
use crate::identity::resolve_identity;

/// Prefix of every counter key; the identity follows.
pub const KEY_PREFIX: &str = "rate_limit:";
/// Default number of requests per window.
pub const DEFAULT_LIMIT: u32 = 60;
/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
/// Default bound on one store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// Source of "now" for window arithmetic, in microseconds since the epoch.
pub trait Clock: Send + Sync + 'static {
    /// Current time.
    fn now_micros(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_micros(&self) -> i64 {
        Utc::now().timestamp_micros()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Starts at `start_micros`.
    pub fn new(start_micros: i64) -> Self {
        Self {
            now: AtomicI64::new(start_micros),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let by = i64::try_from(by.as_micros()).unwrap_or(i64::MAX);
        self.now.fetch_add(by, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> i64 {
        self.now.load(Ordering::Relaxed)
    }
}

/// Invalid limit or window.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionConfigError {
    /// A limit of zero would reject everything.
    #[error("admission limit must be at least 1")]
    ZeroLimit,
    /// Store expiry has millisecond resolution.
    #[error("admission window must be at least 1ms, got {0:?}")]
    WindowTooShort(Duration),
    /// A zero timeout would fail every store call.
    #[error("store timeout must be greater than zero")]
    ZeroStoreTimeout,
}

/// # Admission Config
///
/// Validated limit and window. Fixed for the controller's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionConfig {
    limit: u32,
    window: Duration,
    store_timeout: Duration,
}

impl AdmissionConfig {
    /// Validates `limit` and `window`, using [`DEFAULT_STORE_TIMEOUT`].
    pub fn new(limit: u32, window: Duration) -> Result<Self, AdmissionConfigError> {
        if limit == 0 {
            return Err(AdmissionConfigError::ZeroLimit);
        }
        if window < Duration::from_millis(1) {
            return Err(AdmissionConfigError::WindowTooShort(window));
        }
        Ok(Self {
            limit,
            window,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        })
    }

    /// Overrides the store timeout.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Result<Self, AdmissionConfigError> {
        if timeout.is_zero() {
            return Err(AdmissionConfigError::ZeroStoreTimeout);
        }
        self.store_timeout = timeout;
        Ok(self)
    }

    /// Requests admitted per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Window length; also the retry hint given to rejected callers.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Bound on one store round trip.
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            window: DEFAULT_WINDOW,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

/// The store could not produce a decision.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// The store answered with an error.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The store did not answer in time.
    #[error("counter store did not answer within {0:?}")]
    Timeout(Duration),
}

/// # Admission Controller
///
/// One limit and window over a shared store. Cheap to clone.
#[derive(Clone)]
pub struct AdmissionController<S> {
    store: S,
    clock: Arc<dyn Clock>,
    config: AdmissionConfig,
}

impl<S> fmt::Debug for AdmissionController<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionController")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: CounterStore> AdmissionController<S> {
    /// Controller on the wall clock.
    pub fn new(store: S, config: AdmissionConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Controller on a caller-provided clock.
    pub fn with_clock(store: S, config: AdmissionConfig, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock, config }
    }

    /// Limits in force.
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// # Is Allowed
    ///
    /// Records one request for `identity` and reports whether it is within the
    /// limit. A blank identity counts against the shared `anonymous` key.
    pub async fn is_allowed(&self, identity: &str) -> Result<bool, AdmissionError> {
        let identity = resolve_identity(Some(identity));
        let key = format!("{KEY_PREFIX}{identity}");

        let now = self.clock.now_micros();
        let window_micros = i64::try_from(self.config.window.as_micros()).unwrap_or(i64::MAX);
        let window_start = now.saturating_sub(window_micros);
        let member = format!("{now}-{}", Uuid::new_v4());

        let slide = self
            .store
            .slide(&key, window_start, now, &member, self.config.window);
        let count = match tokio::time::timeout(self.config.store_timeout, slide).await {
            Ok(result) => result?,
            Err(_) => return Err(AdmissionError::Timeout(self.config.store_timeout)),
        };

        let allowed = count < u64::from(self.config.limit);
        debug!(identity = %identity, count, limit = self.config.limit, allowed, "admission decision");
        Ok(allowed)
    }
}

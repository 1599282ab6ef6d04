//! # Admission Gate
//!
//! Wraps request handling with an admission decision. Identities listed as
//! trusted (internal collectors) are checked against their own controller and
//! limit; everybody else shares the default controller.
//!
//! When the store cannot decide, [`StoreFailurePolicy`] picks the outcome:
//! fail-closed refuses the request as unavailable, fail-open lets it through.

use std::collections::HashSet;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::admission::limiter::{AdmissionController, AdmissionError};
use crate::admission::store::CounterStore;
use crate::identity::resolve_identity;
use crate::telemetry;

/// What to do when the counter store cannot produce a decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreFailurePolicy {
    /// Refuse the request.
    #[default]
    FailClosed,
    /// Admit the request unchecked.
    FailOpen,
}

impl FromStr for StoreFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-closed" | "closed" => Ok(Self::FailClosed),
            "fail-open" | "open" => Ok(Self::FailOpen),
            other => Err(format!("unknown store failure policy '{other}' (expected fail-closed or fail-open)")),
        }
    }
}

/// Why a request was not admitted.
#[derive(Debug, Error)]
pub enum Denial {
    /// Over the limit; retry once the window has passed.
    #[error("too many requests, retry after {}s", .retry_after.as_secs())]
    Rejected {
        /// Retry hint, equal to the window length.
        retry_after: Duration,
    },
    /// The store failed and the policy is fail-closed.
    #[error("admission unavailable: {0}")]
    Unavailable(#[source] AdmissionError),
}

/// Result of one gate check.
#[derive(Debug)]
pub enum GateOutcome {
    /// Run the request.
    Proceed,
    /// Do not run the request.
    Denied(Denial),
}

/// # Gate
pub struct Gate<S> {
    default: AdmissionController<S>,
    trusted: Option<(HashSet<String>, AdmissionController<S>)>,
    policy: StoreFailurePolicy,
}

impl<S: CounterStore> Gate<S> {
    /// Gate with a single caller class.
    pub fn new(default: AdmissionController<S>, policy: StoreFailurePolicy) -> Self {
        Self {
            default,
            trusted: None,
            policy,
        }
    }

    /// Routes `identities` to `controller` instead of the default one.
    pub fn with_trusted<I>(mut self, identities: I, controller: AdmissionController<S>) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let identities: HashSet<String> = identities.into_iter().map(Into::into).collect();
        self.trusted = Some((identities, controller));
        self
    }

    /// Store failure policy in force.
    pub fn policy(&self) -> StoreFailurePolicy {
        self.policy
    }

    /// Controller responsible for `identity`.
    pub fn controller_for(&self, identity: &str) -> &AdmissionController<S> {
        match &self.trusted {
            Some((ids, controller)) if ids.contains(identity) => controller,
            _ => &self.default,
        }
    }

    /// # Check
    ///
    /// Records one request for `identity` and decides its outcome.
    pub async fn check(&self, identity: &str) -> GateOutcome {
        let identity = resolve_identity(Some(identity));
        let controller = self.controller_for(identity);

        match controller.is_allowed(identity).await {
            Ok(true) => {
                counter!(telemetry::ADMISSION_DECISIONS_TOTAL, "outcome" => "allowed").increment(1);
                GateOutcome::Proceed
            }
            Ok(false) => {
                counter!(telemetry::ADMISSION_DECISIONS_TOTAL, "outcome" => "rejected").increment(1);
                debug!(identity = %identity, "request over limit");
                GateOutcome::Denied(Denial::Rejected {
                    retry_after: controller.config().window(),
                })
            }
            Err(e) => {
                counter!(telemetry::ADMISSION_DECISIONS_TOTAL, "outcome" => "unavailable").increment(1);
                match self.policy {
                    StoreFailurePolicy::FailOpen => {
                        warn!(identity = %identity, error = %e, "admission store failed, admitting unchecked");
                        GateOutcome::Proceed
                    }
                    StoreFailurePolicy::FailClosed => {
                        warn!(identity = %identity, error = %e, "admission store failed, refusing request");
                        GateOutcome::Denied(Denial::Unavailable(e))
                    }
                }
            }
        }
    }

    /// Runs `operation` only if `identity` is admitted.
    pub async fn run<F, Fut, T>(&self, identity: &str, operation: F) -> Result<T, Denial>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match self.check(identity).await {
            GateOutcome::Proceed => Ok(operation().await),
            GateOutcome::Denied(denial) => Err(denial),
        }
    }
}

//! Circuit opening rules
//!
//! A [`Rule`] owns the counter keys of one protected resource and decides,
//! from the current failure and request totals, whether the circuit should
//! open. Rules are stateless: totals always come from the counter store.

pub mod max_failures;
pub mod percentage;
pub mod types;

pub use max_failures::MaxFailuresRule;
pub use percentage::PercentageFailuresRule;
pub use types::RuleConfig;

use serde::Serialize;
use std::fmt;

/// Policy deciding when accumulated failures open the circuit
pub trait Rule: fmt::Debug + Send + Sync {
    /// Key of the failure counter; `None` disables failure counting
    fn failure_cache_key(&self) -> Option<&str>;

    /// Key of the request counter; `None` disables request counting
    fn request_cache_key(&self) -> Option<&str> {
        None
    }

    /// Must be a pure function of its arguments
    fn should_open_circuit(&self, total_failures: u64, total_requests: u64) -> bool;

    fn should_increase_failure_count(&self) -> bool {
        self.failure_cache_key().is_some()
    }

    fn should_increase_request_count(&self) -> bool {
        self.request_cache_key().is_some()
    }

    /// Diagnostic record logged after each failure increase
    fn describe_failure_increase(&self, total_failures: u64, total_requests: u64) -> FailureReport;
}

/// Snapshot of a rule's counters after a failure was recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    /// Failure counter key
    pub key: Option<String>,
    pub total_failures: u64,
    pub total_requests: u64,
    /// Threshold the totals are measured against
    pub threshold: Threshold,
}

/// Threshold of the rule that produced a [`FailureReport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Threshold {
    MaxFailures {
        max_failures: u64,
    },
    Percentage {
        max_failures_percentage: u64,
        min_accepted_requests: u64,
        percentage_failures: u64,
    },
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = self.key.as_deref().unwrap_or("-");
        match &self.threshold {
            Threshold::MaxFailures { max_failures } => write!(
                f,
                "Increase failure for: {} - max failures {} - total requests {} - total failures {}",
                key, max_failures, self.total_requests, self.total_failures
            ),
            Threshold::Percentage {
                max_failures_percentage,
                min_accepted_requests,
                percentage_failures,
            } => write!(
                f,
                "Increase failure for: {} - max failures {}% - total failures {} - \
                 min accepted requests {} - total requests {} - percentage failures {}%",
                key,
                max_failures_percentage,
                self.total_failures,
                min_accepted_requests,
                self.total_requests,
                percentage_failures
            ),
        }
    }
}

use super::{FailureReport, Rule, Threshold};

/// Opens the circuit once the share of failed requests reaches a percentage
///
/// The rule never opens while the request counter is at or below
/// `min_accepted_requests`, so a handful of early failures cannot trip it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PercentageFailuresRule {
    max_failures_percentage: u64,
    min_accepted_requests: u64,
    failure_cache_key: String,
    request_cache_key: String,
}

impl PercentageFailuresRule {
    pub fn new(
        max_failures_percentage: u64,
        failure_cache_key: impl Into<String>,
        min_accepted_requests: u64,
        request_cache_key: impl Into<String>,
    ) -> Self {
        Self {
            max_failures_percentage,
            min_accepted_requests,
            failure_cache_key: failure_cache_key.into(),
            request_cache_key: request_cache_key.into(),
        }
    }

    pub fn max_failures_percentage(&self) -> u64 {
        self.max_failures_percentage
    }

    pub fn min_accepted_requests(&self) -> u64 {
        self.min_accepted_requests
    }

    /// Integer percentage, rounded down
    pub fn percentage_failures(total_failures: u64, total_requests: u64) -> u64 {
        if total_requests > 0 {
            total_failures.saturating_mul(100) / total_requests
        } else {
            0
        }
    }
}

impl Rule for PercentageFailuresRule {
    fn failure_cache_key(&self) -> Option<&str> {
        Some(&self.failure_cache_key)
    }

    fn request_cache_key(&self) -> Option<&str> {
        Some(&self.request_cache_key)
    }

    fn should_open_circuit(&self, total_failures: u64, total_requests: u64) -> bool {
        let percentage_failures = Self::percentage_failures(total_failures, total_requests);

        total_requests > self.min_accepted_requests
            && percentage_failures >= self.max_failures_percentage
    }

    fn describe_failure_increase(&self, total_failures: u64, total_requests: u64) -> FailureReport {
        FailureReport {
            key: Some(self.failure_cache_key.clone()),
            total_failures,
            total_requests,
            threshold: Threshold::Percentage {
                max_failures_percentage: self.max_failures_percentage,
                min_accepted_requests: self.min_accepted_requests,
                percentage_failures: Self::percentage_failures(total_failures, total_requests),
            },
        }
    }
}

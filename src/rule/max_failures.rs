use super::{FailureReport, Rule, Threshold};

/// Opens the circuit once the failure counter reaches an absolute limit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaxFailuresRule {
    max_failures: u64,
    failure_cache_key: String,
}

impl MaxFailuresRule {
    pub fn new(max_failures: u64, failure_cache_key: impl Into<String>) -> Self {
        Self {
            max_failures,
            failure_cache_key: failure_cache_key.into(),
        }
    }

    pub fn max_failures(&self) -> u64 {
        self.max_failures
    }
}

impl Rule for MaxFailuresRule {
    fn failure_cache_key(&self) -> Option<&str> {
        Some(&self.failure_cache_key)
    }

    fn should_open_circuit(&self, total_failures: u64, _total_requests: u64) -> bool {
        total_failures >= self.max_failures
    }

    fn describe_failure_increase(&self, total_failures: u64, total_requests: u64) -> FailureReport {
        FailureReport {
            key: Some(self.failure_cache_key.clone()),
            total_failures,
            total_requests,
            threshold: Threshold::MaxFailures {
                max_failures: self.max_failures,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> MaxFailuresRule {
        MaxFailuresRule::new(10, "fail")
    }

    #[test]
    fn test_should_not_open_circuit() {
        assert!(!rule().should_open_circuit(5, 5));
    }

    #[test]
    fn test_should_open_circuit() {
        assert!(rule().should_open_circuit(20, 5));
    }

    #[test]
    fn test_threshold_boundary() {
        let rule = MaxFailuresRule::new(3, "fail");
        assert!(!rule.should_open_circuit(2, 0));
        assert!(rule.should_open_circuit(3, 0));
    }

    #[test]
    fn test_counts_failures_but_not_requests() {
        let rule = rule();
        assert!(rule.should_increase_failure_count());
        assert!(!rule.should_increase_request_count());
        assert_eq!(rule.request_cache_key(), None);
    }

    #[test]
    fn test_failure_report() {
        let report = rule().describe_failure_increase(4, 7);
        assert_eq!(report.key.as_deref(), Some("fail"));
        assert_eq!(report.threshold, Threshold::MaxFailures { max_failures: 10 });
        assert_eq!(
            report.to_string(),
            "Increase failure for: fail - max failures 10 - total requests 7 - total failures 4"
        );
    }
}

use super::{MaxFailuresRule, PercentageFailuresRule, Rule};
use crate::error::{FallbackError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Rule configuration
///
/// Thresholds are optional at the serde level so that a missing value is
/// reported as a configuration error naming the rule, not a parse error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleConfig {
    /// Open after an absolute number of failures
    MaxFailures {
        /// Failure counter key
        failure_cache_key: String,
        #[serde(default)]
        max_failures: Option<u64>,
    },
    /// Open once failed requests reach a percentage of all requests
    PercentageFailures {
        /// Failure counter key
        failure_cache_key: String,
        /// Request counter key (defaults to `circuit_request_<failure_cache_key>`)
        #[serde(default)]
        request_cache_key: Option<String>,
        #[serde(default)]
        max_failures_percentage: Option<u64>,
        #[serde(default)]
        min_accepted_requests: Option<u64>,
    },
}

impl RuleConfig {
    pub fn failure_cache_key(&self) -> &str {
        match self {
            RuleConfig::MaxFailures {
                failure_cache_key, ..
            }
            | RuleConfig::PercentageFailures {
                failure_cache_key, ..
            } => failure_cache_key,
        }
    }

    /// Build the rule, failing on missing or out of range thresholds
    pub fn build(&self) -> Result<Arc<dyn Rule>> {
        let failure_cache_key = self.failure_cache_key();
        if failure_cache_key.is_empty() {
            return Err(FallbackError::Config(
                "failure_cache_key cannot be empty".to_string(),
            ));
        }

        match self {
            RuleConfig::MaxFailures { max_failures, .. } => {
                let max_failures = max_failures.ok_or_else(|| {
                    FallbackError::Config(format!(
                        "max_failures is required for rule: {}",
                        failure_cache_key
                    ))
                })?;
                if max_failures == 0 {
                    return Err(FallbackError::Config(format!(
                        "max_failures must be > 0 for rule: {}",
                        failure_cache_key
                    )));
                }

                Ok(Arc::new(MaxFailuresRule::new(max_failures, failure_cache_key)))
            }
            RuleConfig::PercentageFailures {
                request_cache_key,
                max_failures_percentage,
                min_accepted_requests,
                ..
            } => {
                let max_failures_percentage = max_failures_percentage.ok_or_else(|| {
                    FallbackError::Config(format!(
                        "max_failures_percentage is required for rule: {}",
                        failure_cache_key
                    ))
                })?;
                if max_failures_percentage == 0 || max_failures_percentage > 100 {
                    return Err(FallbackError::Config(format!(
                        "max_failures_percentage must be between 1 and 100 for rule: {}",
                        failure_cache_key
                    )));
                }

                let min_accepted_requests = min_accepted_requests.ok_or_else(|| {
                    FallbackError::Config(format!(
                        "min_accepted_requests is required for rule: {}",
                        failure_cache_key
                    ))
                })?;

                let request_cache_key = match request_cache_key {
                    Some(key) if key == failure_cache_key => {
                        return Err(FallbackError::Config(format!(
                            "request_cache_key must differ from failure_cache_key for rule: {}",
                            failure_cache_key
                        )));
                    }
                    Some(key) if !key.is_empty() => key.clone(),
                    _ => format!("circuit_request_{}", failure_cache_key),
                };

                Ok(Arc::new(PercentageFailuresRule::new(
                    max_failures_percentage,
                    failure_cache_key,
                    min_accepted_requests,
                    request_cache_key,
                )))
            }
        }
    }
}

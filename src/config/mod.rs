use crate::error::{FallbackError, Result};
use crate::rule::RuleConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Main fallbacks configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbacksConfig {
    /// Counter store shared by every breaker
    #[serde(default)]
    pub store: StoreConfig,
    /// Circuit breaker definitions
    #[serde(default)]
    pub breakers: Vec<BreakerConfig>,
}

/// Counter store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// In-process store, state is not shared between processes
    #[default]
    Local,
    /// Redis store shared by every process using the same URL and prefix
    Redis {
        /// Redis connection URL
        url: String,
        /// Prefix for counter keys
        #[serde(default = "default_redis_prefix")]
        prefix: String,
    },
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Name used to look the breaker up
    pub name: String,
    /// Rule deciding when the circuit opens
    pub rule: RuleConfig,
    /// Lifetime of the failure and request counters (no expiration if absent)
    #[serde(default)]
    pub failure_timeout_secs: Option<u64>,
    /// How long the circuit stays open (open until reset if absent)
    #[serde(default)]
    pub circuit_timeout_secs: Option<u64>,
}

/// Longest accepted counter or circuit timeout (ten years)
pub const MAX_TIMEOUT_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn default_redis_prefix() -> String {
    "fallbacks:".to_string()
}

impl BreakerConfig {
    pub fn failure_timeout(&self) -> Option<Duration> {
        self.failure_timeout_secs.map(Duration::from_secs)
    }

    pub fn circuit_timeout(&self) -> Option<Duration> {
        self.circuit_timeout_secs.map(Duration::from_secs)
    }
}

impl FallbacksConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FallbackError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| FallbackError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if let StoreConfig::Redis { url, .. } = &self.store {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(FallbackError::Config(format!(
                    "Redis URL must start with redis:// or rediss://: {}",
                    url
                )));
            }
        }

        let mut names = HashSet::new();
        for breaker in &self.breakers {
            if breaker.name.is_empty() {
                return Err(FallbackError::Config(
                    "Circuit breaker name cannot be empty".to_string(),
                ));
            }

            if !names.insert(breaker.name.as_str()) {
                return Err(FallbackError::Config(format!(
                    "Duplicate circuit breaker name: {}",
                    breaker.name
                )));
            }

            for (field, timeout) in [
                ("failure_timeout_secs", breaker.failure_timeout_secs),
                ("circuit_timeout_secs", breaker.circuit_timeout_secs),
            ] {
                match timeout {
                    Some(0) => {
                        return Err(FallbackError::Config(format!(
                            "{} must be > 0 for breaker: {}",
                            field, breaker.name
                        )));
                    }
                    Some(secs) if secs > MAX_TIMEOUT_SECS => {
                        return Err(FallbackError::Config(format!(
                            "{} must be at most {} for breaker: {}",
                            field, MAX_TIMEOUT_SECS, breaker.name
                        )));
                    }
                    _ => {}
                }
            }

            breaker.rule.build().map_err(|e| match e {
                FallbackError::Config(msg) => {
                    FallbackError::Config(format!("{} (breaker: {})", msg, breaker.name))
                }
                other => other,
            })?;
        }

        Ok(())
    }

    /// Create a default configuration for testing
    pub fn default_config() -> Self {
        Self {
            store: StoreConfig::Local,
            breakers: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn max_failures_breaker(name: &str, key: &str) -> BreakerConfig {
        BreakerConfig {
            name: name.to_string(),
            rule: RuleConfig::MaxFailures {
                failure_cache_key: key.to_string(),
                max_failures: Some(3),
            },
            failure_timeout_secs: Some(60),
            circuit_timeout_secs: Some(30),
        }
    }

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
store:
  type: redis
  url: "redis://127.0.0.1:6379"

breakers:
  - name: payments
    rule:
      type: max_failures
      failure_cache_key: payments
      max_failures: 5
    failure_timeout_secs: 60
    circuit_timeout_secs: 30
  - name: search
    rule:
      type: percentage_failures
      failure_cache_key: search
      request_cache_key: search_requests
      max_failures_percentage: 50
      min_accepted_requests: 10
"#;

        let config = FallbacksConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.store,
            StoreConfig::Redis {
                url: "redis://127.0.0.1:6379".to_string(),
                prefix: "fallbacks:".to_string(),
            }
        );
        assert_eq!(config.breakers.len(), 2);
        assert_eq!(config.breakers[0].name, "payments");
        assert_eq!(
            config.breakers[0].failure_timeout(),
            Some(Duration::from_secs(60))
        );
        assert_eq!(config.breakers[1].circuit_timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let yaml = r#"
breakers: []
"#;

        let config = FallbacksConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.store, StoreConfig::Local);
        assert!(config.breakers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_duplicate_names() {
        let config = FallbacksConfig {
            store: StoreConfig::Local,
            breakers: vec![
                max_failures_breaker("payments", "payments"),
                max_failures_breaker("payments", "other"),
            ],
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate circuit breaker name"));
    }

    #[test]
    fn test_validate_empty_name() {
        let config = FallbacksConfig {
            store: StoreConfig::Local,
            breakers: vec![max_failures_breaker("", "payments")],
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_redis_url() {
        let config = FallbacksConfig {
            store: StoreConfig::Redis {
                url: "localhost:6379".to_string(),
                prefix: default_redis_prefix(),
            },
            breakers: vec![],
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_oversized_timeout() {
        let yaml = r#"
breakers:
  - name: payments
    rule:
      type: max_failures
      failure_cache_key: payments
      max_failures: 2
    failure_timeout_secs: 18446744073709551615
"#;

        let config = FallbacksConfig::from_yaml(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("failure_timeout_secs must be at most"));

        let mut breaker = max_failures_breaker("payments", "payments");
        breaker.circuit_timeout_secs = Some(MAX_TIMEOUT_SECS);
        let config = FallbacksConfig {
            store: StoreConfig::Local,
            breakers: vec![breaker],
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut breaker = max_failures_breaker("payments", "payments");
        breaker.circuit_timeout_secs = Some(0);
        let config = FallbacksConfig {
            store: StoreConfig::Local,
            breakers: vec![breaker],
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_reports_breaker_name() {
        let yaml = r#"
breakers:
  - name: search
    rule:
      type: percentage_failures
      failure_cache_key: search
      max_failures_percentage: 50
"#;

        let config = FallbacksConfig::from_yaml(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_accepted_requests is required"));
        assert!(err.to_string().contains("breaker: search"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "breakers:\n  - name: payments\n    rule:\n      type: max_failures\n      failure_cache_key: payments\n      max_failures: 2"
        )
        .unwrap();

        let config = FallbacksConfig::from_file(file.path()).unwrap();
        assert_eq!(config.breakers.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_missing_file() {
        let err = FallbacksConfig::from_file("/nonexistent/fallbacks.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}

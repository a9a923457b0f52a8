use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed, calls run normally
    Closed,
    /// Circuit is open, calls are rejected without running
    Open,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
        }
    }
}

type Matcher = Arc<dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync>;

/// Set of error kinds counted as circuit failures
///
/// An empty filter counts every error. Otherwise an error counts if it, or
/// any error in its `source()` chain, matches one of the registered kinds.
#[derive(Clone, Default)]
pub struct FailureFilter {
    matchers: Vec<Matcher>,
}

impl FailureFilter {
    /// Count every error
    pub fn all() -> Self {
        Self::default()
    }

    /// Count errors of type `E`
    pub fn of<E>(mut self) -> Self
    where
        E: StdError + 'static,
    {
        self.matchers
            .push(Arc::new(|error: &(dyn StdError + 'static)| error.is::<E>()));
        self
    }

    /// Count errors accepted by a predicate
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&(dyn StdError + 'static)) -> bool + Send + Sync + 'static,
    {
        self.matchers.push(Arc::new(predicate));
        self
    }

    pub fn catches_all(&self) -> bool {
        self.matchers.is_empty()
    }

    /// Whether the error counts as a circuit failure
    pub fn is_catchable(&self, error: &(dyn StdError + 'static)) -> bool {
        if self.matchers.is_empty() {
            return true;
        }

        let mut current = Some(error);
        while let Some(err) = current {
            if self.matchers.iter().any(|matcher| matcher(err)) {
                return true;
            }
            current = err.source();
        }
        false
    }
}

impl fmt::Debug for FailureFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureFilter")
            .field("matchers", &self.matchers.len())
            .finish()
    }
}

/// Point-in-time view of a circuit, read from the counter store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitStatus {
    pub circuit_key: String,
    pub state: CircuitState,
    pub total_failures: u64,
    pub total_requests: u64,
}

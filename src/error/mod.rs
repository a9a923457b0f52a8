use thiserror::Error;

/// Result type for fallbacks operations
pub type Result<T> = std::result::Result<T, FallbackError>;

/// Errors raised by a counter store backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Counter not found: {0}")]
    CounterMissing(String),

    #[error("Invalid counter value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Rejection by an open circuit
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Circuit open: {circuit_key}")]
pub struct CircuitOpenError {
    pub circuit_key: String,
}

/// Error returned from a guarded call
///
/// `Open` is returned both when the circuit was already open on entry and
/// when this call's failure breached the rule's threshold. `Operation`
/// carries the original error unmodified.
#[derive(Error, Debug)]
pub enum CircuitError<E> {
    #[error(transparent)]
    Open(#[from] CircuitOpenError),

    #[error("Operation failed: {0}")]
    Operation(E),
}

impl<E> CircuitError<E> {
    /// Whether the call was rejected by an open circuit
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open(_))
    }

    /// Take the original operation error, if any
    pub fn into_operation(self) -> Option<E> {
        match self {
            CircuitError::Operation(e) => Some(e),
            CircuitError::Open(_) => None,
        }
    }
}

/// Crate level error types
#[derive(Error, Debug)]
pub enum FallbackError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Unknown circuit breaker: {0}")]
    UnknownBreaker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

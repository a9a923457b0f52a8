//! Circuit breakers whose state lives in a shared counter store
//!
//! ```rust,no_run
//! use fallbacks::{CircuitBreaker, LocalCounterStore, MaxFailuresRule};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let breaker = CircuitBreaker::builder(
//!         Arc::new(MaxFailuresRule::new(5, "payments")),
//!         Arc::new(LocalCounterStore::new()),
//!     )
//!     .failure_timeout(Duration::from_secs(60))
//!     .circuit_timeout(Duration::from_secs(30))
//!     .catch::<std::io::Error>()
//!     .build();
//!
//!     let result = breaker
//!         .call(|| async { Ok::<_, std::io::Error>("charged") })
//!         .await;
//!     assert!(result.is_ok());
//! }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod rule;
pub mod store;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerRegistry, CircuitGuard, CircuitState, CircuitStatus,
    FailureFilter, Guarded,
};
pub use error::{CircuitError, CircuitOpenError, FallbackError, Result, StoreError};
pub use rule::{FailureReport, MaxFailuresRule, PercentageFailuresRule, Rule};
pub use store::{CounterStore, LocalCounterStore, RedisCounterStore};

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fallbacks=info".into()),
        )
        .with_target(false)
        .compact()
        .init();
}

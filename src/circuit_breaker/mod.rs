pub mod breaker;
pub mod registry;
pub mod types;

pub use breaker::{CircuitBreaker, CircuitBreakerBuilder, CircuitGuard, Guarded};
pub use registry::CircuitBreakerRegistry;
pub use types::{CircuitState, CircuitStatus, FailureFilter};

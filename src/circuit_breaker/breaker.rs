use super::types::{CircuitState, CircuitStatus, FailureFilter};
use crate::error::{CircuitError, CircuitOpenError, StoreError};
use crate::rule::Rule;
use crate::store::CounterStore;
use metrics::counter;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Circuit breaker guarding calls to one protected resource
///
/// The breaker only holds configuration. The circuit flag and the failure
/// and request counters live in the [`CounterStore`], so every breaker built
/// from an equivalent rule and the same store shares one circuit, across
/// tasks and across processes.
///
/// Store errors never fail a guarded call: they are logged and the circuit
/// is treated as closed.
#[derive(Clone)]
pub struct CircuitBreaker {
    /// Decision policy, owns the counter keys
    rule: Arc<dyn Rule>,
    /// Shared counter backend
    store: Arc<dyn CounterStore>,
    /// Lifetime of the failure and request counters
    failure_timeout: Option<Duration>,
    /// Lifetime of the circuit open flag
    circuit_timeout: Option<Duration>,
    /// `circuit_` + failure counter key
    circuit_key: String,
    /// Errors counted as failures
    catchable: FailureFilter,
}

/// Builder for [`CircuitBreaker`]
pub struct CircuitBreakerBuilder {
    rule: Arc<dyn Rule>,
    store: Arc<dyn CounterStore>,
    failure_timeout: Option<Duration>,
    circuit_timeout: Option<Duration>,
    catchable: FailureFilter,
}

impl CircuitBreakerBuilder {
    /// Expire the failure and request counters after `timeout`
    pub fn failure_timeout(mut self, timeout: Duration) -> Self {
        self.failure_timeout = Some(timeout);
        self
    }

    /// Keep the circuit open for `timeout` once it opens
    pub fn circuit_timeout(mut self, timeout: Duration) -> Self {
        self.circuit_timeout = Some(timeout);
        self
    }

    /// Count errors of type `E` as failures
    ///
    /// Once any kind is registered, errors of other kinds pass through
    /// without touching the failure counter.
    pub fn catch<E>(mut self) -> Self
    where
        E: StdError + 'static,
    {
        self.catchable = self.catchable.of::<E>();
        self
    }

    /// Count errors accepted by `predicate` as failures
    pub fn catch_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&(dyn StdError + 'static)) -> bool + Send + Sync + 'static,
    {
        self.catchable = self.catchable.when(predicate);
        self
    }

    /// Replace the failure filter
    pub fn catchable(mut self, filter: FailureFilter) -> Self {
        self.catchable = filter;
        self
    }

    pub fn build(self) -> CircuitBreaker {
        let circuit_key = format!("circuit_{}", self.rule.failure_cache_key().unwrap_or_default());

        debug!(
            circuit = %circuit_key,
            failure_timeout = ?self.failure_timeout,
            circuit_timeout = ?self.circuit_timeout,
            "Creating circuit breaker"
        );

        CircuitBreaker {
            rule: self.rule,
            store: self.store,
            failure_timeout: self.failure_timeout,
            circuit_timeout: self.circuit_timeout,
            circuit_key,
            catchable: self.catchable,
        }
    }
}

impl CircuitBreaker {
    /// Create a breaker with no expirations that counts every error
    pub fn new(rule: Arc<dyn Rule>, store: Arc<dyn CounterStore>) -> Self {
        Self::builder(rule, store).build()
    }

    pub fn builder(rule: Arc<dyn Rule>, store: Arc<dyn CounterStore>) -> CircuitBreakerBuilder {
        CircuitBreakerBuilder {
            rule,
            store,
            failure_timeout: None,
            circuit_timeout: None,
            catchable: FailureFilter::all(),
        }
    }

    pub fn circuit_key(&self) -> &str {
        &self.circuit_key
    }

    pub fn rule(&self) -> &Arc<dyn Rule> {
        &self.rule
    }

    pub fn failure_timeout(&self) -> Option<Duration> {
        self.failure_timeout
    }

    pub fn circuit_timeout(&self) -> Option<Duration> {
        self.circuit_timeout
    }

    /// Whether the circuit flag is set in the store
    pub async fn is_circuit_open(&self) -> Result<bool, StoreError> {
        let flag = self.store.get(&self.circuit_key).await?;
        Ok(flag.map(|value| value != 0).unwrap_or(false))
    }

    pub async fn state(&self) -> Result<CircuitState, StoreError> {
        if self.is_circuit_open().await? {
            Ok(CircuitState::Open)
        } else {
            Ok(CircuitState::Closed)
        }
    }

    /// Current failure counter, 0 if absent
    pub async fn total_failures(&self) -> Result<u64, StoreError> {
        self.counter(self.rule.failure_cache_key()).await
    }

    /// Current request counter, 0 if absent
    pub async fn total_requests(&self) -> Result<u64, StoreError> {
        self.counter(self.rule.request_cache_key()).await
    }

    pub async fn status(&self) -> Result<CircuitStatus, StoreError> {
        Ok(CircuitStatus {
            circuit_key: self.circuit_key.clone(),
            state: self.state().await?,
            total_failures: self.total_failures().await?,
            total_requests: self.total_requests().await?,
        })
    }

    /// Open the circuit and drop both counters
    ///
    /// The counters are deleted so that a counter recreated without a
    /// timeout by a racing `incr` cannot reopen the circuit as soon as the
    /// circuit flag expires.
    pub async fn open_circuit(&self) -> Result<(), StoreError> {
        self.store
            .set(&self.circuit_key, 1, self.circuit_timeout)
            .await?;

        if let Some(key) = self.rule.failure_cache_key() {
            self.store.delete(key).await?;
        }
        if let Some(key) = self.rule.request_cache_key() {
            self.store.delete(key).await?;
        }

        error!(
            circuit = %self.circuit_key,
            failure_key = self.rule.failure_cache_key().unwrap_or_default(),
            circuit_timeout = ?self.circuit_timeout,
            "Open circuit"
        );
        counter!("circuit_breaker_opened_total", "circuit" => self.circuit_key.clone())
            .increment(1);

        Ok(())
    }

    /// Close the circuit and drop both counters
    pub async fn reset(&self) -> Result<(), StoreError> {
        self.store.delete(&self.circuit_key).await?;
        if let Some(key) = self.rule.failure_cache_key() {
            self.store.delete(key).await?;
        }
        if let Some(key) = self.rule.request_cache_key() {
            self.store.delete(key).await?;
        }

        info!(circuit = %self.circuit_key, "Circuit reset");
        Ok(())
    }

    /// Begin a guarded call
    ///
    /// Fails fast if the circuit is open; the returned guard must be passed
    /// the outcome of the call through [`CircuitGuard::exit`].
    pub async fn enter(&self) -> Result<CircuitGuard<'_>, CircuitOpenError> {
        if self.circuit_is_open().await {
            debug!(circuit = %self.circuit_key, "Circuit open, rejecting call");
            counter!("circuit_breaker_rejected_total", "circuit" => self.circuit_key.clone())
                .increment(1);
            return Err(self.open_error());
        }

        Ok(CircuitGuard { breaker: self })
    }

    /// Run `operation` inside the guarded-call protocol
    ///
    /// The error type must implement [`std::error::Error`]. `anyhow::Error`
    /// and `Box<dyn Error + Send + Sync>` do not; convert them first, for
    /// instance with [`std::io::Error::other`].
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StdError + 'static,
    {
        let guard = self.enter().await?;
        let outcome = operation().await;
        guard.exit(outcome).await
    }

    /// Wrap `function` so every invocation runs inside the guarded-call protocol
    pub fn guard<F>(&self, function: F) -> Guarded<F> {
        Guarded {
            breaker: self.clone(),
            function,
        }
    }

    fn open_error(&self) -> CircuitOpenError {
        CircuitOpenError {
            circuit_key: self.circuit_key.clone(),
        }
    }

    async fn counter(&self, key: Option<&str>) -> Result<u64, StoreError> {
        match key {
            Some(key) => Ok(self.store.get(key).await?.unwrap_or(0).max(0) as u64),
            None => Ok(0),
        }
    }

    /// Circuit flag, treating a store error as closed
    async fn circuit_is_open(&self) -> bool {
        match self.is_circuit_open().await {
            Ok(open) => open,
            Err(e) => {
                warn!(
                    circuit = %self.circuit_key,
                    error = %e,
                    "Failed to read circuit state, treating circuit as closed"
                );
                false
            }
        }
    }

    /// Counter value, treating a store error as 0
    async fn counter_or_zero(&self, key: Option<&str>) -> u64 {
        match self.counter(key).await {
            Ok(total) => total,
            Err(e) => {
                warn!(circuit = %self.circuit_key, error = %e, "Failed to read counter");
                0
            }
        }
    }

    async fn increase_request_count(&self) {
        if !self.rule.should_increase_request_count() || self.circuit_is_open().await {
            return;
        }
        let Some(request_key) = self.rule.request_cache_key() else {
            return;
        };

        if let Err(e) = self.try_increase_request_count(request_key).await {
            warn!(
                circuit = %self.circuit_key,
                key = request_key,
                error = %e,
                "Failed to increase request count"
            );
        }
    }

    async fn try_increase_request_count(&self, request_key: &str) -> Result<(), StoreError> {
        self.store.add(request_key, 0, self.failure_timeout).await?;

        // Both counters must expire together for the failure percentage to hold
        if self.rule.should_increase_failure_count() {
            if let Some(failure_key) = self.rule.failure_cache_key() {
                self.store.add(failure_key, 0, self.failure_timeout).await?;
            }
        }

        self.store.incr(request_key, 1).await?;
        Ok(())
    }

    async fn increase_failure_count(&self) {
        if !self.rule.should_increase_failure_count() || self.circuit_is_open().await {
            return;
        }
        let Some(failure_key) = self.rule.failure_cache_key() else {
            return;
        };

        // The counter may expire between add and incr; the increment is then
        // lost and the circuit opens later than it would have.
        let total_failures = match self.try_increase_failure_count(failure_key).await {
            Ok(total) => total.max(0) as u64,
            Err(StoreError::CounterMissing(_)) => {
                debug!(
                    circuit = %self.circuit_key,
                    key = failure_key,
                    "Failure counter expired before increment"
                );
                return;
            }
            Err(e) => {
                warn!(
                    circuit = %self.circuit_key,
                    key = failure_key,
                    error = %e,
                    "Failed to increase failure count"
                );
                return;
            }
        };

        let total_requests = self.counter_or_zero(self.rule.request_cache_key()).await;
        let report = self
            .rule
            .describe_failure_increase(total_failures, total_requests);
        info!(
            circuit = %self.circuit_key,
            total_failures = report.total_failures,
            total_requests = report.total_requests,
            "{}",
            report
        );
        counter!("circuit_breaker_failures_total", "circuit" => self.circuit_key.clone())
            .increment(1);
    }

    async fn try_increase_failure_count(&self, failure_key: &str) -> Result<i64, StoreError> {
        self.store.add(failure_key, 0, self.failure_timeout).await?;
        self.store.incr(failure_key, 1).await
    }

    async fn record_failure<T, E>(&self, error: E) -> Result<T, CircuitError<E>> {
        // Another caller opened the circuit while this call was running
        if self.circuit_is_open().await {
            return Err(self.open_error().into());
        }

        self.increase_failure_count().await;

        let total_failures = self.counter_or_zero(self.rule.failure_cache_key()).await;
        let total_requests = self.counter_or_zero(self.rule.request_cache_key()).await;

        if self.rule.should_open_circuit(total_failures, total_requests) {
            if let Err(e) = self.open_circuit().await {
                error!(circuit = %self.circuit_key, error = %e, "Failed to open circuit");
            }

            info!(
                circuit = %self.circuit_key,
                total_failures,
                total_requests,
                "Max failures exceeded by: {}",
                self.rule.failure_cache_key().unwrap_or_default()
            );

            return Err(self.open_error().into());
        }

        Err(CircuitError::Operation(error))
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("rule", &self.rule)
            .field("circuit_key", &self.circuit_key)
            .field("failure_timeout", &self.failure_timeout)
            .field("circuit_timeout", &self.circuit_timeout)
            .field("catchable", &self.catchable)
            .finish()
    }
}

/// An entered guarded call, obtained from [`CircuitBreaker::enter`]
#[must_use = "the outcome of the call must be passed to `exit`"]
#[derive(Debug)]
pub struct CircuitGuard<'a> {
    breaker: &'a CircuitBreaker,
}

impl CircuitGuard<'_> {
    /// Finish the guarded call with its outcome
    ///
    /// Success and non-catchable errors pass through unchanged. A catchable
    /// error is counted and passed through, unless it opens the circuit, in
    /// which case [`CircuitError::Open`] replaces it.
    ///
    /// Same error type requirement as [`CircuitBreaker::call`].
    pub async fn exit<T, E>(self, outcome: Result<T, E>) -> Result<T, CircuitError<E>>
    where
        E: StdError + 'static,
    {
        let breaker = self.breaker;
        breaker.increase_request_count().await;

        match outcome {
            Ok(value) => Ok(value),
            Err(error) if !breaker.catchable.is_catchable(&error) => {
                debug!(
                    circuit = %breaker.circuit_key,
                    error = %error,
                    "Error not counted as circuit failure"
                );
                Err(CircuitError::Operation(error))
            }
            Err(error) => breaker.record_failure(error).await,
        }
    }
}

/// A function wrapped by [`CircuitBreaker::guard`]
#[derive(Debug, Clone)]
pub struct Guarded<F> {
    breaker: CircuitBreaker,
    function: F,
}

impl<F> Guarded<F> {
    /// Invoke the wrapped function through the breaker
    ///
    /// Multiple arguments are passed as a tuple.
    pub async fn call<A, Fut, T, E>(&self, args: A) -> Result<T, CircuitError<E>>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StdError + 'static,
    {
        self.breaker.call(|| (self.function)(args)).await
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

use async_trait::async_trait;
use fallbacks::{
    CircuitBreaker, CircuitError, CircuitState, CounterStore, LocalCounterStore, MaxFailuresRule,
    PercentageFailuresRule, StoreError,
};
use futures::future::join_all;
use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, PartialEq)]
struct BackendError(&'static str);

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backend error: {}", self.0)
    }
}

impl std::error::Error for BackendError {}

async fn fail() -> Result<&'static str, BackendError> {
    Err(BackendError("unavailable"))
}

async fn succeed() -> Result<&'static str, BackendError> {
    Ok("ok")
}

/// Store wrapper counting every write
#[derive(Clone, Default)]
struct CountingStore {
    inner: LocalCounterStore,
    writes: Arc<AtomicUsize>,
}

impl CountingStore {
    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CounterStore for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value, ttl).await
    }

    async fn add(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<bool, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.add(key, value, ttl).await
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.incr(key, delta).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key).await
    }
}

/// Store whose backend is always down
struct UnavailableStore;

#[async_trait]
impl CounterStore for UnavailableStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        Err(StoreError::InvalidValue {
            key: key.to_string(),
            value: "unreachable".to_string(),
        })
    }

    async fn set(&self, key: &str, _value: i64, _ttl: Option<Duration>) -> Result<(), StoreError> {
        Err(StoreError::CounterMissing(key.to_string()))
    }

    async fn add(&self, key: &str, _value: i64, _ttl: Option<Duration>) -> Result<bool, StoreError> {
        Err(StoreError::CounterMissing(key.to_string()))
    }

    async fn incr(&self, key: &str, _delta: i64) -> Result<i64, StoreError> {
        Err(StoreError::CounterMissing(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        Err(StoreError::CounterMissing(key.to_string()))
    }
}

#[tokio::test]
async fn test_max_failures_end_to_end() {
    let store = LocalCounterStore::new();
    let breaker = CircuitBreaker::new(
        Arc::new(MaxFailuresRule::new(2, "inventory")),
        Arc::new(store.clone()),
    );

    // Call 1: counted, original error propagates
    let result = breaker.call(fail).await;
    assert!(matches!(
        result,
        Err(CircuitError::Operation(BackendError("unavailable")))
    ));
    assert_eq!(store.get("inventory").await.unwrap(), Some(1));
    assert_eq!(breaker.state().await.unwrap(), CircuitState::Closed);

    // Call 2: reaches the threshold, the open error replaces the original
    let result = breaker.call(fail).await;
    assert!(matches!(result, Err(CircuitError::Open(_))));
    assert_eq!(breaker.state().await.unwrap(), CircuitState::Open);
    assert_eq!(store.get("inventory").await.unwrap(), None);

    // Call 3: rejected without running, counters untouched
    let mut ran = false;
    let result = breaker
        .call(|| {
            ran = true;
            succeed()
        })
        .await;
    assert!(matches!(result, Err(CircuitError::Open(e)) if e.circuit_key == "circuit_inventory"));
    assert!(!ran);
    assert_eq!(store.get("inventory").await.unwrap(), None);
}

#[tokio::test]
async fn test_open_circuit_rejects_without_writes() {
    let store = CountingStore::default();
    store.inner.set("circuit_inventory", 1, None).await.unwrap();

    let breaker = CircuitBreaker::new(
        Arc::new(PercentageFailuresRule::new(50, "inventory", 2, "inventory_requests")),
        Arc::new(store.clone()),
    );

    for _ in 0..3 {
        assert!(breaker.call(fail).await.unwrap_err().is_open());
    }
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn test_percentage_end_to_end() {
    let store = LocalCounterStore::new();
    let breaker = CircuitBreaker::builder(
        Arc::new(PercentageFailuresRule::new(50, "search", 3, "search_requests")),
        Arc::new(store.clone()),
    )
    .failure_timeout(Duration::from_secs(60))
    .circuit_timeout(Duration::from_secs(60))
    .build();

    // Plenty of failures, but never above the minimum sample size
    for _ in 0..3 {
        assert!(!breaker.call(fail).await.unwrap_err().is_open());
    }
    assert_eq!(breaker.total_failures().await.unwrap(), 3);
    assert_eq!(breaker.total_requests().await.unwrap(), 3);

    // 4 requests, 4 failures: 100% and 4 > 3
    assert!(breaker.call(fail).await.unwrap_err().is_open());
    assert_eq!(breaker.total_failures().await.unwrap(), 0);
    assert_eq!(breaker.total_requests().await.unwrap(), 0);
}

#[tokio::test]
async fn test_successes_dilute_failure_percentage() {
    let breaker = CircuitBreaker::new(
        Arc::new(PercentageFailuresRule::new(50, "search", 2, "search_requests")),
        Arc::new(LocalCounterStore::new()),
    );

    for _ in 0..4 {
        breaker.call(succeed).await.unwrap();
    }
    // 2 of 6 failed: 33%
    for _ in 0..2 {
        assert!(!breaker.call(fail).await.unwrap_err().is_open());
    }
    // 3 of 7: 42%
    assert!(!breaker.call(fail).await.unwrap_err().is_open());
    // 4 of 8: 50%
    assert!(breaker.call(fail).await.unwrap_err().is_open());
}

#[tokio::test]
async fn test_uncatchable_errors_pass_through() {
    let store = LocalCounterStore::new();
    let breaker = CircuitBreaker::builder(
        Arc::new(MaxFailuresRule::new(1, "inventory")),
        Arc::new(store.clone()),
    )
    .catch::<std::io::Error>()
    .build();

    for _ in 0..3 {
        let result = breaker.call(fail).await;
        assert!(matches!(
            result,
            Err(CircuitError::Operation(BackendError("unavailable")))
        ));
    }

    assert_eq!(breaker.state().await.unwrap(), CircuitState::Closed);
    assert_eq!(store.get("inventory").await.unwrap(), None);
}

#[tokio::test]
async fn test_breakers_share_state_through_store() {
    let store: Arc<dyn CounterStore> = Arc::new(LocalCounterStore::new());

    let first = CircuitBreaker::new(Arc::new(MaxFailuresRule::new(2, "payments")), store.clone());
    let second = CircuitBreaker::new(Arc::new(MaxFailuresRule::new(2, "payments")), store.clone());

    let _ = first.call(fail).await;
    assert!(second.call(fail).await.unwrap_err().is_open());
    assert!(first.call(succeed).await.unwrap_err().is_open());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_are_all_counted() {
    let store = LocalCounterStore::new();
    let breaker = Arc::new(CircuitBreaker::new(
        Arc::new(MaxFailuresRule::new(1_000, "concurrent")),
        Arc::new(store.clone()),
    ));

    let tasks = (0..100).map(|_| {
        let breaker = breaker.clone();
        let delay = Duration::from_micros(rand::thread_rng().gen_range(0..500));
        tokio::spawn(async move {
            breaker
                .call(|| async move {
                    tokio::time::sleep(delay).await;
                    fail().await
                })
                .await
                .map(|_| ())
        })
    });

    for result in join_all(tasks).await {
        assert!(matches!(
            result.unwrap(),
            Err(CircuitError::Operation(BackendError("unavailable")))
        ));
    }

    assert_eq!(store.get("concurrent").await.unwrap(), Some(100));
}

#[tokio::test]
async fn test_store_outage_fails_open() {
    let breaker = CircuitBreaker::new(
        Arc::new(MaxFailuresRule::new(1, "inventory")),
        Arc::new(UnavailableStore),
    );

    assert!(matches!(breaker.call(succeed).await, Ok("ok")));
    assert!(matches!(
        breaker.call(fail).await,
        Err(CircuitError::Operation(BackendError("unavailable")))
    ));
    assert!(breaker.is_circuit_open().await.is_err());
}

#[tokio::test]
async fn test_circuit_closes_after_timeout() {
    let breaker = CircuitBreaker::builder(
        Arc::new(MaxFailuresRule::new(1, "inventory")),
        Arc::new(LocalCounterStore::new()),
    )
    .circuit_timeout(Duration::from_millis(50))
    .build();

    assert!(breaker.call(fail).await.unwrap_err().is_open());
    assert!(breaker.call(succeed).await.unwrap_err().is_open());

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(breaker.state().await.unwrap(), CircuitState::Closed);
    assert_eq!(breaker.call(succeed).await.unwrap(), "ok");
}

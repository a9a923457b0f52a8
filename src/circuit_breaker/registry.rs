use super::breaker::CircuitBreaker;
use super::types::{CircuitState, CircuitStatus};
use crate::config::{BreakerConfig, FallbacksConfig};
use crate::error::{FallbackError, Result};
use crate::store::{self, CounterStore};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Named circuit breakers sharing one counter store
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    /// Circuit breakers by name
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    /// Store handed to breakers built from configuration
    store: Arc<dyn CounterStore>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            breakers: Arc::new(DashMap::new()),
            store,
        }
    }

    /// Validate the configuration, connect its store and build every breaker
    pub async fn from_config(config: &FallbacksConfig) -> Result<Self> {
        config.validate()?;

        let store = store::connect(&config.store).await?;
        let registry = Self::new(store);
        for breaker in &config.breakers {
            registry.register_config(breaker)?;
        }

        info!("Loaded {} circuit breakers", registry.len());
        Ok(registry)
    }

    /// Build a breaker from configuration and register it
    pub fn register_config(&self, config: &BreakerConfig) -> Result<Arc<CircuitBreaker>> {
        let rule = config.rule.build()?;

        let mut builder = CircuitBreaker::builder(rule, self.store.clone());
        if let Some(timeout) = config.failure_timeout() {
            builder = builder.failure_timeout(timeout);
        }
        if let Some(timeout) = config.circuit_timeout() {
            builder = builder.circuit_timeout(timeout);
        }

        Ok(self.register(config.name.clone(), builder.build()))
    }

    /// Register a breaker, replacing any breaker with the same name
    pub fn register(&self, name: impl Into<String>, breaker: CircuitBreaker) -> Arc<CircuitBreaker> {
        let name = name.into();
        let breaker = Arc::new(breaker);
        debug!(name = %name, circuit = %breaker.circuit_key(), "Registering circuit breaker");

        if self.breakers.insert(name.clone(), breaker.clone()).is_some() {
            warn!(name = %name, "Replaced existing circuit breaker");
        }
        breaker
    }

    /// Look a breaker up by name
    pub fn get(&self, name: &str) -> Result<Arc<CircuitBreaker>> {
        self.breakers
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FallbackError::UnknownBreaker(name.to_string()))
    }

    /// Get all registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Get the state of a named circuit
    pub async fn state(&self, name: &str) -> Result<CircuitState> {
        Ok(self.get(name)?.state().await?)
    }

    /// Status of every circuit, sorted by name
    pub async fn all_status(&self) -> Result<Vec<(String, CircuitStatus)>> {
        // Collect first so no map guard is held across an await
        let mut breakers: Vec<(String, Arc<CircuitBreaker>)> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        breakers.sort_by(|a, b| a.0.cmp(&b.0));

        let mut results = Vec::with_capacity(breakers.len());
        for (name, breaker) in breakers {
            results.push((name, breaker.status().await?));
        }
        Ok(results)
    }

    /// Close a named circuit and drop its counters
    pub async fn reset(&self, name: &str) -> Result<()> {
        self.get(name)?.reset().await?;
        Ok(())
    }
}

impl fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.names())
            .finish()
    }
}

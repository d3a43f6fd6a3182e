/// Adapter registry using ArcSwap
///
/// Adapters are registered at process start and looked up lock-free by key.
/// Registering swaps the whole map, so in-flight dispatches keep the adapter
/// set they started with.

use crate::error::AdapterError;
use crate::wiring::{FilteredSink, FilteredSource};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Load/send capability of one backend
///
/// Each call carries the adapter's whole batch for one direction, keyed by
/// workflow input/output name.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Load the referenced data for every entry of the batch
    async fn load_data(
        &self,
        sources: HashMap<String, FilteredSource>,
    ) -> anyhow::Result<HashMap<String, Value>>;

    /// Send the values to their sinks; returns the values that were not sent
    async fn send_data(
        &self,
        sinks: HashMap<String, FilteredSink>,
        data: HashMap<String, Value>,
    ) -> anyhow::Result<HashMap<String, Value>>;
}

/// Lock-free registry mapping adapter keys to adapters
pub struct AdapterRegistry {
    adapters: ArcSwap<HashMap<String, Arc<dyn Adapter>>>,
}

impl AdapterRegistry {
    /// Create an empty registry
    ///
    /// Every dispatch fails with `Unregistered` until adapters are added.
    pub fn new() -> Self {
        Self {
            adapters: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Register (or replace) the adapter for a key
    ///
    /// Uses `rcu`, so concurrent registrations never lose each other's
    /// entries and readers never block.
    pub fn register(&self, adapter_key: impl Into<String>, adapter: Arc<dyn Adapter>) {
        let adapter_key = adapter_key.into();
        self.adapters.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(adapter_key.clone(), Arc::clone(&adapter));
            next
        });
        tracing::info!("🔌 Registered adapter: {}", adapter_key);
    }

    /// Look up one adapter by key
    ///
    /// Returns `None` when nothing is registered under the key.
    pub fn get(&self, adapter_key: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.load().get(adapter_key).cloned()
    }

    /// Look up every key, failing on the first one without an adapter
    ///
    /// All lookups read the same snapshot of the registry.
    pub fn resolve_all<'a>(
        &self,
        adapter_keys: impl IntoIterator<Item = &'a str>,
    ) -> Result<HashMap<String, Arc<dyn Adapter>>, AdapterError> {
        let adapters = self.adapters.load();
        adapter_keys
            .into_iter()
            .map(|key| {
                adapters
                    .get(key)
                    .map(|adapter| (key.to_string(), Arc::clone(adapter)))
                    .ok_or_else(|| AdapterError::Unregistered(key.to_string()))
            })
            .collect()
    }

    /// Registered adapter keys, sorted
    pub fn adapter_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.adapters.load().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.adapter_keys())
            .finish()
    }
}

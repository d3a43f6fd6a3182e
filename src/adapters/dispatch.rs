/// Adapter dispatch
///
/// Partitions wiring entries by adapter id and hands every adapter its whole
/// batch in a single call per direction. Groups run one after another in
/// adapter-key order; adapter errors are wrapped with the adapter key and
/// passed on unchanged.

use crate::adapters::registry::AdapterRegistry;
use crate::error::AdapterError;
use crate::wiring::{FilteredSink, FilteredSource, WorkflowWiring};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Fans wiring entries out to the registered adapters
///
/// Cheap to clone; clones share the same registry.
#[derive(Debug, Clone)]
pub struct AdapterDispatcher {
    registry: Arc<AdapterRegistry>,
}

impl AdapterDispatcher {
    /// Create a dispatcher over a shared registry
    ///
    /// Adapters registered later are picked up by the next dispatch.
    pub fn new(registry: Arc<AdapterRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Load every input that does not fall back to its default value
    ///
    /// Returns the loaded values keyed by workflow input name.
    pub async fn load_inputs(
        &self,
        wiring: &WorkflowWiring,
    ) -> Result<HashMap<String, Value>, AdapterError> {
        let mut batches: BTreeMap<&str, HashMap<String, FilteredSource>> = BTreeMap::new();
        for input in wiring.input_wirings.iter().filter(|w| !w.use_default_value) {
            batches
                .entry(input.target.adapter_id.as_str())
                .or_default()
                .insert(
                    input.workflow_input_name.clone(),
                    FilteredSource::from(&input.target),
                );
        }

        let adapters = self.registry.resolve_all(batches.keys().copied())?;

        let mut loaded = HashMap::new();
        for (adapter_key, sources) in batches {
            let Some(adapter) = adapters.get(adapter_key) else {
                return Err(AdapterError::Unregistered(adapter_key.to_string()));
            };
            tracing::debug!(
                "Loading {} inputs through adapter '{}'",
                sources.len(),
                adapter_key
            );

            let values = adapter
                .load_data(sources)
                .await
                .map_err(|source| AdapterError::Load {
                    adapter_key: adapter_key.to_string(),
                    source,
                })?;
            loaded.extend(values);
        }

        Ok(loaded)
    }

    /// Send each output value to the adapter its wiring names
    ///
    /// Returns the values that were not sent: values without an output
    /// wiring plus whatever the adapters hand back as unsent.
    pub async fn send_outputs(
        &self,
        wiring: &WorkflowWiring,
        mut values: HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>, AdapterError> {
        let mut batches: BTreeMap<&str, (HashMap<String, FilteredSink>, HashMap<String, Value>)> =
            BTreeMap::new();
        for output in &wiring.output_wirings {
            let Some(value) = values.remove(&output.workflow_output_name) else {
                tracing::debug!(
                    "No value produced for wired output '{}'",
                    output.workflow_output_name
                );
                continue;
            };

            let (sinks, data) = batches.entry(output.target.adapter_id.as_str()).or_default();
            sinks.insert(
                output.workflow_output_name.clone(),
                FilteredSink::from(&output.target),
            );
            data.insert(output.workflow_output_name.clone(), value);
        }

        let adapters = self.registry.resolve_all(batches.keys().copied())?;

        // Values without an output wiring are never sent
        let mut not_sent = values;
        for (adapter_key, (sinks, data)) in batches {
            let Some(adapter) = adapters.get(adapter_key) else {
                return Err(AdapterError::Unregistered(adapter_key.to_string()));
            };
            tracing::debug!("Sending {} outputs through adapter '{}'", sinks.len(), adapter_key);

            let unsent = adapter
                .send_data(sinks, data)
                .await
                .map_err(|source| AdapterError::Send {
                    adapter_key: adapter_key.to_string(),
                    source,
                })?;
            not_sent.extend(unsent);
        }

        Ok(not_sent)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::adapters::registry::Adapter;
    use crate::wiring::{InputWiring, OutputWiring};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Adapter that records every batch it receives
    #[derive(Default)]
    pub(crate) struct RecordingAdapter {
        pub(crate) loads: Mutex<Vec<HashMap<String, FilteredSource>>>,
        pub(crate) sends: Mutex<Vec<HashMap<String, Value>>>,
        /// Outputs handed back as unsent
        pub(crate) reject: Vec<String>,
        pub(crate) fail: bool,
    }

    #[async_trait]
    impl Adapter for RecordingAdapter {
        async fn load_data(
            &self,
            sources: HashMap<String, FilteredSource>,
        ) -> anyhow::Result<HashMap<String, Value>> {
            if self.fail {
                anyhow::bail!("backend unavailable");
            }
            let values = sources
                .iter()
                .map(|(name, source)| (name.clone(), json!(source.ref_id)))
                .collect();
            self.loads.lock().unwrap().push(sources);
            Ok(values)
        }

        async fn send_data(
            &self,
            _sinks: HashMap<String, FilteredSink>,
            data: HashMap<String, Value>,
        ) -> anyhow::Result<HashMap<String, Value>> {
            if self.fail {
                anyhow::bail!("backend unavailable");
            }
            let unsent = data
                .iter()
                .filter(|(name, _)| self.reject.contains(name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            self.sends.lock().unwrap().push(data);
            Ok(unsent)
        }
    }

    fn input(name: &str, adapter_id: &str, ref_id: &str) -> InputWiring {
        serde_json::from_value(json!({
            "workflow_input_name": name,
            "adapter_id": adapter_id,
            "ref_id": ref_id,
        }))
        .unwrap()
    }

    fn output(name: &str, adapter_id: &str, ref_id: &str) -> OutputWiring {
        serde_json::from_value(json!({
            "workflow_output_name": name,
            "adapter_id": adapter_id,
            "ref_id": ref_id,
        }))
        .unwrap()
    }

    fn dispatcher(adapters: &[(&str, Arc<RecordingAdapter>)]) -> AdapterDispatcher {
        let registry = AdapterRegistry::new();
        for (key, adapter) in adapters {
            registry.register(*key, Arc::clone(adapter) as Arc<dyn Adapter>);
        }
        AdapterDispatcher::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn each_adapter_loads_its_own_batch_once() {
        let sql = Arc::new(RecordingAdapter::default());
        let rest = Arc::new(RecordingAdapter::default());
        let dispatcher = dispatcher(&[("sql-adapter", sql.clone()), ("rest-adapter", rest.clone())]);

        let mut skipped = input("skipped", "sql-adapter", "never_loaded");
        skipped.use_default_value = true;
        let wiring = WorkflowWiring {
            input_wirings: vec![
                input("a", "sql-adapter", "table_a"),
                input("b", "rest-adapter", "endpoint_b"),
                input("c", "sql-adapter", "table_c"),
                skipped,
            ],
            output_wirings: vec![],
        };

        let loaded = dispatcher.load_inputs(&wiring).await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded["a"], json!("table_a"));
        assert_eq!(loaded["b"], json!("endpoint_b"));
        assert!(!loaded.contains_key("skipped"));

        let sql_loads = sql.loads.lock().unwrap();
        assert_eq!(sql_loads.len(), 1);
        let mut names: Vec<_> = sql_loads[0].keys().cloned().collect();
        names.sort();
        assert_eq!(names, vec!["a", "c"]);

        let rest_loads = rest.loads.lock().unwrap();
        assert_eq!(rest_loads.len(), 1);
        assert_eq!(rest_loads[0].len(), 1);
    }

    #[tokio::test]
    async fn unregistered_adapter_fails_before_any_load() {
        let sql = Arc::new(RecordingAdapter::default());
        let dispatcher = dispatcher(&[("sql-adapter", sql.clone())]);
        let wiring = WorkflowWiring {
            input_wirings: vec![
                input("a", "sql-adapter", "table_a"),
                input("b", "blob-adapter", "bucket_b"),
            ],
            output_wirings: vec![],
        };

        match dispatcher.load_inputs(&wiring).await {
            Err(AdapterError::Unregistered(key)) => assert_eq!(key, "blob-adapter"),
            other => panic!("expected Unregistered, got {:?}", other),
        }
        assert!(sql.loads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn adapter_failures_propagate_with_the_key() {
        let failing = Arc::new(RecordingAdapter {
            fail: true,
            ..Default::default()
        });
        let dispatcher = dispatcher(&[("sql-adapter", failing)]);
        let wiring = WorkflowWiring {
            input_wirings: vec![input("a", "sql-adapter", "table_a")],
            output_wirings: vec![output("x", "sql-adapter", "table_x")],
        };

        match dispatcher.load_inputs(&wiring).await {
            Err(AdapterError::Load { adapter_key, source }) => {
                assert_eq!(adapter_key, "sql-adapter");
                assert_eq!(source.to_string(), "backend unavailable");
            }
            other => panic!("expected Load error, got {:?}", other),
        }

        let values = HashMap::from([("x".to_string(), json!(1))]);
        assert!(matches!(
            dispatcher.send_outputs(&wiring, values).await,
            Err(AdapterError::Send { .. })
        ));
    }

    #[tokio::test]
    async fn send_returns_unwired_and_rejected_values() {
        let sql = Arc::new(RecordingAdapter {
            reject: vec!["rejected".to_string()],
            ..Default::default()
        });
        let dispatcher = dispatcher(&[("sql-adapter", sql.clone())]);
        let wiring = WorkflowWiring {
            input_wirings: vec![],
            output_wirings: vec![
                output("stored", "sql-adapter", "table_a"),
                output("rejected", "sql-adapter", "table_b"),
                output("missing", "sql-adapter", "table_c"),
            ],
        };
        let values = HashMap::from([
            ("stored".to_string(), json!([1, 2, 3])),
            ("rejected".to_string(), json!({"a": 1})),
            ("unwired".to_string(), json!("loose")),
        ]);

        let not_sent = dispatcher.send_outputs(&wiring, values).await.unwrap();
        let mut names: Vec<_> = not_sent.keys().cloned().collect();
        names.sort();
        assert_eq!(names, vec!["rejected", "unwired"]);

        let sends = sql.sends.lock().unwrap();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].len(), 2);
        assert!(!sends[0].contains_key("missing"));
    }
}

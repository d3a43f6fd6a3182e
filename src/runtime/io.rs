/// Workflow input/output plumbing
///
/// Wraps a workflow execution: virtual wiring entries are resolved against
/// the stored structure, then inputs are loaded before the run and outputs
/// are sent after it through the registered adapters.

use crate::adapters::AdapterDispatcher;
use crate::error::WorkflowIoError;
use crate::structure::StructureService;
use crate::wiring::{resolve_virtual_wirings, WorkflowWiring};
use serde_json::Value;
use std::collections::HashMap;

/// Data movement around one workflow execution
///
/// Holds the structure store for virtual resolution and the dispatcher for
/// the adapter calls.
#[derive(Debug, Clone)]
pub struct WorkflowIo {
    structure: StructureService,
    dispatcher: AdapterDispatcher,
}

impl WorkflowIo {
    /// Combine a structure store with an adapter dispatcher
    pub fn new(structure: StructureService, dispatcher: AdapterDispatcher) -> Self {
        Self {
            structure,
            dispatcher,
        }
    }

    /// Resolve the wiring in place and load every input
    ///
    /// Returns the loaded values keyed by workflow input name. On a
    /// resolution error no adapter is called.
    pub async fn load_inputs(
        &self,
        wiring: &mut WorkflowWiring,
    ) -> Result<HashMap<String, Value>, WorkflowIoError> {
        resolve_virtual_wirings(&self.structure, wiring).await?;
        let loaded = self.dispatcher.load_inputs(wiring).await?;

        tracing::debug!("Loaded {} workflow inputs", loaded.len());
        Ok(loaded)
    }

    /// Resolve the wiring in place and send the outputs
    ///
    /// Returns the values no adapter accepted.
    pub async fn send_outputs(
        &self,
        wiring: &mut WorkflowWiring,
        values: HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>, WorkflowIoError> {
        resolve_virtual_wirings(&self.structure, wiring).await?;
        let not_sent = self.dispatcher.send_outputs(wiring, values).await?;

        tracing::debug!("{} workflow outputs were not sent", not_sent.len());
        Ok(not_sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::dispatch::tests::RecordingAdapter;
    use crate::adapters::{Adapter, AdapterRegistry};
    use crate::error::{AdapterError, StructureError, WiringError};
    use crate::structure::storage::tests::populated_service;
    use crate::structure::{Sink, Source};
    use crate::wiring::VIRTUAL_STRUCTURE_ADAPTER_KEY;
    use serde_json::json;
    use std::sync::Arc;

    struct Fixture {
        io: WorkflowIo,
        sql: Arc<RecordingAdapter>,
        rest: Arc<RecordingAdapter>,
        service: StructureService,
    }

    async fn fixture() -> Fixture {
        let service = populated_service().await;
        let sql = Arc::new(RecordingAdapter::default());
        let rest = Arc::new(RecordingAdapter::default());

        let registry = AdapterRegistry::new();
        registry.register("sql-adapter", Arc::clone(&sql) as Arc<dyn Adapter>);
        registry.register("rest-adapter", Arc::clone(&rest) as Arc<dyn Adapter>);
        let io = WorkflowIo::new(service.clone(), AdapterDispatcher::new(Arc::new(registry)));

        Fixture {
            io,
            sql,
            rest,
            service,
        }
    }

    async fn source_id(service: &StructureService, external_id: &str) -> String {
        service
            .get_all::<Source>()
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.external_id == external_id)
            .unwrap()
            .id
            .to_string()
    }

    async fn sink_id(service: &StructureService, external_id: &str) -> String {
        service
            .get_all::<Sink>()
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.external_id == external_id)
            .unwrap()
            .id
            .to_string()
    }

    #[tokio::test]
    async fn virtual_inputs_are_loaded_from_their_adapters() {
        let f = fixture().await;
        let pump = source_id(&f.service, "EnergyUsage_PumpSystem_StorageTank").await;
        let waterworks = source_id(&f.service, "EnergyConsumption_Waterworks1").await;

        let mut wiring: WorkflowWiring = serde_json::from_value(json!({
            "input_wirings": [
                {
                    "workflow_input_name": "pump_energy",
                    "adapter_id": VIRTUAL_STRUCTURE_ADAPTER_KEY,
                    "ref_id": pump,
                    "type": "multitsframe",
                    "filters": { "timestamp_from": "2024-01-01T00:00:00Z" }
                },
                {
                    "workflow_input_name": "plant_energy",
                    "adapter_id": VIRTUAL_STRUCTURE_ADAPTER_KEY,
                    "ref_id": waterworks,
                    "type": "metadata(any)"
                }
            ]
        }))
        .unwrap();

        let loaded = f.io.load_inputs(&mut wiring).await.unwrap();
        assert_eq!(loaded["pump_energy"], json!("energy_usage_pump_system"));
        assert_eq!(loaded["plant_energy"], json!("root.waterworks1"));

        let sql_loads = f.sql.loads.lock().unwrap();
        assert_eq!(sql_loads.len(), 1);
        let filters = &sql_loads[0]["pump_energy"].filters;
        assert_eq!(filters["metrics"], json!("pump_system_energy"));
        assert_eq!(filters["timestamp_from"], json!("2024-01-01T00:00:00Z"));
        assert_eq!(f.rest.loads.lock().unwrap().len(), 1);

        assert_eq!(wiring.input_wirings[0].target.adapter_id, "sql-adapter");
    }

    #[tokio::test]
    async fn outputs_are_sent_to_resolved_sinks() {
        let f = fixture().await;
        let score = sink_id(&f.service, "AnomalyScore_EnergyConsumption_SinglePump_StorageTank").await;

        let mut wiring: WorkflowWiring = serde_json::from_value(json!({
            "output_wirings": [
                {
                    "workflow_output_name": "score",
                    "adapter_id": VIRTUAL_STRUCTURE_ADAPTER_KEY,
                    "ref_id": score,
                    "type": "timeseries(float)"
                }
            ]
        }))
        .unwrap();
        let values = HashMap::from([
            ("score".to_string(), json!([0.1, 0.9])),
            ("debug".to_string(), json!("not wired")),
        ]);

        let not_sent = f.io.send_outputs(&mut wiring, values).await.unwrap();
        assert_eq!(not_sent.len(), 1);
        assert!(not_sent.contains_key("debug"));

        let sends = f.sql.sends.lock().unwrap();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0]["score"], json!([0.1, 0.9]));
    }

    #[tokio::test]
    async fn failures_surface_as_typed_errors() {
        let f = fixture().await;

        let mut unknown: WorkflowWiring = serde_json::from_value(json!({
            "input_wirings": [{
                "workflow_input_name": "x",
                "adapter_id": VIRTUAL_STRUCTURE_ADAPTER_KEY,
                "ref_id": uuid::Uuid::new_v4().to_string(),
                "type": "multitsframe"
            }]
        }))
        .unwrap();
        assert!(matches!(
            f.io.load_inputs(&mut unknown).await,
            Err(WorkflowIoError::Wiring(WiringError::Structure(
                StructureError::NotFound(_)
            )))
        ));

        let mut unregistered: WorkflowWiring = serde_json::from_value(json!({
            "input_wirings": [{
                "workflow_input_name": "x",
                "adapter_id": "blob-adapter",
                "ref_id": "bucket/key"
            }]
        }))
        .unwrap();
        assert!(matches!(
            f.io.load_inputs(&mut unregistered).await,
            Err(WorkflowIoError::Adapter(AdapterError::Unregistered(_)))
        ));
    }
}

/// Virtual wiring resolution
///
/// Entries whose adapter id is the virtual structure marker carry the stored
/// id of a Source (inputs) or Sink (outputs) as `ref_id`. Resolution fetches
/// those entities in one batch per direction and rewrites the entries in
/// place to the entity's own adapter, reference and filters. All other
/// entries are left untouched.

use crate::error::{StructureError, WiringDirection, WiringError};
use crate::structure::{Endpoint, Sink, Source, StoredEntity, StructureService};
use crate::wiring::types::{RefIdType, WiringTarget, WorkflowWiring};
use std::collections::HashMap;
use uuid::Uuid;

/// Rewrite every virtual entry of the wiring to its concrete adapter reference
///
/// The wiring is only modified once both directions resolved; on error it is
/// left as it was.
pub async fn resolve_virtual_wirings(
    service: &StructureService,
    wiring: &mut WorkflowWiring,
) -> Result<(), WiringError> {
    let inputs = virtual_entries(wiring.input_wirings.iter().map(|w| &w.target))?;
    let outputs = virtual_entries(wiring.output_wirings.iter().map(|w| &w.target))?;
    if inputs.is_empty() && outputs.is_empty() {
        return Ok(());
    }

    let sources = fetch_endpoints::<Source>(service, WiringDirection::Input, &inputs).await?;
    let sinks = fetch_endpoints::<Sink>(service, WiringDirection::Output, &outputs).await?;

    for (index, source) in inputs.iter().map(|(index, _)| *index).zip(sources) {
        rewire(&mut wiring.input_wirings[index].target, &source);
    }
    for (index, sink) in outputs.iter().map(|(index, _)| *index).zip(sinks) {
        rewire(&mut wiring.output_wirings[index].target, &sink);
    }

    tracing::debug!(
        "Resolved {} virtual input and {} virtual output wirings",
        inputs.len(),
        outputs.len()
    );
    Ok(())
}

/// `(index, stored id)` of every virtual entry, in wiring order
fn virtual_entries<'a>(
    targets: impl Iterator<Item = &'a WiringTarget>,
) -> Result<Vec<(usize, Uuid)>, WiringError> {
    targets
        .enumerate()
        .filter(|(_, target)| target.is_virtual())
        .map(|(index, target)| -> Result<(usize, Uuid), WiringError> {
            let id = Uuid::parse_str(target.ref_id.trim()).map_err(|_| {
                StructureError::NotFound(format!(
                    "Virtual wiring reference '{}' is not a stored structure id",
                    target.ref_id
                ))
            })?;
            Ok((index, id))
        })
        .collect()
}

/// Batch-fetch the referenced entities and line them up with the entries
async fn fetch_endpoints<E: StoredEntity + Clone>(
    service: &StructureService,
    direction: WiringDirection,
    entries: &[(usize, Uuid)],
) -> Result<Vec<E>, WiringError> {
    if entries.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = entries.iter().map(|(_, id)| *id).collect();
    let resolved: HashMap<Uuid, E> = service.get_by_ids(&ids).await?;

    let ordered: Vec<E> = ids.iter().filter_map(|id| resolved.get(id).cloned()).collect();
    if ordered.len() != entries.len() {
        let err = WiringError::ResolutionMismatch {
            direction,
            expected: entries.len(),
            found: ordered.len(),
        };
        tracing::error!("❌ {}", err);
        return Err(err);
    }

    Ok(ordered)
}

/// Point the entry at the entity's adapter; preset filters win over caller filters
fn rewire<E: Endpoint>(target: &mut WiringTarget, endpoint: &E) {
    target.adapter_id = endpoint.adapter_key().to_string();

    if target
        .data_type
        .is_some_and(|data_type| data_type.is_metadata_reference())
    {
        target.ref_id = endpoint.metadata_ref_id().to_string();
        target.ref_key = endpoint.ref_key().map(str::to_string);
        target.ref_id_type = Some(RefIdType::ThingNode);
    } else {
        target.ref_id = endpoint.adapter_ref_id().to_string();
    }

    for (key, value) in endpoint.preset_filters() {
        target.filters.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::storage::tests::populated_service;
    use crate::wiring::types::{InputWiring, OutputWiring, VIRTUAL_STRUCTURE_ADAPTER_KEY};
    use serde_json::json;

    async fn source_id(service: &StructureService, external_id: &str) -> Uuid {
        service
            .get_all::<Source>()
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.external_id == external_id)
            .unwrap()
            .id
    }

    async fn sink_id(service: &StructureService, external_id: &str) -> Uuid {
        service
            .get_all::<Sink>()
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.external_id == external_id)
            .unwrap()
            .id
    }

    fn input(name: &str, adapter_id: &str, ref_id: &str, data_type: &str) -> InputWiring {
        serde_json::from_value(json!({
            "workflow_input_name": name,
            "adapter_id": adapter_id,
            "ref_id": ref_id,
            "type": data_type,
        }))
        .unwrap()
    }

    fn output(name: &str, adapter_id: &str, ref_id: &str, data_type: &str) -> OutputWiring {
        serde_json::from_value(json!({
            "workflow_output_name": name,
            "adapter_id": adapter_id,
            "ref_id": ref_id,
            "type": data_type,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn virtual_input_points_at_source_with_preset_filters() {
        let service = populated_service().await;
        let id = source_id(&service, "EnergyConsumption_SinglePump_StorageTank").await;

        let mut entry = input(
            "consumption",
            VIRTUAL_STRUCTURE_ADAPTER_KEY,
            &id.to_string(),
            "timeseries(float)",
        );
        entry.target.filters.insert("unit".into(), json!("MWh"));
        entry.target.filters.insert("timestamp_from".into(), json!("2024-01-01"));
        let mut wiring = WorkflowWiring {
            input_wirings: vec![entry],
            output_wirings: vec![],
        };

        resolve_virtual_wirings(&service, &mut wiring).await.unwrap();

        let target = &wiring.input_wirings[0].target;
        assert_eq!(target.adapter_id, "sql-adapter");
        assert_eq!(target.ref_id, "energy_consumption_single_pump");
        assert_eq!(target.filters["unit"], json!("kWh"));
        assert_eq!(target.filters["timestamp_from"], json!("2024-01-01"));
        assert_eq!(target.ref_id_type, None);
    }

    #[tokio::test]
    async fn metadata_entries_reference_the_thing_node() {
        let service = populated_service().await;
        let source = source_id(&service, "EnergyConsumption_Waterworks1").await;
        let sink = sink_id(&service, "AnomalyScore_EnergyConsumption_Waterworks1").await;

        let mut wiring = WorkflowWiring {
            input_wirings: vec![input(
                "energy",
                VIRTUAL_STRUCTURE_ADAPTER_KEY,
                &source.to_string(),
                "metadata(any)",
            )],
            output_wirings: vec![output(
                "score",
                VIRTUAL_STRUCTURE_ADAPTER_KEY,
                &sink.to_string(),
                "metadata(any)",
            )],
        };

        resolve_virtual_wirings(&service, &mut wiring).await.unwrap();

        let target = &wiring.input_wirings[0].target;
        assert_eq!(target.adapter_id, "rest-adapter");
        assert_eq!(target.ref_id, "root.waterworks1");
        assert_eq!(
            target.ref_key.as_deref(),
            Some("Energy consumption of the waterworks")
        );
        assert_eq!(target.ref_id_type, Some(RefIdType::ThingNode));

        let target = &wiring.output_wirings[0].target;
        assert_eq!(target.adapter_id, "rest-adapter");
        assert_eq!(target.ref_key.as_deref(), Some("Anomaly score of the waterworks"));
    }

    #[tokio::test]
    async fn mixed_wirings_keep_order_and_leave_direct_entries() {
        let service = populated_service().await;
        let pump = source_id(&service, "EnergyUsage_PumpSystem_StorageTank").await;
        let single = source_id(&service, "EnergyConsumption_SinglePump_StorageTank").await;
        let sink = sink_id(&service, "AnomalyScore_EnergyUsage_PumpSystem_StorageTank").await;

        let direct = input("direct", "direct_provisioning", "", "dataframe");
        let mut wiring = WorkflowWiring {
            input_wirings: vec![
                input("b", VIRTUAL_STRUCTURE_ADAPTER_KEY, &single.to_string(), "timeseries(float)"),
                direct.clone(),
                input("a", VIRTUAL_STRUCTURE_ADAPTER_KEY, &pump.to_string(), "multitsframe"),
                input("c", VIRTUAL_STRUCTURE_ADAPTER_KEY, &single.to_string(), "timeseries(float)"),
            ],
            output_wirings: vec![output(
                "anomalies",
                VIRTUAL_STRUCTURE_ADAPTER_KEY,
                &sink.to_string(),
                "multitsframe",
            )],
        };

        resolve_virtual_wirings(&service, &mut wiring).await.unwrap();

        let refs: Vec<&str> = wiring
            .input_wirings
            .iter()
            .map(|w| w.target.ref_id.as_str())
            .collect();
        assert_eq!(
            refs,
            vec![
                "energy_consumption_single_pump",
                "",
                "energy_usage_pump_system",
                "energy_consumption_single_pump"
            ]
        );
        assert_eq!(wiring.input_wirings[1], direct);

        let out = &wiring.output_wirings[0].target;
        assert_eq!(out.ref_id, "anomaly_score_pump_system");
        assert_eq!(out.filters["metrics"], json!("anomaly_score"));
    }

    #[tokio::test]
    async fn unknown_reference_fails_without_touching_the_wiring() {
        let service = populated_service().await;
        let known = source_id(&service, "EnergyUsage_PumpSystem_StorageTank").await;

        let mut wiring = WorkflowWiring {
            input_wirings: vec![
                input("a", VIRTUAL_STRUCTURE_ADAPTER_KEY, &known.to_string(), "multitsframe"),
                input(
                    "b",
                    VIRTUAL_STRUCTURE_ADAPTER_KEY,
                    &Uuid::new_v4().to_string(),
                    "multitsframe",
                ),
            ],
            output_wirings: vec![],
        };
        let before = wiring.clone();

        let err = resolve_virtual_wirings(&service, &mut wiring)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WiringError::Structure(StructureError::NotFound(_))
        ));
        assert_eq!(wiring, before);

        let mut wiring = WorkflowWiring {
            input_wirings: vec![input("a", VIRTUAL_STRUCTURE_ADAPTER_KEY, "not-a-uuid", "multitsframe")],
            output_wirings: vec![],
        };
        assert!(matches!(
            resolve_virtual_wirings(&service, &mut wiring).await,
            Err(WiringError::Structure(StructureError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn a_source_id_is_not_a_sink() {
        let service = populated_service().await;
        let source = source_id(&service, "EnergyUsage_PumpSystem_StorageTank").await;

        let mut wiring = WorkflowWiring {
            input_wirings: vec![],
            output_wirings: vec![output(
                "x",
                VIRTUAL_STRUCTURE_ADAPTER_KEY,
                &source.to_string(),
                "multitsframe",
            )],
        };
        assert!(matches!(
            resolve_virtual_wirings(&service, &mut wiring).await,
            Err(WiringError::Structure(StructureError::NotFound(_)))
        ));
    }
}

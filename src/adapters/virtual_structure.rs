/// Virtual structure adapter views
///
/// The stored structure as a designer front end browses it: one level of the
/// hierarchy at a time, with sources and sinks flattened into the shape other
/// adapters expose (`thingNodeId`, `path`, `metadataKey`, `filters`).
/// Invisible sources and sinks are left out of browse listings but can still
/// be fetched by id, carrying their stored `visible` flag.

use crate::error::StructureResult;
use crate::structure::{
    Endpoint, ExternalType, Filter, Sink, Source, StoredEntity, StructureService, ThingNode,
};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A thing node as listed by the virtual structure adapter
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualThingNode {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub description: String,
}

impl From<ThingNode> for VirtualThingNode {
    fn from(node: ThingNode) -> Self {
        Self {
            id: node.id,
            parent_id: node.parent_node_id,
            name: node.name,
            description: node.description,
        }
    }
}

/// A source or sink as listed by the virtual structure adapter
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualEndpoint {
    pub id: Uuid,
    /// Id a wiring entry must carry to address this entity virtually
    pub thing_node_id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: ExternalType,
    pub visible: bool,
    pub path: String,
    pub metadata_key: Option<String>,
    /// Passthrough filters keyed by internal name
    pub filters: BTreeMap<String, Filter>,
}

impl VirtualEndpoint {
    /// Flatten a stored source or sink into its adapter view
    ///
    /// `thingNodeId` carries the entity's own id, which is what a virtual
    /// wiring entry must reference.
    pub fn from_endpoint<E: Endpoint>(endpoint: &E) -> Self {
        let filters = endpoint
            .passthrough_filters()
            .unwrap_or_default()
            .iter()
            .map(|filter| (filter.internal_name.clone(), filter.clone()))
            .collect();

        Self {
            id: endpoint.id(),
            thing_node_id: endpoint.id(),
            name: endpoint.name().to_string(),
            data_type: endpoint.endpoint_type(),
            visible: endpoint.visible(),
            path: endpoint.display_path().to_string(),
            metadata_key: endpoint.ref_key().map(str::to_string),
            filters,
        }
    }
}

/// One level of the hierarchy
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualStructureLevel {
    pub id: String,
    pub name: String,
    pub thing_nodes: Vec<VirtualThingNode>,
    pub sources: Vec<VirtualEndpoint>,
    pub sinks: Vec<VirtualEndpoint>,
}

/// The roots (no parent) or the content of one thing node
///
/// The root level is reported with id and name `root` and never lists
/// sources or sinks. An unknown parent id fails with `NotFound`.
pub async fn browse(
    service: &StructureService,
    parent_id: Option<Uuid>,
) -> StructureResult<VirtualStructureLevel> {
    let (id, name) = match parent_id {
        Some(parent_id) => {
            let parent: ThingNode = service.get_by_id(parent_id).await?;
            (parent.id.to_string(), parent.name)
        }
        None => ("root".to_string(), "root".to_string()),
    };

    let children = service.get_children(parent_id).await?;
    Ok(VirtualStructureLevel {
        id,
        name,
        thing_nodes: children
            .thing_nodes
            .into_iter()
            .map(VirtualThingNode::from)
            .collect(),
        sources: listed(&children.sources),
        sinks: listed(&children.sinks),
    })
}

/// Views of the visible endpoints, in stored order
fn listed<E: Endpoint>(endpoints: &[E]) -> Vec<VirtualEndpoint> {
    endpoints
        .iter()
        .filter(|endpoint| endpoint.visible())
        .map(VirtualEndpoint::from_endpoint)
        .collect()
}

/// One thing node by stored id
///
/// Fails with `NotFound` for an unknown id.
pub async fn thing_node(service: &StructureService, id: Uuid) -> StructureResult<VirtualThingNode> {
    service.get_by_id::<ThingNode>(id).await.map(VirtualThingNode::from)
}

/// One source by stored id, whether visible or not
pub async fn source(service: &StructureService, id: Uuid) -> StructureResult<VirtualEndpoint> {
    endpoint::<Source>(service, id).await
}

/// One sink by stored id, whether visible or not
pub async fn sink(service: &StructureService, id: Uuid) -> StructureResult<VirtualEndpoint> {
    endpoint::<Sink>(service, id).await
}

/// Several sources at once, in the order asked for
///
/// Fails with `NotFound` naming the missing ids if any id is not a stored
/// source.
pub async fn sources(
    service: &StructureService,
    ids: &[Uuid],
) -> StructureResult<Vec<VirtualEndpoint>> {
    endpoints::<Source>(service, ids).await
}

/// Several sinks at once, in the order asked for
pub async fn sinks(service: &StructureService, ids: &[Uuid]) -> StructureResult<Vec<VirtualEndpoint>> {
    endpoints::<Sink>(service, ids).await
}

async fn endpoint<E: StoredEntity + Endpoint>(
    service: &StructureService,
    id: Uuid,
) -> StructureResult<VirtualEndpoint> {
    let entity: E = service.get_by_id(id).await?;
    Ok(VirtualEndpoint::from_endpoint(&entity))
}

async fn endpoints<E: StoredEntity + Endpoint>(
    service: &StructureService,
    ids: &[Uuid],
) -> StructureResult<Vec<VirtualEndpoint>> {
    let found = service.get_by_ids::<E>(ids).await?;
    Ok(ids
        .iter()
        .filter_map(|id| found.get(id))
        .map(VirtualEndpoint::from_endpoint)
        .collect())
}

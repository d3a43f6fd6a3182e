/// Structure validation
///
/// A `CompleteStructure` can only be obtained through `validate`: the
/// submission runs through an ordered series of checks and the first failing
/// check rejects the whole document. There is no partial acceptance.

use crate::error::{StructureError, StructureResult};
use crate::structure::types::{
    ElementType, Endpoint, Filter, FilterType, Sink, SinkSubmission, Source, SourceSubmission,
    StructureSubmission, ThingNode,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

/// A validated structure aggregate
///
/// Every invariant of the asset hierarchy holds for an instance of this type:
/// parents exist, there are no cycles, each tree carries one stakeholder key,
/// (stakeholder key, external id) pairs are unique per list and every
/// source/sink is attached to existing thing nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StructureSubmission")]
pub struct CompleteStructure {
    element_types: Vec<ElementType>,
    thing_nodes: Vec<ThingNode>,
    sources: Vec<Source>,
    sinks: Vec<Sink>,
}

impl CompleteStructure {
    pub fn element_types(&self) -> &[ElementType] {
        &self.element_types
    }

    pub fn thing_nodes(&self) -> &[ThingNode] {
        &self.thing_nodes
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn sinks(&self) -> &[Sink] {
        &self.sinks
    }

    /// Thing nodes ordered so that every parent precedes its children
    pub fn thing_nodes_top_down(&self) -> Vec<&ThingNode> {
        let index = NodeIndex::new(&self.thing_nodes);
        let mut queued = vec![false; self.thing_nodes.len()];
        let mut queue = VecDeque::new();

        for (pos, node) in self.thing_nodes.iter().enumerate() {
            if node.is_root() {
                queued[pos] = true;
                queue.push_back(pos);
            }
        }

        let mut ordered = Vec::with_capacity(self.thing_nodes.len());
        while let Some(pos) = queue.pop_front() {
            let node = &self.thing_nodes[pos];
            ordered.push(node);
            for &child in index.children_of(&node.external_id) {
                if !queued[child] {
                    queued[child] = true;
                    queue.push_back(child);
                }
            }
        }

        ordered
    }

    /// Turn the aggregate back into a submission document
    pub fn into_submission(self) -> StructureSubmission {
        StructureSubmission {
            element_types: self.element_types,
            thing_nodes: self.thing_nodes,
            sources: self.sources.into_iter().map(SourceSubmission::from).collect(),
            sinks: self.sinks.into_iter().map(SinkSubmission::from).collect(),
        }
    }
}

impl TryFrom<StructureSubmission> for CompleteStructure {
    type Error = StructureError;

    fn try_from(submission: StructureSubmission) -> Result<Self, Self::Error> {
        validate(submission)
    }
}

/// Validate a submission and build the aggregate
///
/// Checks run in a fixed order and the first failure is returned as
/// `StructureError::Structural` naming the offending entity.
pub fn validate(submission: StructureSubmission) -> StructureResult<CompleteStructure> {
    let StructureSubmission {
        element_types,
        mut thing_nodes,
        sources,
        sinks,
    } = submission;

    if element_types.is_empty() {
        return Err(StructureError::structural(
            "The structure must include at least one ElementType object to be valid.",
        ));
    }

    check_parents_exist(&thing_nodes)?;

    check_unique_pairs(
        "element_types",
        element_types.iter().map(|e| (&e.stakeholder_key, &e.external_id)),
    )?;
    check_unique_pairs(
        "thing_nodes",
        thing_nodes.iter().map(|n| (&n.stakeholder_key, &n.external_id)),
    )?;
    check_unique_pairs(
        "sources",
        sources.iter().map(|s| (&s.source.stakeholder_key, &s.source.external_id)),
    )?;
    check_unique_pairs(
        "sinks",
        sinks.iter().map(|s| (&s.sink.stakeholder_key, &s.sink.external_id)),
    )?;

    let (sources, sinks) = {
        let index = NodeIndex::new(&thing_nodes);

        check_for_cycles(&index)?;
        check_stakeholder_key_consistency(&index)?;
        check_endpoint_references("sources", sources.iter().map(|s| &s.source), &index)?;
        check_endpoint_references("sinks", sinks.iter().map(|s| &s.sink), &index)?;

        let sources = sources
            .into_iter()
            .map(|s| finish_endpoint(s.source, s.passthrough_filters, &index))
            .collect::<StructureResult<Vec<_>>>()?;
        let sinks = sinks
            .into_iter()
            .map(|s| finish_endpoint(s.sink, s.passthrough_filters, &index))
            .collect::<StructureResult<Vec<_>>>()?;
        (sources, sinks)
    };

    link_internal_ids(&element_types, &mut thing_nodes);

    tracing::debug!(
        "Validated structure: {} element types, {} thing nodes, {} sources, {} sinks",
        element_types.len(),
        thing_nodes.len(),
        sources.len(),
        sinks.len()
    );

    Ok(CompleteStructure {
        element_types,
        thing_nodes,
        sources,
        sinks,
    })
}

/// Parent/child lookups over the submitted thing nodes, built once per validation
struct NodeIndex<'a> {
    nodes: &'a [ThingNode],
    by_external_id: HashMap<&'a str, usize>,
    children: HashMap<&'a str, Vec<usize>>,
}

impl<'a> NodeIndex<'a> {
    fn new(nodes: &'a [ThingNode]) -> Self {
        let mut by_external_id = HashMap::with_capacity(nodes.len());
        let mut children: HashMap<&str, Vec<usize>> = HashMap::new();

        for (pos, node) in nodes.iter().enumerate() {
            by_external_id.insert(node.external_id.as_str(), pos);
            if let Some(parent) = node.parent_external_node_id.as_deref() {
                children.entry(parent).or_default().push(pos);
            }
        }

        Self {
            nodes,
            by_external_id,
            children,
        }
    }

    fn contains(&self, external_id: &str) -> bool {
        self.by_external_id.contains_key(external_id)
    }

    fn get(&self, external_id: &str) -> Option<&'a ThingNode> {
        self.by_external_id.get(external_id).map(|&pos| &self.nodes[pos])
    }

    /// External id of the parent, if the parent is part of the submission
    fn parent_of(&self, external_id: &str) -> Option<&'a str> {
        self.get(external_id)
            .and_then(|node| node.parent_external_node_id.as_deref())
            .filter(|parent| self.contains(parent))
    }

    fn children_of(&self, external_id: &str) -> &[usize] {
        self.children
            .get(external_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn check_parents_exist(thing_nodes: &[ThingNode]) -> StructureResult<()> {
    let external_ids: HashSet<&str> = thing_nodes.iter().map(|n| n.external_id.as_str()).collect();

    for node in thing_nodes {
        if let Some(parent) = node.parent_external_node_id.as_deref() {
            if !external_ids.contains(parent) {
                return Err(StructureError::structural(format!(
                    "ThingNode '{}' has an invalid parent_external_node_id '{}' that does not \
                     reference any existing ThingNode.",
                    node.external_id, parent
                )));
            }
        }
    }
    Ok(())
}

fn check_unique_pairs<'a>(
    list_name: &str,
    pairs: impl Iterator<Item = (&'a String, &'a String)>,
) -> StructureResult<()> {
    let mut seen = HashSet::new();
    for (stakeholder_key, external_id) in pairs {
        if !seen.insert((stakeholder_key, external_id)) {
            return Err(StructureError::structural(format!(
                "The stakeholder key and external id pair: ('{}', '{}') exists at least twice \
                 in the {} list. Each key-id pair must be unique within its list!",
                stakeholder_key, external_id, list_name
            )));
        }
    }
    Ok(())
}

/// Walk each node's ancestor chain once
///
/// `on_path` holds the nodes of the chain currently being walked; `finished`
/// holds nodes whose whole ancestor chain is known to be acyclic. Only a
/// revisit within the current chain is a cycle.
fn check_for_cycles(index: &NodeIndex<'_>) -> StructureResult<()> {
    let mut finished: HashSet<&str> = HashSet::with_capacity(index.nodes.len());

    for node in index.nodes {
        let mut on_path: HashSet<&str> = HashSet::new();
        let mut path = Vec::new();
        let mut current = Some(node.external_id.as_str());

        while let Some(external_id) = current {
            if finished.contains(external_id) {
                break;
            }
            if !on_path.insert(external_id) {
                return Err(StructureError::structural(format!(
                    "Circular reference detected in node {}",
                    external_id
                )));
            }
            path.push(external_id);
            current = index.parent_of(external_id);
        }

        finished.extend(path);
    }
    Ok(())
}

fn check_stakeholder_key_consistency(index: &NodeIndex<'_>) -> StructureResult<()> {
    for root in index.nodes.iter().filter(|n| n.is_root()) {
        let expected = root.stakeholder_key.as_str();
        let mut stack = vec![root];
        let mut visited: HashSet<&str> = HashSet::new();

        while let Some(current) = stack.pop() {
            if !visited.insert(current.external_id.as_str()) {
                continue;
            }
            if current.stakeholder_key != expected {
                return Err(StructureError::structural(format!(
                    "Inconsistent stakeholder_key at node {}. Expected: {}, found: {}",
                    current.external_id, expected, current.stakeholder_key
                )));
            }
            stack.extend(
                index
                    .children_of(&current.external_id)
                    .iter()
                    .map(|&pos| &index.nodes[pos]),
            );
        }
    }
    Ok(())
}

fn check_endpoint_references<'e, E: Endpoint + 'e>(
    list_name: &str,
    endpoints: impl Iterator<Item = &'e E>,
    index: &NodeIndex<'_>,
) -> StructureResult<()> {
    for endpoint in endpoints {
        let thing_node_ids = endpoint.thing_node_external_ids();
        if thing_node_ids.is_empty() {
            return Err(StructureError::structural(format!(
                "{} '{}' in the {} list is not attached to any ThingNode.",
                E::KIND,
                endpoint.external_id(),
                list_name
            )));
        }

        let mut seen = HashSet::new();
        for tn_id in thing_node_ids {
            if !index.contains(tn_id) {
                return Err(StructureError::structural(format!(
                    "{} '{}' references non-existing ThingNode '{}'.",
                    E::KIND,
                    endpoint.external_id(),
                    tn_id
                )));
            }
            if !seen.insert(tn_id.as_str()) {
                return Err(StructureError::structural(format!(
                    "The thing_node_external_ids attribute of the element with id: {} in the {} \
                     list contains at least the duplicate id: {}. Each id within \
                     thing_node_external_ids must be unique!",
                    endpoint.external_id(),
                    list_name,
                    tn_id
                )));
            }
        }
    }
    Ok(())
}

/// Parse raw passthrough filters and fill in a derived display path
fn finish_endpoint<E: Endpoint>(
    mut endpoint: E,
    raw_filters: Option<Vec<Value>>,
    index: &NodeIndex<'_>,
) -> StructureResult<E> {
    let filters = raw_filters
        .map(|raw| {
            raw.iter()
                .map(|value| parse_filter::<E>(endpoint.external_id(), value))
                .collect::<StructureResult<Vec<_>>>()
        })
        .transpose()?;
    endpoint.set_passthrough_filters(filters);

    if endpoint.display_path_mut().is_empty() {
        let path = endpoint
            .thing_node_external_ids()
            .first()
            .map(|tn_id| ancestor_path(tn_id, index))
            .unwrap_or_default();
        *endpoint.display_path_mut() = path;
    }

    Ok(endpoint)
}

fn parse_filter<E: Endpoint>(external_id: &str, value: &Value) -> StructureResult<Filter> {
    let reject =
        |msg: &str| StructureError::structural(format!("{} '{}': {}", E::KIND, external_id, msg));

    let object = value
        .as_object()
        .ok_or_else(|| reject("Each passthrough filter must be an object."))?;

    let name = object
        .get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| reject("Each passthrough filter must have a 'name' of type str."))?;

    let filter_type = object
        .get("type")
        .and_then(Value::as_str)
        .and_then(FilterType::parse)
        .ok_or_else(|| reject("Each passthrough filter must have a valid 'type'."))?;

    let required = object
        .get("required")
        .and_then(Value::as_bool)
        .ok_or_else(|| reject("Each passthrough filter must have a 'required' boolean field."))?;

    Ok(Filter::new(name, filter_type, required))
}

/// Names from the root down to the given node, joined with " / "
fn ancestor_path(external_id: &str, index: &NodeIndex<'_>) -> String {
    let mut names = Vec::new();
    let mut current = Some(external_id);
    while let Some(id) = current {
        match index.get(id) {
            Some(node) => names.push(node.name.as_str()),
            None => break,
        }
        current = index.parent_of(id);
    }
    names.reverse();
    names.join(" / ")
}

/// Point `parent_node_id` and `element_type_id` at the submitted entities
///
/// Lookups prefer the node's own stakeholder key and fall back to the bare
/// external id. Persistence re-links these to stored ids.
fn link_internal_ids(element_types: &[ElementType], thing_nodes: &mut [ThingNode]) {
    let mut element_type_ids: HashMap<(String, String), Uuid> = HashMap::new();
    let mut element_type_ids_by_external: HashMap<String, Uuid> = HashMap::new();
    for et in element_types {
        element_type_ids.insert((et.stakeholder_key.clone(), et.external_id.clone()), et.id);
        element_type_ids_by_external.insert(et.external_id.clone(), et.id);
    }

    let mut node_ids: HashMap<(String, String), Uuid> = HashMap::new();
    let mut node_ids_by_external: HashMap<String, Uuid> = HashMap::new();
    for node in thing_nodes.iter() {
        node_ids.insert((node.stakeholder_key.clone(), node.external_id.clone()), node.id);
        node_ids_by_external.insert(node.external_id.clone(), node.id);
    }

    for node in thing_nodes.iter_mut() {
        node.parent_node_id = node.parent_external_node_id.as_ref().and_then(|parent| {
            node_ids
                .get(&(node.stakeholder_key.clone(), parent.clone()))
                .or_else(|| node_ids_by_external.get(parent))
                .copied()
        });

        let et_key = (
            node.stakeholder_key.clone(),
            node.element_type_external_id.clone(),
        );
        if let Some(id) = element_type_ids
            .get(&et_key)
            .or_else(|| element_type_ids_by_external.get(&node.element_type_external_id))
        {
            node.element_type_id = *id;
        }
    }
}

/// Wiring document definitions

use crate::structure::ExternalType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Adapter id marking a wiring entry as a reference into the stored structure
pub const VIRTUAL_STRUCTURE_ADAPTER_KEY: &str = "virtual-structure-adapter";

/// What a wiring `ref_id` points at on the adapter side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefIdType {
    #[serde(rename = "THINGNODE")]
    ThingNode,
    #[serde(rename = "SOURCE")]
    Source,
    #[serde(rename = "SINK")]
    Sink,
}

/// Adapter-facing part of a wiring entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WiringTarget {
    pub adapter_id: String,
    #[serde(default)]
    pub ref_id: String,
    #[serde(default)]
    pub ref_id_type: Option<RefIdType>,
    #[serde(default)]
    pub ref_key: Option<String>,
    #[serde(rename = "type", default)]
    pub data_type: Option<ExternalType>,
    #[serde(default)]
    pub filters: Map<String, Value>,
}

impl WiringTarget {
    /// Whether the entry must be resolved through the stored structure
    pub fn is_virtual(&self) -> bool {
        self.adapter_id == VIRTUAL_STRUCTURE_ADAPTER_KEY
    }
}

/// Where one workflow input is loaded from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputWiring {
    pub workflow_input_name: String,
    #[serde(flatten)]
    pub target: WiringTarget,
    /// Skip loading and let the workflow use its default value
    #[serde(default)]
    pub use_default_value: bool,
}

/// Where one workflow output is sent to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputWiring {
    pub workflow_output_name: String,
    #[serde(flatten)]
    pub target: WiringTarget,
}

/// Input and output wirings of one workflow execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowWiring {
    #[serde(default)]
    pub input_wirings: Vec<InputWiring>,
    #[serde(default)]
    pub output_wirings: Vec<OutputWiring>,
}

/// Reference handed to an adapter: where to read or write, and with which filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredRef {
    pub ref_id: String,
    pub ref_id_type: Option<RefIdType>,
    pub ref_key: Option<String>,
    #[serde(rename = "type")]
    pub data_type: Option<ExternalType>,
    pub filters: Map<String, Value>,
}

pub type FilteredSource = FilteredRef;
pub type FilteredSink = FilteredRef;

impl From<&WiringTarget> for FilteredRef {
    fn from(target: &WiringTarget) -> Self {
        Self {
            ref_id: target.ref_id.clone(),
            ref_id_type: target.ref_id_type,
            ref_key: target.ref_key.clone(),
            data_type: target.data_type,
            filters: target.filters.clone(),
        }
    }
}

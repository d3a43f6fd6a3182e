/// Core structure type definitions
///
/// Plain data records for the asset hierarchy: element types, thing nodes,
/// and the sources/sinks attached to them. These are exchanged by copy; the
/// persistence layer owns the durable versions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Classification of a thing node (e.g. "Waterworks", "Plant", "Storage Tank")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementType {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Externally provided identifier, unique per stakeholder key
    pub external_id: String,
    pub stakeholder_key: String,
    /// Globally unique name
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A node of the asset hierarchy
///
/// Nodes form a forest through `parent_external_node_id`; a node without a
/// parent is a root. The internal ids (`parent_node_id`, `element_type_id`)
/// are linked by the validator and re-linked to stored ids on persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThingNode {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub external_id: String,
    pub stakeholder_key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parent_node_id: Option<Uuid>,
    #[serde(default)]
    pub parent_external_node_id: Option<String>,
    #[serde(default = "Uuid::new_v4")]
    pub element_type_id: Uuid,
    pub element_type_external_id: String,
    #[serde(default)]
    pub meta_data: Option<Map<String, Value>>,
}

impl ThingNode {
    pub fn is_root(&self) -> bool {
        self.parent_external_node_id.is_none()
    }
}

/// Data type of a source, sink or wiring entry
///
/// Drives transport semantics: `metadata(any)` entries reference a thing
/// node plus a metadata key instead of a bulk data set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExternalType {
    #[serde(rename = "metadata(int)")]
    MetadataInt,
    #[serde(rename = "metadata(float)")]
    MetadataFloat,
    #[serde(rename = "metadata(str)")]
    MetadataStr,
    #[serde(rename = "metadata(boolean)")]
    MetadataBoolean,
    #[serde(rename = "metadata(any)")]
    MetadataAny,
    #[serde(rename = "series(int)")]
    SeriesInt,
    #[serde(rename = "series(float)")]
    SeriesFloat,
    #[serde(rename = "series(str)")]
    SeriesStr,
    #[serde(rename = "series(boolean)")]
    SeriesBoolean,
    #[serde(rename = "series(any)")]
    SeriesAny,
    #[serde(rename = "timeseries(int)")]
    TimeseriesInt,
    #[serde(rename = "timeseries(float)")]
    TimeseriesFloat,
    #[serde(rename = "timeseries(str)")]
    TimeseriesStr,
    #[serde(rename = "timeseries(boolean)")]
    TimeseriesBoolean,
    #[serde(rename = "timeseries(numeric)")]
    TimeseriesNumeric,
    #[serde(rename = "timeseries(any)")]
    TimeseriesAny,
    #[serde(rename = "multitsframe")]
    Multitsframe,
    #[serde(rename = "dataframe")]
    Dataframe,
}

impl ExternalType {
    /// Whether wiring entries of this type reference a thing node + metadata key
    pub fn is_metadata_reference(&self) -> bool {
        matches!(self, ExternalType::MetadataAny)
    }

    /// Wire representation, e.g. `"timeseries(float)"`
    pub fn as_str(&self) -> &'static str {
        match self {
            ExternalType::MetadataInt => "metadata(int)",
            ExternalType::MetadataFloat => "metadata(float)",
            ExternalType::MetadataStr => "metadata(str)",
            ExternalType::MetadataBoolean => "metadata(boolean)",
            ExternalType::MetadataAny => "metadata(any)",
            ExternalType::SeriesInt => "series(int)",
            ExternalType::SeriesFloat => "series(float)",
            ExternalType::SeriesStr => "series(str)",
            ExternalType::SeriesBoolean => "series(boolean)",
            ExternalType::SeriesAny => "series(any)",
            ExternalType::TimeseriesInt => "timeseries(int)",
            ExternalType::TimeseriesFloat => "timeseries(float)",
            ExternalType::TimeseriesStr => "timeseries(str)",
            ExternalType::TimeseriesBoolean => "timeseries(boolean)",
            ExternalType::TimeseriesNumeric => "timeseries(numeric)",
            ExternalType::TimeseriesAny => "timeseries(any)",
            ExternalType::Multitsframe => "multitsframe",
            ExternalType::Dataframe => "dataframe",
        }
    }
}

impl std::str::FromStr for ExternalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| format!("unknown external type '{}'", s))
    }
}

/// Supported passthrough filter kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    FreeText,
}

impl FilterType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free_text" => Some(FilterType::FreeText),
            _ => None,
        }
    }
}

/// A filter exposed to the caller for user input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    /// Wiring-safe identifier derived from `name`
    pub internal_name: String,
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    pub required: bool,
}

impl Filter {
    pub fn new(name: impl Into<String>, filter_type: FilterType, required: bool) -> Self {
        let name = name.into();
        let internal_name = internal_filter_name(&name);
        Self {
            name,
            internal_name,
            filter_type,
            required,
        }
    }
}

/// Lower-case the name and collapse whitespace runs into single underscores
pub fn internal_filter_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// A data source attached to one or more thing nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub external_id: String,
    pub stakeholder_key: String,
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: ExternalType,
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Human-readable ancestor chain, derived when submitted empty
    #[serde(default)]
    pub display_path: String,
    /// Always applied; override caller-supplied filters of the same key
    #[serde(default, deserialize_with = "null_as_default")]
    pub preset_filters: Map<String, Value>,
    #[serde(default)]
    pub passthrough_filters: Option<Vec<Filter>>,
    pub adapter_key: String,
    /// Adapter-local id of the referenced source
    pub source_id: String,
    /// Metadata key, only used for `metadata(any)` sources
    #[serde(default)]
    pub ref_key: Option<String>,
    /// Thing node id in the adapter hierarchy, only used for `metadata(any)` sources
    #[serde(default)]
    pub ref_id: String,
    #[serde(default)]
    pub meta_data: Option<Map<String, Value>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub thing_node_external_ids: Vec<String>,
}

/// A data sink attached to one or more thing nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sink {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub external_id: String,
    pub stakeholder_key: String,
    pub name: String,
    #[serde(rename = "type")]
    pub sink_type: ExternalType,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub display_path: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub preset_filters: Map<String, Value>,
    #[serde(default)]
    pub passthrough_filters: Option<Vec<Filter>>,
    pub adapter_key: String,
    /// Adapter-local id of the referenced sink
    pub sink_id: String,
    #[serde(default)]
    pub ref_key: Option<String>,
    #[serde(default)]
    pub ref_id: String,
    #[serde(default)]
    pub meta_data: Option<Map<String, Value>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub thing_node_external_ids: Vec<String>,
}

fn default_visible() -> bool {
    true
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Common view over sources and sinks
///
/// Used by the validator (references, display paths) and by the wiring
/// resolution engine (adapter key, reference ids, preset filters).
pub trait Endpoint {
    /// Entity label used in messages ("Source" / "Sink")
    const KIND: &'static str;

    fn id(&self) -> Uuid;
    fn external_id(&self) -> &str;
    fn stakeholder_key(&self) -> &str;
    fn name(&self) -> &str;
    fn display_path(&self) -> &str;
    /// Whether designer front ends list this entity
    fn visible(&self) -> bool;
    fn endpoint_type(&self) -> ExternalType;
    fn adapter_key(&self) -> &str;
    /// The adapter-local source/sink id
    fn adapter_ref_id(&self) -> &str;
    /// The thing node id used for metadata references
    fn metadata_ref_id(&self) -> &str;
    fn ref_key(&self) -> Option<&str>;
    fn preset_filters(&self) -> &Map<String, Value>;
    fn passthrough_filters(&self) -> Option<&[Filter]>;
    fn thing_node_external_ids(&self) -> &[String];
    fn display_path_mut(&mut self) -> &mut String;
    fn set_passthrough_filters(&mut self, filters: Option<Vec<Filter>>);
}

macro_rules! impl_endpoint {
    ($ty:ty, $kind:literal, $type_field:ident, $ref_field:ident) => {
        impl Endpoint for $ty {
            const KIND: &'static str = $kind;

            fn id(&self) -> Uuid {
                self.id
            }
            fn external_id(&self) -> &str {
                &self.external_id
            }
            fn stakeholder_key(&self) -> &str {
                &self.stakeholder_key
            }
            fn name(&self) -> &str {
                &self.name
            }
            fn display_path(&self) -> &str {
                &self.display_path
            }
            fn visible(&self) -> bool {
                self.visible
            }
            fn endpoint_type(&self) -> ExternalType {
                self.$type_field
            }
            fn adapter_key(&self) -> &str {
                &self.adapter_key
            }
            fn adapter_ref_id(&self) -> &str {
                &self.$ref_field
            }
            fn metadata_ref_id(&self) -> &str {
                &self.ref_id
            }
            fn ref_key(&self) -> Option<&str> {
                self.ref_key.as_deref()
            }
            fn preset_filters(&self) -> &Map<String, Value> {
                &self.preset_filters
            }
            fn passthrough_filters(&self) -> Option<&[Filter]> {
                self.passthrough_filters.as_deref()
            }
            fn thing_node_external_ids(&self) -> &[String] {
                &self.thing_node_external_ids
            }
            fn display_path_mut(&mut self) -> &mut String {
                &mut self.display_path
            }
            fn set_passthrough_filters(&mut self, filters: Option<Vec<Filter>>) {
                self.passthrough_filters = filters;
            }
        }
    };
}

impl_endpoint!(Source, "Source", source_type, source_id);
impl_endpoint!(Sink, "Sink", sink_type, sink_id);

/// A source as submitted, with passthrough filters kept raw until validated
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSubmission {
    #[serde(default)]
    pub passthrough_filters: Option<Vec<Value>>,
    #[serde(flatten)]
    pub source: Source,
}

/// A sink as submitted, with passthrough filters kept raw until validated
#[derive(Debug, Clone, Deserialize)]
pub struct SinkSubmission {
    #[serde(default)]
    pub passthrough_filters: Option<Vec<Value>>,
    #[serde(flatten)]
    pub sink: Sink,
}

impl From<Source> for SourceSubmission {
    fn from(mut source: Source) -> Self {
        let passthrough_filters = source.passthrough_filters.take().map(filters_to_values);
        Self {
            passthrough_filters,
            source,
        }
    }
}

impl From<Sink> for SinkSubmission {
    fn from(mut sink: Sink) -> Self {
        let passthrough_filters = sink.passthrough_filters.take().map(filters_to_values);
        Self {
            passthrough_filters,
            sink,
        }
    }
}

fn filters_to_values(filters: Vec<Filter>) -> Vec<Value> {
    filters
        .into_iter()
        .map(|f| {
            serde_json::json!({
                "name": f.name,
                "type": f.filter_type,
                "required": f.required,
            })
        })
        .collect()
}

/// Structure document as submitted by a caller, not yet validated
///
/// Four named lists; only `element_types` is mandatory.
#[derive(Debug, Clone, Deserialize)]
pub struct StructureSubmission {
    pub element_types: Vec<ElementType>,
    #[serde(default)]
    pub thing_nodes: Vec<ThingNode>,
    #[serde(default)]
    pub sources: Vec<SourceSubmission>,
    #[serde(default)]
    pub sinks: Vec<SinkSubmission>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_filter_name_collapses_whitespace() {
        assert_eq!(internal_filter_name("  Timestamp   From "), "timestamp_from");
        assert_eq!(internal_filter_name("sensorID"), "sensorid");
        assert_eq!(internal_filter_name("upper\tlimit value"), "upper_limit_value");
    }

    #[test]
    fn external_type_wire_names() {
        let parsed: ExternalType = "metadata(any)".parse().unwrap();
        assert_eq!(parsed, ExternalType::MetadataAny);
        assert!(parsed.is_metadata_reference());
        assert!(!ExternalType::TimeseriesFloat.is_metadata_reference());
        assert_eq!(ExternalType::Multitsframe.as_str(), "multitsframe");
        assert!("timeseries(complex)".parse::<ExternalType>().is_err());
    }

    #[test]
    fn source_submission_keeps_raw_filters() {
        let submission: SourceSubmission = serde_json::from_value(serde_json::json!({
            "external_id": "Source1",
            "stakeholder_key": "SK1",
            "name": "Source 1",
            "type": "multitsframe",
            "adapter_key": "sql-adapter",
            "source_id": "some_id",
            "thing_node_external_ids": ["Node1"],
            "passthrough_filters": [{"type": "free_text", "required": true}]
        }))
        .unwrap();

        assert_eq!(submission.passthrough_filters.as_ref().map(Vec::len), Some(1));
        assert!(submission.source.passthrough_filters.is_none());
        assert!(submission.source.visible);
        assert_eq!(submission.source.source_type, ExternalType::Multitsframe);
    }
}

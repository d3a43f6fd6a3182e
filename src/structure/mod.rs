/// Structure Management Layer
///
/// The asset hierarchy and everything attached to it:
/// - Type definitions (ElementType, ThingNode, Source, Sink, Filter)
/// - Validation of submitted structures into a `CompleteStructure`
/// - SQLite persistence with sqlx

// Core structure type definitions
pub mod types;

// Ordered structural checks producing the validated aggregate
pub mod validate;

// Transactional persistence of validated structures
pub mod storage;

// Re-export commonly used types
pub use storage::{StoredEntity, StructureChildren, StructureService};
pub use types::{
    ElementType, Endpoint, ExternalType, Filter, FilterType, Sink, Source, StructureSubmission,
    ThingNode,
};
pub use validate::{validate, CompleteStructure};

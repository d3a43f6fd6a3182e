/// Workflow Wiring Layer
///
/// Wiring documents tell the execution platform where each workflow input
/// is loaded from and where each output is sent. Entries addressed to the
/// virtual structure adapter point at a stored Source/Sink and are rewritten
/// to the concrete adapter reference before any data moves.

// Wiring document types
pub mod types;

// Rewriting of virtual entries into concrete adapter references
pub mod resolve;

pub use resolve::resolve_virtual_wirings;
pub use types::{
    FilteredSink, FilteredSource, InputWiring, OutputWiring, RefIdType, WiringTarget,
    WorkflowWiring, VIRTUAL_STRUCTURE_ADAPTER_KEY,
};

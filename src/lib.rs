/// Virtual structure service
///
/// This library manages a hierarchical asset structure (element types,
/// thing nodes and the sources/sinks attached to them), resolves workflow
/// wiring that references the structure into concrete adapter references,
/// and dispatches loads and sends to registered adapters.

// Core configuration and setup
pub mod config;

// Typed errors for validation, persistence, resolution and dispatch
pub mod error;

// SQLite pool creation and schema setup
pub mod database;

// Structure types, validation and persistence
pub mod structure;

// Workflow wiring documents and virtual reference resolution
pub mod wiring;

// Adapter registry, dispatch and virtual structure views
pub mod adapters;

// Input loading and output sending around a workflow run
pub mod runtime;

// HTTP API layer - structure administration, browse and wiring endpoints
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use adapters::{Adapter, AdapterDispatcher, AdapterRegistry};
pub use error::{AdapterError, StructureError, WiringError, WorkflowIoError};
pub use runtime::WorkflowIo;
pub use server::{create_app, create_app_with_adapters, start_server};
pub use structure::{CompleteStructure, StructureService};
pub use wiring::WorkflowWiring;

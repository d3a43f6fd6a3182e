/// Adapter Layer
///
/// Concrete backends register a load/send capability under an adapter key;
/// the dispatcher groups wiring entries per key and calls each adapter once
/// per direction. The virtual structure adapter views live here as well.

// Adapter capability and hot-swappable registry
pub mod registry;

// Per-adapter batching of loads and sends
pub mod dispatch;

// Browse views of the stored structure
pub mod virtual_structure;

pub use dispatch::AdapterDispatcher;
pub use registry::{Adapter, AdapterRegistry};

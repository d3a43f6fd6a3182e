/// Runtime IO
///
/// Moves data in and out of a workflow run through the wiring document:
/// virtual entries are resolved first, then the adapters are called.

pub mod io;

pub use io::WorkflowIo;

/// Error taxonomy for structure validation, persistence, wiring resolution
/// and adapter dispatch.
///
/// Application glue (server, startup) keeps using `anyhow`; everything the
/// library hands back to callers is one of the typed enums below.

use thiserror::Error;

/// Result alias for structure operations
pub type StructureResult<T> = Result<T, StructureError>;

/// Errors raised while validating or persisting a structure
#[derive(Debug, Error)]
pub enum StructureError {
    /// The submission was rejected by the validator; nothing was persisted
    #[error("invalid structure: {0}")]
    Structural(String),

    /// A requested id (or an expected row) is absent
    #[error("not found: {0}")]
    NotFound(String),

    /// A storage constraint (uniqueness, foreign key) was violated
    #[error("integrity error while updating or inserting the structure: {0}")]
    Integrity(String),

    /// Generic read failure
    #[error("failed to fetch from the structure store: {0}")]
    Fetch(String),

    /// Generic write failure
    #[error("failed to update the structure store: {0}")]
    Update(String),
}

impl StructureError {
    /// Shorthand for a validation rejection
    pub fn structural(msg: impl Into<String>) -> Self {
        Self::Structural(msg.into())
    }

    /// Map a sqlx error raised while reading
    pub fn from_fetch(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            other => Self::Fetch(other.to_string()),
        }
    }

    /// Map a sqlx error raised while writing; constraint violations become `Integrity`
    pub fn from_update(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation()
                || db_err.is_foreign_key_violation()
                || db_err.is_check_violation()
            {
                return Self::Integrity(db_err.message().to_string());
            }
        }
        Self::Update(err.to_string())
    }
}

/// Direction of a wiring entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WiringDirection {
    Input,
    Output,
}

impl std::fmt::Display for WiringDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WiringDirection::Input => f.write_str("input"),
            WiringDirection::Output => f.write_str("output"),
        }
    }
}

/// Errors raised while resolving virtual wiring entries
#[derive(Debug, Error)]
pub enum WiringError {
    #[error(transparent)]
    Structure(#[from] StructureError),

    /// Internal invariant breach: the resolved objects do not line up with
    /// the flagged wiring entries. Not caused by user input.
    #[error("resolution mismatch for {direction} wirings: {expected} flagged, {found} resolved")]
    ResolutionMismatch {
        direction: WiringDirection,
        expected: usize,
        found: usize,
    },
}

/// Errors raised by the adapter dispatch layer
#[derive(Debug, Error)]
pub enum AdapterError {
    /// No adapter registered under this key
    #[error("no adapter registered for key '{0}'")]
    Unregistered(String),

    #[error("adapter '{adapter_key}' failed to load data: {source}")]
    Load {
        adapter_key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("adapter '{adapter_key}' failed to send data: {source}")]
    Send {
        adapter_key: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Errors raised while moving workflow inputs and outputs
#[derive(Debug, Error)]
pub enum WorkflowIoError {
    #[error(transparent)]
    Wiring(#[from] WiringError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

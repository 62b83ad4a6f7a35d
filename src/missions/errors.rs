use thiserror::Error;

/// Errors that can arise while loading the catalog or talking to the mission store.
#[derive(Debug, Error)]
pub enum MissionError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Catalog or property-filter JSON errors.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wrapper around IO errors (directory creation, catalog reads).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when fetching a record that is not present.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Returned when deserializing a record with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    /// Invalid mission definition in the catalog
    #[error("invalid catalog entry: {0}")]
    Catalog(String),

    /// Event identifier with no entry in the event table
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// Internal error (task join errors, unexpected conditions)
    #[error("internal error: {0}")]
    Internal(String),
}

//! Durable progress checkpoints.
//!
//! One record per person holds the last gapless completed combination index
//! and every match found so far, so a crash or interrupt at any point costs
//! at most the work since the last flush. Records are written atomically and
//! bound to the combination space configuration that produced them.

pub mod record;
pub mod store;

pub use record::{CheckpointRecord, SCHEMA_VERSION};
pub use store::CheckpointStore;

/// Errors related to checkpoint records.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Record written by an incompatible version of this tool.
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// Record produced under a different combination space configuration.
    /// Resuming it would silently skip or duplicate work, so the caller must
    /// explicitly choose a fresh start instead.
    #[error("checkpoint config mismatch: expected {expected}, found {found}")]
    ConfigMismatch {
        /// Hash of the active configuration
        expected: String,
        /// Hash stored in the record
        found: String,
    },

    /// Record file larger than the safety limit.
    #[error("checkpoint file too large: {size} bytes (max: {max} bytes)")]
    RecordTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// File lock error
    #[error("lock error: {0}")]
    LockError(String),
}

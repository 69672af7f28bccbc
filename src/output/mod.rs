//! Match persistence.
//!
//! The aggregator hands persistence a [`ResultBatch`] at a time; the sink
//! must be idempotent per (person, combination index) so that re-flushing a
//! batch, or re-deriving matches after a crash that predates the checkpoint,
//! never duplicates persisted rows.

use crate::ResultBatch;

pub mod csv;

pub use csv::CsvMatchSink;

/// Output writer errors.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Buffer flush error
    #[error("flush error: {0}")]
    FlushError(String),
}

/// Result type for output operations.
pub type OutputResult<T> = Result<T, OutputError>;

/// Destination for flushed match batches.
pub trait MatchSink: Send {
    /// Persist a batch durably, skipping rows already persisted. Returns the
    /// number of newly written matches.
    fn persist(&mut self, batch: &ResultBatch) -> OutputResult<u64>;

    /// Flush any buffered data to stable storage.
    fn flush(&mut self) -> OutputResult<()>;

    /// Flush and finalize the output.
    fn close(&mut self) -> OutputResult<()>;
}

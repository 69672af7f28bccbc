//! CLI error types and conversions

use crate::checkpoint::CheckpointError;
use crate::output::OutputError;
use crate::person::PersonError;
use crate::query::SessionError;
use crate::search::SearchError;
use crate::space::SpaceError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Search error
    #[error("search error: {0}")]
    SearchError(#[from] SearchError),

    /// Checkpoint error
    #[error("checkpoint error: {0}")]
    CheckpointError(#[from] CheckpointError),

    /// Combination space error
    #[error("combination space error: {0}")]
    SpaceError(#[from] SpaceError),

    /// Person input error
    #[error("person input error: {0}")]
    PersonError(#[from] PersonError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),

    /// Session error
    #[error("session error: {0}")]
    SessionError(#[from] SessionError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

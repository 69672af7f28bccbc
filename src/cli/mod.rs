//! CLI command implementations

pub mod error;
pub mod run;
pub mod status;

pub use error::CliError;
pub use run::{Cli, Commands, ResumeMode, RunArgs};
pub use status::StatusCommand;

//! Search orchestration.
//!
//! This module holds the moving parts of a run:
//!
//! 1. **Work distribution**: an atomic cursor hands each worker the next
//!    unclaimed combination index ([`distributor`])
//! 2. **Pacing**: per-worker randomized delays, periodic cooldowns, and
//!    escalated backoff after error bursts ([`throttle`])
//! 3. **Workers**: query, classify, retry, report ([`worker`])
//! 4. **Aggregation**: dedup, batch, persist-then-checkpoint ([`aggregator`])
//! 5. **Control**: the run state machine tying it together ([`controller`])
//!
//! Cross-worker coordination happens only through the atomic index cursor and
//! the single-writer aggregator; workers never block on each other directly.

pub mod aggregator;
pub mod config;
pub mod controller;
pub mod distributor;
pub mod throttle;
pub mod worker;

pub use aggregator::{Disposition, PersonRunStats, QueryResolution, ResultAggregator};
pub use config::{AggregatorConfig, WorkerConfig};
pub use controller::{RunConfig, RunController, RunState, RunSummary};
pub use distributor::WorkDistributor;
pub use throttle::{Pacer, ThrottleConfig};
pub use worker::{Worker, WorkerSummary};

use crate::checkpoint::CheckpointError;
use crate::output::OutputError;
use crate::query::SessionError;
use crate::space::SpaceError;

/// Search orchestration errors.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Checkpoint error
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Combination space error
    #[error("combination space error: {0}")]
    Space(#[from] SpaceError),

    /// Output error
    #[error("output error: {0}")]
    Output(#[from] OutputError),

    /// Session error
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// A worker reported a fatal outcome and the run was halted.
    #[error("worker {worker_id} reported a fatal outcome: {reason}")]
    Fatal {
        /// Worker that observed the fatal outcome
        worker_id: usize,
        /// Reason reported by the query capability
        reason: String,
    },

    /// A worker task panicked or was aborted.
    #[error("worker task failed: {0}")]
    WorkerTask(String),

    /// Invalid run configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

//! # CURP Combination Search
//!
//! A coordinator for brute-force searches over the (day, month, state, year)
//! birth-data space against a slow, rate-limit-sensitive external registry.
//! The endpoint interaction itself is an external collaborator ("perform one
//! query, get one classified outcome"); this crate is the orchestration
//! around it.
//!
//! ## Features
//!
//! - **Stable enumeration**: every combination has a deterministic integer
//!   index, so progress is resumable to the exact combination
//! - **Concurrent workers**: a fixed pool shares one atomic work cursor,
//!   guaranteeing no index is ever queried by two workers at once
//! - **Adaptive throttling**: randomized per-query delays, periodic
//!   cooldowns, and escalated backoff on transient-error bursts
//! - **Durable checkpoints**: atomic write-temp-then-rename records bound to
//!   the configuration that produced them
//! - **Batched persistence**: matches are flushed in deduplicated batches,
//!   and the checkpoint only advances past durably persisted results
//! - **Graceful control**: cooperative pause/resume and drain-on-interrupt
//!
//! ## Quick Start
//!
//! ```no_run
//! use curp_search::checkpoint::CheckpointStore;
//! use curp_search::output::CsvMatchSink;
//! use curp_search::query::SimulatedSessionFactory;
//! use curp_search::search::{RunConfig, RunController};
//! use curp_search::shutdown::RunSignals;
//! use curp_search::{Gender, PersonFields, SpaceConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunConfig::new(SpaceConfig::years(1988, 1995));
//! let store = CheckpointStore::new("./checkpoints");
//! let sink = CsvMatchSink::open("./matches.csv")?;
//! let factory = Arc::new(SimulatedSessionFactory::default());
//! let signals = RunSignals::shared();
//!
//! let people = vec![PersonFields {
//!     person_id: 1,
//!     first_name: "MARIA".to_string(),
//!     last_name_1: "GOMEZ".to_string(),
//!     last_name_2: "LOPEZ".to_string(),
//!     gender: Gender::Mujer,
//! }];
//!
//! let mut controller =
//!     RunController::new(config, store, factory, Box::new(sink), signals)?;
//! let summary = controller.run(&people).await?;
//! println!("{} match(es) found", summary.matches_found);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`space`] - deterministic enumeration of the combination space
//! - [`person`] - person input records
//! - [`query`] - the external query capability boundary
//! - [`search`] - distributor, throttle, workers, aggregator, controller
//! - [`checkpoint`] - durable progress records
//! - [`output`] - deduplicating match sinks
//! - [`shutdown`] - cooperative shutdown and pause/resume signals
//! - [`progress`] / [`metrics`] - observability

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// CLI command implementations
pub mod cli;

/// Durable progress checkpoints
pub mod checkpoint;

/// Observability metrics
pub mod metrics;

/// Match persistence
pub mod output;

/// Person input records
pub mod person;

/// Progress tracking
pub mod progress;

/// External query capability boundary
pub mod query;

/// Search orchestration
pub mod search;

/// Run control signals
pub mod shutdown;

/// Combination space enumeration
pub mod space;

pub use person::{Gender, PersonFields, PersonId};
pub use query::{Outcome, QuerySession, SessionFactory};
pub use space::{Combination, CombinationSpace, SpaceConfig};

/// One confirmed registry match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Person the match belongs to.
    pub person_id: PersonId,
    /// Combination index that produced the match.
    pub index: u64,
    /// The 18-character CURP returned by the registry.
    pub curp: String,
    /// Day of the matched combination.
    pub day: u8,
    /// Month of the matched combination.
    pub month: u8,
    /// Year of the matched combination.
    pub year: u16,
    /// Birth-state code of the matched combination.
    pub state_code: u8,
    /// Worker that performed the query.
    pub worker_id: usize,
    /// When the match was found, epoch milliseconds.
    pub found_at: i64,
    /// Additional fields the endpoint returned alongside the CURP.
    pub raw_fields: BTreeMap<String, String>,
}

impl MatchRecord {
    /// The combination this match was found at.
    pub fn combination(&self) -> Combination {
        Combination {
            day: self.day,
            month: self.month,
            state: self.state_code,
            year: self.year,
        }
    }
}

/// Bounded, ordered group of matches flushed to persistence as a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultBatch {
    /// Person the batch belongs to.
    pub person_id: PersonId,
    /// Matches in the batch, ordered by combination index.
    pub matches: Vec<MatchRecord>,
}

impl ResultBatch {
    /// Number of matches in the batch.
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    /// Whether the batch holds no matches.
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

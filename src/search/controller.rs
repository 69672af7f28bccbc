//! Run controller state machine.
//!
//! `Idle → Loading → Running → Draining → Stopped`, with `Running ⇄ Paused`
//! on the pause signal and `Running|Paused → Draining` on interrupt or
//! completion. Checkpoints for every person are loaded before a single
//! worker spawns, so a configuration mismatch aborts the run cold. People
//! are processed sequentially; the whole pool cooperates on one person's
//! combination space at a time.

use super::aggregator::{PersonRunStats, ResultAggregator};
use super::config::{AggregatorConfig, WorkerConfig, DEFAULT_POOL_SIZE, MAX_POOL_SIZE};
use super::distributor::WorkDistributor;
use super::throttle::{Pacer, ThrottleConfig};
use super::worker::Worker;
use super::SearchError;
use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::output::MatchSink;
use crate::person::PersonFields;
use crate::progress::{NullProgressObserver, ProgressObserver, ProgressTracker};
use crate::query::SessionFactory;
use crate::shutdown::SharedSignals;
use crate::space::{CombinationSpace, SpaceConfig};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{info, info_span, warn, Instrument};

/// Top-level run states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Not started.
    Idle,
    /// Loading or creating checkpoints.
    Loading,
    /// Workers querying.
    Running,
    /// Workers holding after their in-flight query.
    Paused,
    /// Flushing and writing the final checkpoint.
    Draining,
    /// Finished.
    Stopped,
}

/// Configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Combination space bounds.
    pub space: SpaceConfig,
    /// Fixed worker pool size.
    pub pool_size: usize,
    /// Pacing policy shared by the pool.
    pub throttle: ThrottleConfig,
    /// Per-worker query behavior.
    pub worker: WorkerConfig,
    /// Batching and persistence behavior.
    pub aggregator: AggregatorConfig,
    /// Progress emission cadence.
    pub progress: ProgressTracker,
}

impl RunConfig {
    /// Defaults for everything but the space.
    pub fn new(space: SpaceConfig) -> Self {
        Self {
            space,
            pool_size: DEFAULT_POOL_SIZE,
            throttle: ThrottleConfig::default(),
            worker: WorkerConfig::default(),
            aggregator: AggregatorConfig::default(),
            progress: ProgressTracker::default(),
        }
    }
}

/// Final accounting for a run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// People whose traversal completed this run.
    pub people_processed: usize,
    /// People skipped because their checkpoint already covered the space.
    pub people_skipped: usize,
    /// Unique combinations resolved across all people, including prior runs.
    pub queries_completed: u64,
    /// Matches found across all people, including prior runs.
    pub matches_found: u64,
    /// Whether the run drained early on a shutdown request.
    pub interrupted: bool,
}

/// Coordinates checkpoint loading, the worker pool, and draining.
pub struct RunController {
    config: RunConfig,
    space: Arc<CombinationSpace>,
    store: CheckpointStore,
    factory: Arc<dyn SessionFactory>,
    sink: Arc<Mutex<Box<dyn MatchSink>>>,
    signals: SharedSignals,
    observer: Arc<dyn ProgressObserver>,
    state: std::sync::Mutex<RunState>,
}

impl RunController {
    /// Build a controller. Fails if the pool size is out of bounds or the
    /// space configuration is invalid.
    pub fn new(
        config: RunConfig,
        store: CheckpointStore,
        factory: Arc<dyn SessionFactory>,
        sink: Box<dyn MatchSink>,
        signals: SharedSignals,
    ) -> Result<Self, SearchError> {
        if config.pool_size == 0 || config.pool_size > MAX_POOL_SIZE {
            return Err(SearchError::InvalidConfig(format!(
                "pool size {} outside 1-{MAX_POOL_SIZE}",
                config.pool_size
            )));
        }
        if config.throttle.min_delay > config.throttle.max_delay {
            return Err(SearchError::InvalidConfig(
                "min delay exceeds max delay".to_string(),
            ));
        }
        let space = Arc::new(CombinationSpace::new(config.space.clone())?);
        Ok(Self {
            config,
            space,
            store,
            factory,
            sink: Arc::new(Mutex::new(sink)),
            signals,
            observer: Arc::new(NullProgressObserver),
            state: std::sync::Mutex::new(RunState::Idle),
        })
    }

    /// Attach a progress observer (terminal bar, tests).
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    fn set_state(&self, next: RunState) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        *state = next;
    }

    /// Current state; reflects the pause signal while running.
    pub fn state(&self) -> RunState {
        let state = *self.state.lock().unwrap_or_else(|p| p.into_inner());
        if state == RunState::Running && self.signals.is_paused() {
            RunState::Paused
        } else {
            state
        }
    }

    /// The combination space this run enumerates.
    pub fn space(&self) -> &CombinationSpace {
        &self.space
    }

    /// Execute the run over an ordered list of people.
    pub async fn run(&mut self, people: &[PersonFields]) -> Result<RunSummary, SearchError> {
        self.set_state(RunState::Loading);
        let config_hash = self.space.config_hash();
        info!(
            people = people.len(),
            combinations_per_person = self.space.len(),
            pool_size = self.config.pool_size,
            config_hash = %config_hash,
            "loading checkpoints"
        );

        // A mismatched checkpoint must abort before any worker is spawned,
        // so every record is loaded and validated up front.
        let mut tasks: Vec<(PersonFields, CheckpointRecord)> = Vec::new();
        for person in people {
            let record = match self.store.load(person.person_id, &config_hash)? {
                Some(record) => {
                    info!(
                        person_id = person.person_id,
                        resume_index = record.resume_index(),
                        matches_so_far = record.matches().len(),
                        "resuming from checkpoint"
                    );
                    record
                }
                None => CheckpointRecord::new(person.person_id, config_hash.clone()),
            };
            tasks.push((person.clone(), record));
        }

        self.set_state(RunState::Running);
        let total = self.space.len();
        let mut summary = RunSummary::default();

        for (person, record) in tasks {
            if self.signals.is_shutdown_requested() {
                summary.interrupted = true;
                break;
            }
            if record.is_complete(total) {
                info!(
                    person_id = person.person_id,
                    "traversal already complete, skipping"
                );
                summary.people_skipped += 1;
                continue;
            }

            let span = info_span!("person", person_id = person.person_id);
            let stats = self.run_person(&person, record).instrument(span).await?;
            summary.queries_completed += stats.queries_completed;
            summary.matches_found += stats.matches;

            let complete = stats.watermark.map(|w| w + 1 >= total).unwrap_or(false);
            if complete {
                summary.people_processed += 1;
                self.store.clear(person.person_id);
                self.observer.person_finished(person.person_id, stats.matches);
                info!(
                    person_id = person.person_id,
                    matches = stats.matches,
                    "person traversal complete"
                );
            } else {
                summary.interrupted = true;
                info!(
                    person_id = person.person_id,
                    watermark = ?stats.watermark,
                    "run drained mid-person; checkpoint retained for resume"
                );
                break;
            }
        }

        self.set_state(RunState::Stopped);
        info!(
            people_processed = summary.people_processed,
            people_skipped = summary.people_skipped,
            queries_completed = summary.queries_completed,
            matches_found = summary.matches_found,
            interrupted = summary.interrupted,
            "run stopped"
        );
        Ok(summary)
    }

    /// Run the whole pool over one person's combination space, then drain.
    async fn run_person(
        &self,
        person: &PersonFields,
        record: CheckpointRecord,
    ) -> Result<PersonRunStats, SearchError> {
        let total = self.space.len();
        let resume_index = record.resume_index();
        self.observer.person_started(person, total, resume_index);
        info!(
            name = %person.full_name(),
            resume_index,
            total,
            "starting combination search"
        );

        let distributor = Arc::new(WorkDistributor::new(resume_index, total));
        let aggregator = Arc::new(ResultAggregator::new(
            record,
            total,
            self.config.aggregator.clone(),
            self.sink.clone(),
            self.store.clone(),
            self.observer.clone(),
            &self.config.progress,
        ));
        let person_arc = Arc::new(person.clone());

        let mut pool = JoinSet::new();
        for worker_id in 0..self.config.pool_size {
            let worker = Worker {
                id: worker_id,
                person: person_arc.clone(),
                space: self.space.clone(),
                distributor: distributor.clone(),
                aggregator: aggregator.clone(),
                signals: self.signals.clone(),
                config: self.config.worker.clone(),
                pacer: Pacer::new(self.config.throttle.clone(), worker_id),
            };
            let factory = self.factory.clone();
            let span = info_span!("worker", worker_id);
            pool.spawn(worker.run(factory).instrument(span));
        }

        let mut first_error: Option<SearchError> = None;
        let mut fatal: Option<(usize, String)> = None;
        let mut retries = 0u64;
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(Ok(worker_summary)) => {
                    retries += worker_summary.retries;
                    if let Some(reason) = worker_summary.fatal {
                        warn!(
                            worker_id = worker_summary.worker_id,
                            reason = %reason,
                            "worker stopped on fatal outcome"
                        );
                        if fatal.is_none() {
                            fatal = Some((worker_summary.worker_id, reason));
                        }
                    }
                }
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(join_error) => {
                    if first_error.is_none() {
                        first_error = Some(SearchError::WorkerTask(join_error.to_string()));
                    }
                }
            }
        }

        // Drain always runs, even on the error paths, so the checkpoint
        // stays consistent with everything that was persisted.
        self.set_state(RunState::Draining);
        let stats = aggregator.finalize().await?;
        if !self.signals.is_shutdown_requested() {
            self.set_state(RunState::Running);
        }
        info!(
            queries_completed = stats.queries_completed,
            matches = stats.matches,
            retries,
            duplicates_discarded = stats.duplicates_discarded,
            watermark = ?stats.watermark,
            "person pool drained"
        );

        if let Some(e) = first_error {
            return Err(e);
        }
        if let Some((worker_id, reason)) = fatal {
            return Err(SearchError::Fatal { worker_id, reason });
        }
        Ok(stats)
    }
}

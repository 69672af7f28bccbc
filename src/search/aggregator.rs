//! Result aggregation and batched persistence.
//!
//! All workers report into one aggregator per person traversal; it is the
//! single logical writer for both the match sink and the checkpoint record.
//! The flush order is fixed and load-bearing: persist the pending batch
//! durably first, then advance the checkpoint to the gapless completion
//! watermark. After a crash the checkpoint is therefore never ahead of the
//! persisted results - matches are delivered at least once, and the
//! checkpoint never moves past an unconfirmed point.

use super::config::AggregatorConfig;
use super::SearchError;
use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::metrics;
use crate::output::MatchSink;
use crate::person::PersonId;
use crate::progress::{ProgressObserver, ProgressState, ProgressTracker};
use crate::{MatchRecord, ResultBatch};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How one claimed combination was resolved.
#[derive(Debug, Clone)]
pub enum Disposition {
    /// The registry confirmed a match.
    Match(MatchRecord),
    /// No match; `error` carries the annotation when retries were exhausted.
    NoMatch {
        /// Last transient error, for indices completed by exhausting retries.
        error: Option<String>,
    },
}

/// One worker's report for one claimed index.
#[derive(Debug, Clone)]
pub struct QueryResolution {
    /// The combination index this resolves.
    pub index: u64,
    /// Worker that performed the query.
    pub worker_id: usize,
    /// How the combination resolved.
    pub disposition: Disposition,
}

/// Why a flush happened, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushReason {
    BatchFull,
    Interval,
    Drain,
}

/// Final accounting for one person's traversal (or the drained part of it).
#[derive(Debug, Clone)]
pub struct PersonRunStats {
    /// Unique combinations resolved, including prior runs.
    pub queries_completed: u64,
    /// Matches found, including prior runs.
    pub matches: u64,
    /// Highest gapless completed index.
    pub watermark: Option<u64>,
    /// Duplicate reports discarded (restart boundary re-issues).
    pub duplicates_discarded: u64,
}

struct AggregatorInner {
    record: CheckpointRecord,
    /// Lowest index not yet resolved; everything below it is complete.
    next_expected: u64,
    /// Resolved indices above the watermark, waiting for the gap to close.
    parked: BTreeSet<u64>,
    /// Matches accepted but not yet persisted.
    pending: Vec<MatchRecord>,
    queries_completed: u64,
    duplicates_discarded: u64,
    dirty: bool,
    last_flush: Instant,
    progress: ProgressState,
}

/// Thread-safe single aggregation point for one person traversal.
pub struct ResultAggregator {
    person_id: PersonId,
    total: u64,
    config: AggregatorConfig,
    sink: Arc<Mutex<Box<dyn MatchSink>>>,
    store: CheckpointStore,
    observer: Arc<dyn ProgressObserver>,
    inner: Mutex<AggregatorInner>,
}

impl ResultAggregator {
    /// Aggregator resuming from `record`. `total` is the space size; the
    /// sink is shared with the rest of the run.
    pub fn new(
        record: CheckpointRecord,
        total: u64,
        config: AggregatorConfig,
        sink: Arc<Mutex<Box<dyn MatchSink>>>,
        store: CheckpointStore,
        observer: Arc<dyn ProgressObserver>,
        tracker: &ProgressTracker,
    ) -> Self {
        let person_id = record.person_id();
        let next_expected = record.resume_index();
        let queries_completed = record.queries_completed();
        let matches = record.matches().len() as u64;
        let progress = tracker.create_state(total, queries_completed, matches);
        Self {
            person_id,
            total,
            config,
            sink,
            store,
            observer,
            inner: Mutex::new(AggregatorInner {
                record,
                next_expected,
                parked: BTreeSet::new(),
                pending: Vec::new(),
                queries_completed,
                duplicates_discarded: 0,
                dirty: false,
                last_flush: Instant::now(),
                progress,
            }),
        }
    }

    /// Accept one worker report. Deduplicates by combination index, advances
    /// the gapless watermark, and flushes when the pending batch or the
    /// flush interval threshold is reached.
    pub async fn report(&self, resolution: QueryResolution) -> Result<(), SearchError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        // Dedup: an index at or below the watermark, or already parked, has
        // been resolved before (restart boundary or in-flight overlap).
        if resolution.index < inner.next_expected || inner.parked.contains(&resolution.index) {
            inner.duplicates_discarded += 1;
            debug!(
                person_id = self.person_id,
                index = resolution.index,
                "duplicate resolution discarded"
            );
            return Ok(());
        }

        inner.parked.insert(resolution.index);
        loop {
            let expected = inner.next_expected;
            if inner.parked.remove(&expected) {
                inner.next_expected += 1;
            } else {
                break;
            }
        }

        inner.queries_completed += 1;
        inner.dirty = true;

        match resolution.disposition {
            Disposition::Match(record) => {
                metrics::record_match();
                if inner.record.add_match(record.clone()) {
                    inner.pending.push(record);
                }
            }
            Disposition::NoMatch { error: Some(e) } => {
                debug!(
                    person_id = self.person_id,
                    index = resolution.index,
                    error = %e,
                    "combination completed with error annotation"
                );
            }
            Disposition::NoMatch { error: None } => {}
        }

        let matches = inner.record.matches().len() as u64;
        inner.progress.update(inner.queries_completed, matches);
        self.observer
            .progress(inner.queries_completed, self.total, matches);
        if inner.progress.should_emit_update() {
            info!(person_id = self.person_id, "{}", inner.progress.format_progress());
            inner.progress.mark_emitted();
        }

        if inner.pending.len() >= self.config.batch_size {
            self.flush_locked(inner, FlushReason::BatchFull).await?;
        } else if inner.last_flush.elapsed() >= self.config.flush_interval {
            self.flush_locked(inner, FlushReason::Interval).await?;
        }
        Ok(())
    }

    /// Drain: flush pending matches and force a final checkpoint save.
    pub async fn finalize(&self) -> Result<PersonRunStats, SearchError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        self.flush_locked(inner, FlushReason::Drain).await?;
        Ok(PersonRunStats {
            queries_completed: inner.queries_completed,
            matches: inner.record.matches().len() as u64,
            watermark: inner.next_expected.checked_sub(1),
            duplicates_discarded: inner.duplicates_discarded,
        })
    }

    /// Current (completed, total, matches, watermark) counters.
    pub async fn snapshot(&self) -> (u64, u64, u64, Option<u64>) {
        let inner = self.inner.lock().await;
        (
            inner.queries_completed,
            self.total,
            inner.record.matches().len() as u64,
            inner.next_expected.checked_sub(1),
        )
    }

    /// Persist pending matches, then advance the checkpoint. Persist
    /// failures are retried with a fixed delay until they succeed; a batch
    /// is never dropped.
    async fn flush_locked(
        &self,
        inner: &mut AggregatorInner,
        reason: FlushReason,
    ) -> Result<(), SearchError> {
        if !inner.dirty && inner.pending.is_empty() {
            inner.last_flush = Instant::now();
            return Ok(());
        }

        if !inner.pending.is_empty() {
            let batch = ResultBatch {
                person_id: self.person_id,
                matches: std::mem::take(&mut inner.pending),
            };
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                let result = {
                    let mut sink = self.sink.lock().await;
                    sink.persist(&batch)
                };
                match result {
                    Ok(written) => {
                        metrics::record_batch_flush(batch.matches.len());
                        info!(
                            person_id = self.person_id,
                            batch_size = batch.matches.len(),
                            newly_written = written,
                            reason = ?reason,
                            "result batch flushed"
                        );
                        break;
                    }
                    Err(e) => {
                        metrics::record_persist_failure();
                        warn!(
                            person_id = self.person_id,
                            attempt,
                            error = %e,
                            retry_in = ?self.config.persist_retry_delay,
                            "persist failed; batch retained for retry"
                        );
                        tokio::time::sleep(self.config.persist_retry_delay).await;
                    }
                }
            }
        }

        // Only now, with results durable, may the checkpoint move.
        if let Some(watermark) = inner.next_expected.checked_sub(1) {
            inner.record.advance(watermark, inner.queries_completed);
        }
        self.store.save(&inner.record)?;
        metrics::record_checkpoint_save();
        inner.dirty = false;
        inner.last_flush = Instant::now();
        Ok(())
    }
}

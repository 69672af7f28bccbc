//! Search worker.
//!
//! A worker owns one session on the external capability and loops: claim the
//! next index, decode it, query under a deadline, classify, retry transients
//! in place, report the resolution, then pace itself. Shutdown and pause are
//! checked between queries; a worker never blocks on a sibling.

use super::aggregator::{Disposition, QueryResolution, ResultAggregator};
use super::config::WorkerConfig;
use super::distributor::WorkDistributor;
use super::throttle::Pacer;
use super::SearchError;
use crate::metrics;
use crate::person::PersonFields;
use crate::query::{is_valid_curp, Outcome, QuerySession, SessionFactory};
use crate::shutdown::{sleep_interruptible, SharedSignals};
use crate::space::CombinationSpace;
use crate::MatchRecord;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Final accounting for one worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerSummary {
    /// Worker identity within the pool.
    pub worker_id: usize,
    /// Combinations this worker resolved.
    pub queries: u64,
    /// Matches this worker found.
    pub matches: u64,
    /// Retries performed after transient errors.
    pub retries: u64,
    /// Set when the worker stopped on a fatal outcome.
    pub fatal: Option<String>,
}

/// How one claimed index ended.
enum Attempted {
    Resolved(Disposition),
    Fatal(String),
    Cancelled,
}

/// One executor in the pool.
pub struct Worker {
    /// Worker identity within the pool.
    pub id: usize,
    /// The person being searched.
    pub person: Arc<PersonFields>,
    /// Space shared by the pool.
    pub space: Arc<CombinationSpace>,
    /// Index source shared by the pool.
    pub distributor: Arc<WorkDistributor>,
    /// Single reporting point shared by the pool.
    pub aggregator: Arc<ResultAggregator>,
    /// Run signals.
    pub signals: SharedSignals,
    /// Query behavior.
    pub config: WorkerConfig,
    /// This worker's pacing state.
    pub pacer: Pacer,
}

impl Worker {
    /// Run until the distributor is exhausted, shutdown is requested, or a
    /// fatal outcome stops this worker. A fatal outcome is recorded in the
    /// summary; siblings keep running and the controller decides what to do.
    pub async fn run(
        mut self,
        factory: Arc<dyn SessionFactory>,
    ) -> Result<WorkerSummary, SearchError> {
        let mut summary = WorkerSummary {
            worker_id: self.id,
            ..WorkerSummary::default()
        };

        let mut session = match self.open_session(&*factory).await {
            Ok(session) => session,
            Err(reason) => {
                error!(worker_id = self.id, reason = %reason, "worker could not open a session");
                metrics::record_fatal_error();
                summary.fatal = Some(reason);
                return Ok(summary);
            }
        };
        debug!(worker_id = self.id, "worker session opened");

        loop {
            if self.signals.is_shutdown_requested() {
                break;
            }
            self.signals.wait_while_paused().await;
            if self.signals.is_shutdown_requested() {
                break;
            }

            let Some(index) = self.distributor.claim() else {
                break;
            };
            let combination = self.space.decode(index)?;

            match self.attempt(session.as_mut(), index, &combination, &mut summary).await {
                Attempted::Resolved(disposition) => {
                    let matched = matches!(disposition, Disposition::Match(_));
                    self.aggregator
                        .report(QueryResolution {
                            index,
                            worker_id: self.id,
                            disposition,
                        })
                        .await?;
                    summary.queries += 1;
                    if matched {
                        summary.matches += 1;
                    }
                }
                Attempted::Fatal(reason) => {
                    error!(
                        worker_id = self.id,
                        index,
                        reason = %reason,
                        "fatal outcome - worker stops pulling work"
                    );
                    metrics::record_fatal_error();
                    summary.fatal = Some(reason);
                    break;
                }
                Attempted::Cancelled => break,
            }

            self.pacer.wait(&self.signals).await;
        }

        session.close().await;
        debug!(
            worker_id = self.id,
            queries = summary.queries,
            matches = summary.matches,
            retries = summary.retries,
            "worker finished"
        );
        Ok(summary)
    }

    /// Open a session, retrying a bounded number of times. The original
    /// browser-backed capability needs several seconds to come up and can
    /// fail on the first try.
    async fn open_session(
        &self,
        factory: &dyn SessionFactory,
    ) -> Result<Box<dyn QuerySession>, String> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match factory.open(self.id).await {
                Ok(session) => return Ok(session),
                Err(e) if attempt < self.config.session_open_attempts => {
                    warn!(
                        worker_id = self.id,
                        attempt,
                        error = %e,
                        "session open failed, retrying"
                    );
                    if !sleep_interruptible(self.config.session_retry_delay, &self.signals).await {
                        return Err("shutdown requested while opening session".to_string());
                    }
                }
                Err(e) => {
                    return Err(format!("session open failed after {attempt} attempts: {e}"));
                }
            }
        }
    }

    /// Query one combination, retrying transient errors in place. Retries do
    /// not consume a new index; exhausted retries resolve to a no-match with
    /// the last error noted, so the index still completes.
    async fn attempt(
        &mut self,
        session: &mut dyn QuerySession,
        index: u64,
        combination: &crate::space::Combination,
        summary: &mut WorkerSummary,
    ) -> Attempted {
        let max_attempts = self.config.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if self.signals.is_shutdown_requested() {
                return Attempted::Cancelled;
            }

            let started = Instant::now();
            let outcome = match tokio::time::timeout(
                self.config.query_timeout,
                session.query(&self.person, combination),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Outcome::Transient(format!(
                    "query timed out after {}s",
                    self.config.query_timeout.as_secs()
                )),
            };
            metrics::record_query(outcome.label(), started.elapsed());

            match outcome {
                Outcome::Match { curp, raw_fields } => {
                    self.pacer.record_success();
                    if !is_valid_curp(&curp) {
                        warn!(
                            worker_id = self.id,
                            index,
                            curp = %curp,
                            "match with malformed curp demoted to no-match"
                        );
                        return Attempted::Resolved(Disposition::NoMatch {
                            error: Some(format!("malformed curp: {curp}")),
                        });
                    }
                    info!(
                        worker_id = self.id,
                        index,
                        curp = %curp,
                        combination = %combination,
                        "match found"
                    );
                    return Attempted::Resolved(Disposition::Match(MatchRecord {
                        person_id: self.person.person_id,
                        index,
                        curp,
                        day: combination.day,
                        month: combination.month,
                        year: combination.year,
                        state_code: combination.state,
                        worker_id: self.id,
                        found_at: chrono::Utc::now().timestamp_millis(),
                        raw_fields,
                    }));
                }
                Outcome::NoMatch => {
                    self.pacer.record_success();
                    return Attempted::Resolved(Disposition::NoMatch { error: None });
                }
                Outcome::Transient(reason) => {
                    self.pacer.record_transient();
                    metrics::record_transient_error();
                    last_error = reason;
                    if attempt < max_attempts {
                        summary.retries += 1;
                        metrics::record_retry(attempt);
                        warn!(
                            worker_id = self.id,
                            index,
                            attempt,
                            error = %last_error,
                            "transient error, retrying combination"
                        );
                        self.pacer.wait(&self.signals).await;
                    }
                }
                Outcome::Fatal(reason) => return Attempted::Fatal(reason),
            }
        }

        debug!(
            worker_id = self.id,
            index,
            error = %last_error,
            "retries exhausted, recording as no-match with annotation"
        );
        Attempted::Resolved(Disposition::NoMatch {
            error: Some(format!("retries exhausted: {last_error}")),
        })
    }
}

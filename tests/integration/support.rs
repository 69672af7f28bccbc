//! Shared fixtures for orchestration tests.
//!
//! `ScriptedSessionFactory` plays back per-index outcome scripts (repeating
//! the last entry, since the real endpoint is idempotent) and counts every
//! call, so tests can assert exactly which combinations were queried and how
//! often. `MemorySink` collects flushed batches and can be told to fail its
//! first N persist attempts.

use async_trait::async_trait;
use curp_search::output::{MatchSink, OutputError, OutputResult};
use curp_search::query::{Outcome, QuerySession, SessionError, SessionFactory};
use curp_search::shutdown::SharedSignals;
use curp_search::{Combination, CombinationSpace, PersonFields, ResultBatch};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A well-formed CURP for match scripts.
pub const TEST_CURP: &str = "GOML900315MJCMPR09";

/// A person fixture.
pub fn test_person(person_id: u32) -> PersonFields {
    PersonFields {
        person_id,
        first_name: "MARIA".to_string(),
        last_name_1: "GOMEZ".to_string(),
        last_name_2: "LOPEZ".to_string(),
        gender: curp_search::Gender::Mujer,
    }
}

/// A match outcome with a valid CURP.
pub fn match_outcome() -> Outcome {
    Outcome::Match {
        curp: TEST_CURP.to_string(),
        raw_fields: Default::default(),
    }
}

struct ScriptState {
    /// Per-index outcome scripts; the position advances per call and the
    /// last entry repeats.
    scripts: Mutex<HashMap<u64, (Vec<Outcome>, usize)>>,
    calls: Mutex<HashMap<u64, u32>>,
    total_calls: AtomicU64,
    opened_sessions: AtomicUsize,
    /// Request shutdown once total calls reach this threshold.
    shutdown_after: Mutex<Option<(u64, SharedSignals)>>,
    latency: Mutex<Duration>,
}

/// Session factory with scripted, per-index outcomes.
#[derive(Clone)]
pub struct ScriptedSessionFactory {
    space: Arc<CombinationSpace>,
    state: Arc<ScriptState>,
}

impl ScriptedSessionFactory {
    pub fn new(space: Arc<CombinationSpace>) -> Self {
        Self {
            space,
            state: Arc::new(ScriptState {
                scripts: Mutex::new(HashMap::new()),
                calls: Mutex::new(HashMap::new()),
                total_calls: AtomicU64::new(0),
                opened_sessions: AtomicUsize::new(0),
                shutdown_after: Mutex::new(None),
                latency: Mutex::new(Duration::ZERO),
            }),
        }
    }

    /// Script the outcome sequence for one index; the last entry repeats on
    /// further calls. Unscripted indices answer no-match.
    pub fn script(&self, index: u64, outcomes: Vec<Outcome>) {
        assert!(!outcomes.is_empty());
        self.state
            .scripts
            .lock()
            .unwrap()
            .insert(index, (outcomes, 0));
    }

    /// Script a repeating match at one index.
    pub fn match_at(&self, index: u64) {
        self.script(index, vec![match_outcome()]);
    }

    /// Add a fixed latency to every query.
    pub fn set_latency(&self, latency: Duration) {
        *self.state.latency.lock().unwrap() = latency;
    }

    /// Request shutdown on `signals` once `calls` queries have been made.
    pub fn shutdown_after(&self, calls: u64, signals: SharedSignals) {
        *self.state.shutdown_after.lock().unwrap() = Some((calls, signals));
    }

    /// How many times one index was queried.
    pub fn calls_for(&self, index: u64) -> u32 {
        self.state
            .calls
            .lock()
            .unwrap()
            .get(&index)
            .copied()
            .unwrap_or(0)
    }

    /// Per-index call counts.
    pub fn call_counts(&self) -> HashMap<u64, u32> {
        self.state.calls.lock().unwrap().clone()
    }

    /// Total queries across all sessions.
    pub fn total_calls(&self) -> u64 {
        self.state.total_calls.load(Ordering::SeqCst)
    }

    /// Sessions opened so far.
    pub fn opened_sessions(&self) -> usize {
        self.state.opened_sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for ScriptedSessionFactory {
    async fn open(&self, _worker_id: usize) -> Result<Box<dyn QuerySession>, SessionError> {
        self.state.opened_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            space: self.space.clone(),
            state: self.state.clone(),
        }))
    }
}

struct ScriptedSession {
    space: Arc<CombinationSpace>,
    state: Arc<ScriptState>,
}

#[async_trait]
impl QuerySession for ScriptedSession {
    async fn query(&mut self, _person: &PersonFields, combination: &Combination) -> Outcome {
        let index = self.space.encode(combination).expect("scripted combination");

        *self.state.calls.lock().unwrap().entry(index).or_insert(0) += 1;
        let total = self.state.total_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((threshold, signals)) = self.state.shutdown_after.lock().unwrap().as_ref() {
            if total >= *threshold {
                signals.request_shutdown();
            }
        }

        let latency = *self.state.latency.lock().unwrap();
        if latency > Duration::ZERO {
            tokio::time::sleep(latency).await;
        }

        let mut scripts = self.state.scripts.lock().unwrap();
        match scripts.get_mut(&index) {
            Some((outcomes, position)) => {
                let outcome = outcomes[(*position).min(outcomes.len() - 1)].clone();
                *position += 1;
                outcome
            }
            None => Outcome::NoMatch,
        }
    }
}

/// In-memory sink recording every flushed batch.
#[derive(Clone)]
pub struct MemorySink {
    batches: Arc<Mutex<Vec<ResultBatch>>>,
    fail_remaining: Arc<AtomicU32>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            batches: Arc::new(Mutex::new(Vec::new())),
            fail_remaining: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Fail the next `count` persist attempts.
    pub fn fail_next(&self, count: u32) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    /// Flushed batches so far.
    pub fn batches(&self) -> Vec<ResultBatch> {
        self.batches.lock().unwrap().clone()
    }

    /// All persisted match indices, flattened in flush order.
    pub fn match_indices(&self) -> Vec<u64> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|batch| batch.matches.iter().map(|m| m.index))
            .collect()
    }
}

impl MatchSink for MemorySink {
    fn persist(&mut self, batch: &ResultBatch) -> OutputResult<u64> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(OutputError::IoError("injected persist failure".to_string()));
        }
        self.batches.lock().unwrap().push(batch.clone());
        Ok(batch.matches.len() as u64)
    }

    fn flush(&mut self) -> OutputResult<()> {
        Ok(())
    }

    fn close(&mut self) -> OutputResult<()> {
        Ok(())
    }
}

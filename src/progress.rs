//! Progress tracking for long-running searches.
//!
//! A full traversal of one person's combination space can take days against a
//! slow endpoint, so the run surfaces periodic human-readable progress lines:
//! completed count, percentage, query rate, match count, and a remaining-time
//! estimate. Emission cadence is controlled by a time threshold plus a
//! minimum percentage step so logs stay quiet on fast spaces and alive on
//! slow ones.

use crate::person::{PersonFields, PersonId};
use std::time::{Duration, Instant};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const MIN_RUN_DURATION: Duration = Duration::from_secs(30);

/// Builder that controls update cadence.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    update_interval: Duration,
    min_percentage_step: f64,
}

impl ProgressTracker {
    /// Tracker with custom interval and percentage step.
    pub fn new(update_interval: Duration, min_percentage_step: f64) -> Self {
        Self {
            update_interval,
            min_percentage_step,
        }
    }

    /// Build a [`ProgressState`] for one person's traversal.
    pub fn create_state(&self, total: u64, resumed_from: u64, matches: u64) -> ProgressState {
        let now = Instant::now();
        ProgressState {
            queries_completed: resumed_from,
            total,
            matches,
            session_base: resumed_from,
            start_time: now,
            last_update: now,
            update_interval: self.update_interval,
            min_percentage_step: self.min_percentage_step,
            last_reported_percentage: percentage_of(resumed_from, total),
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(DEFAULT_UPDATE_INTERVAL, 5.0)
    }
}

/// Progress state for one person's traversal.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Unique combinations resolved so far, including prior runs.
    pub queries_completed: u64,
    /// Total combinations in the space.
    pub total: u64,
    /// Matches found so far, including prior runs.
    pub matches: u64,
    /// Completed count this traversal resumed from; rate is computed from
    /// work done after this point.
    session_base: u64,
    start_time: Instant,
    last_update: Instant,
    update_interval: Duration,
    min_percentage_step: f64,
    last_reported_percentage: f64,
}

impl ProgressState {
    /// Update counters after a resolution is accepted.
    pub fn update(&mut self, queries_completed: u64, matches: u64) {
        self.queries_completed = queries_completed;
        self.matches = matches;
    }

    /// Completion percentage, 0-100.
    pub fn percentage(&self) -> f64 {
        percentage_of(self.queries_completed, self.total)
    }

    /// Queries per second since this traversal started.
    pub fn rate(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.queries_completed.saturating_sub(self.session_base) as f64 / elapsed
    }

    /// Whether a progress update should be emitted based on time or
    /// percentage movement.
    pub fn should_emit_update(&self) -> bool {
        if self.queries_completed == self.session_base {
            return false;
        }
        if self.percentage() - self.last_reported_percentage >= self.min_percentage_step {
            return true;
        }
        self.start_time.elapsed() >= MIN_RUN_DURATION
            && self.last_update.elapsed() >= self.update_interval
    }

    /// Call after emitting a progress line to reset timers and the cached
    /// percentage.
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
        self.last_reported_percentage = self.percentage();
    }

    /// Estimate remaining time from the current rate.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        let rate = self.rate();
        if rate <= 0.0 {
            return None;
        }
        let remaining = self.total.saturating_sub(self.queries_completed);
        if remaining == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }

    /// Human-readable progress string for logging.
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!(
            "[PROGRESS] {}/{} combinations - {:.1}% complete - {} match(es)",
            self.queries_completed,
            self.total,
            self.percentage(),
            self.matches
        )];

        let rate = self.rate();
        if rate > 0.0 {
            parts.push(format!("at {rate:.1} queries/sec"));
        }
        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }
        parts.join(" ")
    }
}

fn percentage_of(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (done as f64 / total as f64) * 100.0
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}

/// Hook for surfaces that render traversal progress (terminal bar, tests).
///
/// All methods have empty defaults; implement only what the surface needs.
pub trait ProgressObserver: Send + Sync {
    /// A person's traversal is starting.
    fn person_started(&self, _person: &PersonFields, _total: u64, _resumed_from: u64) {}

    /// Counters moved: unique combinations resolved and matches found.
    fn progress(&self, _completed: u64, _total: u64, _matches: u64) {}

    /// A person's traversal completed.
    fn person_finished(&self, _person_id: PersonId, _matches: u64) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default)]
pub struct NullProgressObserver;

impl ProgressObserver for NullProgressObserver {}

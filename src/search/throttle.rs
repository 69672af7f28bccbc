//! Adaptive request pacing.
//!
//! Each worker owns a [`Pacer`] built from a shared [`ThrottleConfig`]:
//! baseline waits are drawn uniformly from a configured interval, a longer
//! cooldown pause lands every N calls, and a run of consecutive transient
//! errors escalates the delay multiplicatively until a success or no-match
//! resets it. The transition rules are pure functions of the pacer state so
//! they can be tested without sleeping; only the actual waits touch the
//! clock.

use crate::metrics;
use crate::shutdown::{sleep_interruptible, RunSignals};
use rand::Rng;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Pacing policy shared by all workers in a pool.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Lower bound of the baseline inter-query delay.
    pub min_delay: Duration,
    /// Upper bound of the baseline inter-query delay.
    pub max_delay: Duration,
    /// Take a cooldown pause every this many calls per worker; 0 disables.
    pub cooldown_every: u64,
    /// Cooldown pause duration (a small random jitter is added).
    pub cooldown_duration: Duration,
    /// Consecutive transient errors before backoff escalates.
    pub burst_threshold: u32,
    /// Upper bound on the backoff delay multiplier.
    pub backoff_cap: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(300),
            max_delay: Duration::from_millis(600),
            cooldown_every: 500,
            cooldown_duration: Duration::from_secs(5),
            burst_threshold: 3,
            backoff_cap: 16.0,
        }
    }
}

/// Per-worker pacing state.
#[derive(Debug)]
pub struct Pacer {
    config: ThrottleConfig,
    worker_id: usize,
    calls: u64,
    error_streak: u32,
}

impl Pacer {
    /// Pacer for one worker.
    pub fn new(config: ThrottleConfig, worker_id: usize) -> Self {
        Self {
            config,
            worker_id,
            calls: 0,
            error_streak: 0,
        }
    }

    /// Calls waited on so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    /// Current run of consecutive transient errors.
    pub fn error_streak(&self) -> u32 {
        self.error_streak
    }

    /// Current delay multiplier. Baseline 1.0; once the streak reaches the
    /// burst threshold the factor doubles per further error, capped.
    pub fn backoff_factor(&self) -> f64 {
        if self.error_streak < self.config.burst_threshold {
            return 1.0;
        }
        let exceeded = (self.error_streak - self.config.burst_threshold) as i32;
        2f64.powi(exceeded + 1).min(self.config.backoff_cap)
    }

    /// Effective delay interval after applying the backoff factor.
    pub fn delay_range(&self) -> (Duration, Duration) {
        let factor = self.backoff_factor();
        (
            self.config.min_delay.mul_f64(factor),
            self.config.max_delay.mul_f64(factor),
        )
    }

    /// Note a success or no-match; resets any escalation.
    pub fn record_success(&mut self) {
        if self.error_streak >= self.config.burst_threshold {
            debug!(
                worker_id = self.worker_id,
                streak = self.error_streak,
                "transient error streak ended, backoff reset"
            );
        }
        self.error_streak = 0;
        metrics::record_backoff_factor(self.worker_id, 1.0);
    }

    /// Note a transient error; may escalate backoff.
    pub fn record_transient(&mut self) {
        self.error_streak += 1;
        let factor = self.backoff_factor();
        if factor > 1.0 {
            warn!(
                worker_id = self.worker_id,
                streak = self.error_streak,
                factor,
                "escalating throttle backoff"
            );
        }
        metrics::record_backoff_factor(self.worker_id, factor);
    }

    /// Suspend the worker for one pacing interval. Applies the baseline
    /// random delay scaled by the backoff factor, plus a cooldown pause every
    /// `cooldown_every` calls. Never fails; only delays. Cut short if
    /// shutdown is requested.
    pub async fn wait(&mut self, signals: &RunSignals) {
        self.calls += 1;
        let started = Instant::now();

        let (min, max) = self.delay_range();
        let delay = {
            let mut rng = rand::thread_rng();
            let min_ms = min.as_millis() as u64;
            let max_ms = max.as_millis() as u64;
            if max_ms > min_ms {
                Duration::from_millis(rng.gen_range(min_ms..=max_ms))
            } else {
                min
            }
        };
        if !sleep_interruptible(delay, signals).await {
            return;
        }

        if self.config.cooldown_every > 0 && self.calls % self.config.cooldown_every == 0 {
            let pause = {
                let mut rng = rand::thread_rng();
                self.config.cooldown_duration + Duration::from_millis(rng.gen_range(0..=2000))
            };
            debug!(
                worker_id = self.worker_id,
                calls = self.calls,
                pause_ms = pause.as_millis() as u64,
                "cooldown pause"
            );
            sleep_interruptible(pause, signals).await;
        }

        metrics::record_throttle_wait(started.elapsed());
    }
}

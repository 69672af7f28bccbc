//! Throttle behavior tests: backoff escalation and reset, cooldown cadence,
//! interruptible waits.

use curp_search::search::{Pacer, ThrottleConfig};
use curp_search::shutdown::RunSignals;
use std::time::{Duration, Instant};

fn fast_config() -> ThrottleConfig {
    ThrottleConfig {
        min_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        cooldown_every: 3,
        cooldown_duration: Duration::from_millis(5),
        burst_threshold: 3,
        backoff_cap: 16.0,
    }
}

#[test]
fn backoff_rises_through_error_burst_then_resets() {
    // Three consecutive transient errors, then a success.
    let mut pacer = Pacer::new(fast_config(), 0);
    let mut observed = Vec::new();

    observed.push(pacer.backoff_factor());
    for _ in 0..3 {
        pacer.record_transient();
        observed.push(pacer.backoff_factor());
    }
    pacer.record_success();
    observed.push(pacer.backoff_factor());

    assert_eq!(observed, vec![1.0, 1.0, 1.0, 2.0, 1.0]);
}

#[test]
fn backoff_doubles_per_error_beyond_threshold_up_to_cap() {
    let mut pacer = Pacer::new(fast_config(), 0);
    let mut factors = Vec::new();
    for _ in 0..8 {
        pacer.record_transient();
        factors.push(pacer.backoff_factor());
    }
    assert_eq!(factors, vec![1.0, 1.0, 2.0, 4.0, 8.0, 16.0, 16.0, 16.0]);
}

#[test]
fn delay_range_tracks_backoff_factor() {
    let mut pacer = Pacer::new(fast_config(), 0);
    let (baseline_min, baseline_max) = pacer.delay_range();
    for _ in 0..4 {
        pacer.record_transient();
    }
    let (escalated_min, escalated_max) = pacer.delay_range();
    assert_eq!(escalated_min, baseline_min.mul_f64(4.0));
    assert_eq!(escalated_max, baseline_max.mul_f64(4.0));
}

#[tokio::test]
async fn cooldown_lands_on_schedule() {
    let mut pacer = Pacer::new(fast_config(), 0);
    let signals = RunSignals::new();

    // Two waits below the cooldown threshold are quick.
    let started = Instant::now();
    pacer.wait(&signals).await;
    pacer.wait(&signals).await;
    let before_cooldown = started.elapsed();

    // The third wait crosses cooldown_every=3 and absorbs the pause.
    let started = Instant::now();
    pacer.wait(&signals).await;
    let with_cooldown = started.elapsed();

    assert_eq!(pacer.calls(), 3);
    assert!(
        with_cooldown >= Duration::from_millis(5),
        "cooldown wait {with_cooldown:?} shorter than the pause (pre-cooldown waits: {before_cooldown:?})"
    );
}

#[tokio::test]
async fn wait_never_fails_and_honors_shutdown() {
    let config = ThrottleConfig {
        min_delay: Duration::from_secs(30),
        max_delay: Duration::from_secs(30),
        ..fast_config()
    };
    let mut pacer = Pacer::new(config, 1);
    let signals = RunSignals::new();

    let started = Instant::now();
    let waiter = async {
        pacer.wait(&signals).await;
    };
    tokio::pin!(waiter);
    tokio::select! {
        _ = &mut waiter => panic!("wait should still be sleeping"),
        _ = tokio::time::sleep(Duration::from_millis(20)) => {}
    }
    signals.request_shutdown();
    waiter.await;
    assert!(started.elapsed() < Duration::from_secs(5));
}

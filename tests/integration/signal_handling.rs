//! Run signal tests: shutdown notification, pause/resume semantics, and the
//! notify/flag races.

use curp_search::shutdown::{sleep_interruptible, RunSignals};
use std::time::Duration;

#[tokio::test]
async fn shutdown_notifies_waiters() {
    let signals = RunSignals::shared();
    let waiter = {
        let handle = signals.clone();
        tokio::spawn(async move {
            handle.wait_for_shutdown().await;
            true
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    signals.request_shutdown();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok());
}

/// Requesting shutdown immediately before waiting must not deadlock: the
/// waiter is registered before the flag check.
#[tokio::test]
async fn shutdown_race_condition_no_deadlock() {
    let signals = RunSignals::shared();
    signals.request_shutdown();

    let handle = signals.clone();
    let waiter = tokio::spawn(async move {
        handle.wait_for_shutdown().await;
        true
    });

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(
        result.is_ok(),
        "wait_for_shutdown() deadlocked despite shutdown already requested"
    );
}

#[tokio::test]
async fn shutdown_concurrent_waiters_all_notified() {
    let signals = RunSignals::shared();

    let mut waiters = Vec::new();
    for _ in 0..10 {
        let handle = signals.clone();
        waiters.push(tokio::spawn(async move {
            handle.wait_for_shutdown().await;
        }));
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    signals.request_shutdown();

    for waiter in waiters {
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter not notified")
            .unwrap();
    }
}

#[tokio::test]
async fn wait_while_paused_passes_through_when_not_paused() {
    let signals = RunSignals::shared();
    tokio::time::timeout(Duration::from_millis(100), signals.wait_while_paused())
        .await
        .expect("must not block while unpaused");
}

#[tokio::test]
async fn pause_blocks_until_resume() {
    let signals = RunSignals::shared();
    signals.pause();
    assert!(signals.is_paused());

    let handle = signals.clone();
    let waiter = tokio::spawn(async move {
        handle.wait_while_paused().await;
    });

    // Still blocked while paused.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    signals.resume();
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("resume did not release the waiter")
        .unwrap();
}

/// Shutdown releases paused workers so a paused run can still drain.
#[tokio::test]
async fn shutdown_releases_paused_waiters() {
    let signals = RunSignals::shared();
    signals.pause();

    let handle = signals.clone();
    let waiter = tokio::spawn(async move {
        handle.wait_while_paused().await;
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    signals.request_shutdown();

    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("shutdown did not release the paused waiter")
        .unwrap();
}

#[tokio::test]
async fn toggle_pause_flips_state() {
    let signals = RunSignals::new();
    assert!(!signals.is_paused());
    signals.toggle_pause();
    assert!(signals.is_paused());
    signals.toggle_pause();
    assert!(!signals.is_paused());
}

#[tokio::test]
async fn interruptible_sleep_completes_or_aborts() {
    let signals = RunSignals::new();
    assert!(sleep_interruptible(Duration::from_millis(5), &signals).await);

    signals.request_shutdown();
    let started = std::time::Instant::now();
    assert!(!sleep_interruptible(Duration::from_secs(60), &signals).await);
    assert!(started.elapsed() < Duration::from_secs(5));
}

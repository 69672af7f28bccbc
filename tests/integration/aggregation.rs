//! Aggregator tests: dedup, gapless watermark, flush triggers,
//! persist-then-checkpoint ordering, crash re-derivation.

use super::support::MemorySink;
use curp_search::checkpoint::{CheckpointRecord, CheckpointStore};
use curp_search::output::{CsvMatchSink, MatchSink};
use curp_search::progress::{NullProgressObserver, ProgressTracker};
use curp_search::search::{AggregatorConfig, Disposition, QueryResolution, ResultAggregator};
use curp_search::{MatchRecord, ResultBatch};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;

fn match_at(person_id: u32, index: u64) -> MatchRecord {
    MatchRecord {
        person_id,
        index,
        curp: "GOML900315MJCMPR09".to_string(),
        day: 15,
        month: 3,
        year: 1990,
        state_code: 14,
        worker_id: 0,
        found_at: 1_700_000_000_000,
        raw_fields: BTreeMap::new(),
    }
}

fn resolution(index: u64, disposition: Disposition) -> QueryResolution {
    QueryResolution {
        index,
        worker_id: 0,
        disposition,
    }
}

fn no_match(index: u64) -> QueryResolution {
    resolution(index, Disposition::NoMatch { error: None })
}

fn matched(person_id: u32, index: u64) -> QueryResolution {
    resolution(index, Disposition::Match(match_at(person_id, index)))
}

struct Fixture {
    aggregator: ResultAggregator,
    sink: MemorySink,
    store: CheckpointStore,
    _dir: TempDir,
}

fn fixture(person_id: u32, total: u64, config: AggregatorConfig) -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::new(dir.path());
    let sink = MemorySink::new();
    let record = CheckpointRecord::new(person_id, "cfg".to_string());
    let aggregator = ResultAggregator::new(
        record,
        total,
        config,
        Arc::new(Mutex::new(Box::new(sink.clone()) as Box<dyn MatchSink>)),
        store.clone(),
        Arc::new(NullProgressObserver),
        &ProgressTracker::default(),
    );
    Fixture {
        aggregator,
        sink,
        store,
        _dir: dir,
    }
}

fn small_config() -> AggregatorConfig {
    AggregatorConfig {
        batch_size: 2,
        flush_interval: Duration::from_secs(3600),
        persist_retry_delay: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn batch_size_triggers_flush_and_checkpoint_advance() {
    let f = fixture(1, 10, small_config());
    f.aggregator.report(matched(1, 0)).await.unwrap();
    assert!(f.sink.batches().is_empty(), "below batch size, no flush yet");

    f.aggregator.report(matched(1, 1)).await.unwrap();
    let batches = f.sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].matches.len(), 2);

    let record = f.store.load(1, "cfg").unwrap().unwrap();
    assert_eq!(record.last_completed_index(), Some(1));
    assert_eq!(record.matches().len(), 2);
}

#[tokio::test]
async fn watermark_only_advances_gaplessly() {
    let f = fixture(1, 10, small_config());
    // Indices 1 and 2 resolve before 0: the watermark must hold.
    f.aggregator.report(no_match(1)).await.unwrap();
    f.aggregator.report(no_match(2)).await.unwrap();
    let (_, _, _, watermark) = f.aggregator.snapshot().await;
    assert_eq!(watermark, None);

    f.aggregator.report(no_match(0)).await.unwrap();
    let (completed, _, _, watermark) = f.aggregator.snapshot().await;
    assert_eq!(watermark, Some(2));
    assert_eq!(completed, 3);
}

#[tokio::test]
async fn duplicate_reports_are_discarded() {
    let f = fixture(1, 10, small_config());
    f.aggregator.report(matched(1, 0)).await.unwrap();
    f.aggregator.report(matched(1, 0)).await.unwrap();
    f.aggregator.report(no_match(1)).await.unwrap();
    f.aggregator.report(no_match(1)).await.unwrap();

    let stats = f.aggregator.finalize().await.unwrap();
    assert_eq!(stats.queries_completed, 2);
    assert_eq!(stats.duplicates_discarded, 2);
    assert_eq!(stats.matches, 1);
    assert_eq!(f.sink.match_indices(), vec![0]);
}

#[tokio::test]
async fn drain_flushes_pending_and_saves_final_checkpoint() {
    let f = fixture(1, 4, small_config());
    f.aggregator.report(no_match(0)).await.unwrap();
    f.aggregator.report(matched(1, 1)).await.unwrap();
    assert!(f.sink.batches().is_empty());

    let stats = f.aggregator.finalize().await.unwrap();
    assert_eq!(stats.watermark, Some(1));
    assert_eq!(f.sink.match_indices(), vec![1]);

    let record = f.store.load(1, "cfg").unwrap().unwrap();
    assert_eq!(record.last_completed_index(), Some(1));
}

#[tokio::test]
async fn interval_triggers_flush_on_next_report() {
    let config = AggregatorConfig {
        batch_size: 100,
        flush_interval: Duration::from_millis(30),
        persist_retry_delay: Duration::from_millis(10),
    };
    let f = fixture(1, 10, config);
    f.aggregator.report(matched(1, 0)).await.unwrap();
    assert!(f.sink.batches().is_empty());

    tokio::time::sleep(Duration::from_millis(40)).await;
    f.aggregator.report(no_match(1)).await.unwrap();
    assert_eq!(f.sink.match_indices(), vec![0]);
}

#[tokio::test]
async fn persist_failures_retry_until_success_without_loss() {
    let f = fixture(1, 10, small_config());
    f.sink.fail_next(2);

    f.aggregator.report(matched(1, 0)).await.unwrap();
    f.aggregator.report(matched(1, 1)).await.unwrap();

    // Two failed attempts then success; the batch lands exactly once.
    let batches = f.sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].matches.len(), 2);

    let record = f.store.load(1, "cfg").unwrap().unwrap();
    assert_eq!(record.last_completed_index(), Some(1));
}

#[tokio::test]
async fn reflushing_a_batch_through_a_csv_sink_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("matches.csv");
    let mut sink = CsvMatchSink::open(&path).unwrap();
    let batch = ResultBatch {
        person_id: 1,
        matches: vec![match_at(1, 3), match_at(1, 9)],
    };
    assert_eq!(sink.persist(&batch).unwrap(), 2);
    assert_eq!(sink.persist(&batch).unwrap(), 0);
    sink.close().unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let data_rows = contents.lines().count() - 1;
    assert_eq!(data_rows, 2);
}

#[tokio::test]
async fn crash_after_flush_before_checkpoint_rederives_without_duplicates() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));
    let csv_path = dir.path().join("matches.csv");
    let tracker = ProgressTracker::default();

    // First run: index 1 matches and the batch is flushed durably, but the
    // process dies before the checkpoint records it.
    {
        let sink = CsvMatchSink::open(&csv_path).unwrap();
        let aggregator = ResultAggregator::new(
            CheckpointRecord::new(1, "cfg".to_string()),
            4,
            small_config(),
            Arc::new(Mutex::new(Box::new(sink) as Box<dyn MatchSink>)),
            store.clone(),
            Arc::new(NullProgressObserver),
            &tracker,
        );
        aggregator.report(no_match(0)).await.unwrap();
        aggregator.report(matched(1, 1)).await.unwrap();
        aggregator.finalize().await.unwrap();
    }
    // Simulate the crash window: the flushed rows exist, the checkpoint
    // advance is lost.
    store.clear(1);

    // Resumed run re-queries from index 0 and re-derives the match.
    {
        let sink = CsvMatchSink::open(&csv_path).unwrap();
        let aggregator = ResultAggregator::new(
            CheckpointRecord::new(1, "cfg".to_string()),
            4,
            small_config(),
            Arc::new(Mutex::new(Box::new(sink) as Box<dyn MatchSink>)),
            store.clone(),
            Arc::new(NullProgressObserver),
            &tracker,
        );
        aggregator.report(no_match(0)).await.unwrap();
        aggregator.report(matched(1, 1)).await.unwrap();
        aggregator.report(no_match(2)).await.unwrap();
        aggregator.report(no_match(3)).await.unwrap();
        let stats = aggregator.finalize().await.unwrap();
        assert_eq!(stats.watermark, Some(3));
        assert_eq!(stats.matches, 1);
    }

    // The match appears exactly once in the durable output.
    let contents = std::fs::read_to_string(&csv_path).unwrap();
    let match_rows: Vec<&str> = contents
        .lines()
        .filter(|line| line.contains("GOML900315MJCMPR09"))
        .collect();
    assert_eq!(match_rows.len(), 1, "match duplicated or lost: {contents}");

    let record = store.load(1, "cfg").unwrap().unwrap();
    assert_eq!(record.last_completed_index(), Some(3));
}

#[tokio::test]
async fn resumed_aggregator_discards_reports_below_resume_point() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::new(dir.path());
    let mut record = CheckpointRecord::new(1, "cfg".to_string());
    record.advance(4, 5);

    let sink = MemorySink::new();
    let aggregator = ResultAggregator::new(
        record,
        10,
        small_config(),
        Arc::new(Mutex::new(Box::new(sink.clone()) as Box<dyn MatchSink>)),
        store,
        Arc::new(NullProgressObserver),
        &ProgressTracker::default(),
    );

    // A boundary re-issue below the watermark is a duplicate.
    aggregator.report(no_match(4)).await.unwrap();
    aggregator.report(no_match(5)).await.unwrap();
    let stats = aggregator.finalize().await.unwrap();
    assert_eq!(stats.queries_completed, 6);
    assert_eq!(stats.duplicates_discarded, 1);
    assert_eq!(stats.watermark, Some(5));
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::checkpoint::{CheckpointRecord, MemoryCheckpointStore};
use crate::error::FetchError;
use crate::types::FetchOutcome;
use async_trait::async_trait;
use std::collections::HashMap;
use tempfile::TempDir;

/// Transport answering from a script, tracking calls and peak parallelism
#[derive(Default)]
struct ScriptedTransport {
    permanent: HashSet<String>,
    panicking: HashSet<String>,
    transient_failures: Mutex<HashMap<String, u32>>,
    delay: Duration,
    calls: std::sync::Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn failing(mut self, url: &str) -> Self {
        self.permanent.insert(url.to_string());
        self
    }

    fn panicking(mut self, url: &str) -> Self {
        self.panicking.insert(url.to_string());
        self
    }

    fn flaky(self, url: &str, failures: u32) -> Self {
        self.transient_failures
            .try_lock()
            .unwrap()
            .insert(url.to_string(), failures);
        self
    }

    fn calls(&self, url: &str) -> u32 {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panicking.contains(url) {
            panic!("transport bug while fetching {url}");
        }
        if self.permanent.contains(url) {
            return Err(FetchError::from_status(url, 404));
        }
        if let Some(left) = self.transient_failures.lock().await.get_mut(url) {
            if *left > 0 {
                *left -= 1;
                return Err(FetchError::from_status(url, 503));
            }
        }
        Ok(format!(
            "<html><head><title>Doc {url}</title></head><body><p>Body of {url}</p></body></html>"
        )
        .into_bytes())
    }
}

fn tasks(n: usize) -> Vec<FetchTask> {
    (0..n)
        .map(|i| FetchTask {
            target_id: TargetId::new(format!("doc-{i}")),
            url: url(i),
            index: i,
        })
        .collect()
}

fn url(i: usize) -> String {
    format!("https://example.com/doc/{i}")
}

fn settings(concurrency: usize, batch_size: usize) -> PoolSettings {
    PoolSettings {
        concurrency,
        batch_size,
        request_timeout: Duration::from_secs(5),
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        retry_failed: true,
        requests_per_second: None,
    }
}

struct Harness {
    pool: FetchPool,
    transport: Arc<ScriptedTransport>,
    checkpoint: Arc<MemoryCheckpointStore>,
    raw_store: RawStore,
    events: broadcast::Receiver<Event>,
    cancel_token: CancellationToken,
    _dir: TempDir,
}

fn harness(
    settings: PoolSettings,
    transport: ScriptedTransport,
    checkpoint: MemoryCheckpointStore,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(transport);
    let checkpoint = Arc::new(checkpoint);
    let raw_store = RawStore::new(dir.path().join("raw"));
    let (event_tx, events) = broadcast::channel(1024);
    let cancel_token = CancellationToken::new();

    let pool = FetchPool::new(FetchPoolParams {
        settings,
        transport: transport.clone(),
        checkpoint: checkpoint.clone(),
        raw_store: raw_store.clone(),
        event_tx,
        cancel_token: cancel_token.clone(),
    });

    Harness {
        pool,
        transport,
        checkpoint,
        raw_store,
        events,
        cancel_token,
        _dir: dir,
    }
}

fn drain(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn test_every_task_reaches_terminal_outcome() {
    let h = harness(
        settings(3, 4),
        ScriptedTransport::with_delay(Duration::from_millis(10))
            .failing(&url(2))
            .failing(&url(7)),
        MemoryCheckpointStore::new(),
    );

    let summary = h.pool.run(tasks(10)).await.unwrap();

    assert_eq!(summary.succeeded, 8);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.pending, 0);
    assert_eq!(summary.batches_completed, 3);
    assert_eq!(summary.resume_index, 10);

    let record = h.checkpoint.load().await;
    assert_eq!(record.entries.len(), 10);
    assert_eq!(record.count(FetchStatus::Failed), 2);
    assert_eq!(record.resume_index, 10);
    assert_eq!(
        record.status(&TargetId::new("doc-7")),
        Some(FetchStatus::Failed)
    );

    // Permanent failures are attempted exactly once
    assert_eq!(h.transport.calls(&url(2)), 1);
    assert!(h.transport.max_in_flight.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn test_payload_and_metadata_persisted_before_success() {
    let h = harness(
        settings(2, 10),
        ScriptedTransport::default(),
        MemoryCheckpointStore::new(),
    );
    h.pool.run(tasks(3)).await.unwrap();

    let record = h.checkpoint.load().await;
    for outcome in record.successes() {
        let payload = h.raw_store.read_payload(&outcome.target_id).await.unwrap();
        assert_eq!(payload.len() as u64, outcome.byte_size);

        let metadata = h.raw_store.read_metadata(&outcome.target_id).await.unwrap();
        assert_eq!(metadata.target_id, outcome.target_id);
        assert!(metadata.body_text.starts_with("Body of"));
    }
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let h = harness(
        settings(1, 10),
        ScriptedTransport::default().flaky(&url(0), 2).flaky(&url(1), 5),
        MemoryCheckpointStore::new(),
    );

    let summary = h.pool.run(tasks(2)).await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(h.transport.calls(&url(0)), 3);
    // max_attempts bounds the total number of calls
    assert_eq!(h.transport.calls(&url(1)), 3);

    let record = h.checkpoint.load().await;
    let failure = &record.entries[&TargetId::new("doc-1")];
    assert!(failure.error.as_deref().unwrap().contains("HTTP 503"));
}

#[tokio::test]
async fn test_request_timeout_counts_as_transient() {
    let mut settings = settings(2, 10);
    settings.request_timeout = Duration::from_millis(20);
    settings.retry.max_attempts = 2;

    let h = harness(
        settings,
        ScriptedTransport::with_delay(Duration::from_millis(500)),
        MemoryCheckpointStore::new(),
    );

    let summary = h.pool.run(tasks(1)).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(h.transport.calls(&url(0)), 2);

    let record = h.checkpoint.load().await;
    let error = record.entries[&TargetId::new("doc-0")].error.clone().unwrap();
    assert!(error.contains("timed out"), "unexpected error: {error}");
}

#[tokio::test]
async fn test_resume_skips_completed_targets() {
    let all = tasks(6);
    let mut record = CheckpointRecord::default();
    record.apply_outcome(FetchOutcome::success(&all[0], 10));
    record.apply_outcome(FetchOutcome::success(&all[1], 10));
    record.apply_outcome(FetchOutcome::failed(&all[2], "HTTP 503"));

    let mut h = harness(
        settings(2, 10),
        ScriptedTransport::default(),
        MemoryCheckpointStore::with_record(record),
    );

    let summary = h.pool.run(all).await.unwrap();

    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.succeeded, 4);
    assert_eq!(h.transport.calls(&url(0)), 0);
    assert_eq!(h.transport.calls(&url(1)), 0);
    assert_eq!(h.transport.calls(&url(2)), 1);

    let skipped: Vec<_> = drain(&mut h.events)
        .into_iter()
        .filter_map(|e| match e {
            Event::TargetSkipped { index, .. } => Some(index),
            _ => None,
        })
        .collect();
    assert_eq!(skipped, vec![0, 1]);
}

#[tokio::test]
async fn test_failed_targets_kept_when_not_retrying() {
    let all = tasks(3);
    let mut record = CheckpointRecord::default();
    record.apply_outcome(FetchOutcome::failed(&all[1], "HTTP 404"));

    let mut settings = settings(2, 10);
    settings.retry_failed = false;
    let h = harness(
        settings,
        ScriptedTransport::default(),
        MemoryCheckpointStore::with_record(record),
    );

    let summary = h.pool.run(all).await.unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(h.transport.calls(&url(1)), 0);
}

#[tokio::test]
async fn test_checkpoint_failure_halts_scheduling() {
    let h = harness(
        settings(1, 100),
        ScriptedTransport::default(),
        MemoryCheckpointStore::failing_after(3),
    );

    let err = h.pool.run(tasks(10)).await.unwrap_err();
    let (reason, summary) = match err {
        Error::Halted { reason, summary } => (reason, summary),
        other => panic!("expected halt, got {other:?}"),
    };

    assert!(reason.contains("write limit"));
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.pending, 7);
    assert_eq!(summary.batches_completed, 0);
    assert_eq!(summary.resume_index, 0);
    // The fetch whose outcome could not be recorded is the last one started
    assert_eq!(h.transport.total_calls(), 4);
    assert_eq!(h.checkpoint.writes(), 3);
}

#[tokio::test]
async fn test_halt_reports_last_flushed_batch() {
    let h = harness(
        settings(1, 2),
        ScriptedTransport::default(),
        MemoryCheckpointStore::failing_after(5),
    );

    let err = h.pool.run(tasks(8)).await.unwrap_err();
    let summary = err.summary().cloned().unwrap();
    assert_eq!(summary.batches_completed, 2);
    assert_eq!(summary.resume_index, 4);
    assert_eq!(summary.succeeded, 5);
}

#[tokio::test]
async fn test_cancelled_before_start_fetches_nothing() {
    let h = harness(
        settings(2, 10),
        ScriptedTransport::default(),
        MemoryCheckpointStore::new(),
    );
    h.cancel_token.cancel();

    let err = h.pool.run(tasks(4)).await.unwrap_err();
    assert!(matches!(err, Error::Interrupted { .. }));
    assert_eq!(h.transport.total_calls(), 0);
    assert!(h.checkpoint.load().await.is_empty());
}

#[tokio::test]
async fn test_cancel_mid_fetch_records_nothing_for_abandoned_tasks() {
    let h = harness(
        settings(2, 10),
        ScriptedTransport::with_delay(Duration::from_secs(30)),
        MemoryCheckpointStore::new(),
    );

    let token = h.cancel_token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let err = h.pool.run(tasks(5)).await.unwrap_err();
    let summary = err.summary().cloned().unwrap();
    assert!(matches!(err, Error::Interrupted { .. }));
    assert_eq!(summary.pending, 5);
    assert_eq!(h.transport.total_calls(), 2);
    assert!(h.checkpoint.load().await.is_empty());
}

#[tokio::test]
async fn test_batch_events_in_order() {
    let mut h = harness(
        settings(2, 3),
        ScriptedTransport::default(),
        MemoryCheckpointStore::new(),
    );
    h.pool.run(tasks(7)).await.unwrap();

    let events = drain(&mut h.events);
    let markers: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::BatchStarted { batch, start, end, .. } => Some(("start", *batch, *start, *end)),
            Event::BatchCompleted { batch, next_index } => {
                Some(("done", *batch, *next_index, *next_index))
            }
            _ => None,
        })
        .collect();

    assert_eq!(
        markers,
        vec![
            ("start", 0, 0, 3),
            ("done", 0, 3, 3),
            ("start", 1, 3, 6),
            ("done", 1, 6, 6),
            ("start", 2, 6, 7),
            ("done", 2, 7, 7),
        ]
    );
    let fetched = events
        .iter()
        .filter(|e| matches!(e, Event::TargetFetched { .. }))
        .count();
    assert_eq!(fetched, 7);
}

#[tokio::test]
async fn test_empty_task_list() {
    let h = harness(
        settings(2, 10),
        ScriptedTransport::default(),
        MemoryCheckpointStore::new(),
    );
    let summary = h.pool.run(Vec::new()).await.unwrap();
    assert_eq!(summary, RunSummary::default());
}

#[tokio::test]
async fn test_worker_panic_halts_without_progress_marker() {
    let h = harness(
        settings(1, 4),
        ScriptedTransport::default().panicking(&url(1)),
        MemoryCheckpointStore::new(),
    );

    let err = h.pool.run(tasks(8)).await.unwrap_err();

    let (reason, summary) = match err {
        Error::Halted { reason, summary } => (reason, summary),
        other => panic!("expected halt, got {other:?}"),
    };
    assert!(reason.contains("terminated abnormally"), "reason: {reason}");
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.pending, 7);
    assert_eq!(summary.resume_index, 0);
    assert_eq!(summary.batches_completed, 0);

    // Remaining tasks were never attempted and the batch was not marked complete
    assert_eq!(h.transport.total_calls(), 2);
    let record = h.checkpoint.load().await;
    assert_eq!(record.entries.len(), 1);
    assert_eq!(record.resume_index, 0);
}

#[tokio::test]
async fn test_worker_panic_stops_sibling_workers() {
    let h = harness(
        settings(3, 20),
        ScriptedTransport::with_delay(Duration::from_millis(5)).panicking(&url(0)),
        MemoryCheckpointStore::new(),
    );

    let err = h.pool.run(tasks(20)).await.unwrap_err();

    let summary = err.summary().cloned().unwrap();
    assert!(matches!(err, Error::Halted { .. }));
    assert!(summary.pending > 0);
    assert_eq!(h.checkpoint.load().await.resume_index, 0);
}

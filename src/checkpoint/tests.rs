use super::*;
use crate::types::FetchTask;
use std::sync::Arc;
use tempfile::TempDir;

fn task(id: &str, index: usize) -> FetchTask {
    FetchTask {
        target_id: TargetId::new(id),
        url: format!("https://example.com/doc/{}", id),
        index,
    }
}

fn success(id: &str, index: usize) -> FetchOutcome {
    FetchOutcome::success(&task(id, index), 1024)
}

fn failed(id: &str, index: usize) -> FetchOutcome {
    FetchOutcome::failed(&task(id, index), "HTTP 404")
}

fn skipped(id: &str, index: usize) -> FetchOutcome {
    FetchOutcome {
        status: FetchStatus::Skipped,
        ..success(id, index)
    }
}

#[test]
fn test_record_latest_entry_wins() {
    let mut record = CheckpointRecord::default();
    record.apply_outcome(failed("a", 3));
    record.apply_outcome(success("a", 3));
    record.apply_outcome(skipped("b", 7));

    assert_eq!(record.entries.len(), 1);
    assert_eq!(record.status(&TargetId::new("a")), Some(FetchStatus::Success));
    assert_eq!(record.status(&TargetId::new("b")), None);
    assert_eq!(record.last_completed_index, Some(3));
}

#[test]
fn test_record_indices_never_decrease() {
    let mut record = CheckpointRecord::default();
    record.apply_outcome(success("late", 9));
    record.apply_outcome(success("early", 2));
    assert_eq!(record.last_completed_index, Some(9));

    record.apply_progress(10);
    record.apply_progress(5);
    assert_eq!(record.resume_index, 10);
}

#[test]
fn test_successes_sorted_by_index() {
    let mut record = CheckpointRecord::default();
    record.apply_outcome(success("c", 2));
    record.apply_outcome(failed("b", 1));
    record.apply_outcome(success("a", 0));

    let ids: Vec<_> = record
        .successes()
        .into_iter()
        .map(|o| o.target_id.as_str())
        .collect();
    assert_eq!(ids, vec!["a", "c"]);
    assert_eq!(record.count(FetchStatus::Failed), 1);
}

#[test]
fn test_log_entry_format() {
    let line = serde_json::to_string(&LogEntry::Progress { next_index: 1000 }).unwrap();
    assert_eq!(line, r#"{"kind":"progress","next_index":1000}"#);

    let line = serde_json::to_string(&LogEntry::Outcome(failed("x", 4))).unwrap();
    assert!(line.starts_with(r#"{"kind":"outcome","target_id":"x","index":4"#));
    assert!(line.contains(r#""status":"failed""#));
}

#[tokio::test]
async fn test_jsonl_missing_file_loads_empty() {
    let dir = TempDir::new().unwrap();
    let store = JsonlCheckpointStore::open(dir.path().join("checkpoint.jsonl")).await;
    assert!(store.load().await.is_empty());
    assert!(!store.is_complete(&TargetId::new("a")).await);
}

#[tokio::test]
async fn test_jsonl_load_reflects_write() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("checkpoint.jsonl");
    let store = JsonlCheckpointStore::open(&path).await;

    store.record_outcome(&success("a", 0)).await.unwrap();
    assert!(store.load().await.is_complete(&TargetId::new("a")));
    assert!(store.is_complete(&TargetId::new("a")).await);

    // A fresh handle sees the same state
    let reopened = JsonlCheckpointStore::open(&path).await;
    assert!(reopened.is_complete(&TargetId::new("a")).await);
}

#[tokio::test]
async fn test_jsonl_skipped_never_persisted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("checkpoint.jsonl");
    let store = JsonlCheckpointStore::open(&path).await;

    store.record_outcome(&skipped("a", 0)).await.unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn test_jsonl_skips_corrupt_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("checkpoint.jsonl");

    let good = serde_json::to_string(&LogEntry::Outcome(success("a", 0))).unwrap();
    let progress = serde_json::to_string(&LogEntry::Progress { next_index: 1 }).unwrap();
    let torn = r#"{"kind":"outcome","target_id":"b","ind"#;
    std::fs::write(&path, format!("{good}\nnot json at all\n{progress}\n{torn}")).unwrap();

    let store = JsonlCheckpointStore::open(&path).await;
    let record = store.load().await;
    assert_eq!(record.entries.len(), 1);
    assert!(record.is_complete(&TargetId::new("a")));
    assert_eq!(record.resume_index, 1);

    // Appending after a torn line still produces a readable log
    store.record_outcome(&success("c", 2)).await.unwrap();
    let record = JsonlCheckpointStore::open(&path).await.load().await;
    assert!(record.is_complete(&TargetId::new("a")));
    assert!(record.is_complete(&TargetId::new("c")));
}

#[tokio::test]
async fn test_jsonl_concurrent_writes_lose_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("checkpoint.jsonl");
    let store = Arc::new(JsonlCheckpointStore::open(&path).await);

    let mut handles = Vec::new();
    for worker in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..25 {
                let index = worker * 25 + i;
                store
                    .record_outcome(&success(&format!("t{index}"), index))
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let record = JsonlCheckpointStore::open(&path).await.load().await;
    assert_eq!(record.count(FetchStatus::Success), 200);
    assert_eq!(record.last_completed_index, Some(199));
}

#[tokio::test]
async fn test_jsonl_unwritable_location() {
    let dir = TempDir::new().unwrap();
    // A regular file where the parent directory should be
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"x").unwrap();
    let store = JsonlCheckpointStore::open(blocker.join("checkpoint.jsonl")).await;

    let err = store.record_outcome(&success("a", 0)).await.unwrap_err();
    assert!(matches!(err, CheckpointError::Write { .. }));

    // Once broken, the store keeps refusing
    let err = store.record_progress(1).await.unwrap_err();
    assert!(matches!(err, CheckpointError::Unwritable(_)));
    assert!(!store.is_complete(&TargetId::new("a")).await);
}

#[tokio::test]
async fn test_jsonl_reset_and_remove() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("checkpoint.jsonl");
    let store = JsonlCheckpointStore::open(&path).await;

    store.record_outcome(&success("a", 0)).await.unwrap();
    store.reset().await.unwrap();
    assert!(store.load().await.is_empty());
    assert!(!path.exists());

    store.record_outcome(&success("b", 0)).await.unwrap();
    assert!(path.exists());
    assert!(store.remove().await.unwrap());
    assert!(!path.exists());
    assert!(!store.remove().await.unwrap());
}

#[tokio::test]
async fn test_memory_store_write_limit() {
    let store = MemoryCheckpointStore::failing_after(2);
    store.record_outcome(&success("a", 0)).await.unwrap();
    store.record_outcome(&failed("b", 1)).await.unwrap();

    let err = store.record_outcome(&success("c", 2)).await.unwrap_err();
    assert!(matches!(err, CheckpointError::Unwritable(_)));
    assert_eq!(store.writes(), 2);
    assert!(!store.is_complete(&TargetId::new("c")).await);
}

//! Helpers for inspecting run results on disk and on the event channel

use std::path::{Path, PathBuf};

use doc_harvest::{DatasetRow, Event};
use tokio::sync::broadcast;
use walkdir::WalkDir;

/// Every regular file below `dir` (empty when `dir` does not exist)
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

/// Rows of a JSONL artifact
pub fn read_jsonl_rows(path: &Path) -> Vec<DatasetRow> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

/// Drain every event already buffered on `rx`
pub fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

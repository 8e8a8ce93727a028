//! JSON Lines checkpoint log

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{CheckpointRecord, CheckpointStore, LogEntry};
use crate::error::CheckpointError;
use crate::types::{FetchOutcome, TargetId};

/// Append-only checkpoint log, one JSON object per line
///
/// Every write is flushed with `fdatasync` before it is acknowledged, so after a
/// crash the log holds every acknowledged outcome. A torn final line (power loss
/// mid-write) is skipped on load.
///
/// ```text
/// {"kind":"outcome","target_id":"news·20240105·LA·001","index":0,"url":"...","status":"success","byte_size":18234,"timestamp":"..."}
/// {"kind":"outcome","target_id":"news·20240105·LA·002","index":1,"url":"...","status":"failed","byte_size":0,"error":"HTTP 404","timestamp":"..."}
/// {"kind":"progress","next_index":2}
/// ```
pub struct JsonlCheckpointStore {
    path: PathBuf,
    state: Mutex<State>,
}

struct State {
    /// Open append handle, created on first write
    file: Option<File>,
    /// In-memory mirror of everything acknowledged so far
    record: CheckpointRecord,
    /// Set after a failed write; the store refuses further writes
    broken: Option<String>,
    /// The log ends without a newline; the next write starts a fresh line
    torn_tail: bool,
}

impl JsonlCheckpointStore {
    /// Open a store backed by `path`, loading any existing entries
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (record, torn_tail) = read_log(&path).await;
        if !record.is_empty() {
            info!(
                ?path,
                entries = record.entries.len(),
                resume_index = record.resume_index,
                "loaded existing checkpoint"
            );
        }
        Self {
            path,
            state: Mutex::new(State {
                file: None,
                record,
                broken: None,
                torn_tail,
            }),
        }
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, entry: LogEntry) -> Result<(), CheckpointError> {
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let mut state = self.state.lock().await;
        if let Some(reason) = &state.broken {
            return Err(CheckpointError::Unwritable(reason.clone()));
        }
        if state.torn_tail {
            line.insert(0, b'\n');
        }

        if let Err(source) = write_durably(&self.path, &mut state.file, &line).await {
            warn!(path = ?self.path, error = %source, "checkpoint write failed");
            state.broken = Some(source.to_string());
            state.file = None;
            return Err(CheckpointError::Write {
                path: self.path.clone(),
                source,
            });
        }

        state.torn_tail = false;
        entry.apply(&mut state.record);
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for JsonlCheckpointStore {
    async fn load(&self) -> CheckpointRecord {
        let mut state = self.state.lock().await;
        let (record, torn_tail) = read_log(&self.path).await;
        state.record = record.clone();
        state.torn_tail = torn_tail;
        record
    }

    async fn record_outcome(&self, outcome: &FetchOutcome) -> Result<(), CheckpointError> {
        if !outcome.status.is_terminal() {
            debug!(target_id = %outcome.target_id, "not persisting non-terminal outcome");
            return Ok(());
        }
        self.append(LogEntry::Outcome(outcome.clone())).await
    }

    async fn is_complete(&self, target_id: &TargetId) -> bool {
        self.state.lock().await.record.is_complete(target_id)
    }

    async fn record_progress(&self, next_index: usize) -> Result<(), CheckpointError> {
        self.append(LogEntry::Progress { next_index }).await
    }

    async fn reset(&self) -> Result<(), CheckpointError> {
        let mut state = self.state.lock().await;
        state.file = None;
        remove_if_exists(&self.path).await?;
        state.record = CheckpointRecord::default();
        state.broken = None;
        state.torn_tail = false;
        debug!(path = ?self.path, "checkpoint reset");
        Ok(())
    }

    async fn remove(&self) -> Result<bool, CheckpointError> {
        let mut state = self.state.lock().await;
        state.file = None;
        let removed = remove_if_exists(&self.path).await?;
        state.record = CheckpointRecord::default();
        state.torn_tail = false;
        Ok(removed)
    }
}

async fn write_durably(path: &Path, file: &mut Option<File>, line: &[u8]) -> std::io::Result<()> {
    if file.is_none() {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        *file = Some(OpenOptions::new().create(true).append(true).open(path).await?);
    }
    if let Some(handle) = file.as_mut() {
        handle.write_all(line).await?;
        handle.flush().await?;
        handle.sync_data().await?;
    }
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<bool, CheckpointError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(CheckpointError::Write {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Rebuild a record from the log, skipping lines that do not parse
///
/// Also reports whether the log ends mid-line.
async fn read_log(path: &Path) -> (CheckpointRecord, bool) {
    let raw = match fs::read(path).await {
        Ok(raw) => String::from_utf8_lossy(&raw).into_owned(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return (CheckpointRecord::default(), false);
        }
        Err(e) => {
            warn!(?path, error = %e, "checkpoint unreadable, starting fresh");
            return (CheckpointRecord::default(), false);
        }
    };
    let torn_tail = !raw.is_empty() && !raw.ends_with('\n');

    let mut record = CheckpointRecord::default();
    let mut skipped = 0usize;
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<LogEntry>(line) {
            Ok(entry) => entry.apply(&mut record),
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(?path, skipped, "ignored corrupt checkpoint lines");
    }
    (record, torn_tail)
}

//! In-memory checkpoint store

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use super::{CheckpointRecord, CheckpointStore};
use crate::error::CheckpointError;
use crate::types::{FetchOutcome, TargetId};

/// Checkpoint store held entirely in memory
///
/// Nothing survives the process. Useful for tests, and for embedders that drive
/// one-shot runs. [`MemoryCheckpointStore::failing_after`] makes the store refuse
/// writes once a number of outcomes have been accepted.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    record: Mutex<CheckpointRecord>,
    writes: AtomicUsize,
    fail_after: Option<usize>,
}

impl MemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `record`
    pub fn with_record(record: CheckpointRecord) -> Self {
        Self {
            record: Mutex::new(record),
            ..Default::default()
        }
    }

    /// Create a store that accepts `limit` outcomes and then becomes unwritable
    pub fn failing_after(limit: usize) -> Self {
        Self {
            fail_after: Some(limit),
            ..Default::default()
        }
    }

    /// Outcomes accepted so far
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<(), CheckpointError> {
        match self.fail_after {
            Some(limit) if self.writes.load(Ordering::SeqCst) >= limit => Err(
                CheckpointError::Unwritable(format!("write limit of {} reached", limit)),
            ),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> CheckpointRecord {
        self.record.lock().await.clone()
    }

    async fn record_outcome(&self, outcome: &FetchOutcome) -> Result<(), CheckpointError> {
        if !outcome.status.is_terminal() {
            return Ok(());
        }
        let mut record = self.record.lock().await;
        self.check_writable()?;
        record.apply_outcome(outcome.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_complete(&self, target_id: &TargetId) -> bool {
        self.record.lock().await.is_complete(target_id)
    }

    async fn record_progress(&self, next_index: usize) -> Result<(), CheckpointError> {
        let mut record = self.record.lock().await;
        self.check_writable()?;
        record.apply_progress(next_index);
        Ok(())
    }

    async fn reset(&self) -> Result<(), CheckpointError> {
        *self.record.lock().await = CheckpointRecord::default();
        Ok(())
    }

    async fn remove(&self) -> Result<bool, CheckpointError> {
        let mut record = self.record.lock().await;
        let had_entries = !record.is_empty();
        *record = CheckpointRecord::default();
        Ok(had_entries)
    }
}

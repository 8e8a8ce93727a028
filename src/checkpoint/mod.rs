//! Checkpoint store: durable record of per-target fetch status
//!
//! The pool writes one [`FetchOutcome`] per processed target and a progress marker
//! after every batch. A resumed run loads the record and skips every target already
//! marked Success.
//!
//! ## Implementations
//!
//! - [`JsonlCheckpointStore`]: append-only JSON Lines file, fsynced after every write
//! - [`MemoryCheckpointStore`]: in-process store for tests and embedders that do not
//!   need durability
//!
//! Only terminal outcomes (Success, Failed) are stored. For a target written more
//! than once, the latest entry supersedes earlier ones.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::CheckpointError;
use crate::types::{FetchOutcome, FetchStatus, TargetId};

mod file;
mod memory;

pub use file::JsonlCheckpointStore;
pub use memory::MemoryCheckpointStore;

/// Trait for checkpoint persistence
///
/// `record_outcome` is called concurrently by every worker. Implementations must
/// serialize writes so no update is lost, and a successful return means the
/// outcome is already reflected by [`CheckpointStore::load`].
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the current record
    ///
    /// A missing or unreadable store yields an empty record, never an error.
    async fn load(&self) -> CheckpointRecord;

    /// Persist one outcome before acknowledging it
    ///
    /// Skipped outcomes are accepted and ignored.
    async fn record_outcome(&self, outcome: &FetchOutcome) -> Result<(), CheckpointError>;

    /// Whether `target_id` is recorded as Success
    async fn is_complete(&self, target_id: &TargetId) -> bool;

    /// Persist the index from which a resumed run continues
    async fn record_progress(&self, next_index: usize) -> Result<(), CheckpointError>;

    /// Discard every entry so the next run starts fresh
    async fn reset(&self) -> Result<(), CheckpointError>;

    /// Delete the store's backing storage; returns whether anything was removed
    async fn remove(&self) -> Result<bool, CheckpointError>;
}

/// Persisted state of a run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckpointRecord {
    /// Latest terminal outcome per target
    pub entries: HashMap<TargetId, FetchOutcome>,
    /// Highest sequence index with a terminal outcome; never decreases
    pub last_completed_index: Option<usize>,
    /// Index recorded by the last progress marker
    pub resume_index: usize,
}

impl CheckpointRecord {
    /// Apply one outcome, superseding any earlier entry for the same target
    pub fn apply_outcome(&mut self, outcome: FetchOutcome) {
        if !outcome.status.is_terminal() {
            return;
        }
        self.last_completed_index = Some(
            self.last_completed_index
                .map_or(outcome.index, |last| last.max(outcome.index)),
        );
        self.entries.insert(outcome.target_id.clone(), outcome);
    }

    /// Apply a progress marker; the resume index only moves forward
    pub fn apply_progress(&mut self, next_index: usize) {
        self.resume_index = self.resume_index.max(next_index);
    }

    /// Latest status recorded for a target
    pub fn status(&self, target_id: &TargetId) -> Option<FetchStatus> {
        self.entries.get(target_id).map(|o| o.status)
    }

    /// Whether a target is recorded as Success
    pub fn is_complete(&self, target_id: &TargetId) -> bool {
        self.status(target_id) == Some(FetchStatus::Success)
    }

    /// Success outcomes in sequence order
    pub fn successes(&self) -> Vec<&FetchOutcome> {
        let mut successes: Vec<_> = self
            .entries
            .values()
            .filter(|o| o.status == FetchStatus::Success)
            .collect();
        successes.sort_by_key(|o| o.index);
        successes
    }

    /// Number of entries with the given status
    pub fn count(&self, status: FetchStatus) -> usize {
        self.entries.values().filter(|o| o.status == status).count()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.resume_index == 0
    }
}

/// One line of the checkpoint log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum LogEntry {
    /// Terminal outcome of one target
    Outcome(FetchOutcome),
    /// Batch boundary
    Progress {
        /// Index the next batch starts from
        next_index: usize,
    },
}

impl LogEntry {
    pub(crate) fn apply(self, record: &mut CheckpointRecord) {
        match self {
            LogEntry::Outcome(outcome) => record.apply_outcome(outcome),
            LogEntry::Progress { next_index } => record.apply_progress(next_index),
        }
    }
}

#[cfg(test)]
mod tests;

//! Batch partitioning and resume filtering

use std::collections::HashSet;

use crate::checkpoint::CheckpointStore;
use crate::types::{FetchTask, TargetId};

/// One sequential group of tasks
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Batch {
    /// Batch number (0-based)
    pub(crate) number: usize,
    /// First sequence index in the batch
    pub(crate) start: usize,
    /// One past the last sequence index in the batch
    pub(crate) end: usize,
    /// Tasks in sequence order
    pub(crate) tasks: Vec<FetchTask>,
}

/// Split tasks into consecutive batches of at most `batch_size`, keeping sequence order
pub(crate) fn partition(mut tasks: Vec<FetchTask>, batch_size: usize) -> Vec<Batch> {
    tasks.sort_by_key(|t| t.index);
    let batch_size = batch_size.max(1);

    let mut batches = Vec::with_capacity(tasks.len().div_ceil(batch_size));
    let mut iter = tasks.into_iter().peekable();
    while iter.peek().is_some() {
        let chunk: Vec<FetchTask> = iter.by_ref().take(batch_size).collect();
        let start = chunk.first().map_or(0, |t| t.index);
        let end = chunk.last().map_or(start, |t| t.index + 1);
        batches.push(Batch {
            number: batches.len(),
            start,
            end,
            tasks: chunk,
        });
    }
    batches
}

/// Split a batch into tasks to fetch and tasks the checkpoint already covers
///
/// Success targets are always skipped. Targets in `failed` are skipped unless
/// `retry_failed` is set.
pub(crate) async fn select_pending(
    tasks: Vec<FetchTask>,
    checkpoint: &dyn CheckpointStore,
    failed: &HashSet<TargetId>,
    retry_failed: bool,
) -> (Vec<FetchTask>, Vec<FetchTask>) {
    let mut pending = Vec::with_capacity(tasks.len());
    let mut skipped = Vec::new();

    for task in tasks {
        let covered = checkpoint.is_complete(&task.target_id).await
            || (!retry_failed && failed.contains(&task.target_id));
        if covered {
            skipped.push(task);
        } else {
            pending.push(task);
        }
    }
    (pending, skipped)
}

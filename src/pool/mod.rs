//! Bounded-concurrency fetch pool
//!
//! Tasks are processed in consecutive batches of `batch_size`. Within a batch up to
//! `concurrency` workers pull tasks from a shared queue in sequence order; completion
//! order is unconstrained. After every task of a batch is accounted for, a progress
//! marker is flushed to the checkpoint before the next batch is scheduled.
//!
//! Targets the checkpoint already covers are skipped without a request. A checkpoint
//! write failure stops all scheduling immediately: no fetch whose outcome cannot be
//! recorded is ever started. A worker that terminates abnormally halts the run the
//! same way, and the progress marker of its batch is never written.

mod batching;
mod worker;

#[cfg(test)]
mod tests;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::{Config, RetryConfig};
use crate::error::{Error, Result};
use crate::rate_limiter::RequestLimiter;
use crate::storage::RawStore;
use crate::transport::Transport;
use crate::types::{Event, FetchStatus, FetchTask, RunSummary, TargetId};

use batching::Batch;
use worker::{WorkerContext, run_worker};

/// Scheduling settings of a pool
#[derive(Clone, Debug)]
pub struct PoolSettings {
    /// Maximum number of in-flight fetches
    pub concurrency: usize,
    /// Tasks per checkpoint progress marker
    pub batch_size: usize,
    /// Upper bound on a single request
    pub request_timeout: Duration,
    /// Retry policy for transient failures
    pub retry: RetryConfig,
    /// Fetch targets the checkpoint records as Failed again
    pub retry_failed: bool,
    /// Global request rate (None = unlimited)
    pub requests_per_second: Option<u64>,
}

impl From<&Config> for PoolSettings {
    fn from(config: &Config) -> Self {
        Self {
            concurrency: config.concurrency,
            batch_size: config.batch_size,
            request_timeout: config.request_timeout,
            retry: config.retry.clone(),
            retry_failed: config.retry_failed_on_resume,
            requests_per_second: config.requests_per_second,
        }
    }
}

/// Everything a pool needs, grouped to keep the constructor readable
pub struct FetchPoolParams {
    /// Scheduling settings
    pub settings: PoolSettings,
    /// Network seam
    pub transport: Arc<dyn Transport>,
    /// Durable record of outcomes
    pub checkpoint: Arc<dyn CheckpointStore>,
    /// Where payloads and metadata sidecars go
    pub raw_store: RawStore,
    /// Progress events
    pub event_tx: broadcast::Sender<Event>,
    /// External stop signal
    pub cancel_token: CancellationToken,
}

/// Executes fetch tasks with bounded concurrency and checkpointed progress
pub struct FetchPool {
    settings: PoolSettings,
    transport: Arc<dyn Transport>,
    checkpoint: Arc<dyn CheckpointStore>,
    raw_store: RawStore,
    event_tx: broadcast::Sender<Event>,
    cancel_token: CancellationToken,
}

impl FetchPool {
    /// Create a pool; nothing runs until [`FetchPool::run`]
    pub fn new(params: FetchPoolParams) -> Self {
        let FetchPoolParams {
            settings,
            transport,
            checkpoint,
            raw_store,
            event_tx,
            cancel_token,
        } = params;

        Self {
            settings,
            transport,
            checkpoint,
            raw_store,
            event_tx,
            cancel_token,
        }
    }

    /// Process every task, skipping those the checkpoint already covers
    ///
    /// Returns the run summary when every task has a terminal outcome. Returns
    /// [`Error::Halted`] when the checkpoint can no longer be written and
    /// [`Error::Interrupted`] when the stop signal fires; both carry the summary
    /// at the moment scheduling stopped.
    pub async fn run(&self, tasks: Vec<FetchTask>) -> Result<RunSummary> {
        let total = tasks.len();
        let batches = batching::partition(tasks, self.settings.batch_size);

        // Failed outcomes from earlier runs; only consulted when they are not retried
        let failed_before: HashSet<TargetId> = if self.settings.retry_failed {
            HashSet::new()
        } else {
            let record = self.checkpoint.load().await;
            record
                .entries
                .values()
                .filter(|o| o.status == FetchStatus::Failed)
                .map(|o| o.target_id.clone())
                .collect()
        };

        let ctx = Arc::new(WorkerContext {
            transport: Arc::clone(&self.transport),
            checkpoint: Arc::clone(&self.checkpoint),
            raw_store: self.raw_store.clone(),
            limiter: RequestLimiter::new(self.settings.requests_per_second),
            retry: self.settings.retry.clone(),
            request_timeout: self.settings.request_timeout,
            event_tx: self.event_tx.clone(),
            cancel_token: self.cancel_token.clone(),
            halt_token: CancellationToken::new(),
            halt_reason: Mutex::new(None),
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        });

        let mut skipped = 0usize;
        let mut batches_completed = 0usize;
        let mut resume_index = batches.first().map_or(0, |b| b.start);

        info!(
            tasks = total,
            batches = batches.len(),
            concurrency = self.settings.concurrency,
            "starting fetch pool"
        );

        for batch in batches {
            let summary = |skipped: usize, batches_completed: usize, resume_index: usize| {
                Self::summary(&ctx, total, skipped, batches_completed, resume_index)
            };

            if self.cancel_token.is_cancelled() {
                return Err(Error::Interrupted {
                    summary: summary(skipped, batches_completed, resume_index),
                });
            }

            let Batch {
                number,
                start,
                end,
                tasks,
            } = batch;

            let (pending, covered) = batching::select_pending(
                tasks,
                self.checkpoint.as_ref(),
                &failed_before,
                self.settings.retry_failed,
            )
            .await;

            skipped += covered.len();
            for task in &covered {
                self.event_tx
                    .send(Event::TargetSkipped {
                        target_id: task.target_id.clone(),
                        index: task.index,
                    })
                    .ok();
            }

            info!(
                batch = number,
                start,
                end,
                scheduled = pending.len(),
                skipped = covered.len(),
                "batch started"
            );
            self.event_tx
                .send(Event::BatchStarted {
                    batch: number,
                    start,
                    end,
                    scheduled: pending.len(),
                })
                .ok();

            self.run_batch(&ctx, pending).await;

            if let Some(reason) = ctx.halt_reason.lock().await.clone() {
                return Err(Error::Halted {
                    reason,
                    summary: summary(skipped, batches_completed, resume_index),
                });
            }
            if self.cancel_token.is_cancelled() {
                return Err(Error::Interrupted {
                    summary: summary(skipped, batches_completed, resume_index),
                });
            }

            if let Err(e) = self.checkpoint.record_progress(end).await {
                warn!(batch = number, error = %e, "failed to flush progress marker");
                return Err(Error::Halted {
                    reason: e.to_string(),
                    summary: summary(skipped, batches_completed, resume_index),
                });
            }

            batches_completed += 1;
            resume_index = end;
            self.event_tx
                .send(Event::BatchCompleted {
                    batch: number,
                    next_index: end,
                })
                .ok();
        }

        let summary = Self::summary(&ctx, total, skipped, batches_completed, resume_index);
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "fetch pool finished"
        );
        Ok(summary)
    }

    /// Drain one batch with up to `concurrency` workers
    async fn run_batch(&self, ctx: &Arc<WorkerContext>, pending: Vec<FetchTask>) {
        if pending.is_empty() {
            return;
        }

        let workers = self.settings.concurrency.clamp(1, pending.len());
        let queue = Arc::new(Mutex::new(VecDeque::from(pending)));

        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            set.spawn(run_worker(Arc::clone(ctx), Arc::clone(&queue), worker_id));
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                // Its task has no outcome, so the batch can never be marked complete
                warn!(error = %e, "fetch worker terminated abnormally, halting scheduling");
                ctx.halt_reason
                    .lock()
                    .await
                    .get_or_insert_with(|| format!("fetch worker terminated abnormally: {e}"));
                ctx.halt_token.cancel();
            }
        }
    }

    fn summary(
        ctx: &WorkerContext,
        total: usize,
        skipped: usize,
        batches_completed: usize,
        resume_index: usize,
    ) -> RunSummary {
        let succeeded = ctx.succeeded.load(Ordering::SeqCst);
        let failed = ctx.failed.load(Ordering::SeqCst);
        RunSummary {
            succeeded,
            failed,
            skipped,
            pending: total.saturating_sub(succeeded + failed + skipped),
            resume_index,
            batches_completed,
        }
    }
}

//! Worker loop: fetch, persist, extract, record

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::RetryConfig;
use crate::error::{CheckpointError, FetchError};
use crate::extractor;
use crate::rate_limiter::RequestLimiter;
use crate::retry::retry_with_backoff;
use crate::storage::RawStore;
use crate::transport::Transport;
use crate::types::{Event, FetchOutcome, FetchStatus, FetchTask};

/// State shared by every worker of a pool
pub(crate) struct WorkerContext {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) checkpoint: Arc<dyn CheckpointStore>,
    pub(crate) raw_store: RawStore,
    pub(crate) limiter: RequestLimiter,
    pub(crate) retry: RetryConfig,
    pub(crate) request_timeout: Duration,
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// External stop signal
    pub(crate) cancel_token: CancellationToken,
    /// Tripped when the checkpoint can no longer be written
    pub(crate) halt_token: CancellationToken,
    /// First checkpoint failure seen by any worker
    pub(crate) halt_reason: Mutex<Option<String>>,
    pub(crate) succeeded: AtomicUsize,
    pub(crate) failed: AtomicUsize,
}

/// Shared queue of tasks, dequeued in sequence order
pub(crate) type TaskQueue = Arc<Mutex<VecDeque<FetchTask>>>;

/// What happened to one dequeued task
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TaskResult {
    /// The outcome was written to the checkpoint
    Recorded(FetchStatus),
    /// The stop signal arrived mid-fetch; nothing was recorded
    Abandoned,
}

/// Pull tasks until the queue drains, the run is cancelled, or the checkpoint fails
pub(crate) async fn run_worker(ctx: Arc<WorkerContext>, queue: TaskQueue, worker_id: usize) {
    loop {
        if ctx.cancel_token.is_cancelled() || ctx.halt_token.is_cancelled() {
            debug!(worker_id, "worker stopping");
            return;
        }

        let task = {
            let mut guard = queue.lock().await;
            guard.pop_front()
        };
        let Some(task) = task else {
            return;
        };

        match process_task(&ctx, &task).await {
            Ok(TaskResult::Recorded(status)) => {
                debug!(worker_id, index = task.index, ?status, "outcome recorded");
            }
            Ok(TaskResult::Abandoned) => {
                debug!(worker_id, target_id = %task.target_id, "fetch abandoned on stop signal");
                return;
            }
            Err(e) => {
                warn!(
                    worker_id,
                    target_id = %task.target_id,
                    error = %e,
                    "checkpoint write failed, halting scheduling"
                );
                ctx.halt_reason.lock().await.get_or_insert_with(|| e.to_string());
                ctx.halt_token.cancel();
                return;
            }
        }
    }
}

/// Fetch one task and record its outcome
///
/// The payload is persisted before the Success outcome is written, so a crash
/// between the two leaves the target unrecorded rather than falsely complete.
pub(crate) async fn process_task(
    ctx: &WorkerContext,
    task: &FetchTask,
) -> Result<TaskResult, CheckpointError> {
    let fetched = tokio::select! {
        _ = ctx.cancel_token.cancelled() => return Ok(TaskResult::Abandoned),
        fetched = fetch_with_retry(ctx, task) => fetched,
    };

    let outcome = match fetched {
        Ok(payload) => persist(ctx, task, &payload).await,
        Err(e) => FetchOutcome::failed(task, e.to_string()),
    };

    ctx.checkpoint.record_outcome(&outcome).await?;

    match outcome.status {
        FetchStatus::Success => {
            ctx.succeeded.fetch_add(1, Ordering::SeqCst);
            debug!(
                target_id = %task.target_id,
                index = task.index,
                bytes = outcome.byte_size,
                "fetched"
            );
            ctx.event_tx
                .send(Event::TargetFetched {
                    target_id: task.target_id.clone(),
                    index: task.index,
                    byte_size: outcome.byte_size,
                })
                .ok();
        }
        _ => {
            ctx.failed.fetch_add(1, Ordering::SeqCst);
            let error = outcome.error.clone().unwrap_or_default();
            info!(target_id = %task.target_id, index = task.index, error = %error, "fetch failed");
            ctx.event_tx
                .send(Event::TargetFailed {
                    target_id: task.target_id.clone(),
                    index: task.index,
                    error,
                })
                .ok();
        }
    }

    Ok(TaskResult::Recorded(outcome.status))
}

/// GET the task's URL under the retry policy, each attempt bounded by the request timeout
async fn fetch_with_retry(ctx: &WorkerContext, task: &FetchTask) -> Result<Vec<u8>, FetchError> {
    let outcome = retry_with_backoff(&ctx.retry, |attempt| async move {
        ctx.limiter.acquire().await;
        debug!(target_id = %task.target_id, attempt, "requesting");
        match tokio::time::timeout(ctx.request_timeout, ctx.transport.get(&task.url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::timeout(&task.url, ctx.request_timeout)),
        }
    })
    .await;
    outcome.result
}

/// Store the payload and its metadata, yielding the outcome to record
async fn persist(ctx: &WorkerContext, task: &FetchTask, payload: &[u8]) -> FetchOutcome {
    let byte_size = match ctx.raw_store.put_payload(&task.target_id, payload).await {
        Ok(size) => size,
        Err(e) => {
            warn!(target_id = %task.target_id, error = %e, "could not store payload");
            let err = FetchError::Permanent {
                url: task.url.clone(),
                reason: format!("local storage failure: {}", e),
            };
            return FetchOutcome::failed(task, err.to_string());
        }
    };

    let metadata = extractor::extract(&task.target_id, payload);
    if let Err(incomplete) = extractor::ensure_required_fields(&metadata) {
        debug!(error = %incomplete, "metadata incomplete");
    }
    // The consolidator re-extracts from the payload when the sidecar is missing
    if let Err(e) = ctx.raw_store.put_metadata(&metadata).await {
        warn!(target_id = %task.target_id, error = %e, "could not store metadata sidecar");
    }

    FetchOutcome::success(task, byte_size)
}

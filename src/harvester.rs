//! Entry point for one harvest run
//!
//! [`Harvester::run`] wires the components together:
//! 1. Reset the checkpoint unless resuming
//! 2. Enumerate targets from the raw listing (or reuse the saved manifest)
//! 3. Fetch every target through the pool, recording outcomes
//! 4. Consolidate Success outcomes into one artifact and clean up

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::checkpoint::{CheckpointStore, JsonlCheckpointStore};
use crate::config::Config;
use crate::consolidator::{Consolidator, ConsolidatorParams};
use crate::enumerator;
use crate::error::{Error, Result};
use crate::pool::{FetchPool, FetchPoolParams, PoolSettings};
use crate::storage::RawStore;
use crate::transport::Transport;
use crate::types::{Event, ExportArtifact, RunSummary};

/// What a completed run produced
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique targets enumerated
    pub targets: usize,
    /// Fetch counts
    pub summary: RunSummary,
    /// The consolidated dataset
    pub artifact: ExportArtifact,
}

/// Runs the enumerate, fetch and consolidate pipeline for one configuration
pub struct Harvester {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    checkpoint: Arc<dyn CheckpointStore>,
    raw_store: RawStore,
    event_tx: broadcast::Sender<Event>,
    cancel_token: CancellationToken,
}

impl Harvester {
    /// Create a harvester backed by the JSONL checkpoint in the output directory
    pub async fn new(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let checkpoint = Arc::new(JsonlCheckpointStore::open(config.checkpoint_path()).await);
        Self::with_checkpoint(config, transport, checkpoint)
    }

    /// Create a harvester with a caller-supplied checkpoint store
    pub fn with_checkpoint(
        config: Config,
        transport: Arc<dyn Transport>,
        checkpoint: Arc<dyn CheckpointStore>,
    ) -> Result<Self> {
        config.validate()?;
        let raw_store = RawStore::new(config.raw_dir());
        let (event_tx, _rx) = broadcast::channel(1000);

        Ok(Self {
            config: Arc::new(config),
            transport,
            checkpoint,
            raw_store,
            event_tx,
            cancel_token: CancellationToken::new(),
        })
    }

    /// Subscribe to progress events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token that stops the run when cancelled
    ///
    /// In-flight fetches are abandoned without recording an outcome; the next
    /// resumed run fetches them again.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// The run configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the whole pipeline against a raw listing
    ///
    /// # Errors
    ///
    /// - [`Error::Enumeration`] when the listing yields no targets and no saved
    ///   manifest exists; nothing is fetched
    /// - [`Error::Halted`] when the checkpoint becomes unwritable
    /// - [`Error::Interrupted`] when the cancel token fires
    /// - [`Error::Export`] when the artifact cannot be written; it carries the fetch
    ///   summary and intermediate state is preserved for a resumed run
    pub async fn run(&self, raw_listing: &str) -> Result<RunReport> {
        let config = &self.config;

        if !config.resume {
            self.checkpoint.reset().await?;
        }

        let targets = match enumerator::enumerate(raw_listing) {
            Ok(targets) => {
                enumerator::save_targets(&config.manifest_path(), &targets).await?;
                targets
            }
            Err(e) => {
                let saved = enumerator::load_saved_targets(&config.manifest_path()).await;
                if saved.is_empty() {
                    return Err(Error::Enumeration(e));
                }
                warn!(
                    error = %e,
                    count = saved.len(),
                    "listing yielded no targets, reusing saved manifest"
                );
                saved
            }
        };

        info!(count = targets.len(), "targets enumerated");
        self.event_tx
            .send(Event::TargetsEnumerated {
                count: targets.len(),
            })
            .ok();

        let tasks: Vec<_> = enumerator::build_tasks(&targets, &config.document_url_template)
            .into_iter()
            .filter(|t| t.index >= config.start_index)
            .collect();

        let pool = FetchPool::new(FetchPoolParams {
            settings: PoolSettings::from(config.as_ref()),
            transport: Arc::clone(&self.transport),
            checkpoint: Arc::clone(&self.checkpoint),
            raw_store: self.raw_store.clone(),
            event_tx: self.event_tx.clone(),
            cancel_token: self.cancel_token.clone(),
        });
        let summary = pool.run(tasks).await.inspect_err(|e| {
            if let Some(summary) = e.summary() {
                warn!(
                    error = %e,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    pending = summary.pending,
                    resume_index = summary.resume_index,
                    "run stopped before completion"
                );
            }
        })?;

        let consolidator = Consolidator::new(ConsolidatorParams {
            checkpoint: Arc::clone(&self.checkpoint),
            raw_store: self.raw_store.clone(),
            manifest_path: config.manifest_path(),
            destination: config.export_destination.clone(),
            run_name: config.run_name(),
            format: config.export_format,
            cleanup_on_success: config.cleanup_on_success,
            event_tx: self.event_tx.clone(),
        });
        let artifact = consolidator.run().await.map_err(|source| {
            warn!(
                error = %source,
                succeeded = summary.succeeded,
                failed = summary.failed,
                pending = summary.pending,
                resume_index = summary.resume_index,
                "export failed after fetching"
            );
            Error::Export {
                source,
                summary: summary.clone(),
            }
        })?;

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            rows = artifact.rows,
            path = %artifact.path.display(),
            "harvest complete"
        );

        Ok(RunReport {
            targets: targets.len(),
            summary,
            artifact,
        })
    }
}

//! Dataset consolidation
//!
//! Joins every Success outcome in the checkpoint with its extracted metadata,
//! writes the rows as one artifact and, only once that artifact is durable,
//! removes the run's intermediate state.
//!
//! The artifact is written to a temporary file, synced, renamed into place and the
//! parent directory synced. Any failure along the way removes the temporary file and
//! leaves raw payloads, the manifest and the checkpoint exactly as they were.

mod formats;


pub use formats::schema;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::config::ExportFormat;
use crate::error::ExportError;
use crate::extractor;
use crate::storage::RawStore;
use crate::types::{DatasetRow, Event, ExportArtifact};

/// Sidecar reads in flight while assembling rows
const READ_CONCURRENCY: usize = 16;

/// Assemble one row per Success outcome, in sequence order
///
/// Metadata comes from the sidecar written at fetch time, or is re-extracted from
/// the payload when the sidecar is missing. Outcomes whose payload is gone are
/// skipped with a warning.
pub async fn collect_rows(record: &CheckpointRecord, raw_store: &RawStore) -> Vec<DatasetRow> {
    stream::iter(record.successes())
        .map(|outcome| async move {
            let metadata = match raw_store.read_metadata(&outcome.target_id).await {
                Some(metadata) => metadata,
                None => match raw_store.read_payload(&outcome.target_id).await {
                    Ok(payload) => {
                        debug!(target_id = %outcome.target_id, "re-extracting metadata from payload");
                        extractor::extract(&outcome.target_id, &payload)
                    }
                    Err(e) => {
                        warn!(
                            target_id = %outcome.target_id,
                            error = %e,
                            "payload missing for successful fetch, leaving it out of the export"
                        );
                        return None;
                    }
                },
            };
            Some(DatasetRow::new(outcome, metadata))
        })
        // `buffered` keeps sequence order while reading several sidecars at once
        .buffered(READ_CONCURRENCY)
        .filter_map(|row| async move { row })
        .collect()
        .await
}

/// Serialize rows into `dataset_<run_name>.<ext>` under `destination`, durably
pub async fn consolidate(
    rows: Vec<DatasetRow>,
    format: ExportFormat,
    destination: &Path,
    run_name: &str,
) -> std::result::Result<ExportArtifact, ExportError> {
    if rows.is_empty() {
        return Err(ExportError::NoRows);
    }

    let path = destination.join(format!("dataset_{}.{}", run_name, format.extension()));
    let count = rows.len();

    let target = path.clone();
    tokio::task::spawn_blocking(move || write_durably(&target, format, &rows))
        .await
        .map_err(|e| ExportError::Write {
            path: path.clone(),
            reason: format!("writer task failed: {}", e),
        })??;

    info!(path = %path.display(), rows = count, format = %format, "export written");
    Ok(ExportArtifact {
        path,
        format,
        rows: count,
    })
}

fn write_durably(
    path: &Path,
    format: ExportFormat,
    rows: &[DatasetRow],
) -> std::result::Result<(), ExportError> {
    let tmp = tmp_path(path);
    let result = write_and_rename(&tmp, path, format, rows);
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

fn write_and_rename(
    tmp: &Path,
    path: &Path,
    format: ExportFormat,
    rows: &[DatasetRow],
) -> std::result::Result<(), ExportError> {
    let write_err = |e: std::io::Error| ExportError::Write {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(write_err)?;

    let mut out = BufWriter::new(File::create(tmp).map_err(write_err)?);
    formats::encode(format, rows, &mut out)?;
    out.flush().map_err(write_err)?;
    let file = out.into_inner().map_err(|e| write_err(e.into_error()))?;
    file.sync_all().map_err(write_err)?;
    drop(file);

    std::fs::rename(tmp, path).map_err(write_err)?;
    sync_dir(parent).map_err(write_err)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Everything needed to export a run, grouped to keep the constructor readable
pub struct ConsolidatorParams {
    /// Durable record of outcomes
    pub checkpoint: Arc<dyn CheckpointStore>,
    /// Raw payloads and sidecars
    pub raw_store: RawStore,
    /// Saved target manifest, removed on cleanup
    pub manifest_path: PathBuf,
    /// Directory receiving the artifact
    pub destination: PathBuf,
    /// Used in the artifact name
    pub run_name: String,
    /// Serialization format
    pub format: ExportFormat,
    /// Remove intermediate state after a durable export
    pub cleanup_on_success: bool,
    /// Progress events
    pub event_tx: broadcast::Sender<Event>,
}

/// Exports a run and cleans up after it
pub struct Consolidator {
    params: ConsolidatorParams,
}

impl Consolidator {
    /// Create a consolidator
    pub fn new(params: ConsolidatorParams) -> Self {
        Self { params }
    }

    /// Export every Success outcome, then clean up if configured
    ///
    /// Cleanup runs only after the artifact is durable. A failed export leaves
    /// every intermediate file and the checkpoint untouched.
    pub async fn run(&self) -> std::result::Result<ExportArtifact, ExportError> {
        let ConsolidatorParams {
            checkpoint,
            raw_store,
            destination,
            run_name,
            format,
            cleanup_on_success,
            event_tx,
            ..
        } = &self.params;

        let record = checkpoint.load().await;
        let rows = collect_rows(&record, raw_store).await;

        let artifact = consolidate(rows, *format, destination, run_name)
            .await
            .inspect_err(|e| warn!(error = %e, "export failed, intermediate state preserved"))?;

        event_tx
            .send(Event::ExportWritten {
                path: artifact.path.clone(),
                rows: artifact.rows,
            })
            .ok();

        if *cleanup_on_success {
            let files_removed = self.cleanup().await;
            event_tx.send(Event::CleanupCompleted { files_removed }).ok();
        }

        Ok(artifact)
    }

    /// Remove raw payloads, the manifest and the checkpoint; returns files removed
    ///
    /// Failures are logged and skipped: the artifact already exists.
    async fn cleanup(&self) -> usize {
        let mut removed = self.params.raw_store.remove_all().await;

        match tokio::fs::remove_file(&self.params.manifest_path).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.params.manifest_path.display(),
                error = %e,
                "failed to remove target manifest"
            ),
        }

        match self.params.checkpoint.remove().await {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => warn!(error = %e, "failed to remove checkpoint"),
        }

        info!(files_removed = removed, "intermediate state removed");
        removed
    }
}

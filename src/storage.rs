//! Raw payload storage keyed by target
//!
//! Each fetched document lands in `<output_dir>/raw/` as two files named after the
//! SHA-256 of its target identifier:
//! - `<key>.html`: the payload exactly as received
//! - `<key>.meta.json`: the [`MetadataRecord`] extracted from it
//!
//! Files are written to a temporary name, synced and renamed into place, so a
//! payload either exists in full or not at all.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::types::{MetadataRecord, TargetId};

const PAYLOAD_EXT: &str = "html";
const SIDECAR_EXT: &str = "meta.json";

/// Directory of raw payloads and metadata sidecars
#[derive(Clone, Debug)]
pub struct RawStore {
    dir: PathBuf,
}

impl RawStore {
    /// Store rooted at `dir` (created on first write)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stable file stem for a target
    pub fn key(target_id: &TargetId) -> String {
        let mut hasher = Sha256::new();
        hasher.update(target_id.as_str().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Location of a target's payload
    pub fn payload_path(&self, target_id: &TargetId) -> PathBuf {
        self.dir
            .join(format!("{}.{}", Self::key(target_id), PAYLOAD_EXT))
    }

    /// Location of a target's metadata sidecar
    pub fn sidecar_path(&self, target_id: &TargetId) -> PathBuf {
        self.dir
            .join(format!("{}.{}", Self::key(target_id), SIDECAR_EXT))
    }

    /// Persist a payload durably and return its size in bytes
    pub async fn put_payload(&self, target_id: &TargetId, payload: &[u8]) -> std::io::Result<u64> {
        let path = self.payload_path(target_id);
        write_atomic(&path, payload).await?;
        debug!(target_id = %target_id, ?path, bytes = payload.len(), "stored payload");
        Ok(payload.len() as u64)
    }

    /// Read a stored payload
    pub async fn read_payload(&self, target_id: &TargetId) -> std::io::Result<Vec<u8>> {
        fs::read(self.payload_path(target_id)).await
    }

    /// Persist the metadata extracted from a payload
    pub async fn put_metadata(&self, record: &MetadataRecord) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(record).map_err(std::io::Error::other)?;
        write_atomic(&self.sidecar_path(&record.target_id), &json).await
    }

    /// Read a metadata sidecar, None when missing or unreadable
    pub async fn read_metadata(&self, target_id: &TargetId) -> Option<MetadataRecord> {
        let raw = fs::read(self.sidecar_path(target_id)).await.ok()?;
        match serde_json::from_slice(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(target_id = %target_id, error = %e, "ignoring unreadable metadata sidecar");
                None
            }
        }
    }

    /// Delete every file in the store and the directory itself
    ///
    /// Failures are logged and skipped. Returns the number of files removed.
    pub async fn remove_all(&self) -> usize {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(dir = ?self.dir, error = %e, "could not list raw payload directory");
                return 0;
            }
        };

        let mut removed = 0usize;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(dir = ?self.dir, error = %e, "error reading raw payload directory");
                    break;
                }
            };
            let path = entry.path();
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(?path, error = %e, "failed to delete intermediate file"),
            }
        }

        if let Err(e) = fs::remove_dir(&self.dir).await {
            debug!(dir = ?self.dir, error = %e, "raw payload directory not removed");
        }
        info!(dir = ?self.dir, removed, "removed raw payloads");
        removed
    }
}

/// Write `bytes` to `path` through a synced temporary file and a rename
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut file = fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

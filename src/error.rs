//! Error types for doc-harvest
//!
//! Errors are split by how far they propagate:
//! - Per-item errors ([`FetchError`], [`ExtractionIncomplete`]) are isolated to one target
//! - Run-level errors ([`EnumerationError`], [`CheckpointError`], [`ExportError`]) halt the run
//!
//! Run-level halts carry a [`RunSummary`] so the caller can report where a resumed
//! invocation will continue from.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::{RunSummary, TargetId};

/// Result type alias for doc-harvest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for doc-harvest
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "concurrency")
        key: Option<String>,
    },

    /// The raw listing yielded no targets; nothing was fetched
    #[error("enumeration failed: {0}")]
    Enumeration(#[from] EnumerationError),

    /// A single fetch failed (only surfaced by direct transport use, never by a run)
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Checkpoint store failure outside of a running pool
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Export failed; intermediate state was preserved for a resumed run
    #[error("export error: {source}")]
    Export {
        /// Why the artifact could not be written
        #[source]
        source: ExportError,
        /// Counts of the fetch phase that preceded the export
        summary: RunSummary,
    },

    /// The pool stopped scheduling because progress could no longer be tracked
    #[error("run halted at index {}: {reason}", summary.resume_index)]
    Halted {
        /// Why the run was halted
        reason: String,
        /// Counts at the time of the halt
        summary: RunSummary,
    },

    /// An external stop signal interrupted the run
    #[error("run interrupted; resume from index {}", summary.resume_index)]
    Interrupted {
        /// Counts at the time of the interruption
        summary: RunSummary,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error while building or using the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build a configuration error for a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Run summary attached to a halted, interrupted or unexported run, if any
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            Error::Halted { summary, .. }
            | Error::Interrupted { summary }
            | Error::Export { summary, .. } => Some(summary),
            _ => None,
        }
    }
}

/// Errors raised while turning a raw listing into targets
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnumerationError {
    /// The listing was recognized but contained zero identifiers
    #[error("listing contains no extractable identifiers")]
    NoTargets,

    /// Nothing in the listing looked like a result set
    #[error("listing is not a recognized result set: {0}")]
    Unrecognized(String),
}

/// Per-target fetch failure, classified for the retry policy
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Expected to succeed on retry (timeout, rate limit, connection reset, 5xx)
    #[error("transient failure fetching {url}: {reason}")]
    Transient {
        /// URL being fetched
        url: String,
        /// Description of the failure
        reason: String,
    },

    /// Not expected to change on retry (access denied, not found, local storage failure)
    #[error("permanent failure fetching {url}: {reason}")]
    Permanent {
        /// URL being fetched
        url: String,
        /// Description of the failure
        reason: String,
    },
}

impl FetchError {
    /// Build the transient error reported when a request exceeds its timeout
    pub fn timeout(url: &str, after: Duration) -> Self {
        FetchError::Transient {
            url: url.to_string(),
            reason: format!("timed out after {}s", after.as_secs()),
        }
    }

    /// Classify an HTTP status code that is not a success
    pub fn from_status(url: &str, status: u16) -> Self {
        let reason = format!("HTTP {}", status);
        if is_transient_status(status) {
            FetchError::Transient {
                url: url.to_string(),
                reason,
            }
        } else {
            FetchError::Permanent {
                url: url.to_string(),
                reason,
            }
        }
    }

    /// Classify a reqwest error raised while sending or reading a request
    pub fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(url, status.as_u16());
        }
        let reason = err.to_string();
        if err.is_timeout() || err.is_connect() || err.is_body() || err.is_request() {
            FetchError::Transient {
                url: url.to_string(),
                reason,
            }
        } else {
            FetchError::Permanent {
                url: url.to_string(),
                reason,
            }
        }
    }

    /// Whether this failure is worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

/// HTTP statuses that signal a temporary condition on the server side
fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 425 | 429) || ((500..600).contains(&status) && status != 501)
}

/// Checkpoint store failures. Any of these stops the pool from scheduling more work.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Writing or syncing the store failed
    #[error("failed to write checkpoint {path}: {source}")]
    Write {
        /// Path of the checkpoint file
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// An entry could not be encoded
    #[error("failed to encode checkpoint entry: {0}")]
    Encode(#[from] serde_json::Error),

    /// The store refuses further writes (used by test doubles and after a failed sync)
    #[error("checkpoint store is unwritable: {0}")]
    Unwritable(String),
}

/// Export failures. Intermediate files and the checkpoint are never touched when one occurs.
#[derive(Debug, Error)]
pub enum ExportError {
    /// No target reached Success, so there is nothing to export
    #[error("no successfully fetched documents to export")]
    NoRows,

    /// The artifact could not be written or made durable
    #[error("failed to write export {path}: {reason}")]
    Write {
        /// Destination path of the artifact
        path: PathBuf,
        /// The reason the write failed
        reason: String,
    },

    /// The format backend rejected the data
    #[error("failed to encode {format} export: {reason}")]
    Encode {
        /// Export format name
        format: &'static str,
        /// The reason encoding failed
        reason: String,
    },
}

/// Non-fatal: a document's metadata is missing required fields
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("extraction incomplete for {target_id}: missing {}", missing.join(", "))]
pub struct ExtractionIncomplete {
    /// Document whose metadata is incomplete
    pub target_id: TargetId,
    /// Required fields that stayed empty
    pub missing: Vec<&'static str>,
}

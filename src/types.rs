//! Core types for doc-harvest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::ExportFormat;

/// Stable identifier of one remote document, unique within a run
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(pub String);

impl TargetId {
    /// Create a new TargetId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TargetId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TargetId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit of work: a target, its constructed URL and its position in enumeration order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchTask {
    /// Document identifier
    pub target_id: TargetId,
    /// Fully constructed document URL
    pub url: String,
    /// Position in enumeration order (0-based)
    pub index: usize,
}

/// Outcome status of a fetch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    /// Content fetched and persisted
    Success,
    /// All attempts failed or the failure was permanent
    Failed,
    /// Not fetched in this run because the checkpoint already covers it
    Skipped,
}

impl FetchStatus {
    /// Terminal statuses are the only ones persisted in the checkpoint
    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchStatus::Success | FetchStatus::Failed)
    }
}

/// Result of processing one task. Immutable once written to the checkpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOutcome {
    /// Document identifier
    pub target_id: TargetId,
    /// Sequence index of the task
    pub index: usize,
    /// URL that was fetched
    pub url: String,
    /// Final status
    pub status: FetchStatus,
    /// Size of the persisted payload in bytes (0 unless Success)
    pub byte_size: u64,
    /// Failure detail (only for Failed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the outcome was produced
    pub timestamp: DateTime<Utc>,
}

impl FetchOutcome {
    /// Outcome of a fetch whose payload was persisted
    pub fn success(task: &FetchTask, byte_size: u64) -> Self {
        Self {
            target_id: task.target_id.clone(),
            index: task.index,
            url: task.url.clone(),
            status: FetchStatus::Success,
            byte_size,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Outcome of a fetch that will not be retried in this run
    pub fn failed(task: &FetchTask, error: impl Into<String>) -> Self {
        Self {
            target_id: task.target_id.clone(),
            index: task.index,
            url: task.url.clone(),
            status: FetchStatus::Failed,
            byte_size: 0,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Which extraction path produced a [`MetadataRecord`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    /// The embedded document payload supplied every required field
    Structured,
    /// Generic document structure was used for at least one field
    #[default]
    Heuristic,
}

impl ExtractionMethod {
    /// Column value used in every export format
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Structured => "structured",
            ExtractionMethod::Heuristic => "heuristic",
        }
    }
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured metadata extracted from one fetched document
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Document identifier
    pub target_id: TargetId,
    /// Headline
    pub title: Option<String>,
    /// Publication date normalized to `YYYY-MM-DD`
    pub publication_date: Option<String>,
    /// Date text as it appeared in the document
    pub publication_date_raw: Option<String>,
    /// Publication name
    pub source: Option<String>,
    /// Byline
    pub author: Option<String>,
    /// Section label preceding the date in the document header
    pub section: Option<String>,
    /// Word count announced by the document header
    pub word_count: Option<u32>,
    /// Document language from the `lang` attribute
    pub language: Option<String>,
    /// Summary from the description meta tags
    #[serde(default)]
    pub description: Option<String>,
    /// Header line (section, date, page, word count) as printed
    #[serde(default)]
    pub doc_header: Option<String>,
    /// First absolute link inside the article body
    #[serde(default)]
    pub external_url: Option<String>,
    /// Publication code attached to the source information icon
    #[serde(default)]
    pub source_code: Option<String>,
    /// Document certificate number
    #[serde(default)]
    pub certificate_id: Option<String>,
    /// Source category label of the viewer page
    #[serde(default)]
    pub source_type: Option<String>,
    /// Concepts linked from the viewer page, joined by `"; "`
    #[serde(default)]
    pub related_terms: Option<String>,
    /// Body text, paragraphs separated by blank lines
    pub body_text: String,
    /// Characters in `body_text`
    #[serde(default)]
    pub text_characters: u64,
    /// Path taken to produce this record
    pub extraction_method: ExtractionMethod,
    /// True only when the structured payload supplied title, date and body
    pub complete: bool,
}

impl MetadataRecord {
    /// Required fields that are empty in this record
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.title.as_deref().is_none_or(str::is_empty) {
            missing.push("title");
        }
        if self.publication_date.as_deref().is_none_or(str::is_empty) {
            missing.push("publication_date");
        }
        if self.body_text.is_empty() {
            missing.push("body_text");
        }
        missing
    }
}

/// One exported row: a Success outcome joined with its metadata
///
/// Field order is the column order of every export format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRow {
    /// Document identifier
    pub target_id: String,
    /// Sequence index in enumeration order
    pub sequence_index: u64,
    /// Fetched URL
    pub url: String,
    /// Headline
    pub title: Option<String>,
    /// Publication date (`YYYY-MM-DD`)
    pub publication_date: Option<String>,
    /// Date text as it appeared in the document
    pub publication_date_raw: Option<String>,
    /// Publication name
    pub source: Option<String>,
    /// Byline
    pub author: Option<String>,
    /// Section label
    pub section: Option<String>,
    /// Announced word count
    pub word_count: Option<u32>,
    /// Document language
    pub language: Option<String>,
    /// Description meta tag
    pub description: Option<String>,
    /// Header line as printed
    pub doc_header: Option<String>,
    /// First absolute link in the body
    pub external_url: Option<String>,
    /// Publication code
    pub source_code: Option<String>,
    /// Document certificate number
    pub certificate_id: Option<String>,
    /// Source category label
    pub source_type: Option<String>,
    /// Linked concepts, `"; "`-separated
    pub related_terms: Option<String>,
    /// Body text
    pub body_text: String,
    /// Characters in the body text
    pub text_characters: u64,
    /// `structured` or `heuristic`
    pub extraction_method: String,
    /// Completeness flag of the metadata
    pub complete: bool,
    /// Size of the fetched payload in bytes
    pub byte_size: u64,
    /// Fetch timestamp, RFC 3339 UTC
    pub fetched_at: String,
}

impl DatasetRow {
    /// Join a Success outcome with the metadata extracted from its payload
    pub fn new(outcome: &FetchOutcome, metadata: MetadataRecord) -> Self {
        Self {
            target_id: outcome.target_id.0.clone(),
            sequence_index: outcome.index as u64,
            url: outcome.url.clone(),
            title: metadata.title,
            publication_date: metadata.publication_date,
            publication_date_raw: metadata.publication_date_raw,
            source: metadata.source,
            author: metadata.author,
            section: metadata.section,
            word_count: metadata.word_count,
            language: metadata.language,
            description: metadata.description,
            doc_header: metadata.doc_header,
            external_url: metadata.external_url,
            source_code: metadata.source_code,
            certificate_id: metadata.certificate_id,
            source_type: metadata.source_type,
            related_terms: metadata.related_terms,
            body_text: metadata.body_text,
            text_characters: metadata.text_characters,
            extraction_method: metadata.extraction_method.as_str().to_string(),
            complete: metadata.complete,
            byte_size: outcome.byte_size,
            fetched_at: outcome
                .timestamp
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }
}

/// Counts reported at the end (or halt) of a run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Targets fetched successfully in this run
    pub succeeded: usize,
    /// Targets recorded as Failed in this run
    pub failed: usize,
    /// Targets not fetched because the checkpoint already covered them
    pub skipped: usize,
    /// Targets never processed (halt, interruption)
    pub pending: usize,
    /// Sequence index from which a resumed run continues
    pub resume_index: usize,
    /// Batches fully processed and flushed
    pub batches_completed: usize,
}

/// The consolidated dataset written for a run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportArtifact {
    /// Location of the artifact
    pub path: PathBuf,
    /// Serialization format
    pub format: ExportFormat,
    /// Number of rows written
    pub rows: usize,
}

/// Progress events broadcast while a run executes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// The listing produced this many unique targets
    TargetsEnumerated {
        /// Number of targets
        count: usize,
    },
    /// A batch is about to be processed
    BatchStarted {
        /// Batch number (0-based)
        batch: usize,
        /// First sequence index in the batch
        start: usize,
        /// One past the last sequence index in the batch
        end: usize,
        /// Tasks that will actually be fetched
        scheduled: usize,
    },
    /// A target was fetched and persisted
    TargetFetched {
        /// Document identifier
        target_id: TargetId,
        /// Sequence index
        index: usize,
        /// Payload size in bytes
        byte_size: u64,
    },
    /// A target was recorded as Failed
    TargetFailed {
        /// Document identifier
        target_id: TargetId,
        /// Sequence index
        index: usize,
        /// Failure detail
        error: String,
    },
    /// A target was skipped because the checkpoint covers it
    TargetSkipped {
        /// Document identifier
        target_id: TargetId,
        /// Sequence index
        index: usize,
    },
    /// A batch finished and its progress marker was flushed
    BatchCompleted {
        /// Batch number (0-based)
        batch: usize,
        /// Sequence index the next batch starts from
        next_index: usize,
    },
    /// The consolidated dataset was written durably
    ExportWritten {
        /// Artifact path
        path: PathBuf,
        /// Rows written
        rows: usize,
    },
    /// Intermediate state was removed after a successful export
    CleanupCompleted {
        /// Files removed
        files_removed: usize,
    },
}

//! Configuration types for doc-harvest

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest worker count accepted by [`Config::validate`]
pub const MAX_CONCURRENCY: usize = 32;

/// Largest batch size accepted by [`Config::validate`]
pub const MAX_BATCH_SIZE: usize = 20_000;

/// Main configuration for a harvest run
///
/// Every field has a default, so a JSON file only needs the settings it changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Working directory for raw payloads, the checkpoint and the target manifest
    /// (default: "./harvest")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// URL template for one document. `{id}` is replaced by the percent-encoded
    /// target identifier and `{index}` by its sequence index.
    #[serde(default = "default_document_url_template")]
    pub document_url_template: String,

    /// Number of parallel fetch workers (default: 6)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Number of targets processed before the next checkpoint progress marker (default: 1000)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Targets with a lower sequence index are never scheduled (default: 0)
    #[serde(default)]
    pub start_index: usize,

    /// Continue from the existing checkpoint instead of starting fresh (default: false)
    #[serde(default)]
    pub resume: bool,

    /// On resume, fetch targets recorded as Failed again (default: true)
    #[serde(default = "default_true")]
    pub retry_failed_on_resume: bool,

    /// Serialization format of the consolidated dataset (default: parquet)
    #[serde(default)]
    pub export_format: ExportFormat,

    /// Directory that receives the consolidated dataset (default: "./exports")
    #[serde(default = "default_export_destination")]
    pub export_destination: PathBuf,

    /// Delete raw payloads, manifest and checkpoint once the export is durable (default: true)
    #[serde(default = "default_true")]
    pub cleanup_on_success: bool,

    /// Upper bound on a single fetch; exceeding it counts as a transient failure (default: 45s)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Global request rate shared by all workers (None = unlimited)
    #[serde(default)]
    pub requests_per_second: Option<u64>,

    /// Retry behavior for transient failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            document_url_template: default_document_url_template(),
            concurrency: default_concurrency(),
            batch_size: default_batch_size(),
            start_index: 0,
            resume: false,
            retry_failed_on_resume: true,
            export_format: ExportFormat::default(),
            export_destination: default_export_destination(),
            cleanup_on_success: true,
            request_timeout: default_request_timeout(),
            requests_per_second: None,
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Load a configuration from a JSON file and validate it
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every setting is within its accepted range
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(Error::config(
                "concurrency",
                format!("must be between 1 and {}", MAX_CONCURRENCY),
            ));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(Error::config(
                "batch_size",
                format!("must be between 1 and {}", MAX_BATCH_SIZE),
            ));
        }
        if !self.document_url_template.contains("{id}") {
            return Err(Error::config(
                "document_url_template",
                "must contain an {id} placeholder",
            ));
        }
        let sample = self
            .document_url_template
            .replace("{id}", "id")
            .replace("{index}", "0");
        if let Err(e) = url::Url::parse(&sample) {
            return Err(Error::config(
                "document_url_template",
                format!("not an absolute URL: {}", e),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::config("request_timeout", "must be at least 1 second"));
        }
        if self.requests_per_second == Some(0) {
            return Err(Error::config(
                "requests_per_second",
                "use null for unlimited instead of 0",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config("retry.max_attempts", "must be at least 1"));
        }
        let multiplier = self.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                format!("must be a finite number of at least 1.0, got {}", multiplier),
            ));
        }
        Ok(())
    }

    /// Path of the checkpoint log inside the output directory
    pub fn checkpoint_path(&self) -> PathBuf {
        self.output_dir.join("checkpoint.jsonl")
    }

    /// Path of the saved target manifest inside the output directory
    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join("targets.json")
    }

    /// Directory holding raw payloads and metadata sidecars
    pub fn raw_dir(&self) -> PathBuf {
        self.output_dir.join("raw")
    }

    /// Name of this run, derived from the output directory's last component
    pub fn run_name(&self) -> String {
        self.output_dir
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .unwrap_or("harvest")
            .to_string()
    }
}

/// Retry configuration for transient fetch failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per target, including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between attempts (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Serialization format of the consolidated dataset
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Columnar Apache Parquet (default)
    #[default]
    Parquet,
    /// Comma-separated values with a header row
    Csv,
    /// One JSON object per line
    Jsonl,
}

impl ExportFormat {
    /// All supported formats
    pub const ALL: [ExportFormat; 3] = [ExportFormat::Parquet, ExportFormat::Csv, ExportFormat::Jsonl];

    /// File extension used for artifacts of this format
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Parquet => "parquet",
            ExportFormat::Csv => "csv",
            ExportFormat::Jsonl => "jsonl",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parquet" => Ok(ExportFormat::Parquet),
            "csv" => Ok(ExportFormat::Csv),
            "jsonl" | "ndjson" => Ok(ExportFormat::Jsonl),
            other => Err(Error::config(
                "export_format",
                format!("unsupported export format '{}'; use parquet, csv, or jsonl", other),
            )),
        }
    }
}

// Default value functions
fn default_output_dir() -> PathBuf {
    PathBuf::from("harvest")
}

fn default_export_destination() -> PathBuf {
    PathBuf::from("exports")
}

fn default_document_url_template() -> String {
    "https://nouveau-eureka-cc.acces.bibl.ulaval.ca/Document/View?viewEvent=1&docRefId=0&docName={id}&docIndex={index}".to_string()
}

fn default_concurrency() -> usize {
    6
}

fn default_batch_size() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(45)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

//! # doc-harvest
//!
//! Resumable batch retrieval of documents behind an authenticated session.
//!
//! A run turns a raw result listing into an ordered list of targets, fetches each
//! one with a bounded pool of workers, records every outcome in a durable
//! checkpoint, extracts metadata from each payload and finally writes one
//! consolidated dataset (Parquet, CSV or JSONL).
//!
//! An interrupted run is resumed by running again with `resume: true`: targets the
//! checkpoint records as fetched are skipped without a request.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - No CLI or UI; the session (cookies, headers) is supplied by the caller
//! - **Sensible defaults** - Every [`Config`] field has a default
//! - **Event-driven** - Consumers subscribe to [`Event`]s for progress, no polling required
//! - **Crash-safe** - A target is only recorded as fetched after its payload is durable
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use doc_harvest::{Config, Harvester, HttpTransport, SessionCredentials};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         output_dir: "harvest/2024-01".into(),
//!         resume: true,
//!         ..Default::default()
//!     };
//!     let credentials = SessionCredentials {
//!         cookies: vec![("ASP.NET_SessionId".to_string(), "...".to_string())],
//!         ..Default::default()
//!     };
//!     let transport = Arc::new(HttpTransport::new(&credentials, config.request_timeout)?);
//!
//!     let harvester = Harvester::new(config, transport).await?;
//!     tokio::spawn(doc_harvest::cancel_on_shutdown_signal(harvester.cancel_token()));
//!
//!     let mut events = harvester.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             tracing::info!(?event, "harvest event");
//!         }
//!     });
//!
//!     let listing = std::fs::read_to_string("results.html")?;
//!     let report = harvester.run(&listing).await?;
//!     println!("{} rows written to {}", report.artifact.rows, report.artifact.path.display());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Durable per-target outcome tracking
pub mod checkpoint;
/// Configuration types
pub mod config;
/// Dataset export and cleanup
pub mod consolidator;
/// Raw listing to ordered targets
pub mod enumerator;
/// Error types
pub mod error;
/// Metadata extraction from fetched payloads
pub mod extractor;
/// Pipeline entry point
pub mod harvester;
/// Bounded-concurrency fetch pool
pub mod pool;
/// Shared request pacing
pub mod rate_limiter;
/// Retry logic with exponential backoff
pub mod retry;
/// Raw payload storage
pub mod storage;
/// Authenticated HTTP access
pub mod transport;
/// Core types
pub mod types;

pub use checkpoint::{CheckpointRecord, CheckpointStore, JsonlCheckpointStore, MemoryCheckpointStore};
pub use config::{Config, ExportFormat, RetryConfig};
pub use consolidator::{Consolidator, ConsolidatorParams, collect_rows, consolidate};
pub use enumerator::{build_tasks, enumerate};
pub use error::{
    CheckpointError, EnumerationError, Error, ExportError, ExtractionIncomplete, FetchError, Result,
};
pub use extractor::{ensure_required_fields, extract};
pub use harvester::{Harvester, RunReport};
pub use pool::{FetchPool, FetchPoolParams, PoolSettings};
pub use storage::RawStore;
pub use transport::{HttpTransport, SessionCredentials, Transport};
pub use types::{
    DatasetRow, Event, ExportArtifact, ExtractionMethod, FetchOutcome, FetchStatus, FetchTask,
    MetadataRecord, RunSummary, TargetId,
};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives a termination signal
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Spawn it next to a run; the run then stops scheduling, abandons in-flight
/// fetches and returns [`Error::Interrupted`].
pub async fn cancel_on_shutdown_signal(token: CancellationToken) {
    tokio::select! {
        _ = wait_for_signal() => {
            tracing::info!("stopping harvest, resume later to continue");
            token.cancel();
        }
        _ = token.cancelled() => {}
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

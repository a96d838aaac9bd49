//! # bucket-migrate
//!
//! Move every object from one storage bucket to another, tolerating
//! transient failures and external throttling, and report exactly what
//! happened to each object.
//!
//! Built for the upload → processed hand-off of a document-conversion
//! pipeline, where a naive `for f in $(gsutil ls …); do gsutil mv …; sleep 1;
//! done` loop has no retries, no classification of failures, no pacing
//! under concurrency, and no final accounting.
//!
//! ## Run Overview
//!
//! ```text
//! source bucket
//!  │
//!  ├─ 1. Probe     source readable, destination writable (fatal otherwise)
//!  ├─ 2. List      lazy, paginated, consumed once
//!  ├─ 3. Dispatch  sequential with a delay, or N workers behind a rate limiter
//!  ├─ 4. Copy      retry transient errors with exponential backoff
//!  ├─ 5. Delete    optional; only after the copy is confirmed durable
//!  └─ 6. Report    totals + every failure with its reason
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bucket_migrate::{migrate, GcsStore, MigrationConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Token from GOOGLE_OAUTH_ACCESS_TOKEN, endpoint from STORAGE_EMULATOR_HOST
//!     let store = Arc::new(GcsStore::from_env()?);
//!     let config = MigrationConfig::default();
//!     let report = migrate(store, "acme-upload", "acme-processed", &config).await?;
//!     eprintln!("{} ok / {} failed", report.succeeded, report.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `bucket-migrate` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! bucket-migrate = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod limiter;
pub mod migrate;
pub mod progress;
pub mod report;
pub mod storage;
pub mod stream;
mod transfer;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{MigrationConfig, MigrationConfigBuilder};
pub use error::{FailureReason, MigrateError, StorageError};
pub use limiter::RateLimiter;
pub use migrate::{migrate, migrate_blocking, Migrator};
pub use progress::{MigrationProgressCallback, NoopProgressCallback, ProgressCallback};
pub use report::{FailedTransfer, RunReport, TransferStatus, TransferTask};
pub use storage::{
    Access, GcsConfig, GcsStore, LocalStore, MemoryStore, ObjectLocator, ObjectStore, ObjectStream,
};
pub use stream::{migrate_stream, EventStream, MigrationEvent};
pub use tokio_util::sync::CancellationToken;

//! Progress-callback trait for per-object migration events.
//!
//! Inject an [`Arc<dyn MigrationProgressCallback>`] via
//! [`crate::config::MigrationConfigBuilder::progress_callback`] to receive
//! events as the migrator works through the listing.
//!
//! The trait is `Send + Sync` because with `max_concurrency > 1` the
//! per-object hooks fire from several transfers at once.
//!
//! # Example
//!
//! ```rust
//! use bucket_migrate::{MigrationConfig, MigrationProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     copied: AtomicUsize,
//! }
//!
//! impl MigrationProgressCallback for CountingCallback {
//!     fn on_transfer_complete(&self, key: &str, attempts: u32) {
//!         let done = self.copied.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("#{done} {key} ({attempts} attempts)");
//!     }
//! }
//!
//! let config = MigrationConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { copied: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::FailureReason;
use crate::report::RunReport;
use std::sync::Arc;

/// Called by the migrator as it processes each object.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Implementations must protect shared mutable state
/// with appropriate synchronisation (`Mutex`, atomics).
pub trait MigrationProgressCallback: Send + Sync {
    /// Called once after preconditions pass, before the first listing page.
    fn on_run_start(&self, source: &str, destination: &str) {
        let _ = (source, destination);
    }

    /// Called when an object is dispatched to a worker.
    fn on_transfer_start(&self, key: &str) {
        let _ = key;
    }

    /// Called before each retry of a transiently failed call.
    ///
    /// # Arguments
    /// * `attempt` — 1-based number of the retry about to happen
    /// * `error`   — the transient error that triggered it
    fn on_transfer_retry(&self, key: &str, attempt: u32, error: &str) {
        let _ = (key, attempt, error);
    }

    /// Called when an object reached `Succeeded`.
    fn on_transfer_complete(&self, key: &str, attempts: u32) {
        let _ = (key, attempts);
    }

    /// Called when an object reached `Failed`.
    fn on_transfer_error(&self, key: &str, reason: FailureReason, detail: &str) {
        let _ = (key, reason, detail);
    }

    /// Called once with the finalized report.
    fn on_run_complete(&self, report: &RunReport) {
        let _ = report;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl MigrationProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::MigrationConfig`].
pub type ProgressCallback = Arc<dyn MigrationProgressCallback>;

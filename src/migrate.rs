//! Eager (whole-run) migration entry points.
//!
//! [`Migrator::run`] drives [`crate::stream::migrate_stream`] to the end and
//! folds every event into a [`RunReport`]. The fold happens on the caller's
//! task only, so the report has a single writer no matter how many
//! transfers are in flight. Use [`Migrator::stream`] instead when you want
//! outcomes progressively.

use crate::config::MigrationConfig;
use crate::error::MigrateError;
use crate::report::RunReport;
use crate::storage::{normalize_container, ObjectStore};
use crate::stream::{migrate_stream, EventStream, MigrationEvent};
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Moves every object of one container into another.
///
/// Configuration is fixed at construction; one `Migrator` may run any
/// number of times.
///
/// # Example
/// ```rust,no_run
/// use bucket_migrate::{GcsStore, MigrationConfig, Migrator};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(GcsStore::from_env()?);
/// let config = MigrationConfig::builder()
///     .max_concurrency(4)
///     .delete_source_on_success(true)
///     .build()?;
/// let report = Migrator::new(store, config)
///     .run("my-project-upload", "my-project-processed")
///     .await?;
/// println!("{}/{} objects moved", report.succeeded, report.total);
/// # Ok(())
/// # }
/// ```
pub struct Migrator {
    store: Arc<dyn ObjectStore>,
    config: MigrationConfig,
}

impl Migrator {
    pub fn new(store: Arc<dyn ObjectStore>, config: MigrationConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Run to completion.
    ///
    /// # Returns
    /// `Ok(RunReport)` even if some objects failed; check `report.failed`.
    ///
    /// # Errors
    /// Only run-level failures: invalid names, missing or unreadable
    /// source, unwritable destination.
    pub async fn run(&self, source: &str, destination: &str) -> Result<RunReport, MigrateError> {
        self.run_until_cancelled(source, destination, CancellationToken::new())
            .await
    }

    /// Run until done or until `cancel` fires (or the configured deadline
    /// passes). The report then holds only tasks that reached a terminal
    /// state; the rest are counted in `abandoned`.
    ///
    /// Cancellation during the precondition checks is not an error: the
    /// result is an empty report with `cancelled` set.
    pub async fn run_until_cancelled(
        &self,
        source: &str,
        destination: &str,
        cancel: CancellationToken,
    ) -> Result<RunReport, MigrateError> {
        let start = Instant::now();
        // An unrepresentable deadline is as good as none.
        let deadline = self.config.deadline.and_then(|d| start.checked_add(d));
        let run_token = cancel.child_token();

        let source = normalize_container(source)?;
        let destination = normalize_container(destination)?;
        let mut report = RunReport::new(&source, &destination);

        let opened = match deadline {
            Some(at) => tokio::select! {
                opened = self.stream(&source, &destination, run_token.clone()) => opened,
                _ = sleep_until(at) => {
                    warn!("Deadline reached after {:?} while checking buckets", start.elapsed());
                    run_token.cancel();
                    Err(MigrateError::Cancelled)
                }
            },
            None => self.stream(&source, &destination, run_token.clone()).await,
        };
        let mut events = match opened {
            Ok(events) => events,
            Err(MigrateError::Cancelled) => {
                warn!("Run cancelled before the first transfer");
                return Ok(self.finish(report, start, true));
            }
            Err(e) => return Err(e),
        };

        loop {
            let next = match deadline {
                Some(at) => tokio::select! {
                    ev = events.next() => ev,
                    _ = sleep_until(at), if !run_token.is_cancelled() => {
                        warn!("Deadline reached after {:?}; cancelling run", start.elapsed());
                        run_token.cancel();
                        continue;
                    }
                },
                None => events.next().await,
            };
            let Some(event) = next else { break };

            match event {
                MigrationEvent::Finished(task) => report.record(&task),
                MigrationEvent::ListingFailed(e) => {
                    warn!("Listing of {} broke off: {}", source, e);
                    report.listing_error = Some(e.to_string());
                }
            }
        }

        Ok(self.finish(report, start, run_token.is_cancelled()))
    }

    fn finish(&self, mut report: RunReport, start: Instant, cancelled: bool) -> RunReport {
        report.cancelled = cancelled;
        report.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Migration complete: {}/{} succeeded, {} failed, {} abandoned, {}ms",
            report.succeeded, report.total, report.failed, report.abandoned, report.duration_ms
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_run_complete(&report);
        }
        report
    }

    /// Check preconditions and return the lazy event stream.
    pub async fn stream(
        &self,
        source: &str,
        destination: &str,
        cancel: CancellationToken,
    ) -> Result<EventStream, MigrateError> {
        migrate_stream(
            Arc::clone(&self.store),
            source,
            destination,
            &self.config,
            cancel,
        )
        .await
    }
}

/// Migrate `source` into `destination` with `config`.
///
/// This is the primary entry point for the library.
pub async fn migrate(
    store: Arc<dyn ObjectStore>,
    source: &str,
    destination: &str,
    config: &MigrationConfig,
) -> Result<RunReport, MigrateError> {
    Migrator::new(store, config.clone())
        .run(source, destination)
        .await
}

/// Synchronous wrapper around [`migrate`].
///
/// Creates a temporary tokio runtime internally; do not call from inside
/// an async context.
pub fn migrate_blocking(
    store: Arc<dyn ObjectStore>,
    source: &str,
    destination: &str,
    config: &MigrationConfig,
) -> Result<RunReport, MigrateError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| MigrateError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(migrate(store, source, destination, config))
}

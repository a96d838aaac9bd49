//! Streaming migration API: emit task outcomes as they complete.
//!
//! [`migrate_stream`] checks run preconditions, then returns a lazy stream
//! that pulls the source listing, dispatches each object to a worker and
//! yields a [`MigrationEvent`] per finished task. Nothing is copied until
//! the stream is polled.
//!
//! Two scheduling modes mirror the config:
//!
//! * `max_concurrency == 1` — strictly sequential; `delay_between_transfers`
//!   is slept between successive transfers.
//! * `max_concurrency > 1` — up to N transfers in flight
//!   (`buffer_unordered`); the delay becomes a shared [`RateLimiter`].
//!   Events arrive in completion order.
//!
//! Cancelling the token stops the listing; transfers waiting on pacing or
//! backoff are abandoned and come back still `InFlight`/`Pending`.

use crate::config::MigrationConfig;
use crate::error::{MigrateError, StorageError};
use crate::limiter::RateLimiter;
use crate::report::TransferTask;
use crate::storage::{normalize_container, Access, ObjectStore};
use crate::transfer::{transfer_object, CallError, TransferContext};
use futures::future;
use futures::stream::StreamExt;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One item of a migration event stream.
#[derive(Debug, Clone)]
pub enum MigrationEvent {
    /// A task left the worker: terminal, or abandoned on cancellation.
    Finished(TransferTask),
    /// The listing broke off; no further objects will be dispatched.
    ListingFailed(StorageError),
}

/// A boxed stream of migration events.
pub type EventStream = Pin<Box<dyn Stream<Item = MigrationEvent> + Send>>;

/// Start a migration and stream its events.
///
/// # Returns
/// - `Ok(EventStream)` — preconditions passed; poll to make progress
/// - `Err(MigrateError)` — fatal: bad names, source missing/unreadable,
///   destination unwritable, or `Cancelled` if `cancel` fired before the
///   preconditions were confirmed
pub async fn migrate_stream(
    store: Arc<dyn ObjectStore>,
    source: &str,
    destination: &str,
    config: &MigrationConfig,
    cancel: CancellationToken,
) -> Result<EventStream, MigrateError> {
    let source = normalize_container(source)?;
    let destination = normalize_container(destination)?;
    if source == destination {
        return Err(MigrateError::InvalidConfig(format!(
            "source and destination are the same bucket '{source}'"
        )));
    }

    if cancel.is_cancelled() {
        return Err(MigrateError::Cancelled);
    }
    check_preconditions(store.as_ref(), &source, &destination, config, &cancel).await?;
    info!(
        "Migrating {} -> {} via {} (concurrency {}, delay {:?}, retries {}, delete {})",
        source,
        destination,
        store.name(),
        config.max_concurrency,
        config.delay_between_transfers,
        config.max_retries,
        config.delete_source_on_success
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(&source, &destination);
    }

    // ── Listing: stop on cancellation, and after the first error ─────────
    let listing = store
        .list(&source)
        .take_until(cancel.clone().cancelled_owned())
        .scan(false, |broken: &mut bool, item| {
            if *broken {
                return future::ready(None);
            }
            if item.is_err() {
                *broken = true;
            }
            future::ready(Some(item))
        });

    let concurrency = config.max_concurrency.max(1);
    let delay = config.delay_between_transfers;
    let limiter =
        (concurrency > 1 && !delay.is_zero()).then(|| Arc::new(RateLimiter::new(delay)));

    let ctx = Arc::new(TransferContext {
        store,
        destination,
        config: config.clone(),
        limiter,
        cancel,
    });

    if concurrency == 1 {
        // Sequential mode: one at a time, politeness delay in between.
        let s = listing.enumerate().then(move |(i, item)| {
            let ctx = Arc::clone(&ctx);
            async move {
                match item {
                    Err(e) => MigrationEvent::ListingFailed(e),
                    Ok(locator) => {
                        if i > 0 && !ctx.pause(delay).await {
                            let task = TransferTask::new(locator, ctx.destination.as_str());
                            return MigrationEvent::Finished(task);
                        }
                        MigrationEvent::Finished(transfer_object(&ctx, locator).await)
                    }
                }
            }
        });

        Ok(Box::pin(s))
    } else {
        // Concurrent mode: bounded pool, emit as ready.
        let s = listing
            .map(move |item| {
                let ctx = Arc::clone(&ctx);
                async move {
                    match item {
                        Err(e) => MigrationEvent::ListingFailed(e),
                        Ok(locator) => {
                            MigrationEvent::Finished(transfer_object(&ctx, locator).await)
                        }
                    }
                }
            })
            .buffer_unordered(concurrency);

        Ok(Box::pin(s))
    }
}

/// Probe one container, retrying transient failures with the run's
/// backoff policy. Both the probe and the backoff give way to `cancel`.
async fn probe_with_retries(
    store: &dyn ObjectStore,
    container: &str,
    access: Access,
    config: &MigrationConfig,
    cancel: &CancellationToken,
) -> Result<(), CallError> {
    let mut attempt = 0;
    loop {
        let probed = tokio::select! {
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
            r = store.probe(container, access) => r,
        };
        match probed {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                attempt += 1;
                let backoff = config.backoff_for(attempt);
                warn!("probe {}: {} (retry {} after {:?})", container, e, attempt, backoff);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(CallError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
            Err(e) => return Err(CallError::Failed(e)),
        }
    }
}

/// Run-level preconditions: readable source, writable destination.
async fn check_preconditions(
    store: &dyn ObjectStore,
    source: &str,
    destination: &str,
    config: &MigrationConfig,
    cancel: &CancellationToken,
) -> Result<(), MigrateError> {
    probe_with_retries(store, source, Access::Read, config, cancel)
        .await
        .map_err(|e| match e {
            CallError::Cancelled => MigrateError::Cancelled,
            CallError::Failed(StorageError::NotFound(_)) => MigrateError::SourceNotFound {
                container: source.to_string(),
            },
            CallError::Failed(other) => MigrateError::SourceUnreachable {
                container: source.to_string(),
                detail: other.to_string(),
            },
        })?;

    probe_with_retries(store, destination, Access::Write, config, cancel)
        .await
        .map_err(|e| match e {
            CallError::Cancelled => MigrateError::Cancelled,
            CallError::Failed(e) => MigrateError::DestinationUnwritable {
                container: destination.to_string(),
                detail: e.to_string(),
            },
        })?;

    Ok(())
}

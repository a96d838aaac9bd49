//! Single-object transfer: copy, confirm, optionally delete the source.
//!
//! ## Retry Strategy
//!
//! Every storage call is classified by the backend. Permanent errors
//! (`NotFound`, `PermissionDenied`) end the task at once. Transient errors
//! are retried up to `max_retries` times with exponential backoff starting
//! at `delay_between_transfers` (d → 2d → 4d …, capped at `max_backoff`).
//!
//! ## Delete-after-confirm
//!
//! The source is only deleted after `copy` returned `Ok`, which backends
//! guarantee means the destination object is durable. A delete that fails
//! leaves both copies in place and marks the task `delete-failed`.

use crate::config::MigrationConfig;
use crate::error::{FailureReason, StorageError};
use crate::limiter::RateLimiter;
use crate::report::{TransferStatus, TransferTask};
use crate::storage::{ObjectLocator, ObjectStore};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything a worker needs; shared by all transfers of one run.
pub(crate) struct TransferContext {
    pub store: Arc<dyn ObjectStore>,
    pub destination: String,
    pub config: MigrationConfig,
    /// Present only when several workers share the pacing budget.
    pub limiter: Option<Arc<RateLimiter>>,
    pub cancel: CancellationToken,
}

pub(crate) enum CallError {
    /// Permanent error, or the last transient one once retries ran out.
    Failed(StorageError),
    Cancelled,
}

impl TransferContext {
    /// Sleep for `d` unless the run is cancelled first. Returns `false`
    /// if cancelled.
    pub async fn pause(&self, d: Duration) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if d.is_zero() {
            return true;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(d) => true,
        }
    }

    /// Run `op` with the retry policy.
    ///
    /// `gated` calls wait for the shared limiter and honour cancellation
    /// before every attempt. Ungated calls (the delete that follows a
    /// confirmed copy) start regardless, so a task that already copied
    /// gets the chance to finish.
    async fn call_with_retries<T, F, Fut>(
        &self,
        key: &str,
        op_name: &str,
        attempts: &mut u32,
        gated: bool,
        mut op: F,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let max_retries = self.config.max_retries;
        let mut last_err: Option<StorageError> = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let backoff = self.config.backoff_for(attempt);
                let reason = last_err.as_ref().map(|e| e.to_string()).unwrap_or_default();
                warn!(
                    "{}: {} retry {}/{} after {:?}",
                    key, op_name, attempt, max_retries, backoff
                );
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_transfer_retry(key, attempt, &reason);
                }
                if !self.pause(backoff).await {
                    return Err(CallError::Cancelled);
                }
            }

            if gated {
                let admitted = match self.limiter {
                    Some(ref limiter) => limiter.acquire_or_cancel(&self.cancel).await,
                    None => !self.cancel.is_cancelled(),
                };
                if !admitted {
                    return Err(CallError::Cancelled);
                }
            }

            *attempts += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    warn!("{}: {} attempt {} failed — {}", key, op_name, attempt + 1, e);
                    last_err = Some(e);
                }
                Err(e) => return Err(CallError::Failed(e)),
            }
        }

        Err(CallError::Failed(last_err.unwrap_or_else(|| {
            StorageError::Transient(format!("{op_name} was never attempted"))
        })))
    }

    fn finish_failed(
        &self,
        mut task: TransferTask,
        reason: FailureReason,
        detail: String,
    ) -> TransferTask {
        warn!("{}: failed ({}) — {}", task.source, reason, detail);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_transfer_error(task.source.key(), reason, &detail);
        }
        task.fail(reason, detail);
        task
    }
}

/// Move one object and return its task in a terminal state, or still
/// `InFlight` if the run was cancelled before it could finish.
///
/// Never propagates errors upward; a single bad object must not abort
/// the run.
pub(crate) async fn transfer_object(
    ctx: &TransferContext,
    source: ObjectLocator,
) -> TransferTask {
    let start = Instant::now();
    let key = source.key().to_string();
    let mut task = TransferTask::new(source.clone(), ctx.destination.as_str());
    task.status = TransferStatus::InFlight;

    if let Some(ref cb) = ctx.config.progress_callback {
        cb.on_transfer_start(&key);
    }
    debug!("{}: copying into {}", source, ctx.destination);

    let copied = ctx
        .call_with_retries(&key, "copy", &mut task.attempts, true, || {
            ctx.store.copy(&source, &ctx.destination)
        })
        .await;

    match copied {
        Ok(dest) => debug!("{}: confirmed at {}", key, dest),
        Err(CallError::Cancelled) => {
            info!("{}: abandoned, run cancelled", key);
            return task;
        }
        Err(CallError::Failed(e)) => {
            let reason = e.reason();
            return ctx.finish_failed(task, reason, e.to_string());
        }
    }

    if ctx.config.delete_source_on_success {
        let deleted = ctx
            .call_with_retries(&key, "delete", &mut task.attempts, false, || {
                ctx.store.delete(&source)
            })
            .await;

        match deleted {
            // Already gone is as good as deleted.
            Ok(()) | Err(CallError::Failed(StorageError::NotFound(_))) => {}
            Err(CallError::Cancelled) => {
                info!("{}: abandoned after copy, source kept", key);
                return task;
            }
            Err(CallError::Failed(e)) => {
                return ctx.finish_failed(
                    task,
                    FailureReason::DeleteFailed,
                    format!("copied, but source not deleted: {e}"),
                );
            }
        }
    }

    task.succeed();
    info!(
        "{}: ok ({} calls, {}ms)",
        source,
        task.attempts,
        start.elapsed().as_millis()
    );
    if let Some(ref cb) = ctx.config.progress_callback {
        cb.on_transfer_complete(&key, task.attempts);
    }
    task
}

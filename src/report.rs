//! Per-object task state and the aggregate run report.

use crate::error::FailureReason;
use crate::storage::ObjectLocator;
use serde::Serialize;

/// Lifecycle of one object's transfer.
///
/// `Pending → InFlight → Succeeded | Failed`. A task still `Pending` or
/// `InFlight` when the run ends was abandoned by cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum TransferStatus {
    Pending,
    InFlight,
    Succeeded,
    Failed { reason: FailureReason, detail: String },
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Succeeded | TransferStatus::Failed { .. })
    }
}

/// One listed object and what happened to it.
#[derive(Debug, Clone, Serialize)]
pub struct TransferTask {
    pub source: ObjectLocator,
    /// Destination container; the key is preserved.
    pub destination: String,
    /// Storage calls issued for this object (copy and delete attempts).
    pub attempts: u32,
    pub status: TransferStatus,
}

impl TransferTask {
    pub fn new(source: ObjectLocator, destination: impl Into<String>) -> Self {
        Self {
            source,
            destination: destination.into(),
            attempts: 0,
            status: TransferStatus::Pending,
        }
    }

    pub(crate) fn succeed(&mut self) {
        self.status = TransferStatus::Succeeded;
    }

    pub(crate) fn fail(&mut self, reason: FailureReason, detail: impl Into<String>) {
        self.status = TransferStatus::Failed {
            reason,
            detail: detail.into(),
        };
    }
}

/// A failed object as recorded in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTransfer {
    pub key: String,
    pub reason: FailureReason,
    pub detail: String,
    pub attempts: u32,
}

/// Final accounting of a migration run.
///
/// Only tasks that reached a terminal state are counted in `total`;
/// tasks cut off by cancellation land in `abandoned`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub source: String,
    pub destination: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<FailedTransfer>,
    pub abandoned: usize,
    pub cancelled: bool,
    /// Set when the listing broke off mid-run; objects after the break
    /// were never seen.
    pub listing_error: Option<String>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            ..Default::default()
        }
    }

    /// Fold one finished task into the aggregate.
    pub fn record(&mut self, task: &TransferTask) {
        match &task.status {
            TransferStatus::Succeeded => {
                self.total += 1;
                self.succeeded += 1;
            }
            TransferStatus::Failed { reason, detail } => {
                self.total += 1;
                self.failed += 1;
                self.failures.push(FailedTransfer {
                    key: task.source.key().to_string(),
                    reason: *reason,
                    detail: detail.clone(),
                    attempts: task.attempts,
                });
            }
            TransferStatus::Pending | TransferStatus::InFlight => self.abandoned += 1,
        }
    }

    /// Reasons of every failure, in completion order.
    pub fn reasons(&self) -> Vec<FailureReason> {
        self.failures.iter().map(|f| f.reason).collect()
    }

    /// Every listed object succeeded and the run covered the whole listing.
    pub fn is_complete_success(&self) -> bool {
        self.failed == 0 && self.abandoned == 0 && !self.cancelled && self.listing_error.is_none()
    }

    /// Process exit code for the CLI: 0 on complete success, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.is_complete_success() {
            0
        } else {
            1
        }
    }
}

//! Error types for the bucket-migrate library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`MigrateError`] — **Fatal**: the run cannot start at all (source bucket
//!   missing, destination not writable, bad configuration). Returned as
//!   `Err(MigrateError)` from [`crate::migrate::migrate`] and friends.
//!
//! * [`StorageError`] — the outcome of a single call against an
//!   [`crate::storage::ObjectStore`]. Classified as permanent
//!   (`NotFound`, `PermissionDenied`) or retryable (`Transient`).
//!
//! * [`FailureReason`] — **Non-fatal**: the terminal reason a single object
//!   failed. Stored inside [`crate::report::TransferTask`] so one bad object
//!   never aborts the run.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// All fatal errors returned by the bucket-migrate library.
///
/// Per-object failures use [`FailureReason`] and are stored in
/// [`crate::report::RunReport`] rather than propagated here.
#[derive(Debug, Error)]
pub enum MigrateError {
    // ── Run preconditions ─────────────────────────────────────────────────
    /// The source container does not exist.
    #[error("Source bucket '{container}' not found\nCheck the name and the active project.")]
    SourceNotFound { container: String },

    /// The source container exists but could not be read.
    #[error("Source bucket '{container}' is not readable: {detail}")]
    SourceUnreachable { container: String, detail: String },

    /// The destination container is missing or rejects writes.
    #[error("Destination bucket '{container}' is not writable: {detail}")]
    DestinationUnwritable { container: String, detail: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// A container name is empty or malformed.
    #[error("Invalid bucket name '{name}': {reason}")]
    InvalidContainer { name: String, reason: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Cancellation ──────────────────────────────────────────────────────
    /// The run was cancelled (token or deadline) while its preconditions
    /// were still being checked. No object was touched.
    #[error("Run cancelled before the first transfer")]
    Cancelled,

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MigrateError {
    /// True when the error is a run-level precondition failure, i.e. no
    /// object was touched because the run never started.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            MigrateError::SourceNotFound { .. }
                | MigrateError::SourceUnreachable { .. }
                | MigrateError::DestinationUnwritable { .. }
        )
    }
}

/// The outcome of one failed storage call.
///
/// Backends map their native errors onto these three classes. Anything
/// that is not clearly "missing" or "forbidden" is treated as transient.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The container or object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller lacks the required permission.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Network blip, throttling, server error — worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl StorageError {
    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }

    /// The terminal reason recorded when this error ends a transfer.
    pub fn reason(&self) -> FailureReason {
        match self {
            StorageError::NotFound(_) => FailureReason::NotFound,
            StorageError::PermissionDenied(_) => FailureReason::PermissionDenied,
            StorageError::Transient(_) => FailureReason::TransientExhausted,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(e.to_string()),
            std::io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(e.to_string()),
            _ => StorageError::Transient(e.to_string()),
        }
    }
}

/// Why a single object ended in the `Failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    /// Copy was rejected for lack of permission. Never retried.
    PermissionDenied,
    /// The object vanished between listing and copy. Never retried.
    NotFound,
    /// Every attempt failed transiently and the retry budget ran out.
    TransientExhausted,
    /// The copy succeeded but the source could not be deleted.
    DeleteFailed,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::PermissionDenied => "permission-denied",
            FailureReason::NotFound => "not-found",
            FailureReason::TransientExhausted => "transient-exhausted",
            FailureReason::DeleteFailed => "delete-failed",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_not_found_display() {
        let e = MigrateError::SourceNotFound {
            container: "proj-upload".into(),
        };
        assert!(e.to_string().contains("proj-upload"));
        assert!(e.is_precondition());
    }

    #[test]
    fn config_error_is_not_precondition() {
        let e = MigrateError::InvalidConfig("concurrency must be ≥ 1".into());
        assert!(!e.is_precondition());
        assert!(!MigrateError::Cancelled.is_precondition());
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(StorageError::Transient("503".into()).is_transient());
        assert!(!StorageError::NotFound("a.docx".into()).is_transient());
        assert!(!StorageError::PermissionDenied("a.docx".into()).is_transient());
    }

    #[test]
    fn io_error_classification() {
        use std::io::{Error, ErrorKind};
        assert!(matches!(
            StorageError::from(Error::from(ErrorKind::NotFound)),
            StorageError::NotFound(_)
        ));
        assert!(matches!(
            StorageError::from(Error::from(ErrorKind::PermissionDenied)),
            StorageError::PermissionDenied(_)
        ));
        assert!(matches!(
            StorageError::from(Error::from(ErrorKind::TimedOut)),
            StorageError::Transient(_)
        ));
    }

    #[test]
    fn failure_reason_strings() {
        assert_eq!(FailureReason::PermissionDenied.to_string(), "permission-denied");
        assert_eq!(
            StorageError::Transient("x".into()).reason().as_str(),
            "transient-exhausted"
        );
        let json = serde_json::to_string(&FailureReason::DeleteFailed).unwrap();
        assert_eq!(json, "\"delete-failed\"");
    }
}

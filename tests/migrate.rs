//! Integration tests for bucket-migrate.
//!
//! Everything runs against `MemoryStore` (optionally wrapped in a
//! fault-injecting store) or a `LocalStore` over a temp directory, so no
//! network access or credentials are needed.
//!
//! Timing-sensitive tests use `start_paused = true`; tokio auto-advances the
//! clock whenever every task is asleep, so delays cost no wall time.
//!
//! Run with:
//!   cargo test --test migrate

use async_trait::async_trait;
use bucket_migrate::{
    migrate, migrate_blocking, migrate_stream, Access, CancellationToken, FailureReason, LocalStore,
    MemoryStore, MigrateError, MigrationConfig, MigrationEvent, MigrationProgressCallback,
    Migrator, ObjectLocator, ObjectStore, ObjectStream, RunReport, StorageError, TransferStatus,
};
use futures::{stream, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

// ── Test helpers ─────────────────────────────────────────────────────────────

const SRC: &str = "proj-upload";
const DST: &str = "proj-processed";

/// How a scripted key misbehaves.
#[derive(Clone)]
enum Fault {
    /// Fail the first `n` calls, then behave.
    Times(usize, StorageError),
    /// Fail every call.
    Always(StorageError),
}

/// `MemoryStore` wrapper with scripted failures and call accounting.
#[derive(Default)]
struct FaultyStore {
    inner: MemoryStore,
    copy_faults: Mutex<HashMap<String, Fault>>,
    delete_faults: Mutex<HashMap<String, Fault>>,
    /// Returned by every `probe` instead of asking the inner store.
    probe_fault: Option<StorageError>,
    /// Yield a transient listing error after this many objects.
    list_break_after: Option<usize>,
    copy_latency: Duration,
    copy_calls: Mutex<HashMap<String, u32>>,
    copy_starts: Mutex<Vec<Instant>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FaultyStore {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    fn fail_copy(self, key: &str, fault: Fault) -> Self {
        self.copy_faults.lock().unwrap().insert(key.into(), fault);
        self
    }

    fn fail_delete(self, key: &str, fault: Fault) -> Self {
        self.delete_faults.lock().unwrap().insert(key.into(), fault);
        self
    }

    fn copy_calls(&self, key: &str) -> u32 {
        self.copy_calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    fn take_fault(faults: &Mutex<HashMap<String, Fault>>, key: &str) -> Option<StorageError> {
        let mut faults = faults.lock().unwrap();
        match faults.get_mut(key) {
            Some(Fault::Always(e)) => Some(e.clone()),
            Some(Fault::Times(n, e)) if *n > 0 => {
                *n -= 1;
                Some(e.clone())
            }
            _ => None,
        }
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn probe(&self, container: &str, access: Access) -> Result<(), StorageError> {
        if let Some(ref e) = self.probe_fault {
            return Err(e.clone());
        }
        self.inner.probe(container, access).await
    }

    fn list(&self, container: &str) -> ObjectStream {
        let listing = self.inner.list(container);
        match self.list_break_after {
            Some(n) => Box::pin(listing.take(n).chain(stream::once(async {
                Err(StorageError::Transient("listing connection reset".into()))
            }))),
            None => listing,
        }
    }

    async fn copy(
        &self,
        source: &ObjectLocator,
        destination: &str,
    ) -> Result<ObjectLocator, StorageError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.copy_starts.lock().unwrap().push(Instant::now());
        *self
            .copy_calls
            .lock()
            .unwrap()
            .entry(source.key().to_string())
            .or_default() += 1;

        if !self.copy_latency.is_zero() {
            tokio::time::sleep(self.copy_latency).await;
        }
        let result = match Self::take_fault(&self.copy_faults, source.key()) {
            Some(e) => Err(e),
            None => self.inner.copy(source, destination).await,
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn delete(&self, locator: &ObjectLocator) -> Result<(), StorageError> {
        match Self::take_fault(&self.delete_faults, locator.key()) {
            Some(e) => Err(e),
            None => self.inner.delete(locator).await,
        }
    }
}

/// A store with `keys` in the source bucket and an empty destination.
fn seeded(keys: &[&str]) -> MemoryStore {
    let store = MemoryStore::new();
    store.create_container(SRC);
    store.create_container(DST);
    for key in keys {
        store.put(SRC, key, format!("contents of {key}").into_bytes());
    }
    store
}

fn numbered(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("doc-{i:02}.docx")).collect()
}

fn config() -> MigrationConfig {
    MigrationConfig::builder()
        .delay_between_transfers(Duration::ZERO)
        .build()
        .unwrap()
}

fn config_with_delete() -> MigrationConfig {
    MigrationConfig::builder()
        .delay_between_transfers(Duration::ZERO)
        .delete_source_on_success(true)
        .build()
        .unwrap()
}

/// Route library logs to the test harness; `RUST_LOG=debug` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn assert_accounting(report: &RunReport) {
    assert_eq!(report.total, report.succeeded + report.failed);
    assert_eq!(report.failures.len(), report.failed);
}

// ── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn moves_every_object_and_deletes_sources() {
    init_tracing();
    let store = seeded(&["a.docx", "b.docx"]);

    let report = migrate(Arc::new(store.clone()), SRC, DST, &config_with_delete())
        .await
        .unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 0);
    assert!(report.failures.is_empty());
    assert_eq!(report.exit_code(), 0);
    assert!(store.keys(SRC).is_empty());
    assert_eq!(store.keys(DST), vec!["a.docx", "b.docx"]);
    assert_eq!(
        store.get(DST, "a.docx").unwrap(),
        b"contents of a.docx".to_vec()
    );
}

#[tokio::test]
async fn second_run_finds_nothing_to_do() {
    let store = seeded(&["a.docx", "b.docx"]);
    let migrator = Migrator::new(Arc::new(store.clone()), config_with_delete());

    let first = migrator.run(SRC, DST).await.unwrap();
    assert_eq!(first.succeeded, 2);

    let second = migrator.run(SRC, DST).await.unwrap();
    assert_eq!(second.total, 0);
    assert_eq!(second.failed, 0);
    assert_eq!(second.exit_code(), 0);
    assert_eq!(store.keys(DST).len(), 2);
}

#[tokio::test]
async fn copy_without_delete_keeps_both_copies() {
    let store = seeded(&["a.docx", "b.docx", "c.docx"]);

    let report = migrate(Arc::new(store.clone()), SRC, DST, &config())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 3);
    assert_eq!(store.keys(SRC).len(), 3);
    assert_eq!(store.keys(DST).len(), 3);
}

#[tokio::test]
async fn empty_source_is_a_successful_noop() {
    let store = seeded(&[]);
    let report = migrate(Arc::new(store), SRC, DST, &config()).await.unwrap();
    assert_eq!(report.total, 0);
    assert!(report.is_complete_success());
}

#[tokio::test]
async fn gs_urls_are_accepted_for_bucket_names() {
    let store = seeded(&["a.docx"]);
    let report = migrate(
        Arc::new(store.clone()),
        "gs://proj-upload",
        "gs://proj-processed/",
        &config(),
    )
    .await
    .unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.source, SRC);
    assert_eq!(report.destination, DST);
    assert!(store.contains(DST, "a.docx"));
}

#[test]
fn blocking_wrapper_runs_without_a_runtime() {
    let store = seeded(&["a.docx"]);
    let report = migrate_blocking(Arc::new(store.clone()), SRC, DST, &config()).unwrap();
    assert_eq!(report.succeeded, 1);
    assert!(store.contains(DST, "a.docx"));
}

// ── Preconditions ────────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_source_bucket_is_fatal() {
    let store = MemoryStore::new();
    store.create_container(DST);

    let err = migrate(Arc::new(store), SRC, DST, &config())
        .await
        .unwrap_err();

    assert!(matches!(err, MigrateError::SourceNotFound { ref container } if container == SRC));
    assert!(err.is_precondition());
}

#[tokio::test]
async fn unwritable_destination_is_fatal_and_touches_nothing() {
    let store = seeded(&["a.docx"]);
    store.set_read_only(DST, true);
    let faulty = Arc::new(FaultyStore::new(store.clone()));

    let err = migrate(faulty.clone(), SRC, DST, &config_with_delete())
        .await
        .unwrap_err();

    assert!(matches!(err, MigrateError::DestinationUnwritable { .. }));
    assert!(err.is_precondition());
    assert_eq!(faulty.copy_calls("a.docx"), 0);
    assert!(store.contains(SRC, "a.docx"));
}

#[tokio::test]
async fn missing_destination_bucket_is_fatal() {
    let store = MemoryStore::new();
    store.put(SRC, "a.docx", b"x".to_vec());

    let err = migrate(Arc::new(store), SRC, DST, &config())
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::DestinationUnwritable { .. }));
}

#[tokio::test]
async fn same_source_and_destination_is_rejected() {
    let store = seeded(&["a.docx"]);
    let err = migrate(Arc::new(store), SRC, "gs://proj-upload", &config())
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::InvalidConfig(_)));
}

#[tokio::test]
async fn malformed_bucket_name_is_rejected() {
    let store = seeded(&[]);
    let err = migrate(Arc::new(store), "", DST, &config())
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::InvalidContainer { .. }));
}

// ── Retries and failure classification ───────────────────────────────────────

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let store = seeded(&["a.docx"]);
    let faulty = Arc::new(FaultyStore::new(store.clone()).fail_copy(
        "a.docx",
        Fault::Times(2, StorageError::Transient("503 Service Unavailable".into())),
    ));

    let report = migrate(faulty.clone(), SRC, DST, &config()).await.unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(faulty.copy_calls("a.docx"), 3);
    assert!(store.contains(DST, "a.docx"));
}

#[tokio::test]
async fn exhausted_retries_fail_with_transient_exhausted() {
    init_tracing();
    let store = seeded(&["a.docx"]);
    let faulty = Arc::new(FaultyStore::new(store.clone()).fail_copy(
        "a.docx",
        Fault::Always(StorageError::Transient("429 Too Many Requests".into())),
    ));
    let config = MigrationConfig::builder()
        .delay_between_transfers(Duration::ZERO)
        .max_retries(2)
        .delete_source_on_success(true)
        .build()
        .unwrap();

    let report = migrate(faulty.clone(), SRC, DST, &config).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.reasons(), vec![FailureReason::TransientExhausted]);
    assert_eq!(report.failures[0].attempts, 3);
    assert_eq!(faulty.copy_calls("a.docx"), 3);
    assert!(store.contains(SRC, "a.docx"));
    assert!(!store.contains(DST, "a.docx"));
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn zero_retries_means_a_single_attempt() {
    let store = seeded(&["a.docx"]);
    let faulty = Arc::new(FaultyStore::new(store).fail_copy(
        "a.docx",
        Fault::Always(StorageError::Transient("timeout".into())),
    ));
    let config = MigrationConfig::builder()
        .delay_between_transfers(Duration::ZERO)
        .max_retries(0)
        .build()
        .unwrap();

    let report = migrate(faulty.clone(), SRC, DST, &config).await.unwrap();
    assert_eq!(report.failures[0].attempts, 1);
    assert_eq!(faulty.copy_calls("a.docx"), 1);
}

#[tokio::test]
async fn permission_denied_is_not_retried_and_source_is_kept() {
    let store = seeded(&["a.docx", "b.docx"]);
    let faulty = Arc::new(FaultyStore::new(store.clone()).fail_copy(
        "a.docx",
        Fault::Always(StorageError::PermissionDenied("403 Forbidden".into())),
    ));

    let report = migrate(faulty.clone(), SRC, DST, &config_with_delete())
        .await
        .unwrap();

    assert_accounting(&report);
    assert_eq!(report.total, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].key, "a.docx");
    assert_eq!(report.failures[0].reason, FailureReason::PermissionDenied);
    assert_eq!(faulty.copy_calls("a.docx"), 1);
    assert!(store.contains(SRC, "a.docx"));
    assert!(!store.contains(SRC, "b.docx"));
    assert!(store.contains(DST, "b.docx"));
}

#[tokio::test]
async fn object_gone_before_copy_is_not_found() {
    let store = seeded(&["a.docx"]);
    let faulty = Arc::new(FaultyStore::new(store).fail_copy(
        "a.docx",
        Fault::Always(StorageError::NotFound("proj-upload/a.docx".into())),
    ));

    let report = migrate(faulty.clone(), SRC, DST, &config()).await.unwrap();
    assert_eq!(report.reasons(), vec![FailureReason::NotFound]);
    assert_eq!(faulty.copy_calls("a.docx"), 1);
}

#[tokio::test]
async fn failed_delete_keeps_the_destination_copy() {
    let store = seeded(&["a.docx"]);
    let faulty = Arc::new(FaultyStore::new(store.clone()).fail_delete(
        "a.docx",
        Fault::Always(StorageError::PermissionDenied("403 on delete".into())),
    ));

    let report = migrate(faulty, SRC, DST, &config_with_delete())
        .await
        .unwrap();

    assert_eq!(report.reasons(), vec![FailureReason::DeleteFailed]);
    assert!(store.contains(SRC, "a.docx"));
    assert!(store.contains(DST, "a.docx"));
}

#[tokio::test]
async fn transient_delete_failure_is_retried() {
    let store = seeded(&["a.docx"]);
    let faulty = Arc::new(FaultyStore::new(store.clone()).fail_delete(
        "a.docx",
        Fault::Times(1, StorageError::Transient("500".into())),
    ));

    let report = migrate(faulty, SRC, DST, &config_with_delete())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 1);
    assert!(!store.contains(SRC, "a.docx"));
}

#[tokio::test]
async fn source_already_deleted_counts_as_success() {
    let store = seeded(&["a.docx"]);
    let faulty = Arc::new(FaultyStore::new(store.clone()).fail_delete(
        "a.docx",
        Fault::Always(StorageError::NotFound("proj-upload/a.docx".into())),
    ));

    let report = migrate(faulty, SRC, DST, &config_with_delete())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 1);
    assert!(store.contains(DST, "a.docx"));
}

// ── Accounting invariants ────────────────────────────────────────────────────

#[tokio::test]
async fn every_listed_object_reaches_exactly_one_terminal_state() {
    init_tracing();
    let keys = numbered(12);
    let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    let store = seeded(&key_refs);
    let faulty = FaultyStore::new(store.clone())
        .fail_copy(
            "doc-03.docx",
            Fault::Always(StorageError::PermissionDenied("denied".into())),
        )
        .fail_copy(
            "doc-07.docx",
            Fault::Always(StorageError::Transient("flaky".into())),
        )
        .fail_copy(
            "doc-09.docx",
            Fault::Times(1, StorageError::Transient("flaky once".into())),
        );
    let config = MigrationConfig::builder()
        .delay_between_transfers(Duration::ZERO)
        .max_concurrency(3)
        .delete_source_on_success(true)
        .build()
        .unwrap();

    let events: Vec<MigrationEvent> = Migrator::new(Arc::new(faulty), config)
        .stream(SRC, DST, CancellationToken::new())
        .await
        .unwrap()
        .collect()
        .await;

    let mut seen = BTreeSet::new();
    for event in &events {
        let MigrationEvent::Finished(task) = event else {
            panic!("unexpected event {event:?}");
        };
        assert!(task.status.is_terminal(), "{} not terminal", task.source);
        assert!(seen.insert(task.source.key().to_string()), "{} reported twice", task.source);

        // Source deleted iff the task succeeded.
        let key = task.source.key();
        match task.status {
            TransferStatus::Succeeded => {
                assert!(!store.contains(SRC, key));
                assert!(store.contains(DST, key));
            }
            _ => assert!(store.contains(SRC, key)),
        }
    }
    assert_eq!(seen.len(), 12);
}

#[tokio::test]
async fn listing_error_stops_dispatch_and_is_reported() {
    let keys = numbered(5);
    let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    let store = seeded(&key_refs);
    let faulty = FaultyStore {
        list_break_after: Some(2),
        ..FaultyStore::new(store.clone())
    };

    let report = migrate(Arc::new(faulty), SRC, DST, &config()).await.unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.succeeded, 2);
    assert!(report.listing_error.is_some());
    assert!(!report.is_complete_success());
    assert_eq!(report.exit_code(), 1);
    assert_eq!(store.keys(DST).len(), 2);
}

#[tokio::test]
async fn report_serialises_to_json() {
    let store = seeded(&["a.docx"]);
    let report = migrate(Arc::new(store), SRC, DST, &config()).await.unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["total"], 1);
    assert_eq!(json["succeeded"], 1);
    assert_eq!(json["source"], SRC);
    assert!(json["failures"].as_array().unwrap().is_empty());
}

// ── Concurrency and pacing ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn concurrency_bound_is_never_exceeded() {
    let keys = numbered(10);
    let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    let store = seeded(&key_refs);
    let faulty = Arc::new(FaultyStore {
        copy_latency: Duration::from_millis(50),
        ..FaultyStore::new(store.clone())
    });
    let config = MigrationConfig::builder()
        .delay_between_transfers(Duration::ZERO)
        .max_concurrency(4)
        .build()
        .unwrap();

    let report = migrate(faulty.clone(), SRC, DST, &config).await.unwrap();

    assert_eq!(report.succeeded, 10);
    let peak = faulty.max_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 4, "peak in flight was {peak}");
    assert!(peak > 1, "transfers never overlapped");
}

#[tokio::test(start_paused = true)]
async fn shared_rate_limit_spaces_copy_starts() {
    let keys = numbered(5);
    let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    let store = seeded(&key_refs);
    let faulty = Arc::new(FaultyStore::new(store));
    let config = MigrationConfig::builder()
        .delay_between_transfers(Duration::from_millis(100))
        .max_concurrency(4)
        .build()
        .unwrap();

    let report = migrate(faulty.clone(), SRC, DST, &config).await.unwrap();
    assert_eq!(report.succeeded, 5);

    let mut starts = faulty.copy_starts.lock().unwrap().clone();
    starts.sort();
    for pair in starts.windows(2) {
        assert!(
            pair[1] - pair[0] >= Duration::from_millis(100),
            "copies started {:?} apart",
            pair[1] - pair[0]
        );
    }
}

#[tokio::test(start_paused = true)]
async fn sequential_mode_sleeps_between_transfers() {
    let store = seeded(&["a.docx", "b.docx", "c.docx"]);
    let faulty = Arc::new(FaultyStore::new(store));
    let config = MigrationConfig::builder()
        .delay_between_transfers(Duration::from_secs(1))
        .build()
        .unwrap();

    let start = Instant::now();
    let report = migrate(faulty.clone(), SRC, DST, &config).await.unwrap();

    assert_eq!(report.succeeded, 3);
    assert!(start.elapsed() >= Duration::from_secs(2));
    let starts = faulty.copy_starts.lock().unwrap().clone();
    for pair in starts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(1));
    }
}

#[tokio::test(start_paused = true)]
async fn retry_backoff_doubles_from_the_delay() {
    let store = seeded(&["a.docx"]);
    let faulty = Arc::new(FaultyStore::new(store).fail_copy(
        "a.docx",
        Fault::Times(3, StorageError::Transient("busy".into())),
    ));
    let config = MigrationConfig::builder()
        .delay_between_transfers(Duration::from_millis(100))
        .max_retries(3)
        .build()
        .unwrap();

    let report = migrate(faulty.clone(), SRC, DST, &config).await.unwrap();
    assert_eq!(report.succeeded, 1);

    // 100ms, 200ms, 400ms between the four attempts.
    let starts = faulty.copy_starts.lock().unwrap().clone();
    assert_eq!(starts.len(), 4);
    assert!(starts[1] - starts[0] >= Duration::from_millis(100));
    assert!(starts[2] - starts[1] >= Duration::from_millis(200));
    assert!(starts[3] - starts[2] >= Duration::from_millis(400));
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn cancellation_abandons_waiting_work() {
    init_tracing();
    let store = seeded(&["a.docx", "b.docx", "c.docx"]);
    let config = MigrationConfig::builder()
        .delay_between_transfers(Duration::from_secs(10))
        .delete_source_on_success(true)
        .build()
        .unwrap();
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });
    }

    let report = Migrator::new(Arc::new(store.clone()), config)
        .run_until_cancelled(SRC, DST, cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 0);
    assert!(report.abandoned >= 1);
    assert_eq!(report.exit_code(), 1);
    // Abandoned objects are left where they were.
    assert_eq!(store.keys(SRC).len(), 2);
    assert_eq!(store.keys(DST).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn deadline_cancels_the_run() {
    let keys = numbered(10);
    let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    let store = seeded(&key_refs);
    let config = MigrationConfig::builder()
        .delay_between_transfers(Duration::from_secs(1))
        .deadline(Duration::from_millis(1500))
        .build()
        .unwrap();

    let report = migrate(Arc::new(store.clone()), SRC, DST, &config)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_accounting(&report);
    assert!(report.succeeded >= 1);
    assert!(report.total < 10);
    assert_eq!(store.keys(DST).len(), report.succeeded);
}

/// Source probe that never stops failing transiently.
fn unreachable_store() -> Arc<FaultyStore> {
    Arc::new(FaultyStore {
        probe_fault: Some(StorageError::Transient("503 Service Unavailable".into())),
        ..FaultyStore::new(seeded(&["a.docx"]))
    })
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_precondition_backoff() {
    let config = MigrationConfig::builder()
        .delay_between_transfers(Duration::from_secs(10))
        .build()
        .unwrap();
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });
    }

    let start = Instant::now();
    let report = Migrator::new(unreachable_store(), config)
        .run_until_cancelled(SRC, DST, cancel)
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(report.cancelled);
    assert_eq!(report.total, 0);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test(start_paused = true)]
async fn deadline_covers_precondition_checks() {
    let faulty = unreachable_store();
    let config = MigrationConfig::builder()
        .delay_between_transfers(Duration::from_secs(10))
        .deadline(Duration::from_secs(1))
        .build()
        .unwrap();

    let start = Instant::now();
    let report = migrate(faulty.clone(), SRC, DST, &config).await.unwrap();

    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(report.cancelled);
    assert_eq!(report.total, 0);
    assert_eq!(faulty.copy_calls("a.docx"), 0);
}

#[tokio::test]
async fn stream_refuses_to_start_once_cancelled() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = migrate_stream(unreachable_store(), SRC, DST, &config(), cancel).await;
    assert!(matches!(result, Err(MigrateError::Cancelled)));
}

#[tokio::test]
async fn unrepresentable_deadline_means_no_deadline() {
    let store = seeded(&["a.docx"]);
    let config = MigrationConfig::builder()
        .delay_between_transfers(Duration::ZERO)
        .deadline(Duration::MAX)
        .build()
        .unwrap();

    let report = migrate(Arc::new(store), SRC, DST, &config).await.unwrap();
    assert!(!report.cancelled);
    assert_eq!(report.succeeded, 1);
}

// ── Progress callback ────────────────────────────────────────────────────────

#[derive(Default)]
struct CountingCallback {
    runs_started: AtomicUsize,
    started: AtomicUsize,
    retries: AtomicUsize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    runs_completed: AtomicUsize,
}

impl MigrationProgressCallback for CountingCallback {
    fn on_run_start(&self, _source: &str, _destination: &str) {
        self.runs_started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_transfer_start(&self, _key: &str) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_transfer_retry(&self, _key: &str, _attempt: u32, _error: &str) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }
    fn on_transfer_complete(&self, _key: &str, _attempts: u32) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_transfer_error(&self, _key: &str, _reason: FailureReason, _detail: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
    fn on_run_complete(&self, _report: &RunReport) {
        self.runs_completed.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn progress_callback_sees_every_transfer() {
    let store = seeded(&["a.docx", "b.docx", "c.docx"]);
    let faulty = Arc::new(
        FaultyStore::new(store)
            .fail_copy(
                "b.docx",
                Fault::Times(1, StorageError::Transient("blip".into())),
            )
            .fail_copy(
                "c.docx",
                Fault::Always(StorageError::PermissionDenied("denied".into())),
            ),
    );
    let cb = Arc::new(CountingCallback::default());
    let config = MigrationConfig::builder()
        .delay_between_transfers(Duration::ZERO)
        .progress_callback(cb.clone())
        .build()
        .unwrap();

    let report = migrate(faulty, SRC, DST, &config).await.unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(cb.runs_started.load(Ordering::SeqCst), 1);
    assert_eq!(cb.started.load(Ordering::SeqCst), 3);
    assert_eq!(cb.retries.load(Ordering::SeqCst), 1);
    assert_eq!(cb.completed.load(Ordering::SeqCst), 2);
    assert_eq!(cb.errors.load(Ordering::SeqCst), 1);
    assert_eq!(cb.runs_completed.load(Ordering::SeqCst), 1);
}

// ── Local filesystem backend ─────────────────────────────────────────────────

#[tokio::test]
async fn local_store_end_to_end() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join(SRC).join("2024/03")).unwrap();
    std::fs::create_dir_all(root.join(DST)).unwrap();
    std::fs::write(root.join(SRC).join("a.docx"), b"alpha").unwrap();
    std::fs::write(root.join(SRC).join("2024/03/b.docx"), b"beta").unwrap();

    let report = migrate(
        Arc::new(LocalStore::new(root)),
        SRC,
        DST,
        &config_with_delete(),
    )
    .await
    .unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.succeeded, 2);
    assert_eq!(std::fs::read(root.join(DST).join("a.docx")).unwrap(), b"alpha");
    assert_eq!(
        std::fs::read(root.join(DST).join("2024/03/b.docx")).unwrap(),
        b"beta"
    );
    assert!(!root.join(SRC).join("a.docx").exists());
    assert!(!root.join(SRC).join("2024/03/b.docx").exists());
    assert!(root.join(SRC).exists(), "bucket directory itself must survive");
}

#[tokio::test]
async fn local_store_missing_source_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join(DST)).unwrap();

    let err = migrate(Arc::new(LocalStore::new(dir.path())), SRC, DST, &config())
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::SourceNotFound { .. }));
}

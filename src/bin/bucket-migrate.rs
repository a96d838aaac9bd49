//! CLI binary for bucket-migrate.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `MigrationConfig`, picks a storage backend, and prints one line per
//! object plus a summary.

use anyhow::{Context, Result};
use bucket_migrate::config::{
    default_destination_container, default_source_container, parse_duration,
};
use bucket_migrate::storage::gcs::DEFAULT_ENDPOINT;
use bucket_migrate::{
    CancellationToken, FailureReason, GcsConfig, GcsStore, LocalStore, MigrationConfig,
    MigrationProgressCallback, Migrator, ObjectStore, ProgressCallback, RunReport,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback ────────────────────────────────────────────────────

/// Prints one line per object. With a spinner attached, lines are printed
/// above it so they don't tear the bar; otherwise they go straight to
/// stderr. Objects complete out of order when concurrency > 1.
struct CliProgressCallback {
    bar: Option<ProgressBar>,
    start_times: Mutex<HashMap<String, Instant>>,
}

impl CliProgressCallback {
    fn new(show_spinner: bool) -> Arc<Self> {
        let bar = show_spinner.then(|| {
            let bar = ProgressBar::new_spinner();
            let style = ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  {pos} done  ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
            bar.set_style(style);
            bar.set_prefix("Preparing");
            bar.set_message("checking buckets…");
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn line(&self, text: String) {
        match self.bar {
            Some(ref bar) => bar.println(text),
            None => eprintln!("{text}"),
        }
    }

    fn elapsed_secs(&self, key: &str) -> f64 {
        self.start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl MigrationProgressCallback for CliProgressCallback {
    fn on_run_start(&self, source: &str, destination: &str) {
        if let Some(ref bar) = self.bar {
            bar.set_prefix("Migrating");
            bar.set_message("");
        }
        self.line(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{source} → {destination}"))
        ));
    }

    fn on_transfer_start(&self, key: &str) {
        self.start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), Instant::now());
        if let Some(ref bar) = self.bar {
            bar.set_message(key.to_string());
        }
    }

    fn on_transfer_retry(&self, key: &str, attempt: u32, error: &str) {
        self.line(format!(
            "  {} {}  {}",
            cyan("↻"),
            key,
            dim(&format!("retry {attempt}: {}", truncate(error, 80)))
        ));
    }

    fn on_transfer_complete(&self, key: &str, attempts: u32) {
        let secs = self.elapsed_secs(key);
        self.line(format!(
            "  {} {}  {}",
            green("✓"),
            key,
            dim(&format!("{attempts} calls  {secs:.1}s")),
        ));
        if let Some(ref bar) = self.bar {
            bar.inc(1);
        }
    }

    fn on_transfer_error(&self, key: &str, reason: FailureReason, detail: &str) {
        let secs = self.elapsed_secs(key);
        self.line(format!(
            "  {} {}  {}  {}",
            red("✗"),
            key,
            red(&format!("{reason}: {}", truncate(detail, 80))),
            dim(&format!("{secs:.1}s")),
        ));
        if let Some(ref bar) = self.bar {
            bar.inc(1);
        }
    }

    fn on_run_complete(&self, report: &RunReport) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }

        let mark = if report.is_complete_success() {
            green("✔")
        } else if report.succeeded == 0 && report.total > 0 {
            red("✘")
        } else {
            cyan("⚠")
        };
        eprintln!(
            "{} {}/{} objects migrated  ({} failed)  {}ms",
            mark,
            bold(&report.succeeded.to_string()),
            report.total,
            if report.failed == 0 {
                "0".to_string()
            } else {
                red(&report.failed.to_string())
            },
            report.duration_ms,
        );
        if report.cancelled {
            eprintln!(
                "  {} run cancelled; {} in-flight objects abandoned",
                cyan("⚠"),
                report.abandoned
            );
        }
        if let Some(ref e) = report.listing_error {
            eprintln!("  {} listing broke off: {}", red("✗"), e);
        }
    }
}

/// Truncate very long error messages to keep output tidy.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max - 1).collect();
        format!("{head}\u{2026}")
    } else {
        s.to_string()
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Move everything from the upload bucket to the processed bucket
  bucket-migrate migrate --source acme-upload --destination acme-processed --delete-on-success

  # Defaults from the project: <project>-upload -> <project>-processed
  GOOGLE_CLOUD_PROJECT=acme bucket-migrate migrate

  # Four workers sharing a budget of 10 copies per second
  bucket-migrate migrate --source a --destination b --concurrency 4 --delay 100ms

  # Stop cleanly after ten minutes, JSON report on stdout
  bucket-migrate migrate --source a --destination b --deadline 10m --json > report.json

  # Local directories as buckets
  bucket-migrate --store local --root /srv/buckets migrate --source inbox --destination done

  # See what would be moved
  bucket-migrate list acme-upload

EXIT CODES:
  0  every listed object was migrated
  1  at least one object failed, or the run was cancelled / incomplete
  2  fatal: bad arguments, source missing or unreadable, destination unwritable

ENVIRONMENT VARIABLES:
  GOOGLE_CLOUD_PROJECT       Project id used for default bucket names
  GOOGLE_OAUTH_ACCESS_TOKEN  Bearer token (e.g. `gcloud auth print-access-token`)
  STORAGE_EMULATOR_HOST      Alternative Cloud Storage endpoint
  RUST_LOG                   Override log filter
"#;

/// Retryable, rate-limited bulk object migration between buckets.
#[derive(Parser, Debug)]
#[command(
    name = "bucket-migrate",
    version,
    about = "Move every object from one bucket to another, with retries and pacing",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "MIGRATE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the JSON report.
    #[arg(short, long, global = true, env = "MIGRATE_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct StoreArgs {
    /// Storage backend.
    #[arg(long = "store", value_enum, global = true, env = "MIGRATE_STORE", default_value = "gcs")]
    kind: StoreKind,

    /// Root directory whose subdirectories are buckets (local store).
    #[arg(long, global = true, env = "MIGRATE_LOCAL_ROOT")]
    root: Option<PathBuf>,

    /// Cloud Storage endpoint.
    #[arg(long, global = true, env = "STORAGE_EMULATOR_HOST")]
    endpoint: Option<String>,

    /// OAuth2 bearer token for Cloud Storage.
    #[arg(long, global = true, env = "GOOGLE_OAUTH_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, global = true, env = "MIGRATE_REQUEST_TIMEOUT", default_value_t = 60)]
    request_timeout: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StoreKind {
    Gcs,
    Local,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Transfer every object from the source bucket to the destination.
    Migrate(MigrateArgs),
    /// List the objects in a bucket without transferring anything.
    List {
        /// Bucket to list (name or gs://name).
        container: String,
    },
}

#[derive(Args, Debug)]
struct MigrateArgs {
    /// Source bucket. Default: <GOOGLE_CLOUD_PROJECT>-upload.
    #[arg(long, env = "MIGRATE_SOURCE")]
    source: Option<String>,

    /// Destination bucket. Default: <GOOGLE_CLOUD_PROJECT>-processed.
    #[arg(long, env = "MIGRATE_DESTINATION")]
    destination: Option<String>,

    /// Delay between transfers (rate limit when concurrency > 1): 500ms, 1s, 2m.
    #[arg(long, env = "MIGRATE_DELAY", default_value = "1s", value_parser = parse_duration_arg)]
    delay: Duration,

    /// Maximum transfers in flight.
    #[arg(short, long, env = "MIGRATE_CONCURRENCY", default_value_t = 1,
          value_parser = clap::value_parser!(u32).range(1..))]
    concurrency: u32,

    /// Retries per object on transient failure.
    #[arg(long, env = "MIGRATE_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Delete each source object after its copy is confirmed.
    #[arg(long, env = "MIGRATE_DELETE_ON_SUCCESS")]
    delete_on_success: bool,

    /// Cap on a single retry backoff.
    #[arg(
        long,
        env = "MIGRATE_MAX_BACKOFF",
        default_value = "60s",
        value_parser = parse_duration_arg
    )]
    max_backoff: Duration,

    /// Cancel the run cleanly after this long.
    #[arg(long, env = "MIGRATE_DEADLINE", value_parser = parse_duration_arg)]
    deadline: Option<Duration>,

    /// Print the RunReport as JSON on stdout.
    #[arg(long, env = "MIGRATE_JSON")]
    json: bool,

    /// Disable the spinner; per-object lines are still printed.
    #[arg(long, env = "MIGRATE_NO_PROGRESS")]
    no_progress: bool,
}

fn parse_duration_arg(s: &str) -> std::result::Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs while the spinner is active; the
    // per-object lines carry everything that matters to the user.
    let show_progress = match cli.command {
        Command::Migrate(ref args) => !cli.quiet && !args.no_progress && !args.json,
        Command::List { .. } => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match run(cli, show_progress).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", red("✘"), e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli, show_progress: bool) -> Result<ExitCode> {
    let store = build_store(&cli.store)?;

    match cli.command {
        Command::List { container } => {
            list_container(store, &container).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Migrate(args) => migrate_command(store, args, cli.quiet, show_progress).await,
    }
}

/// Instantiate the selected backend.
fn build_store(args: &StoreArgs) -> Result<Arc<dyn ObjectStore>> {
    match args.kind {
        StoreKind::Gcs => {
            let config = GcsConfig {
                endpoint: args
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
                access_token: args.access_token.clone(),
                request_timeout: Duration::from_secs(args.request_timeout),
                ..GcsConfig::default()
            };
            let store = GcsStore::new(config).context("Failed to configure Cloud Storage client")?;
            Ok(Arc::new(store))
        }
        StoreKind::Local => {
            let root = args
                .root
                .clone()
                .context("--root is required with --store local")?;
            Ok(Arc::new(LocalStore::new(root)))
        }
    }
}

async fn list_container(store: Arc<dyn ObjectStore>, container: &str) -> Result<()> {
    let container = bucket_migrate::storage::normalize_container(container)?;
    let mut listing = store.list(&container);

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let mut count = 0usize;
    while let Some(item) = listing.next().await {
        let locator = item.with_context(|| format!("Failed to list bucket '{container}'"))?;
        writeln!(handle, "{}", locator.key()).context("Failed to write to stdout")?;
        count += 1;
    }
    drop(handle);
    tracing::info!("{} objects in {}", count, container);
    Ok(())
}

async fn migrate_command(
    store: Arc<dyn ObjectStore>,
    args: MigrateArgs,
    quiet: bool,
    show_progress: bool,
) -> Result<ExitCode> {
    let source = args
        .source
        .clone()
        .or_else(default_source_container)
        .context("No source bucket: pass --source or set GOOGLE_CLOUD_PROJECT")?;
    let destination = args
        .destination
        .clone()
        .or_else(default_destination_container)
        .context("No destination bucket: pass --destination or set GOOGLE_CLOUD_PROJECT")?;

    let progress: Option<ProgressCallback> = if quiet {
        None
    } else {
        Some(CliProgressCallback::new(show_progress) as Arc<dyn MigrationProgressCallback>)
    };
    let config = build_config(&args, progress)?;

    // ── Cooperative cancellation on Ctrl-C ───────────────────────────────
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{} interrupted; finishing in-flight transfers…", cyan("⚠"));
                cancel.cancel();
            }
        });
    }

    let report = Migrator::new(store, config)
        .run_until_cancelled(&source, &destination, cancel)
        .await
        .context("Migration could not start")?;

    if args.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    }

    Ok(ExitCode::from(report.exit_code()))
}

/// Map CLI args to `MigrationConfig`.
fn build_config(args: &MigrateArgs, progress: Option<ProgressCallback>) -> Result<MigrationConfig> {
    let mut builder = MigrationConfig::builder()
        .delay_between_transfers(args.delay)
        .max_concurrency(args.concurrency as usize)
        .max_retries(args.max_retries)
        .delete_source_on_success(args.delete_on_success)
        .max_backoff(args.max_backoff.max(args.delay));

    if let Some(deadline) = args.deadline {
        builder = builder.deadline(deadline);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

//! Configuration types for a migration run.
//!
//! All run behaviour is controlled through [`MigrationConfig`], built via its
//! [`MigrationConfigBuilder`]. The config is handed to the migrator at
//! construction time; nothing here reads process-wide mutable state except
//! the explicit environment helpers at the bottom of this module.

use crate::error::MigrateError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::time::Duration;

/// Environment variables consulted for the project identifier, in order.
pub const PROJECT_ENV_VARS: [&str; 2] = ["GOOGLE_CLOUD_PROJECT", "GCLOUD_PROJECT"];

/// Suffix of the default source bucket (`<project>-upload`).
pub const SOURCE_BUCKET_SUFFIX: &str = "-upload";

/// Suffix of the default destination bucket (`<project>-processed`).
pub const DESTINATION_BUCKET_SUFFIX: &str = "-processed";

/// Configuration for a migration run.
///
/// Built via [`MigrationConfig::builder()`] or using
/// [`MigrationConfig::default()`].
///
/// # Example
/// ```rust
/// use bucket_migrate::MigrationConfig;
/// use std::time::Duration;
///
/// let config = MigrationConfig::builder()
///     .delay_between_transfers(Duration::from_millis(200))
///     .max_concurrency(4)
///     .max_retries(5)
///     .delete_source_on_success(true)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct MigrationConfig {
    /// Politeness delay. Default: 1 s.
    ///
    /// With `max_concurrency == 1` this is slept between successive
    /// transfers. With more workers it becomes a shared rate limit of one
    /// transfer start per `delay_between_transfers`. It is also the first
    /// step of the exponential retry backoff.
    pub delay_between_transfers: Duration,

    /// Maximum transfers in flight at once. Default: 1 (strictly sequential).
    pub max_concurrency: usize,

    /// Retries per object after a transient failure. Default: 3.
    ///
    /// An object whose every attempt is transient is tried
    /// `max_retries + 1` times and then marked `transient-exhausted`.
    /// Permanent errors are never retried.
    pub max_retries: u32,

    /// Delete each source object once its copy is confirmed. Default: false.
    pub delete_source_on_success: bool,

    /// Upper bound for a single backoff sleep. Default: 60 s.
    pub max_backoff: Duration,

    /// Cancel the run cooperatively once this much time has elapsed.
    /// Default: None (no deadline).
    pub deadline: Option<Duration>,

    /// Per-object event hooks. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            delay_between_transfers: Duration::from_secs(1),
            max_concurrency: 1,
            max_retries: 3,
            delete_source_on_success: false,
            max_backoff: Duration::from_secs(60),
            deadline: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for MigrationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationConfig")
            .field("delay_between_transfers", &self.delay_between_transfers)
            .field("max_concurrency", &self.max_concurrency)
            .field("max_retries", &self.max_retries)
            .field("delete_source_on_success", &self.delete_source_on_success)
            .field("max_backoff", &self.max_backoff)
            .field("deadline", &self.deadline)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn MigrationProgressCallback>"),
            )
            .finish()
    }
}

impl MigrationConfig {
    /// Create a new builder for `MigrationConfig`.
    pub fn builder() -> MigrationConfigBuilder {
        MigrationConfigBuilder {
            config: Self::default(),
        }
    }

    /// Backoff before the given retry (1-based).
    ///
    /// Doubles from `delay_between_transfers`: d → 2d → 4d …, capped at
    /// `max_backoff`. A zero delay means retries are immediate.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.delay_between_transfers
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Builder for [`MigrationConfig`].
#[derive(Debug)]
pub struct MigrationConfigBuilder {
    config: MigrationConfig,
}

impl MigrationConfigBuilder {
    pub fn delay_between_transfers(mut self, delay: Duration) -> Self {
        self.config.delay_between_transfers = delay;
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.config.max_concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn delete_source_on_success(mut self, v: bool) -> Self {
        self.config.delete_source_on_success = v;
        self
    }

    pub fn max_backoff(mut self, cap: Duration) -> Self {
        self.config.max_backoff = cap;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.config.deadline = Some(deadline);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<MigrationConfig, MigrateError> {
        let c = &self.config;
        if c.max_concurrency == 0 {
            return Err(MigrateError::InvalidConfig(
                "max_concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_backoff < c.delay_between_transfers {
            return Err(MigrateError::InvalidConfig(format!(
                "max_backoff ({:?}) must not be shorter than delay_between_transfers ({:?})",
                c.max_backoff, c.delay_between_transfers
            )));
        }
        if c.deadline == Some(Duration::ZERO) {
            return Err(MigrateError::InvalidConfig(
                "deadline must be greater than zero".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Parsing helpers ──────────────────────────────────────────────────────

/// Parse a human duration: `250ms`, `2s`, `1m`, or bare seconds (`1.5`).
pub fn parse_duration(input: &str) -> Result<Duration, MigrateError> {
    let s = input.trim().to_lowercase();
    let invalid = || MigrateError::InvalidConfig(format!("invalid duration '{input}'"));

    let (number, scale) = if let Some(n) = s.strip_suffix("ms") {
        (n, 0.001)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1.0)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60.0)
    } else {
        (s.as_str(), 1.0)
    };

    let value: f64 = number.trim().parse().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }
    Duration::try_from_secs_f64(value * scale).map_err(|_| invalid())
}

// ── Environment defaults ─────────────────────────────────────────────────

/// The project identifier from the environment, if any.
pub fn project_from_env() -> Option<String> {
    PROJECT_ENV_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

/// Derive a bucket name from a project id and a suffix.
pub fn container_for_project(project: &str, suffix: &str) -> String {
    format!("{project}{suffix}")
}

/// `<project>-upload`, when a project id is set in the environment.
pub fn default_source_container() -> Option<String> {
    project_from_env().map(|p| container_for_project(&p, SOURCE_BUCKET_SUFFIX))
}

/// `<project>-processed`, when a project id is set in the environment.
pub fn default_destination_container() -> Option<String> {
    project_from_env().map(|p| container_for_project(&p, DESTINATION_BUCKET_SUFFIX))
}

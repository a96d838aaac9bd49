//! Object-storage collaborators.
//!
//! The migrator only ever talks to storage through [`ObjectStore`]: a lazy
//! listing, a server-side copy that returns once the destination is durable,
//! a delete, and a cheap access probe used for run preconditions.
//!
//! ```text
//! ObjectStore
//!  ├─ gcs::GcsStore       Cloud Storage JSON API (rewriteTo, paginated list)
//!  ├─ local::LocalStore   directories under a root act as buckets
//!  └─ memory::MemoryStore in-process map, for dry runs and tests
//! ```

pub mod gcs;
pub mod local;
pub mod memory;

use crate::error::{MigrateError, StorageError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use tokio_stream::Stream;

pub use gcs::{GcsConfig, GcsStore};
pub use local::LocalStore;
pub use memory::MemoryStore;

/// A boxed, lazily-evaluated listing. Consumed once; not restartable.
pub type ObjectStream = Pin<Box<dyn Stream<Item = Result<ObjectLocator, StorageError>> + Send>>;

/// Identifies one stored object: container (bucket) plus key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectLocator {
    container: String,
    key: String,
}

impl ObjectLocator {
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The same key in another container.
    pub fn in_container(&self, container: &str) -> Self {
        Self::new(container, self.key.clone())
    }
}

impl fmt::Display for ObjectLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.key)
    }
}

/// Access level checked by [`ObjectStore::probe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// List and read objects.
    Read,
    /// Create objects.
    Write,
}

/// A storage backend the migrator can list, copy and delete against.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for log lines.
    fn name(&self) -> &'static str;

    /// Verify `container` exists and grants `access`.
    async fn probe(&self, container: &str, access: Access) -> Result<(), StorageError>;

    /// Lazily enumerate every object in `container`.
    ///
    /// Pagination is handled inside the stream. Errors are yielded as items;
    /// callers should stop consuming after the first one.
    fn list(&self, container: &str) -> ObjectStream;

    /// Copy `source` into `destination` under the same key.
    ///
    /// Must only return `Ok` once the new object is durable.
    async fn copy(
        &self,
        source: &ObjectLocator,
        destination: &str,
    ) -> Result<ObjectLocator, StorageError>;

    /// Remove one object.
    async fn delete(&self, locator: &ObjectLocator) -> Result<(), StorageError>;
}

/// Normalise a user-supplied bucket name.
///
/// Accepts `name`, `gs://name` and `gs://name/`.
pub fn normalize_container(input: &str) -> Result<String, MigrateError> {
    let trimmed = input.trim();
    let name = trimmed
        .strip_prefix("gs://")
        .unwrap_or(trimmed)
        .trim_end_matches('/');

    let invalid = |reason: &str| MigrateError::InvalidContainer {
        name: input.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.contains('/') {
        return Err(invalid("bucket names cannot contain '/'"));
    }
    if name == "." || name == ".." {
        return Err(invalid("reserved name"));
    }
    Ok(name.to_string())
}

//! In-process object store.
//!
//! Cheap to clone (shared state behind an `Arc`). Useful for dry runs,
//! for wrapping with fault injection in tests, and as the reference
//! behaviour the real backends are expected to match.

use super::{Access, ObjectLocator, ObjectStore, ObjectStream};
use crate::error::StorageError;
use async_trait::async_trait;
use futures::stream;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    containers: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    read_only: BTreeSet<String>,
}

/// An object store held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create an empty container (no-op if it exists).
    pub fn create_container(&self, name: &str) {
        self.lock().containers.entry(name.to_string()).or_default();
    }

    /// Reject writes into `name` with `PermissionDenied`.
    pub fn set_read_only(&self, name: &str, read_only: bool) {
        let mut state = self.lock();
        if read_only {
            state.read_only.insert(name.to_string());
        } else {
            state.read_only.remove(name);
        }
    }

    /// Store an object, creating the container if needed.
    pub fn put(&self, container: &str, key: &str, data: impl Into<Vec<u8>>) {
        self.lock()
            .containers
            .entry(container.to_string())
            .or_default()
            .insert(key.to_string(), data.into());
    }

    pub fn get(&self, container: &str, key: &str) -> Option<Vec<u8>> {
        self.lock()
            .containers
            .get(container)
            .and_then(|objects| objects.get(key).cloned())
    }

    pub fn contains(&self, container: &str, key: &str) -> bool {
        self.get(container, key).is_some()
    }

    /// Keys in `container`, sorted. Empty if the container is missing.
    pub fn keys(&self, container: &str) -> Vec<String> {
        self.lock()
            .containers
            .get(container)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn probe(&self, container: &str, access: Access) -> Result<(), StorageError> {
        let state = self.lock();
        if !state.containers.contains_key(container) {
            return Err(StorageError::NotFound(format!("bucket {container}")));
        }
        if access == Access::Write && state.read_only.contains(container) {
            return Err(StorageError::PermissionDenied(format!(
                "bucket {container} is read-only"
            )));
        }
        Ok(())
    }

    fn list(&self, container: &str) -> ObjectStream {
        let snapshot: Result<Vec<ObjectLocator>, StorageError> = self
            .lock()
            .containers
            .get(container)
            .map(|objects| {
                objects
                    .keys()
                    .map(|k| ObjectLocator::new(container, k.clone()))
                    .collect()
            })
            .ok_or_else(|| StorageError::NotFound(format!("bucket {container}")));

        match snapshot {
            Ok(locators) => Box::pin(stream::iter(locators.into_iter().map(Ok))),
            Err(e) => Box::pin(stream::iter(std::iter::once(Err(e)))),
        }
    }

    async fn copy(
        &self,
        source: &ObjectLocator,
        destination: &str,
    ) -> Result<ObjectLocator, StorageError> {
        let mut state = self.lock();
        let data = state
            .containers
            .get(source.container())
            .and_then(|objects| objects.get(source.key()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(source.to_string()))?;

        if state.read_only.contains(destination) {
            return Err(StorageError::PermissionDenied(format!(
                "bucket {destination} is read-only"
            )));
        }
        let target = state
            .containers
            .get_mut(destination)
            .ok_or_else(|| StorageError::NotFound(format!("bucket {destination}")))?;
        target.insert(source.key().to_string(), data);

        Ok(source.in_container(destination))
    }

    async fn delete(&self, locator: &ObjectLocator) -> Result<(), StorageError> {
        self.lock()
            .containers
            .get_mut(locator.container())
            .and_then(|objects| objects.remove(locator.key()))
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(locator.to_string()))
    }
}

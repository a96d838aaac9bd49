//! Local-filesystem object store.
//!
//! Each directory directly under `root` is a container; keys are the
//! `/`-separated paths of regular files below it. Copies go through a
//! temp file that is fsynced and then renamed, so a copy that returned
//! `Ok` survives a crash and a half-written file is never visible under
//! its final name.

use super::{Access, ObjectLocator, ObjectStore, ObjectStream};
use crate::error::StorageError;
use async_trait::async_trait;
use futures::stream;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

const TEMP_SUFFIX: &str = ".migrate-tmp";

/// Directories under a root act as buckets.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_dir(&self, container: &str) -> Result<PathBuf, StorageError> {
        if container.is_empty() || !is_plain_component(container) {
            return Err(StorageError::PermissionDenied(format!(
                "bucket name '{container}' escapes the store root"
            )));
        }
        Ok(self.root.join(container))
    }

    fn object_path(&self, container: &str, key: &str) -> Result<PathBuf, StorageError> {
        let mut path = self.container_dir(container)?;
        for part in key.split('/') {
            if part.is_empty() || !is_plain_component(part) {
                return Err(StorageError::PermissionDenied(format!(
                    "key '{key}' escapes bucket '{container}'"
                )));
            }
            path.push(part);
        }
        Ok(path)
    }
}

/// True if `s` is a single normal path component (no `..`, no separators).
fn is_plain_component(s: &str) -> bool {
    let mut components = Path::new(s).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !s.contains(['/', '\\'])
}

fn temp_path(dst: &Path) -> PathBuf {
    let mut name = dst
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(TEMP_SUFFIX);
    dst.with_file_name(name)
}

/// Lazy depth-first directory walk state.
struct Walk {
    container: String,
    base: PathBuf,
    stack: Vec<PathBuf>,
    current: Option<tokio::fs::ReadDir>,
    done: bool,
}

impl Walk {
    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.base).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

async fn next_object(mut walk: Walk) -> Option<(Result<ObjectLocator, StorageError>, Walk)> {
    loop {
        if walk.done {
            return None;
        }
        if walk.current.is_none() {
            let dir = walk.stack.pop()?;
            match tokio::fs::read_dir(&dir).await {
                Ok(rd) => walk.current = Some(rd),
                Err(e) => {
                    walk.done = true;
                    return Some((Err(e.into()), walk));
                }
            }
        }

        let next = match walk.current.as_mut() {
            Some(rd) => rd.next_entry().await,
            None => continue,
        };

        let entry = match next {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                walk.current = None;
                continue;
            }
            Err(e) => {
                walk.done = true;
                return Some((Err(e.into()), walk));
            }
        };

        let path = entry.path();
        let file_type = match entry.file_type().await {
            Ok(ft) => ft,
            Err(e) => {
                walk.done = true;
                return Some((Err(e.into()), walk));
            }
        };

        if file_type.is_dir() {
            walk.stack.push(path);
            continue;
        }
        if !file_type.is_file() || path.to_string_lossy().ends_with(TEMP_SUFFIX) {
            continue;
        }
        if let Some(key) = walk.key_for(&path) {
            let locator = ObjectLocator::new(walk.container.clone(), key);
            return Some((Ok(locator), walk));
        }
    }
}

async fn write_durable(src: &Path, tmp: &Path, dst: &Path) -> Result<(), StorageError> {
    tokio::fs::copy(src, tmp).await?;
    let file = tokio::fs::OpenOptions::new().write(true).open(tmp).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(tmp, dst).await?;
    Ok(())
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn probe(&self, container: &str, access: Access) -> Result<(), StorageError> {
        let dir = self.container_dir(container)?;
        let meta = tokio::fs::metadata(&dir).await?;
        if !meta.is_dir() {
            return Err(StorageError::NotFound(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        match access {
            Access::Read => {
                // Opening the listing proves read access.
                drop(tokio::fs::read_dir(&dir).await?);
            }
            Access::Write => {
                if meta.permissions().readonly() {
                    return Err(StorageError::PermissionDenied(format!(
                        "{} is read-only",
                        dir.display()
                    )));
                }
            }
        }
        Ok(())
    }

    fn list(&self, container: &str) -> ObjectStream {
        let base = match self.container_dir(container) {
            Ok(dir) => dir,
            Err(e) => return Box::pin(stream::iter(std::iter::once(Err(e)))),
        };
        let walk = Walk {
            container: container.to_string(),
            base: base.clone(),
            stack: vec![base],
            current: None,
            done: false,
        };
        Box::pin(stream::unfold(walk, next_object))
    }

    async fn copy(
        &self,
        source: &ObjectLocator,
        destination: &str,
    ) -> Result<ObjectLocator, StorageError> {
        let src = self.object_path(source.container(), source.key())?;
        let dst_dir = self.container_dir(destination)?;
        if !tokio::fs::metadata(&dst_dir).await?.is_dir() {
            return Err(StorageError::NotFound(format!("bucket {destination}")));
        }
        let dst = self.object_path(destination, source.key())?;
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = temp_path(&dst);
        if let Err(e) = write_durable(&src, &tmp, &dst).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        debug!("Copied {} -> {}", src.display(), dst.display());
        Ok(source.in_container(destination))
    }

    async fn delete(&self, locator: &ObjectLocator) -> Result<(), StorageError> {
        let container_dir = self.container_dir(locator.container())?;
        let path = self.object_path(locator.container(), locator.key())?;
        tokio::fs::remove_file(&path).await?;

        // Prune directories emptied by the delete; stops at the first
        // non-empty one.
        let mut dir = path.parent().map(Path::to_path_buf);
        while let Some(d) = dir {
            if d == container_dir || tokio::fs::remove_dir(&d).await.is_err() {
                break;
            }
            dir = d.parent().map(Path::to_path_buf);
        }
        Ok(())
    }
}

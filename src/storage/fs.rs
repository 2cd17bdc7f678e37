//! Filesystem-backed [`ObjectStore`].
//!
//! Objects live at `{root}/{namespace}/{key}`. Writes go to a `.tmp` sibling
//! first and are renamed into place, so a published object is always a
//! complete payload.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use super::ObjectStore;

pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create object store root {}", root.display()))?;
        Ok(Self { root })
    }

    fn object_path(&self, namespace: &str, key: &str) -> Result<PathBuf> {
        validate_component(namespace)?;
        validate_component(key)?;
        Ok(self.root.join(namespace).join(key))
    }
}

/// Namespaces and keys are single path components; anything that could
/// escape the store root is refused.
fn validate_component(component: &str) -> Result<()> {
    if component.is_empty()
        || component == "."
        || component == ".."
        || component.contains('/')
        || component.contains('\\')
    {
        bail!("invalid object store component: {component:?}");
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, namespace: &str, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.object_path(namespace, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to publish {}", path.display()))?;
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(namespace, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    async fn list(&self, namespace: &str) -> Result<Vec<String>> {
        validate_component(namespace)?;
        let dir = self.root.join(namespace);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("failed to list {}", dir.display())),
        };
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            // In-flight temp files are not published objects.
            if name.ends_with(".tmp") {
                continue;
            }
            if entry.file_type().await?.is_file() {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

//! JSON-file-tree storage backend.
//!
//! Layout under the configured root: one directory per resource type,
//! single-valued resources as `<name>/resource.json`, collection entries as
//! `<collection>/<sanitized_key>.json`. Every `set` writes through to disk;
//! reads are served from an in-memory cache unless it is disabled, and the
//! cache is invalidated on writes and deletes.

use super::{sanitize_key, with_retries, Storage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const RESOURCE_FILE: &str = "resource.json";

pub struct FilesystemStorage {
    root: PathBuf,
    cache: Option<DashMap<PathBuf, Value>>,
}

impl FilesystemStorage {
    /// Creates a backend rooted at `root`. `use_cache = false` forces every
    /// read to hit the disk.
    pub fn new(root: impl Into<PathBuf>, use_cache: bool) -> Self {
        Self {
            root: root.into(),
            cache: use_cache.then(DashMap::new),
        }
    }

    fn resource_path(&self, name: &str) -> PathBuf {
        self.root.join(sanitize_key(name)).join(RESOURCE_FILE)
    }

    fn entry_path(&self, collection: &str, key: &str) -> PathBuf {
        self.root
            .join(sanitize_key(collection))
            .join(format!("{}.json", sanitize_key(key)))
    }

    async fn read_file(&self, path: &Path) -> Result<Option<Value>> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(path) {
                return Ok(Some(hit.clone()));
            }
        }

        let bytes = match with_retries("read", || async {
            match tokio::fs::read(path).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(err) => Err(err).context(format!("reading {}", path.display())),
            }
        })
        .await?
        {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        let value: Value =
            serde_json::from_slice(&bytes).context(format!("parsing {}", path.display()))?;
        if let Some(cache) = &self.cache {
            cache.insert(path.to_path_buf(), value.clone());
        }
        Ok(Some(value))
    }

    async fn write_file(&self, path: &Path, value: &Value) -> Result<()> {
        let parent = path.parent().expect("storage paths always have a parent");
        let bytes = serde_json::to_vec_pretty(value)?;

        with_retries("write", || async {
            tokio::fs::create_dir_all(parent)
                .await
                .context(format!("creating {}", parent.display()))?;
            tokio::fs::write(path, &bytes)
                .await
                .context(format!("writing {}", path.display()))
        })
        .await?;

        if let Some(cache) = &self.cache {
            cache.insert(path.to_path_buf(), value.clone());
        }
        debug!("💾 Wrote {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl Storage for FilesystemStorage {
    async fn open(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .context(format!("creating storage root {}", self.root.display()))?;
        info!(
            "📦 Filesystem storage ready at {} (cache {})",
            self.root.display(),
            if self.cache.is_some() { "on" } else { "off" }
        );
        Ok(())
    }

    async fn get_resource(&self, name: &str) -> Result<Option<Value>> {
        self.read_file(&self.resource_path(name)).await
    }

    async fn set_resource(&self, name: &str, value: &Value) -> Result<()> {
        self.write_file(&self.resource_path(name), value).await
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        self.read_file(&self.entry_path(collection, key)).await
    }

    async fn set(&self, collection: &str, key: &str, value: &Value) -> Result<()> {
        self.write_file(&self.entry_path(collection, key), value).await
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        let path = self.entry_path(collection, key);
        if let Some(cache) = &self.cache {
            cache.remove(&path);
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).context(format!("deleting {}", path.display())),
        }
    }

    async fn exists(&self, collection: &str, key: Option<&str>) -> Result<bool> {
        let path = match key {
            Some(key) => self.entry_path(collection, key),
            None => self.root.join(sanitize_key(collection)),
        };
        Ok(tokio::fs::try_exists(&path).await?)
    }
}

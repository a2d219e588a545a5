//! Storage contract consumed by every service.
//!
//! Storage is a mapping-shaped abstraction over named resources: single-valued
//! resources addressed by name, and keyed collections addressed by
//! `(collection, key)`. The relay core never knows what backs the contract;
//! the shipped backend is a JSON file tree ([`filesystem`]), and a remote
//! key/value service can satisfy the same trait.

pub mod filesystem;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

pub use filesystem::FilesystemStorage;

/// Attempts per storage operation before the error surfaces as internal.
const STORAGE_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// The operation set every backend provides. Thread-safe; all operations
/// write through.
#[async_trait]
pub trait Storage: Send + Sync {
    /// One-time backend setup (directory creation, remote login, ...).
    async fn open(&self) -> Result<()>;

    /// Reads a single-valued resource.
    async fn get_resource(&self, name: &str) -> Result<Option<Value>>;

    /// Writes a single-valued resource.
    async fn set_resource(&self, name: &str, value: &Value) -> Result<()>;

    /// Reads one entry of a keyed collection.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>>;

    /// Writes one entry of a keyed collection.
    async fn set(&self, collection: &str, key: &str, value: &Value) -> Result<()>;

    /// Deletes one entry; returns whether it existed.
    async fn delete(&self, collection: &str, key: &str) -> Result<bool>;

    /// Checks for a collection (no key) or one of its entries.
    async fn exists(&self, collection: &str, key: Option<&str>) -> Result<bool>;
}

/// Runs a storage operation with bounded retries and backoff.
///
/// Transient backend errors are absorbed here; the last error surfaces to the
/// caller after [`STORAGE_RETRIES`] attempts.
pub(crate) async fn with_retries<T, F, Fut>(what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 1..=STORAGE_RETRIES {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt < STORAGE_RETRIES {
                    warn!("Storage operation {what} failed (attempt {attempt}): {err:#}");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                last_err = Some(err);
            }
        }
    }
    Err(last_err.expect("at least one attempt ran"))
}

/// Makes an arbitrary key safe for use as a file name.
///
/// Alphanumerics, `-`, `_` and `.` pass through; everything else becomes `_`.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

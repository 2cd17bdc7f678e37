//! Durable object storage behind the job and chunk stores.
//!
//! The rest of the crate only sees a `(namespace, key) -> bytes` mapping, so
//! the backing can be swapped (filesystem in production, memory in tests)
//! without touching the pipeline.

use anyhow::Result;
use async_trait::async_trait;

pub mod fs;
pub mod memory;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;

/// Keyed byte storage. `put` must replace the previous payload for a key in
/// one step; readers see either the old payload or the new one, never a mix.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, namespace: &str, key: &str, bytes: Vec<u8>) -> Result<()>;

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Keys present under a namespace, sorted.
    async fn list(&self, namespace: &str) -> Result<Vec<String>>;
}

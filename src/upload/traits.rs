//! Remote collaborators
//!
//! The object store and the records store are provided by the host
//! application. Their failures are opaque here and wrapped into
//! [`UploadError`](super::UploadError) by the pipeline.

use anyhow::Result;
use async_trait::async_trait;

/// Blob storage that serves uploaded objects over public URLs
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` at `path`, replacing any existing object, and return its public URL
    async fn upload(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<String>;
}

/// Durable row storage
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert one row into `collection`
    async fn insert(&self, collection: &str, row: serde_json::Value) -> Result<()>;
}

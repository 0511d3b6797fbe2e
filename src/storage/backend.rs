//! Storage capability
//!
//! Two variants implement it: [`FileStorage`](super::FileStorage) (durable)
//! and [`MemoryStorage`](super::MemoryStorage) (volatile, process lifetime).

use super::types::{Chunk, StorageError, StorageKind};
use crate::recorder::SessionMetadata;
use async_trait::async_trait;

/// Key-value persistence for chunks and session metadata
#[async_trait]
pub trait Storage: Send + Sync {
    fn kind(&self) -> StorageKind;

    /// Check that the backing accepts writes
    async fn probe(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Write one chunk, replacing any chunk with the same key
    async fn put_chunk(&self, chunk: &Chunk) -> Result<(), StorageError>;

    /// All readable chunks of a session, in no particular order
    async fn chunks(&self, session_id: &str) -> Result<Vec<Chunk>, StorageError>;

    async fn put_metadata(&self, metadata: &SessionMetadata) -> Result<(), StorageError>;

    async fn metadata(&self, session_id: &str) -> Result<Option<SessionMetadata>, StorageError>;

    /// Remove every chunk and the metadata of a session
    async fn remove_session(&self, session_id: &str) -> Result<(), StorageError>;
}

//! Volatile in-process storage

use super::backend::Storage;
use super::types::{Chunk, StorageError, StorageKind};
use crate::recorder::SessionMetadata;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Storage that lives only as long as the process
#[derive(Default)]
pub struct MemoryStorage {
    chunks: RwLock<HashMap<String, BTreeMap<u64, Chunk>>>,
    metadata: RwLock<HashMap<String, SessionMetadata>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.chunks.read().contains_key(session_id) || self.metadata.read().contains_key(session_id)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Volatile
    }

    async fn put_chunk(&self, chunk: &Chunk) -> Result<(), StorageError> {
        self.chunks
            .write()
            .entry(chunk.session_id.clone())
            .or_default()
            .insert(chunk.index, chunk.clone());
        Ok(())
    }

    async fn chunks(&self, session_id: &str) -> Result<Vec<Chunk>, StorageError> {
        Ok(self
            .chunks
            .read()
            .get(session_id)
            .map(|chunks| chunks.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn put_metadata(&self, metadata: &SessionMetadata) -> Result<(), StorageError> {
        self.metadata
            .write()
            .insert(metadata.session_id.clone(), metadata.clone());
        Ok(())
    }

    async fn metadata(&self, session_id: &str) -> Result<Option<SessionMetadata>, StorageError> {
        Ok(self.metadata.read().get(session_id).cloned())
    }

    async fn remove_session(&self, session_id: &str) -> Result<(), StorageError> {
        self.chunks.write().remove(session_id);
        self.metadata.write().remove(session_id);
        Ok(())
    }
}

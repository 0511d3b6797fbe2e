//! Best-effort session metadata persistence
//!
//! Every caller treats failures here as warnings; the capture session keeps
//! the authoritative copy in memory.

use super::local::LocalStore;
use super::types::StorageError;
use crate::recorder::SessionMetadata;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct SessionMetadataStore {
    store: Arc<LocalStore>,
    /// Serializes the status check and the write of each session
    writers: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl SessionMetadataStore {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self {
            store,
            writers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn writer(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.writers
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Save metadata. A terminal status is never overwritten by another status.
    pub async fn save(&self, metadata: &SessionMetadata) -> Result<(), StorageError> {
        let writer = self.writer(&metadata.session_id);
        let _write = writer.lock().await;

        if let Some(existing) = self.store.metadata(&metadata.session_id).await? {
            if !existing.status.can_transition_to(metadata.status) {
                return Err(StorageError::StatusRegression {
                    session_id: metadata.session_id.clone(),
                    from: existing.status,
                    to: metadata.status,
                });
            }
        }
        self.store.put_metadata(metadata).await
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<SessionMetadata>, StorageError> {
        self.store.metadata(session_id).await
    }
}

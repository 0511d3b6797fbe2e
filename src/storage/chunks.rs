//! Append-only chunk store

use super::local::LocalStore;
use super::locks::{SessionGuard, SessionLocks};
use super::types::{validate_session_id, Chunk, StorageError, StorageKind};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Per-session chunk persistence keyed by `(sessionId, index)`
#[derive(Clone)]
pub struct ChunkStore {
    store: Arc<LocalStore>,
    leases: SessionLocks,
}

impl ChunkStore {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self {
            store,
            leases: SessionLocks::new(),
        }
    }

    /// Persist one chunk. Falls back to memory transparently.
    pub async fn append(
        &self,
        session_id: &str,
        index: u64,
        payload: Vec<u8>,
        captured_at: DateTime<Utc>,
    ) -> Result<StorageKind, StorageError> {
        validate_session_id(session_id)?;
        let chunk = Chunk {
            session_id: session_id.to_string(),
            index,
            payload,
            captured_at,
        };
        self.store.put_chunk(&chunk).await
    }

    /// Chunks ordered by index. Gaps are logged and skipped.
    pub async fn read_all(&self, session_id: &str) -> Result<Vec<Chunk>, StorageError> {
        let chunks = self.store.chunks(session_id).await?;

        let mut expected = 0;
        for &index in chunks.keys() {
            if index > expected {
                tracing::warn!(
                    "Session {} is missing chunks {}..{}",
                    session_id,
                    expected,
                    index
                );
            }
            expected = index + 1;
        }

        Ok(chunks.into_values().collect())
    }

    /// Remove all chunks and metadata of a session.
    ///
    /// Refused while an upload holds the session's lease.
    pub async fn clear(&self, session_id: &str) -> Result<(), StorageError> {
        validate_session_id(session_id)?;
        let _guard = self
            .leases
            .try_lock(session_id)
            .ok_or_else(|| StorageError::SessionBusy(session_id.to_string()))?;
        self.store.remove_session(session_id).await
    }

    /// Hold the session exclusively; only the lease may purge it meanwhile
    pub fn lease(&self, session_id: &str) -> Result<ChunkLease, StorageError> {
        validate_session_id(session_id)?;
        let guard = self
            .leases
            .try_lock(session_id)
            .ok_or_else(|| StorageError::SessionBusy(session_id.to_string()))?;
        Ok(ChunkLease {
            store: self.store.clone(),
            guard,
        })
    }

    pub fn is_using_memory_mode(&self) -> bool {
        self.store.is_using_memory_mode()
    }

    /// `true` exactly once after the store falls back to memory
    pub fn take_memory_mode_warning(&self) -> bool {
        self.store.take_memory_mode_warning()
    }

    pub fn local_store(&self) -> &Arc<LocalStore> {
        &self.store
    }
}

/// Exclusive hold on one session's local data
pub struct ChunkLease {
    store: Arc<LocalStore>,
    guard: SessionGuard,
}

impl ChunkLease {
    pub fn session_id(&self) -> &str {
        self.guard.session_id()
    }

    /// Purge the session and release the lease
    pub async fn clear(self) -> Result<(), StorageError> {
        self.store.remove_session(self.guard.session_id()).await?;
        tracing::info!("Purged local data for session {}", self.guard.session_id());
        Ok(())
    }
}

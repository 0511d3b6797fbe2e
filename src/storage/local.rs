//! Storage selection with volatile fallback
//!
//! The durable backing is chosen once by a startup probe. If it later
//! rejects a chunk write, the store switches to memory for the rest of the
//! process lifetime. Recording is never interrupted by the switch.

use super::backend::Storage;
use super::file::FileStorage;
use super::memory::MemoryStorage;
use super::types::{Chunk, StorageError, StorageKind};
use crate::recorder::SessionMetadata;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Durable storage with a permanent in-memory fallback
pub struct LocalStore {
    durable: Option<Arc<dyn Storage>>,
    memory: MemoryStorage,
    memory_mode: AtomicBool,
    warned: AtomicBool,
}

impl LocalStore {
    /// Probe a filesystem root and fall back to memory if it is unusable
    pub async fn open(root: impl Into<PathBuf>) -> Self {
        Self::with_durable(Arc::new(FileStorage::new(root))).await
    }

    /// Probe an arbitrary durable backing
    pub async fn with_durable(durable: Arc<dyn Storage>) -> Self {
        match durable.probe().await {
            Ok(()) => {
                tracing::info!("Using durable chunk storage");
                Self {
                    durable: Some(durable),
                    memory: MemoryStorage::new(),
                    memory_mode: AtomicBool::new(false),
                    warned: AtomicBool::new(false),
                }
            }
            Err(e) => {
                tracing::warn!("Durable storage unavailable, using memory: {}", e);
                Self::volatile()
            }
        }
    }

    /// Memory-only store
    pub fn volatile() -> Self {
        Self {
            durable: None,
            memory: MemoryStorage::new(),
            memory_mode: AtomicBool::new(true),
            warned: AtomicBool::new(false),
        }
    }

    pub fn is_using_memory_mode(&self) -> bool {
        self.memory_mode.load(Ordering::SeqCst)
    }

    pub fn kind(&self) -> StorageKind {
        if self.is_using_memory_mode() {
            StorageKind::Volatile
        } else {
            StorageKind::Durable
        }
    }

    /// Returns `true` exactly once after memory mode is entered
    pub fn take_memory_mode_warning(&self) -> bool {
        self.is_using_memory_mode() && !self.warned.swap(true, Ordering::SeqCst)
    }

    fn enter_memory_mode(&self, cause: &StorageError) {
        if !self.memory_mode.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                "Durable storage failed ({}); switching to memory for this process. \
                 Chunks not uploaded before teardown will be lost",
                cause
            );
        }
    }

    fn active_durable(&self) -> Option<&Arc<dyn Storage>> {
        if self.is_using_memory_mode() {
            None
        } else {
            self.durable.as_ref()
        }
    }

    pub(crate) async fn put_chunk(&self, chunk: &Chunk) -> Result<StorageKind, StorageError> {
        if let Some(durable) = self.active_durable() {
            match durable.put_chunk(chunk).await {
                Ok(()) => return Ok(StorageKind::Durable),
                Err(e) => self.enter_memory_mode(&e),
            }
        }
        self.memory.put_chunk(chunk).await?;
        Ok(StorageKind::Volatile)
    }

    /// Chunks from both backings, keyed by index; volatile copies win
    pub(crate) async fn chunks(&self, session_id: &str) -> Result<BTreeMap<u64, Chunk>, StorageError> {
        let mut merged = BTreeMap::new();

        // Chunks written before a fallback are still on disk
        if let Some(durable) = &self.durable {
            match durable.chunks(session_id).await {
                Ok(chunks) => merged.extend(chunks.into_iter().map(|c| (c.index, c))),
                Err(e) if self.is_using_memory_mode() => {
                    tracing::warn!("Could not read durable chunks for {}: {}", session_id, e)
                }
                Err(e) => return Err(e),
            }
        }

        for chunk in self.memory.chunks(session_id).await? {
            merged.insert(chunk.index, chunk);
        }
        Ok(merged)
    }

    pub(crate) async fn put_metadata(&self, metadata: &SessionMetadata) -> Result<(), StorageError> {
        match self.active_durable() {
            Some(durable) => durable.put_metadata(metadata).await,
            None => self.memory.put_metadata(metadata).await,
        }
    }

    pub(crate) async fn metadata(&self, session_id: &str) -> Result<Option<SessionMetadata>, StorageError> {
        if let Some(metadata) = self.memory.metadata(session_id).await? {
            return Ok(Some(metadata));
        }
        match &self.durable {
            Some(durable) => durable.metadata(session_id).await,
            None => Ok(None),
        }
    }

    pub(crate) async fn remove_session(&self, session_id: &str) -> Result<(), StorageError> {
        self.memory.remove_session(session_id).await?;
        if let Some(durable) = &self.durable {
            durable.remove_session(session_id).await?;
        }
        Ok(())
    }
}

//! Durable filesystem storage
//!
//! One directory per session under the storage root:
//! - `{sessionId}_chunk_{index}.bin`: raw chunk payload
//! - `{sessionId}_chunk_{index}.json`: chunk record, written after the payload
//! - `metadata.json`: session metadata
//!
//! Session ids are percent-encoded in directory and file names.

use super::backend::Storage;
use super::types::{validate_session_id, Chunk, StorageError, StorageKind};
use crate::recorder::SessionMetadata;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

const METADATA_FILE: &str = "metadata.json";
const PROBE_FILE: &str = ".probe";

/// Percent-encode a session id for use as a path component.
///
/// `.` is encoded as well so that `.` and `..` cannot name the root or its parent.
fn encode_id(session_id: &str) -> String {
    urlencoding::encode(session_id).replace('.', "%2E")
}

/// Chunk record stored next to the payload
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkRecord {
    session_id: String,
    chunk_id: String,
    index: u64,
    captured_at: DateTime<Utc>,
    size: usize,
}

/// Chunk and metadata files under a root directory
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one session, always a direct child of the root
    fn session_dir(&self, session_id: &str) -> Result<PathBuf, StorageError> {
        validate_session_id(session_id)?;
        Ok(self.root.join(encode_id(session_id)))
    }

    /// File stem for a chunk; the session id is percent-encoded
    fn chunk_stem(session_id: &str, index: u64) -> String {
        format!("{}_chunk_{}", encode_id(session_id), index)
    }

    async fn read_chunk(record_path: &Path) -> Result<Chunk, StorageError> {
        let record: ChunkRecord = serde_json::from_slice(&fs::read(record_path).await?)?;
        let payload = fs::read(record_path.with_extension("bin")).await?;

        if payload.len() != record.size {
            return Err(StorageError::Unavailable(format!(
                "chunk {} is truncated ({} of {} bytes)",
                record.chunk_id,
                payload.len(),
                record.size
            )));
        }

        Ok(Chunk {
            session_id: record.session_id,
            index: record.index,
            payload,
            captured_at: record.captured_at,
        })
    }
}

#[async_trait]
impl Storage for FileStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Durable
    }

    async fn probe(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root).await?;
        let probe = self.root.join(PROBE_FILE);
        fs::write(&probe, b"ok").await?;
        fs::remove_file(&probe).await?;
        Ok(())
    }

    async fn put_chunk(&self, chunk: &Chunk) -> Result<(), StorageError> {
        let dir = self.session_dir(&chunk.session_id)?;
        fs::create_dir_all(&dir).await?;

        let key = chunk.key();
        let stem = Self::chunk_stem(&chunk.session_id, chunk.index);
        fs::write(dir.join(format!("{}.bin", stem)), &chunk.payload).await?;

        let record = ChunkRecord {
            session_id: chunk.session_id.clone(),
            chunk_id: key.clone(),
            index: chunk.index,
            captured_at: chunk.captured_at,
            size: chunk.payload.len(),
        };
        fs::write(dir.join(format!("{}.json", stem)), serde_json::to_vec(&record)?).await?;

        tracing::debug!("Stored chunk {} ({} bytes)", key, chunk.payload.len());
        Ok(())
    }

    async fn chunks(&self, session_id: &str) -> Result<Vec<Chunk>, StorageError> {
        let dir = self.session_dir(session_id)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("{}_chunk_", encode_id(session_id));
        let mut chunks = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_record = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(&prefix) && n.ends_with(".json"))
                .unwrap_or(false);
            if !is_record {
                continue;
            }

            match Self::read_chunk(&path).await {
                Ok(chunk) => chunks.push(chunk),
                Err(e) => tracing::warn!("Skipping unreadable chunk {:?}: {}", path, e),
            }
        }

        Ok(chunks)
    }

    async fn put_metadata(&self, metadata: &SessionMetadata) -> Result<(), StorageError> {
        let dir = self.session_dir(&metadata.session_id)?;
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join(METADATA_FILE), serde_json::to_vec_pretty(metadata)?).await?;
        Ok(())
    }

    async fn metadata(&self, session_id: &str) -> Result<Option<SessionMetadata>, StorageError> {
        match fs::read(self.session_dir(session_id)?.join(METADATA_FILE)).await {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_session(&self, session_id: &str) -> Result<(), StorageError> {
        match fs::remove_dir_all(self.session_dir(session_id)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

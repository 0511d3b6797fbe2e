//! Storage types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One fragment of captured media
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub session_id: String,
    pub index: u64,
    pub payload: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl Chunk {
    /// Record key: `{sessionId}_chunk_{index}`
    pub fn key(&self) -> String {
        chunk_key(&self.session_id, self.index)
    }
}

pub fn chunk_key(session_id: &str, index: u64) -> String {
    format!("{}_chunk_{}", session_id, index)
}

/// Reject session ids that cannot name a session
pub fn validate_session_id(session_id: &str) -> Result<(), StorageError> {
    if session_id.trim().is_empty() {
        return Err(StorageError::InvalidSessionId(session_id.to_string()));
    }
    Ok(())
}

/// Which backing a store currently writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Durable,
    Volatile,
}

/// Storage-layer errors
///
/// During an active recording these are absorbed and logged.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),

    #[error("Session {0} is locked by an in-flight upload")]
    SessionBusy(String),

    #[error("Session {session_id} status cannot move from {from:?} to {to:?}")]
    StatusRegression {
        session_id: String,
        from: crate::recorder::SessionStatus,
        to: crate::recorder::SessionStatus,
    },
}

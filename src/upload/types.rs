//! Upload types

use crate::export::{Artifact, Thumbnail};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Where and how uploads are written
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Object-store prefix, e.g. `recordings`
    pub object_root: String,
    /// Records collection the upload row is inserted into
    pub records_collection: String,
    /// Bound on each network call; a timed-out call is retried once
    pub network_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            object_root: "recordings".to_string(),
            records_collection: "videos".to_string(),
            network_timeout: Duration::from_secs(30),
        }
    }
}

/// A finalized artifact plus what the record should say about it
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Supplied by the identity provider
    pub owner_id: String,
    pub session_id: String,
    pub title: String,
    pub court_id: Option<String>,
    /// Highlight offsets in seconds from session start
    pub highlight_events: Vec<f64>,
    pub duration_seconds: f64,
    pub artifact: Artifact,
    pub thumbnail: Option<Thumbnail>,
}

/// The row written to the records collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub owner_id: String,
    pub video_url: String,
    pub thumbnail_url: String,
    pub title: String,
    pub court_id: Option<String>,
    pub highlight_events: Vec<f64>,
    pub duration_seconds: f64,
}

/// Upload milestones
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UploadStage {
    Uploading,
    RemoteProcessing,
    SavingRecord,
    Done,
}

impl UploadStage {
    pub fn percent(&self) -> u8 {
        match self {
            UploadStage::Uploading => 0,
            UploadStage::RemoteProcessing => 60,
            UploadStage::SavingRecord => 80,
            UploadStage::Done => 100,
        }
    }
}

/// Upload progress information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub stage: UploadStage,
    pub percent: u8,
}

impl From<UploadStage> for UploadProgress {
    fn from(stage: UploadStage) -> Self {
        Self {
            stage,
            percent: stage.percent(),
        }
    }
}

/// Result of a successful upload
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub record: UploadRecord,
    /// Whether the local session data was purged afterwards
    pub purged: bool,
}

/// Upload errors
///
/// Every variant is raised before the local purge, so the session can be
/// uploaded again from scratch.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Upload transfer failed: {0}")]
    Transfer(String),

    #[error("Saving upload record failed: {0}")]
    Record(String),

    #[error("Session {0} is already being uploaded")]
    Busy(String),

    #[error("Upload cancelled")]
    Cancelled,
}

//! End-to-end delivery of a recorded session
//!
//! Reads the local chunks, merges them and uploads the result. Any failure
//! leaves the local session intact; only a fully recorded upload purges it.

use crate::capture::MediaFormat;
use crate::export::{MergeEngine, MergeJob, MergeProgress, QualityPreset};
use crate::recorder::{CaptureSummary, SessionMetadata, SessionStatus};
use crate::storage::{ChunkStore, SessionMetadataStore};
use crate::upload::{UploadOutcome, UploadPipeline, UploadProgress, UploadRequest};
use crate::utils::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// What to publish for one session
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub owner_id: String,
    pub session_id: String,
    pub title: String,
    pub court_id: Option<String>,
    /// Highlight offsets; `None` reads them from stored session metadata
    pub highlight_events: Option<Vec<f64>>,
    /// Format the chunks were recorded in; `None` reads it from stored
    /// session metadata
    pub source_format: Option<MediaFormat>,
    pub quality: QualityPreset,
}

impl DeliveryRequest {
    /// Deliver a session that just finished capturing
    pub fn from_summary(
        summary: &CaptureSummary,
        owner_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            session_id: summary.session_id.clone(),
            title: title.into(),
            court_id: None,
            highlight_events: Some(
                summary
                    .highlights
                    .iter()
                    .map(|h| h.timestamp_offset_seconds)
                    .collect(),
            ),
            source_format: Some(summary.format.clone()),
            quality: QualityPreset::default(),
        }
    }

    /// Deliver a session known only by id, such as one left over from a
    /// previous run. Format and highlights come from stored metadata.
    pub fn for_stored_session(
        session_id: impl Into<String>,
        owner_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            session_id: session_id.into(),
            title: title.into(),
            court_id: None,
            highlight_events: None,
            source_format: None,
            quality: QualityPreset::default(),
        }
    }

    pub fn with_court(mut self, court_id: impl Into<String>) -> Self {
        self.court_id = Some(court_id.into());
        self
    }

    pub fn with_quality(mut self, quality: QualityPreset) -> Self {
        self.quality = quality;
        self
    }
}

/// Progress across both phases of a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "progress", rename_all = "camelCase")]
pub enum DeliveryProgress {
    Merge(MergeProgress),
    Upload(UploadProgress),
}

/// Collaborators needed to deliver sessions
pub struct Delivery {
    pub chunks: ChunkStore,
    pub metadata: SessionMetadataStore,
    pub engine: Arc<MergeEngine>,
    pub uploader: Arc<UploadPipeline>,
}

impl Delivery {
    /// Read, merge and upload one session
    pub async fn deliver_session<F>(
        &self,
        request: DeliveryRequest,
        cancel: Arc<AtomicBool>,
        progress: F,
    ) -> AppResult<UploadOutcome>
    where
        F: Fn(DeliveryProgress) + Send + Sync + 'static,
    {
        let progress = Arc::new(progress);
        let session_id = request.session_id.clone();

        let chunks = self.chunks.read_all(&session_id).await?;
        if chunks.is_empty() {
            return Err(AppError::NothingToDeliver(format!(
                "session {} has no local chunks",
                session_id
            )));
        }

        let stored = if request.highlight_events.is_none() || request.source_format.is_none() {
            self.stored_metadata(&session_id).await
        } else {
            None
        };
        let highlight_events = match request.highlight_events {
            Some(events) => events,
            None => stored
                .as_ref()
                .map(SessionMetadata::highlight_offsets)
                .unwrap_or_default(),
        };
        let source_format = request
            .source_format
            .or_else(|| stored.and_then(|m| m.format))
            .ok_or_else(|| AppError::UnknownFormat(session_id.clone()))?;

        let job = MergeJob {
            session_id: session_id.clone(),
            chunks,
            source_format,
            quality: request.quality,
        };
        let merge_progress = progress.clone();
        let merged = self
            .engine
            .merge(job, cancel.clone(), move |p| {
                merge_progress(DeliveryProgress::Merge(p))
            })
            .await?;

        let upload = UploadRequest {
            owner_id: request.owner_id,
            session_id,
            title: request.title,
            court_id: request.court_id,
            highlight_events,
            duration_seconds: merged.artifact.duration_seconds,
            artifact: merged.artifact,
            thumbnail: Some(merged.thumbnail),
        };
        let outcome = self
            .uploader
            .run(upload, &cancel, |p| progress(DeliveryProgress::Upload(p)))
            .await?;

        Ok(outcome)
    }

    async fn stored_metadata(&self, session_id: &str) -> Option<SessionMetadata> {
        match self.metadata.get(session_id).await {
            Ok(Some(metadata)) => {
                if metadata.status == SessionStatus::Recording {
                    tracing::warn!(
                        "Delivering session {} whose capture never finished",
                        session_id
                    );
                }
                Some(metadata)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Could not read metadata for session {}: {}", session_id, e);
                None
            }
        }
    }
}

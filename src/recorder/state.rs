//! Recording state management
//!
//! Defines the capture state machine, session metadata and highlight markers.

use crate::capture::{FacingMode, MediaFormat, PlatformClass};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Terminal and non-terminal status of a recorded session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Recording,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Recording)
    }

    /// Status only moves forward: Recording -> Completed | Failed
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        match self {
            SessionStatus::Recording => true,
            terminal => *terminal == next,
        }
    }
}

/// Current state of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "status")]
pub enum CaptureState {
    /// No stream held
    Idle,
    /// Stream live, not recording
    Armed,
    /// Recording chunks
    Recording,
    /// Recording finished
    Stopped(SessionStatus),
}

impl Default for CaptureState {
    fn default() -> Self {
        Self::Idle
    }
}

/// A user-marked moment within a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightMarker {
    pub id: String,
    /// Seconds since the session started
    pub timestamp_offset_seconds: f64,
    pub label: String,
}

impl HighlightMarker {
    pub fn new(timestamp_offset_seconds: f64, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp_offset_seconds,
            label: label.into(),
        }
    }
}

/// Persisted description of a session
///
/// A best-effort cache: the capture session holds the authoritative copy
/// in memory until it stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub chunk_count: u64,
    pub highlight_events: Vec<HighlightMarker>,
    /// Negotiated recording format, needed to merge after a restart
    #[serde(default)]
    pub format: Option<MediaFormat>,
}

impl SessionMetadata {
    /// Metadata for a session starting now
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            start_time: Utc::now(),
            end_time: None,
            status: SessionStatus::Recording,
            chunk_count: 0,
            highlight_events: Vec::new(),
            format: None,
        }
    }

    pub fn with_format(mut self, format: MediaFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Highlight offsets in seconds, in marking order
    pub fn highlight_offsets(&self) -> Vec<f64> {
        self.highlight_events
            .iter()
            .map(|m| m.timestamp_offset_seconds)
            .collect()
    }
}

/// Timing and platform settings for a capture session
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// How often the recorder emits a chunk
    pub chunk_interval: Duration,
    /// How often a `Duration` event is broadcast
    pub duration_tick: Duration,
    /// Highlights are rejected before this much recording time
    pub min_highlight_elapsed: Duration,
    pub platform: PlatformClass,
    /// Camera used when the session acquires a stream itself
    pub facing: FacingMode,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_interval: Duration::from_secs(10),
            duration_tick: Duration::from_secs(1),
            min_highlight_elapsed: Duration::from_secs(5),
            platform: PlatformClass::default(),
            facing: FacingMode::default(),
        }
    }
}

/// Events emitted during capture
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    Started { session_id: String },
    ChunkStored { index: u64 },
    /// Wall-clock recording duration in seconds
    Duration(f64),
    HighlightMarked(HighlightMarker),
    CameraSwitched(FacingMode),
    /// Storage fell back to memory; unflushed chunks are lost on teardown
    MemoryMode,
    /// A write was absorbed; recording continues
    PersistenceWarning(String),
    Stopped { session_id: String, status: SessionStatus },
}

/// Result of a finished capture
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSummary {
    pub session_id: String,
    pub status: SessionStatus,
    pub chunk_count: u64,
    pub duration_seconds: f64,
    pub highlights: Vec<HighlightMarker>,
    pub format: MediaFormat,
    pub memory_mode: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_monotonic() {
        assert!(SessionStatus::Recording.can_transition_to(SessionStatus::Completed));
        assert!(SessionStatus::Recording.can_transition_to(SessionStatus::Failed));
        assert!(!SessionStatus::Completed.can_transition_to(SessionStatus::Recording));
        assert!(!SessionStatus::Failed.can_transition_to(SessionStatus::Completed));
        assert!(SessionStatus::Completed.can_transition_to(SessionStatus::Completed));
    }

    #[test]
    fn test_metadata_serializes_camel_case() {
        let mut metadata = SessionMetadata::new("s1");
        metadata.highlight_events.push(HighlightMarker::new(12.5, "Ace"));

        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["status"], "recording");
        assert_eq!(json["highlightEvents"][0]["timestampOffsetSeconds"], 12.5);
        assert_eq!(metadata.highlight_offsets(), vec![12.5]);
    }
}

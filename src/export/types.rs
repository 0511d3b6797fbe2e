//! Merge types and configuration
//!
//! This module defines the types used for merging recorded chunks into one
//! deliverable artifact, progress tracking, and error handling.

use crate::capture::{Container, MediaFormat};
use crate::storage::Chunk;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Merge quality presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    High,
    Medium,
    Low,
}

impl Default for QualityPreset {
    fn default() -> Self {
        Self::Medium
    }
}

impl QualityPreset {
    /// Get the CRF value for H.264 encoding
    /// Lower values = higher quality, larger files
    pub fn crf(&self) -> u8 {
        match self {
            QualityPreset::High => 18,
            QualityPreset::Medium => 23,
            QualityPreset::Low => 28,
        }
    }

    /// Get the FFmpeg preset for H.264 encoding
    pub fn speed_preset(&self) -> &'static str {
        match self {
            QualityPreset::High => "slow",
            QualityPreset::Medium => "medium",
            QualityPreset::Low => "veryfast",
        }
    }

    /// Peak video bitrate
    pub fn video_bitrate(&self) -> &'static str {
        match self {
            QualityPreset::High => "8M",
            QualityPreset::Medium => "4M",
            QualityPreset::Low => "1500k",
        }
    }
}

/// Explicit encode parameters handed to the toolchain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeParams {
    pub container: Container,
    pub video_codec: &'static str,
    pub audio_codec: &'static str,
    pub crf: u8,
    pub speed_preset: &'static str,
    pub video_bitrate: &'static str,
    pub audio_bitrate: &'static str,
}

impl EncodeParams {
    /// Web-playable H.264/AAC MP4 for a preset
    pub fn for_preset(quality: QualityPreset) -> Self {
        Self {
            container: Container::Mp4,
            video_codec: "libx264",
            audio_codec: "aac",
            crf: quality.crf(),
            speed_preset: quality.speed_preset(),
            video_bitrate: quality.video_bitrate(),
            audio_bitrate: "128k",
        }
    }
}

/// One merge invocation; not persisted
#[derive(Debug, Clone)]
pub struct MergeJob {
    pub session_id: String,
    /// Chunks in index order, all in `source_format`
    pub chunks: Vec<Chunk>,
    pub source_format: MediaFormat,
    pub quality: QualityPreset,
}

/// The finished, web-playable recording
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub container: Container,
    pub video_codec: String,
    pub audio_codec: String,
    pub duration_seconds: f64,
}

/// PNG still taken from the artifact
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Thumbnail {
    pub const EXTENSION: &'static str = "png";
    pub const CONTENT_TYPE: &'static str = "image/png";
}

/// Merge result
#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub artifact: Artifact,
    pub thumbnail: Thumbnail,
}

/// Merge progress stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeStage {
    LoadingToolchain,
    Staging,
    Transcoding,
    Finalizing,
    Complete,
}

impl MergeStage {
    /// Disjoint `[start, end]` percent range of a stage
    pub fn range(&self) -> (u8, u8) {
        match self {
            MergeStage::LoadingToolchain => (0, 10),
            MergeStage::Staging => (10, 25),
            MergeStage::Transcoding => (25, 90),
            MergeStage::Finalizing => (90, 99),
            MergeStage::Complete => (100, 100),
        }
    }
}

/// Merge progress information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeProgress {
    /// Progress percentage (0 to 100)
    pub percent: u8,
    pub stage: MergeStage,
}

/// Merge errors
///
/// None of these touch the chunk store; a failed merge can be retried.
#[derive(Error, Debug)]
pub enum MergeError {
    /// The codec toolchain cannot run in this environment
    #[error("Toolchain error: {0}")]
    Toolchain(String),

    /// The input chunks could not be merged
    #[error("Processing error: {0}")]
    Processing(String),

    #[error("A merge for session {0} is already running")]
    Busy(String),

    #[error("Merge cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
